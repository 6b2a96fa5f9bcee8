pub mod address;
pub mod config;
pub mod control;
pub mod endpoints;
pub mod network;
pub mod schedule;
pub mod time;
pub mod types;

pub use address::{AddressError, DeviceAddress};
pub use config::{ClientConfig, DiscoveryConfig, RuntimeConfig};
pub use control::{ControlError, OperationTicket, RelayArbiter, RelayCommand, ToggleDecision};
pub use endpoints::*;
pub use network::{DeviceBindings, NetworkDevice, NetworkIdentifier};
pub use schedule::{is_time_in_range, RelaySchedule};
pub use time::{Period, TimeError, NO_TIME};
pub use types::{
    ConnectionState, DeviceInfo, DeviceStatus, RelayControlMode, RelayId, RelayModes, RelayStatus,
    StatusPayload,
};
