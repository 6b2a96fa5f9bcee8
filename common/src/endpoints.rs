pub const DEVICE_PORT: u16 = 80;
pub const DEVICE_NAME: &str = "PowerMate";
pub const RELAY_COUNT: usize = 2;

pub const ENDPOINT_STATUS: &str = "/status";
pub const ENDPOINT_SET_RELAY: &str = "/set";
pub const ENDPOINT_SET_TIMER: &str = "/settimer";
pub const ENDPOINT_CLEAR_OVERRIDE: &str = "/clearoverride";
pub const ENDPOINT_INFO: &str = "/info";

pub const PARAM_RELAY: &str = "relay";
pub const PARAM_STATE: &str = "state";
pub const PARAM_OVERRIDE: &str = "override";
pub const PARAM_ON: &str = "on";
pub const PARAM_OFF: &str = "off";
