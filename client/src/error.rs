use powermate_common::{AddressError, ControlError, RelayId, TimeError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),
    #[error("device responded with HTTP {0}")]
    HttpStatus(u16),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid device address: {0:?}")]
    InvalidAddress(String),
    #[error("request timed out")]
    Timeout,
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),
    #[error("device responded with HTTP {0}")]
    HttpStatus(u16),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("relay {0} already has an operation in flight")]
    Busy(RelayId),
    #[error("relay {0} is in manual mode; switch it to timer mode before editing its schedule")]
    ModeConflict(RelayId),
    #[error("no device found")]
    NoDeviceFound,
    #[error("not connected to a device")]
    NotConnected,
    #[error(transparent)]
    InvalidTime(#[from] TimeError),
    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => Self::Timeout,
            TransportError::NetworkUnreachable(reason) => Self::NetworkUnreachable(reason),
            TransportError::HttpStatus(code) => Self::HttpStatus(code),
            TransportError::MalformedResponse(reason) => Self::MalformedResponse(reason),
        }
    }
}

impl From<ControlError> for Error {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::Busy(relay) => Self::Busy(relay),
            ControlError::ModeConflict(relay) => Self::ModeConflict(relay),
            ControlError::InvalidTime(err) => Self::InvalidTime(err),
        }
    }
}

impl From<AddressError> for Error {
    fn from(err: AddressError) -> Self {
        match err {
            AddressError::InvalidAddress(text) => Self::InvalidAddress(text),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
