use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::endpoints::DEVICE_PORT;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("invalid device address: {0:?}")]
    InvalidAddress(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress {
    ip: Ipv4Addr,
    #[serde(default = "default_port")]
    port: u16,
}

fn default_port() -> u16 {
    DEVICE_PORT
}

impl DeviceAddress {
    pub fn new(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            port: DEVICE_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn parse(text: &str) -> Result<Self, AddressError> {
        let invalid = || AddressError::InvalidAddress(text.to_string());

        let (quad, port) = match text.trim().split_once(':') {
            Some((quad, port)) => {
                if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                match port.parse::<u16>() {
                    Ok(port) if port != 0 => (quad, port),
                    _ => return Err(invalid()),
                }
            }
            None => (text.trim(), DEVICE_PORT),
        };

        let mut octets = [0u8; 4];
        let mut parts = quad.split('.');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            *octet = part.parse::<u8>().map_err(|_| invalid())?;
        }

        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self::new(Ipv4Addr::from(octets)).with_port(port))
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }

    pub fn base_url(&self) -> String {
        format!("http://{self}")
    }
}

impl From<Ipv4Addr> for DeviceAddress {
    fn from(ip: Ipv4Addr) -> Self {
        Self::new(ip)
    }
}

impl FromStr for DeviceAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port == DEVICE_PORT {
            write!(f, "{}", self.ip)
        } else {
            write!(f, "{}:{}", self.ip, self.port)
        }
    }
}
