use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::DeviceAddress;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkIdentifier(String);

impl NetworkIdentifier {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn wifi(ssid: &str) -> Self {
        Self(format!("wifi_{ssid}"))
    }

    pub fn cellular(carrier: Option<&str>) -> Self {
        Self(format!("cellular_{}", carrier.unwrap_or("unknown")))
    }

    pub fn other(kind: &str) -> Self {
        Self(format!("other_{kind}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDevice {
    pub network: NetworkIdentifier,
    pub address: DeviceAddress,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceBindings {
    devices: Vec<NetworkDevice>,
}

impl DeviceBindings {
    pub fn new(devices: Vec<NetworkDevice>) -> Self {
        let mut bindings = Self::default();
        for device in devices {
            match bindings.position(&device.network) {
                Some(index) if bindings.devices[index].timestamp < device.timestamp => {
                    bindings.devices[index] = device;
                }
                Some(_) => {}
                None => bindings.devices.push(device),
            }
        }
        bindings
    }

    pub fn get(&self, network: &NetworkIdentifier) -> Option<&NetworkDevice> {
        self.devices.iter().find(|device| &device.network == network)
    }

    pub fn remember(&mut self, network: NetworkIdentifier, address: DeviceAddress, timestamp: i64) {
        let device = NetworkDevice {
            network,
            address,
            timestamp,
        };
        match self.position(&device.network) {
            Some(index) => self.devices[index] = device,
            None => self.devices.push(device),
        }
    }

    pub fn devices(&self) -> &[NetworkDevice] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn position(&self, network: &NetworkIdentifier) -> Option<usize> {
        self.devices
            .iter()
            .position(|device| &device.network == network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    fn address(last: u8) -> DeviceAddress {
        DeviceAddress::new(Ipv4Addr::new(192, 168, 1, last))
    }

    #[test]
    fn identifiers_follow_connection_type() {
        assert_eq!(NetworkIdentifier::wifi("home").as_str(), "wifi_home");
        assert_eq!(NetworkIdentifier::cellular(None).as_str(), "cellular_unknown");
        assert_eq!(NetworkIdentifier::other("ethernet").as_str(), "other_ethernet");
    }

    #[test]
    fn most_recent_binding_wins() {
        let home = NetworkIdentifier::wifi("home");
        let mut bindings = DeviceBindings::default();

        bindings.remember(home.clone(), address(10), 1_000);
        bindings.remember(home.clone(), address(20), 2_000);
        bindings.remember(NetworkIdentifier::wifi("office"), address(30), 1_500);

        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings.get(&home).unwrap().address, address(20));
    }

    #[test]
    fn loading_keeps_newest_duplicate() {
        let home = NetworkIdentifier::wifi("home");
        let bindings = DeviceBindings::new(vec![
            NetworkDevice {
                network: home.clone(),
                address: address(20),
                timestamp: 2_000,
            },
            NetworkDevice {
                network: home.clone(),
                address: address(10),
                timestamp: 1_000,
            },
        ]);

        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings.get(&home).unwrap().address, address(20));
    }
}
