use std::{collections::HashSet, net::Ipv4Addr, time::Duration};

use futures::{future, stream, StreamExt};
use powermate_common::{DeviceAddress, DiscoveryConfig, NetworkIdentifier};
use tracing::{debug, info, warn};

use crate::device::DeviceClient;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkContext {
    pub network_id: Option<NetworkIdentifier>,
    pub local_ip: Option<Ipv4Addr>,
    pub remembered: Vec<DeviceAddress>,
    pub excluded: Vec<DeviceAddress>,
}

impl NetworkContext {
    pub fn new(network_id: Option<NetworkIdentifier>, local_ip: Option<Ipv4Addr>) -> Self {
        Self {
            network_id,
            local_ip,
            remembered: Vec::new(),
            excluded: Vec::new(),
        }
    }

    pub fn with_remembered(mut self, address: DeviceAddress) -> Self {
        self.remembered.push(address);
        self
    }
}

#[derive(Clone)]
pub struct Discovery {
    device: DeviceClient,
    config: DiscoveryConfig,
}

impl Discovery {
    pub fn new(device: DeviceClient, config: DiscoveryConfig) -> Self {
        Self { device, config }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Remembered addresses first, then the local /24, then the fixed fallbacks.
    /// Duplicates keep their first position.
    pub fn list_candidates(&self, context: &NetworkContext) -> Vec<DeviceAddress> {
        let mut seen: HashSet<DeviceAddress> = context.excluded.iter().copied().collect();
        let mut candidates = Vec::new();
        let mut push = |address: DeviceAddress| {
            if seen.insert(address) {
                candidates.push(address);
            }
        };

        for address in &context.remembered {
            push(*address);
        }

        if self.config.scan_subnet {
            if let Some(local) = context.local_ip {
                let [a, b, c, own] = local.octets();
                for host in 1..=254u8 {
                    if host != own {
                        push(DeviceAddress::new(Ipv4Addr::new(a, b, c, host)));
                    }
                }
            }
        }

        for text in &self.config.fallback_addresses {
            match DeviceAddress::parse(text) {
                Ok(address) => push(address),
                Err(err) => warn!("ignoring fallback address: {err}"),
            }
        }

        candidates
    }

    pub async fn probe(&self, address: DeviceAddress) -> bool {
        let timeout = Duration::from_millis(self.config.probe_timeout_ms);
        match self.device.info(address, timeout).await {
            Ok(info) if info.matches(&self.config.device_name) => true,
            Ok(info) => {
                debug!(%address, device = %info.device, "probe answered by another device");
                false
            }
            Err(err) => {
                debug!(%address, "probe failed: {err}");
                false
            }
        }
    }

    pub async fn discover(&self, context: &NetworkContext) -> Vec<DeviceAddress> {
        let candidates = self.list_candidates(context);
        let batch_size = self.config.batch_size.max(1);

        let confirmed: HashSet<DeviceAddress> = stream::iter(candidates.iter().copied())
            .map(|address| async move { self.probe(address).await.then_some(address) })
            .buffer_unordered(batch_size)
            .filter_map(future::ready)
            .collect()
            .await;

        info!(
            "discovery confirmed {} device(s) among {} candidates",
            confirmed.len(),
            candidates.len()
        );

        candidates
            .into_iter()
            .filter(|address| confirmed.contains(address))
            .collect()
    }
}
