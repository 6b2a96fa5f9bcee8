use serde::{Deserialize, Serialize};

use crate::endpoints::DEVICE_NAME;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub request_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub manual_cooldown_ms: u64,
    pub reconcile_interval_ms: u64,
    pub refresh_delay_ms: u64,
    pub failure_threshold: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            poll_interval_ms: 5_000,
            manual_cooldown_ms: 2_000,
            reconcile_interval_ms: 10_000,
            refresh_delay_ms: 500,
            failure_threshold: 1,
        }
    }
}

impl ClientConfig {
    pub fn sanitize(&mut self) {
        self.request_timeout_ms = self.request_timeout_ms.clamp(500, 30_000);
        self.poll_interval_ms = self.poll_interval_ms.clamp(500, 300_000);
        self.manual_cooldown_ms = self.manual_cooldown_ms.min(60_000);
        self.reconcile_interval_ms = self.reconcile_interval_ms.clamp(1_000, 600_000);
        self.refresh_delay_ms = self.refresh_delay_ms.min(10_000);
        self.failure_threshold = self.failure_threshold.max(1);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub batch_size: usize,
    pub probe_timeout_ms: u64,
    pub scan_subnet: bool,
    pub fallback_addresses: Vec<String>,
    pub device_name: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            probe_timeout_ms: 3_000,
            scan_subnet: true,
            fallback_addresses: [
                "192.168.4.1",
                "192.168.1.100",
                "192.168.0.100",
                "192.168.254.100",
                "192.168.43.58",
                "10.0.0.100",
                "172.16.0.100",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            device_name: DEVICE_NAME.to_string(),
        }
    }
}

impl DiscoveryConfig {
    pub fn sanitize(&mut self) {
        self.batch_size = self.batch_size.clamp(1, 64);
        self.probe_timeout_ms = self.probe_timeout_ms.clamp(200, 30_000);
        if self.device_name.trim().is_empty() {
            self.device_name = DEVICE_NAME.to_string();
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub client: ClientConfig,
    pub discovery: DiscoveryConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.client.sanitize();
        self.discovery.sanitize();
    }
}
