use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use powermate_common::{ClientConfig, ConnectionState, DeviceAddress};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    discovery::{Discovery, NetworkContext},
    error::{Error, Result},
    lock,
    poller::StatusPoller,
    store::AddressStore,
};

pub struct ConnectionManager {
    state: Arc<watch::Sender<ConnectionState>>,
    discovery: Discovery,
    store: Arc<dyn AddressStore>,
    poller: StatusPoller,
    network: Mutex<NetworkContext>,
    poll_interval: Duration,
    operation: tokio::sync::Mutex<()>,
}

impl ConnectionManager {
    /// `state` must be the sender side of the channel `poller` watches.
    pub fn new(
        config: &ClientConfig,
        state: watch::Sender<ConnectionState>,
        discovery: Discovery,
        store: Arc<dyn AddressStore>,
        poller: StatusPoller,
        network: NetworkContext,
    ) -> Self {
        let state = Arc::new(state);

        let threshold = config.failure_threshold.max(1);
        let hook_state = state.clone();
        poller.on_failure(move |failures, err| {
            if failures < threshold {
                return;
            }
            let dropped = hook_state.send_if_modified(|current| {
                if current.is_connected() {
                    *current = ConnectionState::Disconnected;
                    true
                } else {
                    false
                }
            });
            if dropped {
                warn!("device unreachable after {failures} failed poll(s): {err}");
            }
        });

        Self {
            state,
            discovery,
            store,
            poller,
            network: Mutex::new(network),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            operation: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    pub fn current_address(&self) -> Option<DeviceAddress> {
        self.state.borrow().address()
    }

    pub fn network(&self) -> NetworkContext {
        lock(&self.network).clone()
    }

    pub async fn connect(&self, address: &str) -> Result<bool> {
        let address = DeviceAddress::parse(address)?;
        let _guard = self.operation.lock().await;
        Ok(self.try_connect(address).await)
    }

    pub async fn auto_connect(&self) -> Result<DeviceAddress> {
        let _guard = self.operation.lock().await;
        self.auto_connect_locked().await
    }

    pub async fn disconnect(&self) {
        let _guard = self.operation.lock().await;
        self.poller.stop();
        let previous = self.state.send_replace(ConnectionState::Disconnected);
        if let Some(address) = previous.address() {
            info!(%address, "disconnected");
        }
    }

    pub async fn handle_network_change(&self, network: NetworkContext) -> Result<DeviceAddress> {
        let _guard = self.operation.lock().await;
        info!(
            network = network.network_id.as_ref().map(|id| id.as_str()).unwrap_or("unknown"),
            "network changed"
        );
        *lock(&self.network) = network;
        self.poller.stop();
        self.state.send_replace(ConnectionState::Disconnected);
        self.auto_connect_locked().await
    }

    async fn auto_connect_locked(&self) -> Result<DeviceAddress> {
        let mut context = self.network();

        if let Some(network) = &context.network_id {
            match self.store.get_remembered_address(network).await {
                Ok(Some(address)) => {
                    if self.try_connect(address).await {
                        return Ok(address);
                    }
                    info!(%address, "remembered device did not answer; running discovery");
                    context.excluded.push(address);
                }
                Ok(None) => {}
                Err(err) => warn!("failed to read remembered device: {err}"),
            }
        }

        self.state.send_replace(ConnectionState::Connecting);
        let found = self.discovery.discover(&context).await;
        match found.first() {
            Some(address) => {
                self.establish(*address).await;
                Ok(*address)
            }
            None => {
                self.poller.stop();
                self.state.send_replace(ConnectionState::Disconnected);
                warn!("no device found");
                Err(Error::NoDeviceFound)
            }
        }
    }

    async fn try_connect(&self, address: DeviceAddress) -> bool {
        let previous = self.state.send_replace(ConnectionState::Connecting);
        if self.discovery.probe(address).await {
            self.establish(address).await;
            true
        } else {
            warn!(%address, "device did not answer");
            self.state.send_replace(previous);
            false
        }
    }

    async fn establish(&self, address: DeviceAddress) {
        self.state
            .send_replace(ConnectionState::Connected(address));
        info!(%address, "connected");

        let network = lock(&self.network).network_id.clone();
        if let Some(network) = network {
            if let Err(err) = self.store.remember_address(&network, address).await {
                warn!(%address, "failed to remember device for {network}: {err}");
            }
        }

        self.poller.start(self.poll_interval);
    }
}
