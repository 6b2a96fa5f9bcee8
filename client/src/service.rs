use std::{sync::Arc, time::Duration};

use powermate_common::{
    ConnectionState, DeviceAddress, DeviceStatus, RelayControlMode, RelayId, RelaySchedule,
    RuntimeConfig,
};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    arbitrator::{ModeArbitrator, ToggleOutcome},
    connection::ConnectionManager,
    device::DeviceClient,
    discovery::{Discovery, NetworkContext},
    error::Result,
    poller::{StatusPoller, SubscriptionToken},
    store::AddressStore,
    transport::DeviceTransport,
};

pub struct PowerMate {
    config: RuntimeConfig,
    device: DeviceClient,
    discovery: Discovery,
    poller: StatusPoller,
    connection: ConnectionManager,
    arbitrator: ModeArbitrator,
}

impl PowerMate {
    pub fn create(
        mut config: RuntimeConfig,
        transport: Arc<dyn DeviceTransport>,
        store: Arc<dyn AddressStore>,
        network: NetworkContext,
    ) -> Self {
        config.sanitize();

        let device = DeviceClient::new(
            transport,
            Duration::from_millis(config.client.request_timeout_ms),
        );
        let (state, receiver) = watch::channel(ConnectionState::Disconnected);
        let poller = StatusPoller::new(device.clone(), receiver.clone());
        let discovery = Discovery::new(device.clone(), config.discovery.clone());
        let connection = ConnectionManager::new(
            &config.client,
            state,
            discovery.clone(),
            store.clone(),
            poller.clone(),
            network,
        );
        let arbitrator = ModeArbitrator::new(
            &config.client,
            device.clone(),
            poller.clone(),
            receiver,
            store,
        );

        Self {
            config,
            device,
            discovery,
            poller,
            connection,
            arbitrator,
        }
    }

    pub async fn open(
        config: RuntimeConfig,
        transport: Arc<dyn DeviceTransport>,
        store: Arc<dyn AddressStore>,
        network: NetworkContext,
    ) -> Self {
        let service = Self::create(config, transport, store, network);
        if let Err(err) = service.arbitrator.restore_modes().await {
            warn!("failed to restore relay modes: {err}");
        }
        service
    }

    pub async fn dispose(&self) {
        self.arbitrator.dispose();
        self.connection.disconnect().await;
        info!("client disposed");
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn device(&self) -> &DeviceClient {
        &self.device
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn poller(&self) -> &StatusPoller {
        &self.poller
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn arbitrator(&self) -> &ModeArbitrator {
        &self.arbitrator
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub async fn connect(&self, address: &str) -> Result<bool> {
        self.connection.connect(address).await
    }

    pub async fn auto_connect(&self) -> Result<DeviceAddress> {
        self.connection.auto_connect().await
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    pub async fn handle_network_change(&self, network: NetworkContext) -> Result<DeviceAddress> {
        self.connection.handle_network_change(network).await
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionToken
    where
        F: Fn(&DeviceStatus) + Send + Sync + 'static,
    {
        self.poller.subscribe(callback)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.poller.unsubscribe(token)
    }

    pub async fn refresh(&self) -> Result<DeviceStatus> {
        self.poller.refresh().await
    }

    pub fn mode(&self, relay: RelayId) -> RelayControlMode {
        self.arbitrator.mode(relay)
    }

    pub async fn toggle(&self, relay: RelayId, override_schedule: bool) -> Result<ToggleOutcome> {
        self.arbitrator.toggle(relay, override_schedule).await
    }

    pub async fn enable_manual(&self, relay: RelayId) -> Result<()> {
        self.arbitrator.enable_manual(relay).await
    }

    pub async fn enable_timer(&self, relay: RelayId) {
        self.arbitrator.enable_timer(relay).await;
    }

    pub async fn set_schedule(&self, relay: RelayId, schedule: RelaySchedule) -> Result<()> {
        self.arbitrator.set_schedule(relay, schedule).await
    }

    pub async fn clear_override(&self, relay: RelayId) -> Result<()> {
        self.arbitrator.clear_override(relay).await
    }
}
