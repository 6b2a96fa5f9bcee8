use std::{
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use powermate_common::{
    ClientConfig, ConnectionState, DeviceAddress, RelayArbiter, RelayControlMode, RelayId,
    RelaySchedule,
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    device::DeviceClient,
    error::{Error, Result},
    lock,
    poller::StatusPoller,
    store::AddressStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub relay: RelayId,
    pub on: bool,
    pub override_applied: bool,
    pub timer_may_reassert: bool,
}

#[derive(Clone)]
pub struct ModeArbitrator {
    inner: Arc<ArbitratorInner>,
}

struct ArbitratorInner {
    arbiter: Mutex<RelayArbiter>,
    device: DeviceClient,
    poller: StatusPoller,
    connection: watch::Receiver<ConnectionState>,
    store: Arc<dyn AddressStore>,
    refresh_delay: Duration,
    reconcile_interval: Duration,
    reconciler: Mutex<Option<JoinHandle<()>>>,
    epoch: Instant,
}

impl ModeArbitrator {
    pub fn new(
        config: &ClientConfig,
        device: DeviceClient,
        poller: StatusPoller,
        connection: watch::Receiver<ConnectionState>,
        store: Arc<dyn AddressStore>,
    ) -> Self {
        Self {
            inner: Arc::new(ArbitratorInner {
                arbiter: Mutex::new(RelayArbiter::new(config.manual_cooldown_ms)),
                device,
                poller,
                connection,
                store,
                refresh_delay: Duration::from_millis(config.refresh_delay_ms),
                reconcile_interval: Duration::from_millis(config.reconcile_interval_ms),
                reconciler: Mutex::new(None),
                epoch: Instant::now(),
            }),
        }
    }

    pub async fn restore_modes(&self) -> Result<()> {
        let modes = self.inner.store.relay_modes().await?;
        let any_manual = {
            let mut arbiter = lock(&self.inner.arbiter);
            arbiter.restore_modes(modes);
            arbiter.has_manual_relays()
        };
        debug!(?modes, "relay modes restored");

        if any_manual {
            self.ensure_reconciler();
        }
        Ok(())
    }

    pub fn mode(&self, relay: RelayId) -> RelayControlMode {
        lock(&self.inner.arbiter).mode(relay)
    }

    pub fn is_busy(&self, relay: RelayId) -> bool {
        let now_ms = self.inner.now_ms();
        lock(&self.inner.arbiter).is_busy(relay, now_ms)
    }

    pub fn manual_state(&self, relay: RelayId) -> Option<bool> {
        lock(&self.inner.arbiter).manual_state(relay)
    }

    pub async fn enable_manual(&self, relay: RelayId) -> Result<()> {
        let inner = &self.inner;
        let address = inner.connected_address()?;
        let physical_state = inner.poller.latest().map(|status| status.relay(relay).on);

        let (ticket, command) = {
            let now_ms = inner.now_ms();
            lock(&inner.arbiter).begin_manual(relay, physical_state, now_ms)?
        };

        let result = inner.device.execute(address, command).await;
        let now_ms = inner.now_ms();
        lock(&inner.arbiter).finish_manual(ticket, result.is_ok(), now_ms);

        if let Err(err) = result {
            warn!(%relay, "failed to enter manual mode: {err}");
            return Err(err.into());
        }

        info!(%relay, "manual mode enabled");
        inner.save_modes().await;
        self.ensure_reconciler();
        inner.poller.schedule_refresh(inner.refresh_delay);
        Ok(())
    }

    /// Local bookkeeping only. The device keeps its neutral schedule until a new
    /// one is set explicitly.
    pub async fn enable_timer(&self, relay: RelayId) {
        let any_manual = {
            let mut arbiter = lock(&self.inner.arbiter);
            arbiter.enable_timer(relay);
            arbiter.has_manual_relays()
        };
        info!(%relay, "timer mode enabled");
        self.inner.save_modes().await;

        if !any_manual {
            self.stop_reconciler();
        }
    }

    pub async fn toggle(&self, relay: RelayId, requested_override: bool) -> Result<ToggleOutcome> {
        let inner = &self.inner;
        let address = inner.connected_address()?;
        if self.is_busy(relay) {
            return Err(Error::Busy(relay));
        }
        let current_on = match inner.poller.latest() {
            Some(status) => status.relay(relay).on,
            None => inner.device.status(address).await?.relay(relay).on,
        };

        let decision = {
            let now_ms = inner.now_ms();
            lock(&inner.arbiter).begin_toggle(relay, current_on, requested_override, now_ms)?
        };

        let result = inner.device.execute(address, decision.command).await;
        lock(&inner.arbiter)
            .finish_toggle(decision.ticket, result.is_ok().then_some(decision.target_on));
        result?;

        if decision.timer_may_reassert {
            info!(%relay, on = decision.target_on, "quick toggle; the timer may re-assert itself");
        } else {
            info!(%relay, on = decision.target_on, "relay toggled with override");
        }
        inner.poller.schedule_refresh(inner.refresh_delay);

        Ok(ToggleOutcome {
            relay,
            on: decision.target_on,
            override_applied: decision.override_applied,
            timer_may_reassert: decision.timer_may_reassert,
        })
    }

    pub async fn set_schedule(&self, relay: RelayId, schedule: RelaySchedule) -> Result<()> {
        let inner = &self.inner;
        let (ticket, command) = lock(&inner.arbiter).begin_schedule(relay, schedule)?;
        let address = match inner.connected_address() {
            Ok(address) => address,
            Err(err) => {
                lock(&inner.arbiter).finish(ticket);
                return Err(err);
            }
        };

        let result = inner.device.execute(address, command).await;
        lock(&inner.arbiter).finish(ticket);
        result?;
        info!(%relay, schedule = %schedule.describe(), "schedule updated");
        inner.poller.schedule_refresh(inner.refresh_delay);
        Ok(())
    }

    pub async fn clear_override(&self, relay: RelayId) -> Result<()> {
        let inner = &self.inner;
        let address = inner.connected_address()?;
        let (ticket, command) = {
            let now_ms = inner.now_ms();
            lock(&inner.arbiter).begin_clear_override(relay, now_ms)?
        };

        let result = inner.device.execute(address, command).await;
        lock(&inner.arbiter).finish(ticket);
        result?;

        info!(%relay, "device override cleared");
        inner.poller.schedule_refresh(inner.refresh_delay);
        Ok(())
    }

    pub async fn reconcile(&self) -> Result<usize> {
        self.inner.reconcile().await
    }

    pub fn is_reconciling(&self) -> bool {
        lock(&self.inner.reconciler)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn dispose(&self) {
        self.stop_reconciler();
    }

    fn ensure_reconciler(&self) {
        let mut slot = lock(&self.inner.reconciler);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let period = self.inner.reconcile_interval;
        let weak = Arc::downgrade(&self.inner);
        *slot = Some(tokio::spawn(reconcile_loop(weak, period)));
        debug!("schedule reconciliation every {}ms", period.as_millis());
    }

    fn stop_reconciler(&self) {
        if let Some(handle) = lock(&self.inner.reconciler).take() {
            handle.abort();
            debug!("schedule reconciliation stopped");
        }
    }
}

impl ArbitratorInner {
    fn now_ms(&self) -> u64 {
        self.epoch
            .elapsed()
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
    }

    async fn save_modes(&self) {
        let modes = lock(&self.arbiter).modes();
        if let Err(err) = self.store.save_relay_modes(modes).await {
            warn!("failed to save relay modes: {err}");
        }
    }

    fn connected_address(&self) -> Result<DeviceAddress> {
        self.connection.borrow().address().ok_or(Error::NotConnected)
    }

    async fn reconcile(&self) -> Result<usize> {
        if !lock(&self.arbiter).has_manual_relays() {
            return Ok(0);
        }

        let address = self.connected_address()?;
        let status = self.device.status(address).await?;
        let commands = lock(&self.arbiter).reconcile(&status);

        let mut corrected = 0;
        for command in commands {
            let relay = command.relay();
            match self.device.execute(address, command).await {
                Ok(()) => {
                    info!(%relay, "device schedule re-armed during manual mode; neutralized");
                    corrected += 1;
                }
                Err(err) => warn!(%relay, "failed to re-neutralize schedule: {err}"),
            }
        }
        Ok(corrected)
    }
}

async fn reconcile_loop(inner: Weak<ArbitratorInner>, period: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };

        if !lock(&inner.arbiter).has_manual_relays() {
            break;
        }

        if let Err(err) = inner.reconcile().await {
            debug!("reconciliation skipped: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{store::MemoryStore, testing::FakeDevice, TransportError};
    use powermate_common::{RelayModes, ENDPOINT_SET_RELAY, ENDPOINT_SET_TIMER, ENDPOINT_STATUS};
    use pretty_assertions::assert_eq;

    struct Harness {
        fake: Arc<FakeDevice>,
        store: Arc<MemoryStore>,
        poller: StatusPoller,
        arbitrator: ModeArbitrator,
        state: watch::Sender<ConnectionState>,
    }

    fn harness() -> Harness {
        let fake = FakeDevice::shared();
        let config = ClientConfig::default();
        let device = DeviceClient::new(fake.clone(), Duration::from_secs(5));
        let (state, receiver) = watch::channel(ConnectionState::Connected(FakeDevice::address()));
        let poller = StatusPoller::new(device.clone(), receiver.clone());
        let store = Arc::new(MemoryStore::new());
        let arbitrator =
            ModeArbitrator::new(&config, device, poller.clone(), receiver, store.clone());

        Harness {
            fake,
            store,
            poller,
            arbitrator,
            state,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn double_manual_request_is_busy_and_sends_one_command() {
        let h = harness();

        h.arbitrator.enable_manual(RelayId::One).await.unwrap();
        assert_eq!(
            h.arbitrator.enable_manual(RelayId::One).await,
            Err(Error::Busy(RelayId::One))
        );

        assert_eq!(h.fake.requests(), vec!["/settimer?relay=1&on=0&off=0".to_string()]);
        assert_eq!(h.arbitrator.mode(RelayId::One), RelayControlMode::Manual);

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert!(!h.arbitrator.is_busy(RelayId::One));
        h.arbitrator.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_neutralize_stays_in_timer_mode() {
        let h = harness();
        h.fake.fail_with(Some(TransportError::HttpStatus(500)));

        assert_eq!(
            h.arbitrator.enable_manual(RelayId::Two).await,
            Err(Error::HttpStatus(500))
        );
        assert_eq!(h.arbitrator.mode(RelayId::Two), RelayControlMode::Timer);
        assert!(h.arbitrator.is_busy(RelayId::Two));
        assert!(!h.arbitrator.is_reconciling());
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_edit_in_manual_mode_conflicts_without_requests() {
        let h = harness();
        h.arbitrator.enable_manual(RelayId::One).await.unwrap();
        h.fake.clear_requests();

        assert_eq!(
            h.arbitrator
                .set_schedule(RelayId::One, RelaySchedule::new(800, 1800))
                .await,
            Err(Error::ModeConflict(RelayId::One))
        );
        assert!(h.fake.requests().is_empty());

        h.arbitrator.enable_timer(RelayId::One).await;
        assert!(!h.arbitrator.is_busy(RelayId::One));
        h.arbitrator
            .set_schedule(RelayId::One, RelaySchedule::new(800, 1800))
            .await
            .unwrap();
        assert_eq!(h.fake.requests(), vec!["/settimer?relay=1&on=800&off=1800".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_edit_during_manual_switch_is_busy() {
        let h = harness();
        h.fake.set_delay(Duration::from_millis(300));

        let switching = {
            let arbitrator = h.arbitrator.clone();
            tokio::spawn(async move { arbitrator.enable_manual(RelayId::One).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            h.arbitrator
                .set_schedule(RelayId::One, RelaySchedule::new(800, 1800))
                .await,
            Err(Error::Busy(RelayId::One))
        );

        assert_eq!(switching.await.unwrap(), Ok(()));
        assert_eq!(h.arbitrator.mode(RelayId::One), RelayControlMode::Manual);
        assert!(h.fake.status().relay(RelayId::One).schedule.is_neutral());
        assert_eq!(h.fake.requests(), vec!["/settimer?relay=1&on=0&off=0".to_string()]);
        h.arbitrator.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn modes_are_saved_and_restored() {
        let h = harness();
        h.arbitrator.enable_manual(RelayId::Two).await.unwrap();
        h.arbitrator.dispose();

        let saved = h.store.relay_modes().await.unwrap();
        assert_eq!(saved.get(RelayId::Two), RelayControlMode::Manual);

        let (_state, receiver) =
            watch::channel(ConnectionState::Connected(FakeDevice::address()));
        let device = DeviceClient::new(h.fake.clone(), Duration::from_secs(5));
        let poller = StatusPoller::new(device.clone(), receiver.clone());
        let next = ModeArbitrator::new(
            &ClientConfig::default(),
            device,
            poller,
            receiver,
            h.store.clone(),
        );
        next.restore_modes().await.unwrap();

        assert_eq!(next.mode(RelayId::Two), RelayControlMode::Manual);
        assert!(next.is_reconciling());
        assert_eq!(
            next.set_schedule(RelayId::Two, RelaySchedule::new(800, 1800))
                .await,
            Err(Error::ModeConflict(RelayId::Two))
        );

        next.enable_timer(RelayId::Two).await;
        assert!(!next.is_reconciling());
        assert_eq!(h.store.relay_modes().await.unwrap(), RelayModes::default());
    }

    #[tokio::test]
    async fn invalid_schedule_is_rejected_locally() {
        let h = harness();

        assert!(matches!(
            h.arbitrator
                .set_schedule(RelayId::Two, RelaySchedule::new(2400, 100))
                .await,
            Err(Error::InvalidTime(_))
        ));
        assert!(h.fake.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_toggle_forces_override() {
        let h = harness();
        h.arbitrator.enable_manual(RelayId::One).await.unwrap();
        assert_eq!(
            h.arbitrator.toggle(RelayId::One, false).await,
            Err(Error::Busy(RelayId::One))
        );
        assert_eq!(h.fake.requests().len(), 1);

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        h.fake.clear_requests();

        let outcome = h.arbitrator.toggle(RelayId::One, false).await.unwrap();

        assert_eq!(
            outcome,
            ToggleOutcome {
                relay: RelayId::One,
                on: true,
                override_applied: true,
                timer_may_reassert: false,
            }
        );
        assert_eq!(
            h.fake.requests(),
            vec![
                "/status".to_string(),
                "/set?relay=1&state=1&override=true".to_string()
            ]
        );
        assert_eq!(h.arbitrator.manual_state(RelayId::One), Some(true));
        h.arbitrator.dispose();
    }

    #[tokio::test]
    async fn timer_toggle_reports_possible_reassert() {
        let h = harness();

        let outcome = h.arbitrator.toggle(RelayId::Two, false).await.unwrap();
        assert!(outcome.on);
        assert!(outcome.timer_may_reassert);
        assert_eq!(h.fake.count(ENDPOINT_SET_RELAY), 1);
        assert!(!h.arbitrator.is_busy(RelayId::Two));
    }

    #[tokio::test]
    async fn commands_require_connection() {
        let h = harness();
        h.state.send_replace(ConnectionState::Disconnected);

        assert_eq!(
            h.arbitrator.toggle(RelayId::One, true).await,
            Err(Error::NotConnected)
        );
        assert_eq!(
            h.arbitrator.clear_override(RelayId::One).await,
            Err(Error::NotConnected)
        );
        assert!(h.fake.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reconciliation_reneutralizes_rearmed_schedules() {
        let h = harness();
        h.arbitrator.enable_manual(RelayId::One).await.unwrap();
        assert!(h.arbitrator.is_reconciling());

        h.fake.set_schedule(RelayId::One, RelaySchedule::new(800, 1800));
        h.fake.set_schedule(RelayId::Two, RelaySchedule::new(900, 1000));
        h.fake.clear_requests();

        tokio::time::sleep(Duration::from_millis(10_050)).await;

        assert!(h.fake.status().relay(RelayId::One).schedule.is_neutral());
        assert_eq!(
            h.fake.status().relay(RelayId::Two).schedule,
            RelaySchedule::new(900, 1000)
        );
        assert_eq!(h.fake.count(ENDPOINT_SET_TIMER), 1);

        h.arbitrator.enable_timer(RelayId::One).await;
        assert!(!h.arbitrator.is_reconciling());

        h.fake.set_schedule(RelayId::One, RelaySchedule::new(800, 1800));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.fake.count(ENDPOINT_SET_TIMER), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_command_triggers_delayed_refresh() {
        let h = harness();
        h.poller.start(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.fake.count(ENDPOINT_STATUS), 1);

        h.arbitrator.clear_override(RelayId::Two).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.fake.count(ENDPOINT_STATUS), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.fake.count(ENDPOINT_STATUS), 2);
        h.poller.stop();
    }
}
