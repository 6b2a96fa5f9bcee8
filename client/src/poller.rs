use std::{
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use powermate_common::{ConnectionState, DeviceAddress, DeviceStatus};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    device::DeviceClient,
    error::{Error, Result, TransportError},
    lock,
};

type StatusCallback = Arc<dyn Fn(&DeviceStatus) + Send + Sync>;
type FailureHook = Arc<dyn Fn(u32, &TransportError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

#[derive(Clone)]
pub struct StatusPoller {
    inner: Arc<PollerInner>,
}

struct PollerInner {
    device: DeviceClient,
    connection: watch::Receiver<ConnectionState>,
    subscribers: Mutex<Vec<(SubscriptionToken, StatusCallback)>>,
    failure_hook: Mutex<Option<FailureHook>>,
    task: Mutex<PollTask>,
    latest: Mutex<Option<DeviceStatus>>,
    consecutive_failures: AtomicU32,
    next_token: AtomicU64,
    next_fetch: AtomicU64,
    delivered: AtomicU64,
}

#[derive(Default)]
struct PollTask {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl StatusPoller {
    pub fn new(device: DeviceClient, connection: watch::Receiver<ConnectionState>) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                device,
                connection,
                subscribers: Mutex::new(Vec::new()),
                failure_hook: Mutex::new(None),
                task: Mutex::new(PollTask::default()),
                latest: Mutex::new(None),
                consecutive_failures: AtomicU32::new(0),
                next_token: AtomicU64::new(1),
                next_fetch: AtomicU64::new(1),
                delivered: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionToken
    where
        F: Fn(&DeviceStatus) + Send + Sync + 'static,
    {
        let token = SubscriptionToken(self.inner.next_token.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.subscribers).push((token, Arc::new(callback)));
        token
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subscribers = lock(&self.inner.subscribers);
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != token);
        subscribers.len() != before
    }

    pub fn on_failure<F>(&self, hook: F)
    where
        F: Fn(u32, &TransportError) + Send + Sync + 'static,
    {
        *lock(&self.inner.failure_hook) = Some(Arc::new(hook));
    }

    pub fn start(&self, interval: Duration) {
        let mut task = lock(&self.inner.task);
        if let Some(handle) = task.handle.take() {
            handle.abort();
        }
        task.generation += 1;
        self.inner.consecutive_failures.store(0, Ordering::Relaxed);

        let generation = task.generation;
        task.handle = Some(spawn_poll_loop(self.inner.clone(), generation, interval));
        info!("status polling every {}ms", interval.as_millis());
    }

    pub fn stop(&self) {
        let mut task = lock(&self.inner.task);
        let Some(handle) = task.handle.take() else {
            return;
        };
        handle.abort();
        task.generation += 1;
        drop(task);

        *lock(&self.inner.latest) = None;
        self.inner.consecutive_failures.store(0, Ordering::Relaxed);
        info!("status polling stopped");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.task).handle.is_some()
    }

    pub fn latest(&self) -> Option<DeviceStatus> {
        *lock(&self.inner.latest)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Out-of-band fetch. Subscribers only hear about it while polling is
    /// running.
    pub async fn refresh(&self) -> Result<DeviceStatus> {
        let generation = self.inner.generation();
        let address = self.inner.connected_address().ok_or(Error::NotConnected)?;
        Ok(self.inner.fetch(generation, address).await?)
    }

    pub fn schedule_refresh(&self, delay: Duration) {
        let inner = self.inner.clone();
        let generation = inner.generation();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !inner.is_current(generation) {
                return;
            }
            if let Some(address) = inner.connected_address() {
                let _ = inner.fetch(generation, address).await;
            }
        });
    }
}

impl PollerInner {
    fn generation(&self) -> u64 {
        lock(&self.task).generation
    }

    fn is_current(&self, generation: u64) -> bool {
        let task = lock(&self.task);
        task.generation == generation && task.handle.is_some()
    }

    fn connected_address(&self) -> Option<DeviceAddress> {
        self.connection.borrow().address()
    }

    fn retire(&self, generation: u64) {
        let mut task = lock(&self.task);
        if task.generation == generation {
            task.handle = None;
            task.generation += 1;
        }
    }

    async fn fetch(
        &self,
        generation: u64,
        address: DeviceAddress,
    ) -> Result<DeviceStatus, TransportError> {
        let sequence = self.next_fetch.fetch_add(1, Ordering::Relaxed);
        match self.device.status(address).await {
            Ok(status) => {
                if self.is_current(generation) {
                    if self.consecutive_failures.swap(0, Ordering::Relaxed) > 0 {
                        info!(%address, "status polling recovered");
                    }
                    self.broadcast(generation, sequence, &status);
                }
                Ok(status)
            }
            Err(err) => {
                if self.is_current(generation) {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    if failures == 1 {
                        warn!(%address, "status fetch failed: {err}");
                    } else {
                        debug!(%address, failures, "status fetch failed: {err}");
                    }

                    let hook = lock(&self.failure_hook).clone();
                    if let Some(hook) = hook {
                        hook(failures, &err);
                    }
                }
                Err(err)
            }
        }
    }

    /// Statuses from fetches issued before the last delivered one are dropped.
    fn broadcast(&self, generation: u64, sequence: u64, status: &DeviceStatus) {
        if self.delivered.fetch_max(sequence, Ordering::AcqRel) > sequence {
            debug!(sequence, "dropping status older than the last broadcast");
            return;
        }
        *lock(&self.latest) = Some(*status);

        let subscribers: Vec<StatusCallback> = lock(&self.subscribers)
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in subscribers {
            if !self.is_current(generation) {
                break;
            }
            callback(status);
        }
    }
}

fn spawn_poll_loop(inner: Arc<PollerInner>, generation: u64, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if !inner.is_current(generation) {
                break;
            }

            let Some(address) = inner.connected_address() else {
                continue;
            };

            if inner.fetch(generation, address).await.is_err() && inner.connected_address().is_none()
            {
                info!(%address, "connection lost; status polling stopped");
                inner.retire(generation);
                break;
            }
        }
    })
}
