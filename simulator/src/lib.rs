pub mod device;
mod http;

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use chrono_tz::Tz;
use powermate_common::RelayId;
use tokio::{net::TcpListener, sync::Mutex, task::JoinHandle};
use tracing::{info, warn};

pub use device::{DeviceClock, SimulatedDevice};
pub use http::router;

pub const DEFAULT_TIMEZONE: &str = "Asia/Singapore";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub port: u16,
    pub timezone: Tz,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            timezone: chrono_tz::Asia::Singapore,
        }
    }
}

impl SimulatorConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(port) = std::env::var("SIMULATOR_HTTP_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
        {
            config.port = port;
        }

        if let Ok(name) = std::env::var("SIMULATOR_TIMEZONE") {
            match name.parse::<Tz>() {
                Ok(timezone) => config.timezone = timezone,
                Err(_) => warn!("unknown timezone {name:?}; using {DEFAULT_TIMEZONE}"),
            }
        }

        config
    }
}

#[derive(Clone)]
pub struct SimulatorState {
    device: Arc<Mutex<SimulatedDevice>>,
    clock: Arc<Mutex<DeviceClock>>,
    online: Arc<AtomicBool>,
}

impl SimulatorState {
    pub fn new(clock: DeviceClock) -> Self {
        Self {
            device: Arc::new(Mutex::new(SimulatedDevice::new())),
            clock: Arc::new(Mutex::new(clock)),
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    pub async fn snapshot(&self) -> SimulatedDevice {
        self.device.lock().await.clone()
    }

    pub async fn set_clock(&self, clock: DeviceClock) {
        *self.clock.lock().await = clock;
    }

    pub async fn now_hhmm(&self) -> i32 {
        self.clock.lock().await.now_hhmm()
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    pub async fn evaluate(&self) -> Vec<(RelayId, bool)> {
        let now = self.now_hhmm().await;
        self.device.lock().await.evaluate(now)
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = SimulatorConfig::from_env();
    let state = SimulatorState::new(DeviceClock::Zone(config.timezone));
    spawn_control_loop(state.clone());

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind simulator at {addr}"))?;

    info!("simulator listening on http://{addr} ({})", config.timezone);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub async fn spawn(state: SimulatorState) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .context("failed to bind simulator")?;
    let addr = listener.local_addr()?;

    let app = router(state);
    let handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            warn!("simulator server stopped: {err}");
        }
    });

    Ok((addr, handle))
}

pub fn spawn_control_loop(state: SimulatorState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            for (relay, on) in state.evaluate().await {
                info!("schedule switched relay {relay} {}", if on { "on" } else { "off" });
            }
        }
    })
}
