use std::{
    io::ErrorKind,
    net::Ipv4Addr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use powermate_common::{
    time, ConnectionState, DeviceAddress, DeviceStatus, NetworkIdentifier, Period, RelayId,
    RelaySchedule, RuntimeConfig,
};
use powermate_client::{AddressStore, HttpTransport, JsonFileStore, NetworkContext, PowerMate};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(
    name = "powermate",
    version,
    about = "Control a PowerMate two-relay switch over the local network"
)]
struct Cli {
    /// Directory holding config.json and remembered devices
    #[arg(long, env = "POWERMATE_DATA_DIR", default_value = ".powermate", global = true)]
    data_dir: PathBuf,
    /// Identifier of the current network, e.g. wifi_HomeNet
    #[arg(long, env = "POWERMATE_NETWORK_ID", global = true)]
    network_id: Option<String>,
    /// This host's IPv4 address; enables scanning its /24
    #[arg(long, env = "POWERMATE_LOCAL_IP", global = true)]
    local_ip: Option<Ipv4Addr>,
    /// Skip discovery and use this device address
    #[arg(long, env = "POWERMATE_DEVICE", global = true)]
    device: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe the network for devices
    Discover,
    /// Connect to a device and remember it for this network
    Connect { address: String },
    /// Print relay state and schedules
    Status,
    /// Flip a relay
    Toggle {
        relay: RelayId,
        /// Keep the new state even if the schedule disagrees
        #[arg(long = "override")]
        override_schedule: bool,
    },
    /// Put a relay under manual control, neutralizing its schedule
    Manual { relay: RelayId },
    /// Hand a relay back to its schedule
    Timer { relay: RelayId },
    /// Set a relay's on/off times, e.g. `schedule 1 7:30am 10pm`
    Schedule {
        relay: RelayId,
        on: String,
        off: String,
        /// Period for times written without am/pm
        #[arg(long)]
        period: Option<Period>,
    },
    /// Clear the device-side override on a relay
    ClearOverride { relay: RelayId },
    /// Follow status updates until interrupted
    Watch {
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_runtime_config(&cli.data_dir).await.unwrap_or_else(|err| {
        warn!("failed to load config: {err:#}");
        RuntimeConfig::default()
    });

    let store = Arc::new(JsonFileStore::new(&cli.data_dir));
    let network = NetworkContext::new(
        cli.network_id.clone().map(NetworkIdentifier::new),
        cli.local_ip,
    );
    let service = PowerMate::open(
        config,
        Arc::new(HttpTransport::new()),
        store.clone(),
        network.clone(),
    )
    .await;

    let result = run(&cli, &service, store.as_ref(), network).await;
    service.dispose().await;
    result
}

async fn run(
    cli: &Cli,
    service: &PowerMate,
    store: &JsonFileStore,
    mut network: NetworkContext,
) -> anyhow::Result<()> {
    match &cli.command {
        Command::Discover => {
            if let Some(id) = &network.network_id {
                if let Some(address) = store.get_remembered_address(id).await? {
                    network = network.with_remembered(address);
                }
            }

            let found = service.discovery().discover(&network).await;
            if found.is_empty() {
                bail!("no device found");
            }
            for address in found {
                println!("{address}");
            }
        }
        Command::Connect { address } => {
            if !service.connect(address).await? {
                bail!("device at {address} did not answer");
            }
            println!("connected to {address}");
        }
        Command::Status => {
            ensure_connected(cli, service).await?;
            let status = service.refresh().await?;
            print_status(&status);
        }
        Command::Toggle {
            relay,
            override_schedule,
        } => {
            ensure_connected(cli, service).await?;
            let outcome = service.toggle(*relay, *override_schedule).await?;
            println!(
                "relay {relay} {}{}",
                on_off(outcome.on),
                if outcome.override_applied { " (override)" } else { "" }
            );
            if outcome.timer_may_reassert {
                println!("relay {relay} is in timer mode; its schedule may switch it back");
            }
        }
        Command::Manual { relay } => {
            ensure_connected(cli, service).await?;
            service.enable_manual(*relay).await?;
            println!("relay {relay} in manual mode; schedule neutralized");
        }
        Command::Timer { relay } => {
            service.enable_timer(*relay).await;
            println!("relay {relay} in timer mode; set a schedule to re-arm it");
        }
        Command::Schedule {
            relay,
            on,
            off,
            period,
        } => {
            let schedule = RelaySchedule::new(
                time::parse_user_time(on, *period)?,
                time::parse_user_time(off, *period)?,
            );
            ensure_connected(cli, service).await?;
            service.set_schedule(*relay, schedule).await?;
            println!("relay {relay} schedule {}", schedule.describe());
        }
        Command::ClearOverride { relay } => {
            ensure_connected(cli, service).await?;
            service.clear_override(*relay).await?;
            println!("relay {relay} override cleared");
        }
        Command::Watch { interval_ms } => {
            ensure_connected(cli, service).await?;
            watch(service, *interval_ms).await?;
        }
    }

    Ok(())
}

async fn ensure_connected(cli: &Cli, service: &PowerMate) -> anyhow::Result<DeviceAddress> {
    let Some(pinned) = &cli.device else {
        return service
            .auto_connect()
            .await
            .context("could not reach a PowerMate device");
    };

    if !service
        .connect(pinned)
        .await
        .context("invalid POWERMATE_DEVICE")?
    {
        bail!("device at {pinned} did not answer");
    }

    service
        .connection()
        .current_address()
        .ok_or_else(|| anyhow!("connection to {pinned} dropped"))
}

async fn watch(service: &PowerMate, interval_ms: Option<u64>) -> anyhow::Result<()> {
    let interval = Duration::from_millis(
        interval_ms.unwrap_or(service.config().client.poll_interval_ms),
    );
    service.subscribe(print_status);
    service.poller().start(interval);

    let mut changes = service.watch_connection();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                return Ok(());
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let state = changes.borrow_and_update().clone();
                if state == ConnectionState::Disconnected {
                    bail!("lost connection to the device");
                }
            }
        }
    }
}

fn print_status(status: &DeviceStatus) {
    let now = time::to_twelve_hour(status.current_time)
        .unwrap_or_else(|_| status.current_time.to_string());
    println!("device time {now}");

    for relay in RelayId::ALL {
        let state = status.relay(relay);
        println!(
            "  relay {relay}: {:<3}  schedule {}{}",
            on_off(state.on),
            state.schedule.describe(),
            if state.override_active { "  [override]" } else { "" }
        );
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

async fn load_runtime_config(data_dir: &Path) -> anyhow::Result<RuntimeConfig> {
    let path = data_dir.join("config.json");
    let mut config = match tokio::fs::read(&path).await {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("invalid config at {}", path.display()))?,
        Err(err) if err.kind() == ErrorKind::NotFound => RuntimeConfig::default(),
        Err(err) => return Err(err.into()),
    };
    config.sanitize();
    Ok(config)
}
