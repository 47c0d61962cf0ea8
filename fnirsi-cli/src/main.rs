use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::fs::File;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use fnirsi_lib::analysis::{DEFAULT_CHARGING_THRESHOLD, detect_charging_phases};
use fnirsi_lib::ble_device;
use fnirsi_lib::command::TriggerProtocol;
use fnirsi_lib::device::{list_usb_devices, supported_ids};
use fnirsi_lib::settings::SettingsStore;
use fnirsi_lib::usb::SupportedDevice;
use fnirsi_lib::{SessionStore, UsbMeter};

mod monitor;

/// Live telemetry, protocol detection and session logging for FNIRSI USB testers.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long, global = true)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream readings from a tester
    Monitor(monitor::MonitorArgs),
    /// Inspect recorded sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
        #[command(flatten)]
        storage: StorageArgs,
    },
    /// Show or change alert thresholds
    Alerts {
        #[command(subcommand)]
        action: AlertAction,
        #[command(flatten)]
        storage: StorageArgs,
    },
    /// Ask a USB-connected tester to negotiate a fast-charge protocol
    Trigger(TriggerArgs),
    /// List attached and advertising testers
    Devices(DevicesArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Directory holding sessions and settings.json
    #[arg(long, default_value = "fnirsi_data")]
    pub storage_dir: PathBuf,
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    /// List stored sessions, newest first
    List,
    /// Print a session's statistics and charging phases
    Show {
        name: String,
        /// Dump the full session document as JSON
        #[arg(long)]
        json: bool,
    },
    Delete {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum AlertAction {
    Show,
    /// Set one threshold by name, e.g. `max_voltage 13.5`
    Set { name: String, value: f64 },
    Enable,
    Disable,
}

#[derive(Args, Debug)]
struct TriggerArgs {
    /// qc2, qc3, pd, afc, fcp, scp, vooc or apple
    #[arg(required_unless_present_any = ["qc3", "list"])]
    protocol: Option<TriggerProtocol>,
    /// Mode such as 9V
    #[arg(required_unless_present_any = ["qc3", "list"])]
    mode: Option<String>,
    /// Adjust a QC 3.0 session to this voltage instead
    #[arg(long, conflicts_with_all = ["protocol", "mode"])]
    qc3: Option<f64>,
    /// Print the protocols and modes the tester can trigger
    #[arg(long)]
    list: bool,
}

#[derive(Args, Debug)]
struct DevicesArgs {
    /// Also scan for BLE testers
    #[arg(long)]
    ble: bool,
    /// BLE scan duration in seconds
    #[arg(long, default_value_t = 5)]
    scan_secs: u64,
    /// Extra advertised name fragment to accept
    #[arg(long)]
    name: Option<String>,
}

fn setup_logging(log_file_path: Option<PathBuf>, verbosity: &Verbosity<InfoLevel>) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // INFO by default, DEBUG with -v, TRACE with -vv; RUST_LOG overrides
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file, &cli.verbose)?;

    let result = match cli.command {
        Command::Monitor(args) => monitor::run(args).await,
        Command::Sessions { action, storage } => run_sessions(action, storage),
        Command::Alerts { action, storage } => run_alerts(action, storage),
        Command::Trigger(args) => run_trigger(args).await,
        Command::Devices(args) => run_devices(args).await,
    };

    if let Err(e) = result {
        error!("{e:#}");
        process::exit(1);
    }
    Ok(())
}

fn run_sessions(action: SessionAction, storage: StorageArgs) -> Result<()> {
    let store = SessionStore::open(&storage.storage_dir)?;
    match action {
        SessionAction::List => {
            let sessions = store.list()?;
            if sessions.is_empty() {
                println!("No sessions in {}", store.dir().display());
            }
            for s in sessions {
                println!(
                    "{:<32} {}  {:>7} samples  {}",
                    s.name,
                    s.start_time.format("%Y-%m-%d %H:%M:%S"),
                    s.samples,
                    s.filename
                );
            }
        }
        SessionAction::Show { name, json } => {
            let Some(session) = store.get(&name)? else {
                bail!("No session named {name}");
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&session)?);
                return Ok(());
            }
            println!("Session:  {}", session.name);
            if let Some(connection) = session.connection_type {
                println!("Via:      {connection}");
            }
            println!(
                "Window:   {} .. {}",
                session.start_time.format("%Y-%m-%d %H:%M:%S"),
                session.end_time.format("%H:%M:%S")
            );
            println!("{}", session.stats);

            let phases = detect_charging_phases(&session.data, DEFAULT_CHARGING_THRESHOLD);
            if !phases.is_empty() {
                println!("Phases:");
                for phase in phases {
                    println!(
                        "  {:<8} samples {}..={} ({})",
                        phase.phase,
                        phase.start_index,
                        phase.end_index,
                        phase.samples()
                    );
                }
            }
        }
        SessionAction::Delete { name } => {
            if !store.delete(&name)? {
                bail!("No session named {name}");
            }
            println!("Deleted {name}");
        }
    }
    Ok(())
}

fn run_alerts(action: AlertAction, storage: StorageArgs) -> Result<()> {
    let store = SettingsStore::new(&storage.storage_dir);
    let mut stored = store.load();
    match action {
        AlertAction::Show => {
            println!("enabled: {}", stored.alerts.enabled);
            for (name, value) in stored.alerts.to_map() {
                println!("{name}: {value}");
            }
            return Ok(());
        }
        AlertAction::Set { name, value } => stored.alerts.set(&name, value)?,
        AlertAction::Enable => stored.alerts.enabled = true,
        AlertAction::Disable => stored.alerts.enabled = false,
    }
    store.save(&stored)?;
    info!(path = %store.path().display(), "Alert settings saved");
    Ok(())
}

async fn run_trigger(args: TriggerArgs) -> Result<()> {
    if args.list {
        for protocol in TriggerProtocol::ALL {
            println!("{:<6} {}", protocol.to_string(), protocol.modes().join(", "));
        }
        return Ok(());
    }

    let mut meter = UsbMeter::open().await?;
    match (args.qc3, args.protocol, args.mode) {
        (Some(volts), _, _) => meter.adjust_qc3(volts).await?,
        (None, Some(protocol), Some(mode)) => meter.trigger(protocol, &mode).await?,
        _ => bail!("Give a protocol and mode, or --qc3 <volts>"),
    }
    Ok(())
}

async fn run_devices(args: DevicesArgs) -> Result<()> {
    println!("Supported USB testers:");
    for (vendor_id, product_id) in supported_ids() {
        if let Some(model) = SupportedDevice::lookup(vendor_id, product_id) {
            println!("  {vendor_id:04x}:{product_id:04x}  {:<9} {}", model.model, model.description);
        }
    }

    let attached = list_usb_devices()?;
    println!("Attached:");
    if attached.is_empty() {
        println!("  none");
    }
    for entry in attached {
        println!(
            "  {} on bus {} addr {}{}",
            entry.model.model,
            entry.bus_number,
            entry.device_address,
            entry.serial_number.map(|s| format!(" serial {s}")).unwrap_or_default()
        );
    }

    if args.ble {
        let found = ble_device::scan(Duration::from_secs(args.scan_secs), args.name.as_deref()).await?;
        println!("BLE:");
        if found.is_empty() {
            println!("  none");
        }
        for entry in found {
            println!(
                "  {}  {}  rssi {}",
                entry.address,
                entry.name.as_deref().unwrap_or("?"),
                entry.rssi.map(|r| r.to_string()).unwrap_or_else(|| "?".to_string())
            );
        }
    }
    Ok(())
}
