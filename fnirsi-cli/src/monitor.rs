use anyhow::Result;
use clap::{Args, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use fnirsi_lib::Monitor;
use fnirsi_lib::ble_device::{BleMeter, BleTarget};
use fnirsi_lib::device::UsbMeter;
use fnirsi_lib::reader::{ReaderHandle, spawn_ble_reader, spawn_usb_reader};
use fnirsi_lib::reading::EnrichedReading;
use fnirsi_lib::session::SessionStore;
use fnirsi_lib::settings::SettingsStore;
use fnirsi_lib::stats::{ChargeEstimate, format_duration};

use crate::StorageArgs;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Usb,
    Ble,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[arg(value_enum, default_value_t = Transport::Usb)]
    transport: Transport,
    /// Stop after this many readings
    #[arg(short = 'n', long)]
    count: Option<usize>,
    /// Record a session, optionally under this name
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    record: Option<String>,
    /// Charge target in mAh for the time-remaining estimate
    #[arg(long)]
    target_mah: Option<f64>,
    /// Print readings as JSON lines
    #[arg(long)]
    json: bool,
    /// BLE address to connect to
    #[arg(long)]
    address: Option<String>,
    /// Extra advertised name fragment to accept over BLE
    #[arg(long)]
    name: Option<String>,
    /// BLE scan duration in seconds
    #[arg(long, default_value_t = 5)]
    scan_secs: u64,
    #[command(flatten)]
    storage: StorageArgs,
}

impl MonitorArgs {
    fn ble_target(&self) -> BleTarget {
        BleTarget {
            address: self.address.clone(),
            name: self.name.clone(),
            scan_duration: Duration::from_secs(self.scan_secs),
        }
    }
}

fn print_reading(reading: &EnrichedReading, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(reading)?);
    } else {
        println!("{reading}");
    }
    Ok(())
}

fn print_estimate(estimate: &ChargeEstimate) {
    match estimate {
        ChargeEstimate::InsufficientData => println!("Charge estimate: not enough data yet"),
        ChargeEstimate::Progress {
            charged_mah,
            avg_current_ma,
        } => println!("Charged {charged_mah:.1} mAh at {avg_current_ma:.0} mA average"),
        ChargeEstimate::Complete { charged_mah } => println!("Target reached, {charged_mah:.1} mAh charged"),
        ChargeEstimate::Remaining {
            remaining_s,
            eta,
            percent,
            ..
        } => println!(
            "{percent:.1}% charged, {} remaining (ETA {})",
            format_duration(*remaining_s),
            eta.format("%H:%M:%S")
        ),
    }
}

pub async fn run(args: MonitorArgs) -> Result<()> {
    let settings_store = SettingsStore::new(&args.storage.storage_dir);
    let monitor = Arc::new(Monitor::from_stored(settings_store.load()));

    let (tx, mut rx) = mpsc::unbounded_channel::<EnrichedReading>();
    monitor.subscribe(move |reading| {
        tx.send(reading.clone())?;
        Ok(())
    });
    monitor.on_alert(|alert| {
        warn!(id = %alert.id, "{alert}");
        Ok(())
    });

    if let Some(name) = args.record.as_deref() {
        let name = monitor.start_recording(Some(name).filter(|n| !n.is_empty()))?;
        info!(%name, "Recording");
    }

    let reader: ReaderHandle = match args.transport {
        Transport::Usb => spawn_usb_reader(monitor.clone(), UsbMeter::open().await?),
        Transport::Ble => spawn_ble_reader(monitor.clone(), BleMeter::connect(&args.ble_target()).await?),
    };

    let mut seen = 0usize;
    let mut watchdog = tokio::time::interval(Duration::from_secs(1));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            reading = rx.recv() => {
                let Some(reading) = reading else { break };
                print_reading(&reading, args.json)?;
                seen += 1;
                if args.count.is_some_and(|n| seen >= n) {
                    break;
                }
            }
            _ = watchdog.tick() => {
                if reader.is_finished() {
                    warn!("Reader stopped on its own");
                    break;
                }
            }
        }
    }

    if !reader.stop().await {
        warn!("Reader had to be aborted");
    }

    settings_store.save(&monitor.stored_settings())?;

    println!("{}", monitor.stats());
    print_estimate(&monitor.charge_estimate(args.target_mah));

    let counters = monitor.counters();
    if counters.dropped() > 0 {
        info!(?counters, "Frames dropped while decoding");
    }

    if let Some(session) = monitor.stop_recording() {
        let store = SessionStore::open(&args.storage.storage_dir)?;
        let path = store.save(&session)?;
        println!("Saved {} samples to {}", session.data.len(), path.display());
    }
    Ok(())
}
