//! Background tasks that pull raw frames from a transport into a [`Monitor`].

use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::ble::BleDecoder;
use crate::ble_device::BleMeter;
use crate::device::UsbMeter;
use crate::diagnostics::DecodeCounters;
use crate::error::FnirsiError;
use crate::monitor::Monitor;
use crate::reading::ConnectionType;
use crate::usb::UsbDecoder;

/// How long [`ReaderHandle::stop`] waits for the task to wind down
pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// How often a BLE reader wakes up to check its stop flag
const BLE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Consecutive USB failures after which the reader gives up
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Running reader task with a cooperative stop flag.
#[derive(Debug)]
pub struct ReaderHandle {
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ReaderHandle {
    fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(body(stop.clone()));
        Self { stop, task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the task to stop and wait for it, up to [`STOP_TIMEOUT`].
    ///
    /// Returns `false` if the task had to be aborted.
    pub async fn stop(mut self) -> bool {
        self.stop.store(true, Ordering::SeqCst);
        match tokio::time::timeout(STOP_TIMEOUT, &mut self.task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "Reader task ended abnormally");
                true
            }
            Err(_) => {
                warn!("Reader task did not stop in time, aborting");
                self.task.abort();
                false
            }
        }
    }

    /// Wait for the task to finish on its own.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "Reader task ended abnormally");
        }
    }
}

fn counters_delta(now: DecodeCounters, before: DecodeCounters) -> DecodeCounters {
    DecodeCounters {
        readings: now.readings - before.readings,
        too_short: now.too_short - before.too_short,
        not_data: now.not_data - before.not_data,
        out_of_range: now.out_of_range - before.out_of_range,
        truncated: now.truncated - before.truncated,
        unknown_command: now.unknown_command - before.unknown_command,
    }
}

/// Poll HID reports from `meter` and feed them to `monitor`.
pub fn spawn_usb_reader(monitor: Arc<Monitor>, meter: UsbMeter) -> ReaderHandle {
    monitor.set_connection_type(Some(ConnectionType::Usb));
    ReaderHandle::spawn(move |stop| usb_loop(monitor, meter, stop))
}

async fn usb_loop(monitor: Arc<Monitor>, mut meter: UsbMeter, stop: Arc<AtomicBool>) {
    let interval = meter.family().continue_interval();
    info!(model = meter.model().model, ?interval, "USB reader started");

    let mut decoder = UsbDecoder::new();
    let mut next_continue = Instant::now() + interval;
    let mut last_packet = Instant::now();
    let mut failures = 0;

    while !stop.load(Ordering::SeqCst) {
        match meter.read_report().await {
            Ok(report) => {
                failures = 0;
                let before = decoder.counters();
                let readings = decoder.decode(&report);
                monitor.record_counters(counters_delta(decoder.counters(), before));

                if !readings.is_empty() {
                    let now = Instant::now();
                    let dt = now.duration_since(last_packet).as_secs_f64();
                    last_packet = now;
                    monitor.process_batch(readings, dt);
                }
            }
            Err(FnirsiError::Timeout(_)) => {
                debug!("No report within timeout");
            }
            Err(e) => {
                failures += 1;
                warn!(error = %e, failures, "USB read failed");
                if failures >= MAX_CONSECUTIVE_ERRORS {
                    error!("USB reader giving up after {failures} consecutive errors");
                    monitor.connection_lost(&format!("USB read failed: {e}"));
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        }

        if Instant::now() >= next_continue {
            next_continue = Instant::now() + interval;
            if let Err(e) = meter.send_continue().await {
                warn!(error = %e, "Failed to send continue");
            }
        }
    }
    info!("USB reader stopped");
}

/// Decode BLE notifications from `meter` and feed them to `monitor`.
pub fn spawn_ble_reader(monitor: Arc<Monitor>, meter: BleMeter) -> ReaderHandle {
    monitor.set_connection_type(Some(ConnectionType::Bluetooth));
    ReaderHandle::spawn(move |stop| ble_loop(monitor, meter, stop))
}

async fn ble_loop(monitor: Arc<Monitor>, meter: BleMeter, stop: Arc<AtomicBool>) {
    let mut decoder = BleDecoder::for_device(meter.entry().name.as_deref());
    info!(name = ?meter.entry().name, format = ?decoder.format(), "BLE reader started");

    let mut notifications = match meter.notifications().await {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "Could not open BLE notification stream");
            monitor.connection_lost(&format!("BLE notifications unavailable: {e}"));
            return;
        }
    };

    let mut last_reading = Instant::now();
    while !stop.load(Ordering::SeqCst) {
        let payload = match tokio::time::timeout(BLE_POLL_INTERVAL, notifications.next()).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                warn!("BLE notification stream ended");
                monitor.connection_lost("BLE notification stream ended");
                break;
            }
            Err(_) => continue,
        };

        let before = decoder.counters();
        let reading = decoder.decode(&payload);
        monitor.record_counters(counters_delta(decoder.counters(), before));

        if let Some(reading) = reading {
            let now = Instant::now();
            let dt = now.duration_since(last_reading).as_secs_f64();
            last_reading = now;
            monitor.process(reading, dt);
        }
    }

    if let Err(e) = meter.disconnect().await {
        warn!(error = %e, "BLE disconnect failed");
    }
    info!("BLE reader stopped");
}
