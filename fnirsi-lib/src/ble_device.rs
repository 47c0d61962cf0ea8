//! BLE transport: scanning, connecting and streaming raw notifications.

use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{BoxStream, StreamExt};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::{CMD_GET_INFO, CMD_START, CMD_STOP, build_command, is_tester_name};
use crate::constants::{BLE_NAME_PATTERNS, BLE_NOTIFY_UUID, BLE_WRITE_UUID};
use crate::error::FnirsiError;

/// Pause between init commands
const COMMAND_GAP: Duration = Duration::from_millis(100);

/// A tester seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BleDeviceEntry {
    pub name: Option<String>,
    pub address: String,
    pub rssi: Option<i16>,
}

fn parse_uuid(s: &str) -> Result<Uuid, FnirsiError> {
    Uuid::parse_str(s).map_err(|e| FnirsiError::Protocol(format!("bad characteristic uuid {s}: {e}")))
}

async fn first_adapter() -> Result<Adapter, FnirsiError> {
    let manager = Manager::new().await?;
    manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| FnirsiError::Protocol("no BLE adapter available".to_string()))
}

async fn scan_peripherals(
    adapter: &Adapter,
    duration: Duration,
    custom_name: Option<&str>,
) -> Result<Vec<(Peripheral, BleDeviceEntry)>, FnirsiError> {
    info!("Scanning for BLE testers ({}s)...", duration.as_secs());
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;
    adapter.stop_scan().await?;

    let mut found = Vec::new();
    for peripheral in adapter.peripherals().await? {
        let Some(properties) = peripheral.properties().await? else {
            continue;
        };
        if !is_tester_name(properties.local_name.as_deref(), custom_name) {
            continue;
        }
        let entry = BleDeviceEntry {
            name: properties.local_name,
            address: properties.address.to_string(),
            rssi: properties.rssi,
        };
        debug!(?entry, "Found tester");
        found.push((peripheral, entry));
    }
    Ok(found)
}

/// Scan for advertising testers.
pub async fn scan(duration: Duration, custom_name: Option<&str>) -> Result<Vec<BleDeviceEntry>, FnirsiError> {
    let adapter = first_adapter().await?;
    Ok(scan_peripherals(&adapter, duration, custom_name)
        .await?
        .into_iter()
        .map(|(_, entry)| entry)
        .collect())
}

/// Which peripheral [`BleMeter::connect`] should pick.
#[derive(Debug, Clone, Default)]
pub struct BleTarget {
    /// Exact address; otherwise the first tester found is used
    pub address: Option<String>,
    /// Extra name fragment accepted as a tester
    pub name: Option<String>,
    pub scan_duration: Duration,
}

/// A connected tester on the BLE transport.
pub struct BleMeter {
    peripheral: Peripheral,
    entry: BleDeviceEntry,
    notify: Characteristic,
    write: Characteristic,
}

impl BleMeter {
    /// Scan, connect, subscribe and start the telemetry stream.
    pub async fn connect(target: &BleTarget) -> Result<Self, FnirsiError> {
        let adapter = first_adapter().await?;
        let candidates = scan_peripherals(&adapter, target.scan_duration, target.name.as_deref()).await?;
        let (peripheral, entry) = candidates
            .into_iter()
            .find(|(_, e)| target.address.as_ref().is_none_or(|a| a.eq_ignore_ascii_case(&e.address)))
            .ok_or_else(|| {
                let mut patterns: Vec<String> = BLE_NAME_PATTERNS.iter().map(|p| p.to_string()).collect();
                patterns.extend(target.name.clone());
                patterns.extend(target.address.clone());
                FnirsiError::BleDeviceNotFound(patterns)
            })?;

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        info!(address = %entry.address, name = ?entry.name, "Connected");

        peripheral.discover_services().await?;
        let characteristics = peripheral.characteristics();
        let find = |uuid: Uuid| {
            characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or(FnirsiError::MissingCharacteristic(uuid))
        };
        let notify = find(parse_uuid(BLE_NOTIFY_UUID)?)?;
        let write = find(parse_uuid(BLE_WRITE_UUID)?)?;

        peripheral.subscribe(&notify).await?;
        let meter = Self {
            peripheral,
            entry,
            notify,
            write,
        };
        meter.send_command(CMD_GET_INFO, &[]).await?;
        tokio::time::sleep(COMMAND_GAP).await;
        meter.send_command(CMD_START, &[]).await?;
        tokio::time::sleep(COMMAND_GAP).await;
        Ok(meter)
    }

    pub fn entry(&self) -> &BleDeviceEntry {
        &self.entry
    }

    /// Frame and write a command to the write characteristic.
    pub async fn send_command(&self, cmd: u8, payload: &[u8]) -> Result<(), FnirsiError> {
        let frame = build_command(cmd, payload);
        debug!(frame = %hex::encode(&frame), "BLE write");
        self.peripheral
            .write(&self.write, &frame, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    /// Raw payloads from the telemetry characteristic.
    pub async fn notifications(&self) -> Result<BoxStream<'static, Vec<u8>>, FnirsiError> {
        let uuid = self.notify.uuid;
        let stream = self.peripheral.notifications().await?;
        Ok(stream
            .filter_map(move |n| async move { (n.uuid == uuid).then_some(n.value) })
            .boxed())
    }

    pub async fn is_connected(&self) -> Result<bool, FnirsiError> {
        Ok(self.peripheral.is_connected().await?)
    }

    pub async fn disconnect(&self) -> Result<(), FnirsiError> {
        if let Err(e) = self.send_command(CMD_STOP, &[]).await {
            warn!(error = %e, "Stop command failed");
        }
        if let Err(e) = self.peripheral.unsubscribe(&self.notify).await {
            debug!(error = %e, "Unsubscribe failed");
        }
        self.peripheral.disconnect().await?;
        info!(address = %self.entry.address, "Disconnected");
        Ok(())
    }
}

impl std::fmt::Debug for BleMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleMeter").field("entry", &self.entry).finish()
    }
}
