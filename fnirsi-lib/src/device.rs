use nusb::{DeviceInfo, Interface, transfer::RequestBuffer};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::command::{HidCommand, HidReport, INIT_SEQUENCE, TriggerProtocol, qc3_adjust_report, trigger_report};
use crate::constants::{ENDPOINT_IN, ENDPOINT_OUT, HID_REPORT_SIZE};
use crate::error::FnirsiError;
use crate::usb::{DeviceFamily, SUPPORTED_DEVICES, SupportedDevice};

// Default timeout for USB writes
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
// Reads time out sooner so a reader loop can notice a stop request
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// A supported tester present on the bus.
#[derive(Debug, Clone)]
pub struct UsbDeviceEntry {
    pub model: &'static SupportedDevice,
    pub bus_number: u8,
    pub device_address: u8,
    pub serial_number: Option<String>,
}

/// List every supported tester currently attached.
pub fn list_usb_devices() -> Result<Vec<UsbDeviceEntry>, FnirsiError> {
    Ok(nusb::list_devices()
        .map_err(FnirsiError::Usb)?
        .filter_map(|d| {
            SupportedDevice::lookup(d.vendor_id(), d.product_id()).map(|model| UsbDeviceEntry {
                model,
                bus_number: d.bus_number(),
                device_address: d.device_address(),
                serial_number: d.serial_number().map(str::to_string),
            })
        })
        .collect())
}

fn find_device() -> Result<(DeviceInfo, &'static SupportedDevice), FnirsiError> {
    nusb::list_devices()
        .map_err(FnirsiError::Usb)?
        .find_map(|d| SupportedDevice::lookup(d.vendor_id(), d.product_id()).map(|model| (d, model)))
        .ok_or(FnirsiError::DeviceNotFound)
}

/// An open FNIRSI tester on the USB-HID transport.
pub struct UsbMeter {
    interface: Interface,
    model: &'static SupportedDevice,
}

impl UsbMeter {
    /// Open the first supported tester and send the init sequence.
    pub async fn open() -> Result<Self, FnirsiError> {
        info!("Searching for FNIRSI USB tester...");
        let (device_info, model) = find_device()?;
        info!(
            model = model.model,
            "Found device on bus {} addr {}",
            device_info.bus_number(),
            device_info.device_address()
        );

        let device = device_info.open().map_err(FnirsiError::Usb)?;
        let interface = device.detach_and_claim_interface(0).map_err(FnirsiError::Usb)?;
        info!("Interface claimed successfully.");

        let mut meter = Self { interface, model };
        meter.init().await?;
        Ok(meter)
    }

    async fn init(&mut self) -> Result<(), FnirsiError> {
        for command in INIT_SEQUENCE {
            self.write_report(command.report()).await?;
        }
        // The tester needs a moment before the first data report
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(())
    }

    pub fn model(&self) -> &'static SupportedDevice {
        self.model
    }

    pub fn family(&self) -> DeviceFamily {
        self.model.family()
    }

    /// Write one 64-byte output report.
    pub async fn write_report(&mut self, report: HidReport) -> Result<(), FnirsiError> {
        let transfer = self.interface.interrupt_out(ENDPOINT_OUT, report.to_vec());
        let completion = timeout(DEFAULT_TIMEOUT, transfer).await?;
        let sent = completion.into_result()?;
        debug!("Sent {} bytes", sent.actual_length());
        Ok(())
    }

    /// Read one input report.
    pub async fn read_report(&mut self) -> Result<Vec<u8>, FnirsiError> {
        let transfer = self.interface.interrupt_in(ENDPOINT_IN, RequestBuffer::new(HID_REPORT_SIZE));
        let completion = timeout(READ_TIMEOUT, transfer).await?;
        let data = completion.into_result()?;
        debug!("Received {} bytes", data.len());
        Ok(data)
    }

    pub async fn send_continue(&mut self) -> Result<(), FnirsiError> {
        self.write_report(HidCommand::Continue.report()).await
    }

    /// Ask the tester to negotiate `protocol` at `mode`.
    pub async fn trigger(&mut self, protocol: TriggerProtocol, mode: &str) -> Result<(), FnirsiError> {
        let report = trigger_report(protocol, mode)?;
        self.write_report(report).await?;
        info!(%protocol, mode, "Trigger sent");
        Ok(())
    }

    pub async fn adjust_qc3(&mut self, volts: f64) -> Result<(), FnirsiError> {
        let report = qc3_adjust_report(volts)?;
        self.write_report(report).await?;
        info!("QC 3.0 adjusted to {volts:.2}V");
        Ok(())
    }
}

impl std::fmt::Debug for UsbMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbMeter").field("model", &self.model.model).finish()
    }
}

/// Every (vendor, product) pair [`UsbMeter::open`] looks for.
pub fn supported_ids() -> impl Iterator<Item = (u16, u16)> {
    SUPPORTED_DEVICES.iter().map(|d| (d.vendor_id, d.product_id))
}
