//! Decoding of the 64-byte HID telemetry report.
//!
//! A data report is `[0xAA][0x04]` followed by four 15-byte sample slots.
//! Anything else on the interrupt endpoint (ack frames, info responses) is
//! ordinary traffic and decodes to no readings.

use chrono::{DateTime, Local};
use std::time::Duration;
use tracing::debug;
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::constants::{
    HID_DATA_TYPE, HID_HEADER_SIZE, HID_REPORT_SIZE, HID_SAMPLE_SIZE, HID_SAMPLES_PER_REPORT, LINE_SCALE,
    TEMPERATURE_SCALE, USB_VI_SCALE,
};
use crate::diagnostics::{DecodeCounters, DropReason};
use crate::reading::{Reading, round_to, voltage_in_range};

/// One sample slot of a HID data report (15 bytes)
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct UsbSampleRaw {
    pub voltage_raw: U32, // 10 µV
    pub current_raw: U32, // 10 µA
    pub dp_mv: U16,       // Millivolts
    pub dn_mv: U16,       // Millivolts
    pub reserved: u8,
    pub temp_deci_c: U16, // 0.1 °C
}

impl UsbSampleRaw {
    fn to_reading(self, timestamp: DateTime<Local>, sample: u64) -> Reading {
        let voltage = self.voltage_raw.get() as f64 / USB_VI_SCALE;
        let current = self.current_raw.get() as f64 / USB_VI_SCALE;
        let dp = self.dp_mv.get() as f64 / LINE_SCALE;
        let dn = self.dn_mv.get() as f64 / LINE_SCALE;
        let temperature = self.temp_deci_c.get() as f64 / TEMPERATURE_SCALE;

        Reading {
            timestamp,
            voltage: round_to(voltage, 5),
            current: round_to(current, 5),
            power: round_to(voltage * current, 5),
            dp: round_to(dp, 3),
            dn: round_to(dn, 3),
            temperature: round_to(temperature, 1),
            sample,
        }
    }
}

/// Parse a HID report, reporting why nothing was produced.
///
/// All samples share `timestamp`; `sample` is the slot index 0..=3. Slots
/// whose voltage falls outside the plausible range are skipped.
pub fn parse_report(report: &[u8], timestamp: DateTime<Local>) -> Result<Vec<Reading>, DropReason> {
    if report.len() < HID_REPORT_SIZE {
        return Err(DropReason::TooShort);
    }
    if report[1] != HID_DATA_TYPE {
        return Err(DropReason::NotData);
    }

    let mut readings = Vec::with_capacity(HID_SAMPLES_PER_REPORT);
    for slot in 0..HID_SAMPLES_PER_REPORT {
        let offset = HID_HEADER_SIZE + slot * HID_SAMPLE_SIZE;
        let Some(bytes) = report.get(offset..offset + HID_SAMPLE_SIZE) else {
            break;
        };
        let Ok(raw) = UsbSampleRaw::ref_from_bytes(bytes) else {
            break;
        };
        let reading = raw.to_reading(timestamp, slot as u64);
        if voltage_in_range(reading.voltage) {
            readings.push(reading);
        }
    }
    Ok(readings)
}

/// Decode a HID report; malformed or non-data reports yield an empty vector.
pub fn decode_report(report: &[u8], timestamp: DateTime<Local>) -> Vec<Reading> {
    parse_report(report, timestamp).unwrap_or_default()
}

/// Stateless HID decoder that tallies what it drops.
#[derive(Debug, Default)]
pub struct UsbDecoder {
    counters: DecodeCounters,
}

impl UsbDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, report: &[u8]) -> Vec<Reading> {
        self.decode_at(report, Local::now())
    }

    pub fn decode_at(&mut self, report: &[u8], timestamp: DateTime<Local>) -> Vec<Reading> {
        match parse_report(report, timestamp) {
            Ok(readings) => {
                let rejected = HID_SAMPLES_PER_REPORT - readings.len();
                if rejected > 0 {
                    debug!(rejected, report = %hex::encode(report), "Dropped out-of-range HID samples");
                    self.counters.out_of_range += rejected as u64;
                }
                self.counters.readings += readings.len() as u64;
                readings
            }
            Err(reason) => {
                debug!(%reason, len = report.len(), "Dropped HID report");
                self.counters.record_drop(reason);
                Vec::new()
            }
        }
    }

    pub fn counters(&self) -> DecodeCounters {
        self.counters
    }
}

/// Hardware family, which only decides how often "continue" is re-sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFamily {
    Fnb58,
    Fnb48,
}

impl DeviceFamily {
    pub fn from_product_id(product_id: u16) -> Self {
        match product_id {
            0x5031 | 0x5558 => DeviceFamily::Fnb58,
            _ => DeviceFamily::Fnb48,
        }
    }

    pub fn continue_interval(&self) -> Duration {
        match self {
            DeviceFamily::Fnb58 => Duration::from_secs(1),
            DeviceFamily::Fnb48 => Duration::from_millis(3),
        }
    }
}

/// A tester model recognised on the USB bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    pub model: &'static str,
    pub description: &'static str,
}

pub const SUPPORTED_DEVICES: &[SupportedDevice] = &[
    SupportedDevice {
        vendor_id: 0x2e3c,
        product_id: 0x0049,
        model: "FNB48P/S",
        description: "FNIRSI FNB48P/FNB48S USB Tester",
    },
    SupportedDevice {
        vendor_id: 0x2e3c,
        product_id: 0x5558,
        model: "FNB58",
        description: "FNIRSI FNB58 USB Tester",
    },
    SupportedDevice {
        vendor_id: 0x0483,
        product_id: 0x003a,
        model: "FNB48",
        description: "FNIRSI FNB48 USB Tester (legacy)",
    },
    SupportedDevice {
        vendor_id: 0x0483,
        product_id: 0x003b,
        model: "C1",
        description: "FNIRSI C1 Type-C PD Tester",
    },
    SupportedDevice {
        vendor_id: 0x0716,
        product_id: 0x5030,
        model: "FNB48",
        description: "FNIRSI FNB48 USB Tester",
    },
    SupportedDevice {
        vendor_id: 0x0716,
        product_id: 0x5031,
        model: "FNB58",
        description: "FNIRSI FNB58 USB Tester",
    },
];

impl SupportedDevice {
    pub fn lookup(vendor_id: u16, product_id: u16) -> Option<&'static SupportedDevice> {
        SUPPORTED_DEVICES
            .iter()
            .find(|d| d.vendor_id == vendor_id && d.product_id == product_id)
    }

    pub fn family(&self) -> DeviceFamily {
        DeviceFamily::from_product_id(self.product_id)
    }
}
