use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::Display;

use crate::constants::{MAX_VALID_VOLTAGE, MIN_VALID_VOLTAGE};
use crate::protocol::ProtocolInfo;

/// Transport a reading arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionType {
    Usb,
    Bluetooth,
}

/// One instantaneous measurement, normalized to SI units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Host time the sample was decoded, not device time
    pub timestamp: DateTime<Local>,
    pub voltage: f64,     // Volts
    pub current: f64,     // Amperes
    pub power: f64,       // Watts
    pub dp: f64,          // D+ line, Volts
    pub dn: f64,          // D- line, Volts
    pub temperature: f64, // °C
    /// Index within the decode batch (USB) or connection (BLE)
    pub sample: u64,
}

impl Reading {
    /// Build a reading with power derived from voltage and current.
    pub fn from_vi(timestamp: DateTime<Local>, voltage: f64, current: f64) -> Self {
        Self {
            timestamp,
            voltage,
            current,
            power: round_to(voltage * current, 5),
            dp: 0.0,
            dn: 0.0,
            temperature: 0.0,
            sample: 0,
        }
    }

    pub fn with_lines(mut self, dp: f64, dn: f64) -> Self {
        self.dp = dp;
        self.dn = dn;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_sample(mut self, sample: u64) -> Self {
        self.sample = sample;
        self
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "V: {:.5} V, I: {:.5} A, P: {:.5} W, D+: {:.3} V, D-: {:.3} V, Temp: {:.1} °C",
            self.voltage, self.current, self.power, self.dp, self.dn, self.temperature
        )
    }
}

/// A reading after the monitor pipeline has classified it and checked alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedReading {
    #[serde(flatten)]
    pub reading: Reading,
    pub protocol: ProtocolInfo,
    pub has_alerts: bool,
}

impl AsRef<Reading> for EnrichedReading {
    fn as_ref(&self) -> &Reading {
        &self.reading
    }
}

impl AsRef<Reading> for Reading {
    fn as_ref(&self) -> &Reading {
        self
    }
}

impl fmt::Display for EnrichedReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} {}]", self.reading, self.protocol.protocol, self.protocol.mode)?;
        if self.has_alerts {
            write!(f, " !")?;
        }
        Ok(())
    }
}

/// Whether a decoded bus voltage is physically plausible.
pub fn voltage_in_range(voltage: f64) -> bool {
    (MIN_VALID_VOLTAGE..=MAX_VALID_VOLTAGE).contains(&voltage)
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
