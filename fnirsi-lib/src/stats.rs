//! Running session statistics and charge-completion estimates.

use chrono::{DateTime, Local, TimeDelta};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::reading::Reading;

/// Minimum sample count before a charge estimate is attempted
pub const ESTIMATE_MIN_SAMPLES: u64 = 100;
/// Minimum accumulated duration before a charge estimate is attempted
pub const ESTIMATE_MIN_DURATION_S: f64 = 10.0;
/// Minimum average current before a charge estimate is attempted
pub const ESTIMATE_MIN_CURRENT_A: f64 = 0.01;

/// Running accumulator for one channel.
#[derive(Debug, Clone, Copy)]
struct Accumulator {
    min: f64,
    max: f64,
    sum: f64,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
        }
    }
}

impl Accumulator {
    fn push(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
    }

    fn snapshot(&self, count: u64) -> ChannelStats {
        if count == 0 {
            return ChannelStats::default();
        }
        ChannelStats {
            min: self.min,
            max: self.max,
            avg: self.sum / count as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Read-only statistics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub samples: u64,
    pub voltage: ChannelStats,
    pub current: ChannelStats,
    pub power: ChannelStats,
    pub energy_wh: f64,
    pub capacity_ah: f64,
    pub duration_s: f64,
    pub start_time: DateTime<Local>,
}

impl SessionStatistics {
    pub fn energy_mwh(&self) -> f64 {
        self.energy_wh * 1000.0
    }

    pub fn capacity_mah(&self) -> f64 {
        self.capacity_ah * 1000.0
    }
}

impl fmt::Display for SessionStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Samples:  {}", self.samples)?;
        writeln!(f, "Duration: {}", format_duration(self.duration_s))?;
        writeln!(
            f,
            "Voltage:  min {:.4} V, max {:.4} V, avg {:.4} V",
            self.voltage.min, self.voltage.max, self.voltage.avg
        )?;
        writeln!(
            f,
            "Current:  min {:.5} A, max {:.5} A, avg {:.5} A",
            self.current.min, self.current.max, self.current.avg
        )?;
        writeln!(
            f,
            "Power:    min {:.4} W, max {:.4} W, avg {:.4} W",
            self.power.min, self.power.max, self.power.avg
        )?;
        write!(f, "Energy:   {:.3} mWh, capacity {:.3} mAh", self.energy_mwh(), self.capacity_mah())
    }
}

/// Outcome of [`StatisticsTracker::charge_estimate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChargeEstimate {
    /// Too few samples, too short, or too little current to project from
    InsufficientData,
    /// No target given: what has been charged so far
    Progress { charged_mah: f64, avg_current_ma: f64 },
    Complete { charged_mah: f64 },
    Remaining {
        charged_mah: f64,
        target_mah: f64,
        remaining_mah: f64,
        avg_current_ma: f64,
        remaining_s: f64,
        eta: DateTime<Local>,
        percent: f64,
    },
}

/// Accumulates min/max/avg, energy and capacity over a stream of readings.
#[derive(Debug, Clone)]
pub struct StatisticsTracker {
    samples: u64,
    voltage: Accumulator,
    current: Accumulator,
    power: Accumulator,
    energy_wh: f64,
    capacity_ah: f64,
    duration_s: f64,
    start_time: DateTime<Local>,
}

impl Default for StatisticsTracker {
    fn default() -> Self {
        Self {
            samples: 0,
            voltage: Accumulator::default(),
            current: Accumulator::default(),
            power: Accumulator::default(),
            energy_wh: 0.0,
            capacity_ah: 0.0,
            duration_s: 0.0,
            start_time: Local::now(),
        }
    }
}

impl StatisticsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all accumulators and restart the clock.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fold in one reading that covers `dt` seconds.
    pub fn update(&mut self, reading: &Reading, dt: f64) {
        self.samples += 1;
        self.voltage.push(reading.voltage);
        self.current.push(reading.current);
        self.power.push(reading.power);
        self.energy_wh += reading.power * dt / 3600.0;
        self.capacity_ah += reading.current * dt / 3600.0;
        self.duration_s += dt;
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn snapshot(&self) -> SessionStatistics {
        SessionStatistics {
            samples: self.samples,
            voltage: self.voltage.snapshot(self.samples),
            current: self.current.snapshot(self.samples),
            power: self.power.snapshot(self.samples),
            energy_wh: self.energy_wh,
            capacity_ah: self.capacity_ah,
            duration_s: self.duration_s,
            start_time: self.start_time,
        }
    }

    pub fn charge_estimate(&self, target_mah: Option<f64>) -> ChargeEstimate {
        self.charge_estimate_at(target_mah, Local::now())
    }

    /// Linear projection of the remaining charge time from the average current.
    pub fn charge_estimate_at(&self, target_mah: Option<f64>, now: DateTime<Local>) -> ChargeEstimate {
        if self.samples < ESTIMATE_MIN_SAMPLES || self.duration_s < ESTIMATE_MIN_DURATION_S {
            return ChargeEstimate::InsufficientData;
        }
        let avg_current = self.current.sum / self.samples as f64;
        if avg_current < ESTIMATE_MIN_CURRENT_A {
            return ChargeEstimate::InsufficientData;
        }

        let charged_mah = self.capacity_ah * 1000.0;
        let avg_current_ma = avg_current * 1000.0;
        let Some(target_mah) = target_mah.filter(|t| *t > 0.0) else {
            return ChargeEstimate::Progress {
                charged_mah,
                avg_current_ma,
            };
        };

        let remaining_mah = target_mah - charged_mah;
        if remaining_mah <= 0.0 {
            return ChargeEstimate::Complete { charged_mah };
        }
        let remaining_s = remaining_mah / avg_current_ma * 3600.0;
        let eta = TimeDelta::try_milliseconds((remaining_s * 1000.0) as i64)
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now);

        ChargeEstimate::Remaining {
            charged_mah,
            target_mah,
            remaining_mah,
            avg_current_ma,
            remaining_s,
            eta,
            percent: charged_mah / target_mah * 100.0,
        }
    }
}

/// `"1h 2m 3s"`, `"2m 3s"` or `"3s"`.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}
