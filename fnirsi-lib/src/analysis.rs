//! Offline analysis of recorded readings.

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::reading::Reading;

/// Current above which a sample counts as charging, in amperes
pub const DEFAULT_CHARGING_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PhaseKind {
    Charging,
    Idle,
}

/// A run of consecutive samples on the same side of the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargingPhase {
    pub phase: PhaseKind,
    /// Index of the first sample, inclusive
    pub start_index: usize,
    /// Index of the last sample, inclusive
    pub end_index: usize,
}

impl ChargingPhase {
    pub fn samples(&self) -> usize {
        self.end_index - self.start_index + 1
    }
}

/// Split a series into alternating charging and idle phases.
///
/// A sample is charging when its current is strictly above `threshold`.
pub fn detect_charging_phases<R: AsRef<Reading>>(readings: &[R], threshold: f64) -> Vec<ChargingPhase> {
    let mut phases: Vec<ChargingPhase> = Vec::new();
    for (index, reading) in readings.iter().enumerate() {
        let kind = if reading.as_ref().current > threshold {
            PhaseKind::Charging
        } else {
            PhaseKind::Idle
        };
        match phases.last_mut() {
            Some(last) if last.phase == kind => last.end_index = index,
            _ => phases.push(ChargingPhase {
                phase: kind,
                start_index: index,
                end_index: index,
            }),
        }
    }
    phases
}
