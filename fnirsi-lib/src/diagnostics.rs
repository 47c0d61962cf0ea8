use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Why a frame or sub-packet produced no reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DropReason {
    TooShort,
    NotData,
    OutOfRange,
    Truncated,
    UnknownCommand,
}

/// Per-decoder tally of accepted and dropped frames.
///
/// Dropping is normal traffic (ack frames, glitch samples), so it is counted
/// rather than logged above `debug`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeCounters {
    pub readings: u64,
    pub too_short: u64,
    pub not_data: u64,
    pub out_of_range: u64,
    pub truncated: u64,
    pub unknown_command: u64,
}

impl DecodeCounters {
    pub fn record_drop(&mut self, reason: DropReason) {
        let slot = match reason {
            DropReason::TooShort => &mut self.too_short,
            DropReason::NotData => &mut self.not_data,
            DropReason::OutOfRange => &mut self.out_of_range,
            DropReason::Truncated => &mut self.truncated,
            DropReason::UnknownCommand => &mut self.unknown_command,
        };
        *slot += 1;
    }

    pub fn dropped(&self) -> u64 {
        self.too_short + self.not_data + self.out_of_range + self.truncated + self.unknown_command
    }
}
