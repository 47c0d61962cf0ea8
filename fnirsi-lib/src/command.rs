//! Host-to-device HID reports: session control and charger triggering.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;
use std::str::FromStr;

use crate::constants::{FRAME_START, HID_REPORT_SIZE};
use crate::error::FnirsiError;

/// A 64-byte output report
pub type HidReport = [u8; HID_REPORT_SIZE];

/// Lower and upper bound of the QC 3.0 fine-adjust range, in volts
pub const QC3_MIN_VOLTAGE: f64 = 3.6;
pub const QC3_MAX_VOLTAGE: f64 = 12.0;

const QC3_ADJUST_HEADER: [u8; 2] = [0x5A, 0x02];

/// Session-control commands. The last byte of the report is a fixed checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum HidCommand {
    GetInfo = 0x81,
    Start = 0x82,
    Continue = 0x83,
}

impl HidCommand {
    fn checksum(self) -> u8 {
        match self {
            HidCommand::GetInfo => 0x8E,
            HidCommand::Start => 0x96,
            HidCommand::Continue => 0x9E,
        }
    }

    pub fn report(self) -> HidReport {
        let mut report = [0u8; HID_REPORT_SIZE];
        report[0] = FRAME_START;
        report[1] = self.into();
        report[HID_REPORT_SIZE - 1] = self.checksum();
        report
    }
}

/// Reports sent once after opening the device, in order.
pub const INIT_SEQUENCE: [HidCommand; 3] = [HidCommand::GetInfo, HidCommand::Start, HidCommand::Start];

/// Charger protocols the tester can emulate a sink for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum TriggerProtocol {
    Qc2 = 0xA1,
    Qc3 = 0xA2,
    Pd = 0xA3,
    Afc = 0xA4,
    Fcp = 0xA5,
    Scp = 0xA6,
    Vooc = 0xA7,
    Apple = 0xA8,
}

impl TriggerProtocol {
    pub const ALL: [TriggerProtocol; 8] = [
        TriggerProtocol::Qc2,
        TriggerProtocol::Qc3,
        TriggerProtocol::Pd,
        TriggerProtocol::Afc,
        TriggerProtocol::Fcp,
        TriggerProtocol::Scp,
        TriggerProtocol::Vooc,
        TriggerProtocol::Apple,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TriggerProtocol::Qc2 => "qc2",
            TriggerProtocol::Qc3 => "qc3",
            TriggerProtocol::Pd => "pd",
            TriggerProtocol::Afc => "afc",
            TriggerProtocol::Fcp => "fcp",
            TriggerProtocol::Scp => "scp",
            TriggerProtocol::Vooc => "vooc",
            TriggerProtocol::Apple => "apple",
        }
    }

    /// Modes this protocol accepts, in level order starting at 1.
    pub fn modes(self) -> &'static [&'static str] {
        match self {
            TriggerProtocol::Qc2 => &["5V", "9V", "12V", "20V"],
            TriggerProtocol::Qc3 | TriggerProtocol::Afc | TriggerProtocol::Fcp => &["5V", "9V", "12V"],
            TriggerProtocol::Pd => &["5V", "9V", "12V", "15V", "20V"],
            TriggerProtocol::Scp => &["5V", "4.5V"],
            TriggerProtocol::Vooc => &["VOOC", "WARP", "SUPERVOOC"],
            TriggerProtocol::Apple => &["2.4A", "2.1A"],
        }
    }
}

impl fmt::Display for TriggerProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TriggerProtocol {
    type Err = FnirsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace(['.', ' ', '_'], "");
        let wanted = match wanted.as_str() {
            "qc" | "qc20" => "qc2",
            "qc30" => "qc3",
            other => other,
        };
        TriggerProtocol::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| FnirsiError::UnknownTriggerProtocol(s.to_string()))
    }
}

/// `9`, `9v` and `9V` all name the same mode.
fn normalize_mode(mode: &str) -> String {
    let mode = mode.trim().to_uppercase();
    if mode.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{mode}V")
    } else {
        mode
    }
}

/// Build the report that triggers `protocol` at `mode`.
pub fn trigger_report(protocol: TriggerProtocol, mode: &str) -> Result<HidReport, FnirsiError> {
    let wanted = normalize_mode(mode);
    let level = protocol
        .modes()
        .iter()
        .position(|m| *m == wanted)
        .ok_or_else(|| FnirsiError::UnsupportedTrigger {
            protocol: protocol.to_string(),
            mode: mode.to_string(),
        })?;

    let mut report = [0u8; HID_REPORT_SIZE];
    report[0] = FRAME_START;
    report[1] = protocol.into();
    report[2] = level as u8 + 1;
    Ok(report)
}

/// Build a QC 3.0 fine-adjust report for `volts`.
pub fn qc3_adjust_report(volts: f64) -> Result<HidReport, FnirsiError> {
    if !(QC3_MIN_VOLTAGE..=QC3_MAX_VOLTAGE).contains(&volts) {
        return Err(FnirsiError::InvalidQc3Voltage(volts));
    }
    let millivolts = (volts * 1000.0).round() as u16;

    let mut report = [0u8; HID_REPORT_SIZE];
    report[..2].copy_from_slice(&QC3_ADJUST_HEADER);
    report[2..4].copy_from_slice(&millivolts.to_le_bytes());
    Ok(report)
}
