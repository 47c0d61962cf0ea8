//! Fast-charging protocol classification from VBUS and the analog D+/D- levels.
//!
//! Rules are evaluated top to bottom and the first match wins. Several rules
//! overlap (PD 9V and AFC, the QC 2.0 bands and QC 3.0), so the order of
//! [`PROTOCOL_SIGNATURES`] is part of the classification result.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::constants::PROTOCOL_HISTORY_SIZE;

/// Closed interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

impl Band {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Extra condition on the D+/D- pair beyond the per-line bands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineCondition {
    Any,
    /// At least one line above 0 V
    Active,
    /// At least one line strictly above the level
    EitherAbove(f64),
    /// `|dp - dn|` strictly below the tolerance
    Shorted(f64),
}

impl LineCondition {
    fn holds(&self, dp: f64, dn: f64) -> bool {
        match *self {
            LineCondition::Any => true,
            LineCondition::Active => dp > 0.0 || dn > 0.0,
            LineCondition::EitherAbove(level) => dp > level || dn > level,
            LineCondition::Shorted(tolerance) => (dp - dn).abs() < tolerance,
        }
    }
}

/// How a signature's mode label is produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModeLabel {
    Fixed(&'static str),
    /// The measured voltage, e.g. `7.5V`
    MeasuredVoltage,
}

/// One declarative classification rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtocolSignature {
    pub protocol: &'static str,
    pub mode: ModeLabel,
    pub version: &'static str,
    pub description: &'static str,
    pub voltage: Option<Band>,
    pub dp: Option<Band>,
    pub dn: Option<Band>,
    pub lines: LineCondition,
}

impl ProtocolSignature {
    pub fn matches(&self, voltage: f64, dp: f64, dn: f64) -> bool {
        self.voltage.is_none_or(|b| b.contains(voltage))
            && self.dp.is_none_or(|b| b.contains(dp))
            && self.dn.is_none_or(|b| b.contains(dn))
            && self.lines.holds(dp, dn)
    }

    fn info(&self, voltage: f64) -> ProtocolInfo {
        let (mode, description) = match self.mode {
            ModeLabel::Fixed(mode) => (mode.to_string(), self.description.to_string()),
            ModeLabel::MeasuredVoltage => (format!("{voltage:.1}V"), format!("{} ({voltage:.1}V)", self.description)),
        };
        ProtocolInfo {
            protocol: self.protocol.to_string(),
            mode,
            version: self.version.to_string(),
            description,
        }
    }
}

const fn pd(mode: &'static str, version: &'static str, description: &'static str, band: Band) -> ProtocolSignature {
    ProtocolSignature {
        protocol: "USB-PD",
        mode: ModeLabel::Fixed(mode),
        version,
        description,
        voltage: Some(band),
        dp: None,
        dn: None,
        lines: LineCondition::Any,
    }
}

const fn qc2(mode: &'static str, description: &'static str, dp: Band, dn: Band) -> ProtocolSignature {
    ProtocolSignature {
        protocol: "QC 2.0",
        mode: ModeLabel::Fixed(mode),
        version: "2.0",
        description,
        voltage: None,
        dp: Some(dp),
        dn: Some(dn),
        lines: LineCondition::Active,
    }
}

const QC2_LOW: Band = Band::new(0.25, 0.35);
const QC2_HIGH: Band = Band::new(0.55, 0.65);

/// Classification rules in priority order.
pub const PROTOCOL_SIGNATURES: &[ProtocolSignature] = &[
    pd("9V", "2.0/3.0", "USB Power Delivery 9V", Band::new(8.5, 9.5)),
    pd("12V", "2.0/3.0", "USB Power Delivery 12V", Band::new(11.5, 12.5)),
    pd("15V", "2.0/3.0", "USB Power Delivery 15V", Band::new(14.5, 15.5)),
    pd("20V", "3.0", "USB Power Delivery 20V", Band::new(19.5, 20.5)),
    qc2("5V", "Qualcomm Quick Charge 2.0 (5V)", QC2_LOW, QC2_LOW),
    qc2("9V", "Qualcomm Quick Charge 2.0 (9V)", QC2_HIGH, QC2_LOW),
    qc2("12V", "Qualcomm Quick Charge 2.0 (12V)", QC2_HIGH, QC2_HIGH),
    ProtocolSignature {
        protocol: "QC 3.0",
        mode: ModeLabel::MeasuredVoltage,
        version: "3.0",
        description: "Qualcomm Quick Charge 3.0",
        voltage: Some(Band::new(3.6, 12.0)),
        dp: None,
        dn: None,
        lines: LineCondition::EitherAbove(0.3),
    },
    // Shadowed by PD 9V at the same voltages; kept so the order stays explicit.
    ProtocolSignature {
        protocol: "AFC",
        mode: ModeLabel::Fixed("9V"),
        version: "1.0",
        description: "Samsung Adaptive Fast Charging",
        voltage: Some(Band::new(8.5, 9.5)),
        dp: None,
        dn: None,
        lines: LineCondition::EitherAbove(0.4),
    },
    ProtocolSignature {
        protocol: "Apple 2.4A",
        mode: ModeLabel::Fixed("5V/2.4A"),
        version: "1.0",
        description: "Apple 2.4A Charging",
        voltage: None,
        dp: Some(Band::new(2.5, 2.9)),
        dn: Some(Band::new(2.5, 2.9)),
        lines: LineCondition::Any,
    },
    ProtocolSignature {
        protocol: "DCP",
        mode: ModeLabel::Fixed("5V"),
        version: "1.2",
        description: "USB Battery Charging 1.2 DCP",
        voltage: None,
        dp: Some(Band::new(1.8, 2.2)),
        dn: Some(Band::new(1.8, 2.2)),
        lines: LineCondition::Shorted(0.1),
    },
    ProtocolSignature {
        protocol: "Standard USB",
        mode: ModeLabel::Fixed("5V"),
        version: "2.0/3.0",
        description: "Standard USB 5V",
        voltage: Some(Band::new(4.5, 5.5)),
        dp: None,
        dn: None,
        lines: LineCondition::Any,
    },
];

/// Result of classifying one sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolInfo {
    pub protocol: String,
    pub mode: String,
    pub version: String,
    pub description: String,
}

impl ProtocolInfo {
    /// Fallback when no signature matches.
    pub fn unknown(voltage: f64) -> Self {
        Self {
            protocol: "Unknown".to_string(),
            mode: format!("{voltage:.1}V"),
            version: "N/A".to_string(),
            description: format!("Unknown Protocol ({voltage:.1}V)"),
        }
    }
}

/// Classify a single sample against [`PROTOCOL_SIGNATURES`].
pub fn classify(voltage: f64, dp: f64, dn: f64) -> ProtocolInfo {
    PROTOCOL_SIGNATURES
        .iter()
        .find(|sig| sig.matches(voltage, dp, dn))
        .map(|sig| sig.info(voltage))
        .unwrap_or_else(|| ProtocolInfo::unknown(voltage))
}

/// Classifier with a short rolling history of the inputs it has seen.
///
/// The decision uses the latest sample only; the history is kept for
/// smoothing by callers.
#[derive(Debug, Clone)]
pub struct ProtocolClassifier {
    history: VecDeque<(f64, f64, f64)>,
    current: Option<ProtocolInfo>,
}

impl Default for ProtocolClassifier {
    fn default() -> Self {
        Self {
            history: VecDeque::with_capacity(PROTOCOL_HISTORY_SIZE),
            current: None,
        }
    }
}

impl ProtocolClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&mut self, voltage: f64, dp: f64, dn: f64) -> ProtocolInfo {
        if self.history.len() == PROTOCOL_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back((voltage, dp, dn));

        let info = classify(voltage, dp, dn);
        self.current = Some(info.clone());
        info
    }

    /// `(voltage, dp, dn)` triples, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &(f64, f64, f64)> {
        self.history.iter()
    }

    pub fn current(&self) -> Option<&ProtocolInfo> {
        self.current.as_ref()
    }
}
