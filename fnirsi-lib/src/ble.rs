//! Decoding of BLE telemetry notifications.
//!
//! Two notification formats exist, chosen by the advertised device name:
//!
//! - **Single frame** (FNB58): one V/I/P triplet at a fixed offset.
//! - **Framed** (FNB48 family, C1): a run of `[0xAA][cmd][len][data][crc]`
//!   sub-packets. The device multiplexes power, temperature, D+/D- and
//!   waveform data onto one characteristic at different rates, so the
//!   decoder carries the latest value of each field across notifications
//!   and emits one coherent reading per power or waveform update.

use chrono::{DateTime, Local};
use num_enum::{FromPrimitive, IntoPrimitive};
use tracing::debug;
use zerocopy::byteorder::little_endian::{I32, U16};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::constants::{
    BLE_NAME_PATTERNS, BLE_SINGLE_FRAME_OFFSET, BLE_VIP_SCALE, FRAME_START, LINE_SCALE, TEMPERATURE_SCALE,
    WAVEFORM_SCALE,
};
use crate::diagnostics::{DecodeCounters, DropReason};
use crate::reading::{Reading, round_to, voltage_in_range};

/// Commands understood by the tester over BLE.
pub const CMD_GET_INFO: u8 = 0x81;
pub const CMD_START: u8 = 0x82;
pub const CMD_STOP: u8 = 0x84;
pub const CMD_GET_STATUS: u8 = 0x85;

/// Sub-packet command codes of the framed notification format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum FrameCommand {
    /// Voltage / current / power, 3 × i32
    Power = 0x04,
    /// Resistance + signed temperature
    Temperature = 0x05,
    /// D- / D+ / detected protocol
    Lines = 0x06,
    /// Fast waveform V/I in mV/mA
    Waveform = 0x07,

    #[num_enum(catch_all)]
    Unknown(u8),
}

/// Little-endian V/I/P triplet shared by the single-frame format and cmd 0x04
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct PowerTripletRaw {
    pub voltage: I32, // 100 µV
    pub current: I32, // 100 µA
    pub power: I32,   // 100 µW
}

impl PowerTripletRaw {
    fn scaled(&self) -> (f64, f64, f64) {
        (
            self.voltage.get() as f64 / BLE_VIP_SCALE,
            self.current.get() as f64 / BLE_VIP_SCALE,
            self.power.get() as f64 / BLE_VIP_SCALE,
        )
    }
}

/// Payload of cmd 0x05
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct TemperatureFrameRaw {
    pub resistance: [u8; 4],
    pub sign: u8, // > 0 means positive
    pub magnitude: U16,
}

/// Payload of cmd 0x06
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct LinesFrameRaw {
    pub dn_mv: U16,
    pub dp_mv: U16,
}

/// Payload of cmd 0x07
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct WaveformFrameRaw {
    pub voltage_mv: U16,
    pub current_ma: U16,
}

/// Notification layout spoken by a BLE tester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleFormat {
    SingleFrame,
    Framed,
}

impl BleFormat {
    /// FNB58 speaks the single-frame format; every other name, or none, the framed one.
    pub fn detect(device_name: Option<&str>) -> Self {
        match device_name {
            Some(name) if name.to_uppercase().contains("FNB58") => BleFormat::SingleFrame,
            _ => BleFormat::Framed,
        }
    }
}

/// Whether an advertised name belongs to a tester.
pub fn is_tester_name(name: Option<&str>, custom: Option<&str>) -> bool {
    let Some(name) = name else {
        return false;
    };
    let upper = name.to_uppercase();
    BLE_NAME_PATTERNS.iter().any(|p| upper.contains(p)) || custom.is_some_and(|c| name.contains(c))
}

/// CRC-16/XMODEM (poly 0x1021, init 0).
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}

/// Frame a command as `[0xAA][cmd][len][payload][crc low byte]`.
pub fn build_command(cmd: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.push(FRAME_START);
    frame.push(cmd);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push((crc16_xmodem(&frame) & 0xFF) as u8);
    frame
}

/// Latest value of every field carried by the framed format.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FramedState {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub dp: f64,
    pub dn: f64,
    pub temperature: f64,
}

impl FramedState {
    /// Commit a V/I/P update only if the voltage is plausible.
    ///
    /// Returns `false` and leaves the state untouched for glitch frames.
    pub fn try_update_power_triplet(&mut self, voltage: f64, current: f64, power: f64) -> bool {
        if !voltage_in_range(voltage) {
            return false;
        }
        self.voltage = voltage;
        self.current = current;
        self.power = power;
        true
    }

    pub fn update_temperature(&mut self, temperature: f64) {
        self.temperature = temperature;
    }

    pub fn update_lines(&mut self, dp: f64, dn: f64) {
        self.dp = dp;
        self.dn = dn;
    }

    fn to_reading(self, timestamp: DateTime<Local>, sample: u64) -> Reading {
        Reading {
            timestamp,
            voltage: round_to(self.voltage, 5),
            current: round_to(self.current, 5),
            power: round_to(self.power, 5),
            dp: round_to(self.dp, 3),
            dn: round_to(self.dn, 3),
            temperature: round_to(self.temperature, 1),
            sample,
        }
    }
}

/// Per-connection BLE decoder.
#[derive(Debug)]
pub struct BleDecoder {
    format: BleFormat,
    state: FramedState,
    sample_count: u64,
    counters: DecodeCounters,
}

impl BleDecoder {
    pub fn new(format: BleFormat) -> Self {
        Self {
            format,
            state: FramedState::default(),
            sample_count: 0,
            counters: DecodeCounters::default(),
        }
    }

    pub fn for_device(device_name: Option<&str>) -> Self {
        Self::new(BleFormat::detect(device_name))
    }

    pub fn format(&self) -> BleFormat {
        self.format
    }

    pub fn state(&self) -> &FramedState {
        &self.state
    }

    /// Number of readings produced on this connection.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn counters(&self) -> DecodeCounters {
        self.counters
    }

    pub fn decode(&mut self, payload: &[u8]) -> Option<Reading> {
        self.decode_at(payload, Local::now())
    }

    pub fn decode_at(&mut self, payload: &[u8], timestamp: DateTime<Local>) -> Option<Reading> {
        let reading = match self.format {
            BleFormat::SingleFrame => self.decode_single_frame(payload, timestamp),
            BleFormat::Framed => self.decode_framed(payload, timestamp),
        };
        if reading.is_some() {
            self.counters.readings += 1;
        }
        reading
    }

    fn next_sample(&mut self) -> u64 {
        let sample = self.sample_count;
        self.sample_count += 1;
        sample
    }

    fn drop_frame(&mut self, reason: DropReason, payload: &[u8]) {
        debug!(%reason, frame = %hex::encode(payload), "Dropped BLE frame");
        self.counters.record_drop(reason);
    }

    fn decode_single_frame(&mut self, payload: &[u8], timestamp: DateTime<Local>) -> Option<Reading> {
        let Some(bytes) = payload.get(BLE_SINGLE_FRAME_OFFSET..) else {
            self.drop_frame(DropReason::TooShort, payload);
            return None;
        };
        let Ok((triplet, _)) = PowerTripletRaw::ref_from_prefix(bytes) else {
            self.drop_frame(DropReason::TooShort, payload);
            return None;
        };
        let (voltage, current, power) = triplet.scaled();
        if !voltage_in_range(voltage) {
            self.drop_frame(DropReason::OutOfRange, payload);
            return None;
        }

        let sample = self.next_sample();
        Some(Reading {
            timestamp,
            voltage: round_to(voltage, 5),
            current: round_to(current, 5),
            power: round_to(power, 5),
            dp: 0.0,
            dn: 0.0,
            temperature: 0.0,
            sample,
        })
    }

    fn decode_framed(&mut self, payload: &[u8], timestamp: DateTime<Local>) -> Option<Reading> {
        let mut saw_power_update = false;
        let mut cursor = 0;

        while cursor < payload.len() {
            if payload[cursor] != FRAME_START {
                cursor += 1;
                continue;
            }
            let (Some(&cmd), Some(&len)) = (payload.get(cursor + 1), payload.get(cursor + 2)) else {
                self.drop_frame(DropReason::Truncated, &payload[cursor..]);
                break;
            };
            let start = cursor + 3;
            let Some(data) = payload.get(start..start + len as usize) else {
                self.drop_frame(DropReason::Truncated, &payload[cursor..]);
                break;
            };
            // header + data + crc byte
            cursor = start + len as usize + 1;

            match FrameCommand::from_primitive(cmd) {
                FrameCommand::Power => {
                    if let Ok((triplet, _)) = PowerTripletRaw::ref_from_prefix(data) {
                        let (v, i, p) = triplet.scaled();
                        if !self.state.try_update_power_triplet(v, i, p) {
                            self.drop_frame(DropReason::OutOfRange, data);
                        }
                        saw_power_update = true;
                    } else {
                        self.drop_frame(DropReason::Truncated, data);
                    }
                }
                FrameCommand::Temperature => {
                    if let Ok((frame, _)) = TemperatureFrameRaw::ref_from_prefix(data) {
                        let sign = if frame.sign > 0 { 1.0 } else { -1.0 };
                        self.state
                            .update_temperature(sign * frame.magnitude.get() as f64 / TEMPERATURE_SCALE);
                    } else {
                        self.drop_frame(DropReason::Truncated, data);
                    }
                }
                FrameCommand::Lines => {
                    // dn, dp, then a 2-byte protocol code we do not use
                    match LinesFrameRaw::ref_from_prefix(data) {
                        Ok((frame, _)) if data.len() >= 6 => self.state.update_lines(
                            frame.dp_mv.get() as f64 / LINE_SCALE,
                            frame.dn_mv.get() as f64 / LINE_SCALE,
                        ),
                        _ => self.drop_frame(DropReason::Truncated, data),
                    }
                }
                FrameCommand::Waveform => {
                    if let Ok((frame, _)) = WaveformFrameRaw::ref_from_prefix(data) {
                        let voltage = frame.voltage_mv.get() as f64 / WAVEFORM_SCALE;
                        let current = frame.current_ma.get() as f64 / WAVEFORM_SCALE;
                        if !self.state.try_update_power_triplet(voltage, current, voltage * current) {
                            self.drop_frame(DropReason::OutOfRange, data);
                        }
                        saw_power_update = true;
                    } else {
                        self.drop_frame(DropReason::Truncated, data);
                    }
                }
                FrameCommand::Unknown(code) => {
                    debug!(cmd = code, len, "Skipping unknown BLE sub-packet");
                    self.counters.record_drop(DropReason::UnknownCommand);
                }
            }
        }

        if !saw_power_update {
            return None;
        }
        let sample = self.next_sample();
        Some(self.state.to_reading(timestamp, sample))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_xmodem_known_values() {
        assert_eq!(crc16_xmodem(&[]), 0);
        assert_eq!(crc16_xmodem(&[0xAA, 0x81, 0x00]) & 0xFF, 0xF4);
        assert_eq!(crc16_xmodem(&[0xAA, 0x82, 0x00]) & 0xFF, 0xA7);
        assert_eq!(crc16_xmodem(&[0x01]), 0x1021);
        assert_ne!(crc16_xmodem(&[0x01]), crc16_xmodem(&[0x02]));
    }

    #[test]
    fn test_build_command() {
        assert_eq!(build_command(CMD_GET_INFO, &[]), vec![0xAA, 0x81, 0x00, 0xF4]);
        assert_eq!(build_command(CMD_START, &[]), vec![0xAA, 0x82, 0x00, 0xA7]);

        let cmd = build_command(0x86, &[0x01, 0x05]);
        assert_eq!(cmd.len(), 6);
        assert_eq!(&cmd[..5], &[0xAA, 0x86, 0x02, 0x01, 0x05]);
        assert_eq!(cmd[5], (crc16_xmodem(&cmd[..5]) & 0xFF) as u8);
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(BleFormat::detect(Some("FNB58")), BleFormat::SingleFrame);
        assert_eq!(BleFormat::detect(Some("fnb58-ABCD")), BleFormat::SingleFrame);
        assert_eq!(BleFormat::detect(Some("FNB48S")), BleFormat::Framed);
        assert_eq!(BleFormat::detect(Some("C1")), BleFormat::Framed);
        assert_eq!(BleFormat::detect(Some("SomeDevice")), BleFormat::Framed);
        assert_eq!(BleFormat::detect(None), BleFormat::Framed);
    }

    #[test]
    fn test_tester_names() {
        assert!(is_tester_name(Some("FNB58-ABCD"), None));
        assert!(is_tester_name(Some("FNB48S"), None));
        assert!(is_tester_name(Some("C1"), None));
        assert!(!is_tester_name(Some("RandomDevice"), None));
        assert!(!is_tester_name(None, None));
        assert!(is_tester_name(Some("MyCustomDevice-123"), Some("MyCustomDevice")));
    }

    #[test]
    fn test_try_update_power_triplet_gate() {
        let mut state = FramedState::default();
        assert!(state.try_update_power_triplet(5.0, 1.0, 5.0));
        assert!(!state.try_update_power_triplet(160.0, 1.0, 160.0));
        assert!(!state.try_update_power_triplet(-0.5, 1.0, -0.5));
        assert_eq!(state.voltage, 5.0);
        assert_eq!(state.power, 5.0);
        assert!(state.try_update_power_triplet(150.0, 0.0, 0.0));
        assert_eq!(state.voltage, 150.0);
    }

    #[test]
    fn test_unknown_command_consumes_declared_length() {
        let mut decoder = BleDecoder::new(BleFormat::Framed);
        // 0x09 sub-packet whose data contains an 0xAA byte, then a waveform frame
        let mut payload = vec![0xAA, 0x09, 0x02, 0xAA, 0x07, 0x00];
        payload.extend_from_slice(&[0xAA, 0x07, 0x04]);
        payload.extend_from_slice(&5000u16.to_le_bytes());
        payload.extend_from_slice(&2000u16.to_le_bytes());
        payload.push(0x00);

        let reading = decoder.decode(&payload).unwrap();
        assert_eq!(reading.voltage, 5.0);
        assert_eq!(reading.current, 2.0);
        assert_eq!(reading.power, 10.0);
        assert_eq!(decoder.counters().unknown_command, 1);
    }

    #[test]
    fn test_negative_temperature() {
        let mut decoder = BleDecoder::new(BleFormat::Framed);
        let payload = [0xAA, 0x05, 0x07, 0, 0, 0, 0, 0x00, 0x7D, 0x00, 0x00];
        assert!(decoder.decode(&payload).is_none());
        assert_eq!(decoder.state().temperature, -12.5);
    }
}
