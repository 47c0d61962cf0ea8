// Wire constants for FNIRSI USB testers

/// Size of a USB-HID report, in both directions
pub const HID_REPORT_SIZE: usize = 64;

/// Size of the HID data report header (start byte + packet type)
pub const HID_HEADER_SIZE: usize = 2;

/// Packet type byte (offset 1) marking a telemetry report
pub const HID_DATA_TYPE: u8 = 0x04;

/// Size of one sample slot inside a data report
pub const HID_SAMPLE_SIZE: usize = 15;

/// Number of sample slots in one data report
pub const HID_SAMPLES_PER_REPORT: usize = 4;

/// Start byte of every command frame, HID or BLE
pub const FRAME_START: u8 = 0xAA;

/// Raw voltage / current on USB reports are in units of 10 µV / 10 µA
pub const USB_VI_SCALE: f64 = 100_000.0;

/// D+ / D- raw values are millivolts
pub const LINE_SCALE: f64 = 1_000.0;

/// Temperature raw values are tenths of a degree
pub const TEMPERATURE_SCALE: f64 = 10.0;

/// BLE voltage / current / power raw values are in units of 100 µV / 100 µA / 100 µW
pub const BLE_VIP_SCALE: f64 = 10_000.0;

/// Waveform samples are millivolts / milliamps
pub const WAVEFORM_SCALE: f64 = 1_000.0;

/// Offset of the V/I/P triplet inside a single-frame BLE notification
pub const BLE_SINGLE_FRAME_OFFSET: usize = 21;

/// Decoded voltages outside this range are treated as corrupt
pub const MIN_VALID_VOLTAGE: f64 = 0.0;
pub const MAX_VALID_VOLTAGE: f64 = 150.0;

/// BLE GATT characteristic receiving telemetry notifications
pub const BLE_NOTIFY_UUID: &str = "0000ffe4-0000-1000-8000-00805f9b34fb";

/// BLE GATT characteristic accepting commands
pub const BLE_WRITE_UUID: &str = "0000ffe9-0000-1000-8000-00805f9b34fb";

/// Name fragments identifying a tester during a BLE scan
pub const BLE_NAME_PATTERNS: &[&str] = &["FNB58", "FNB48", "C1", "FNIRSI"];

/// Interrupt endpoints of the HID interface
pub const ENDPOINT_OUT: u8 = 0x01;
pub const ENDPOINT_IN: u8 = 0x81;

/// Alerts of the same kind and level are suppressed for this many seconds
pub const ALERT_COOLDOWN_SECS: f64 = 5.0;

/// Number of alerts kept in the history ring
pub const ALERT_HISTORY_LIMIT: usize = 100;

/// Number of (voltage, D+, D-) triples kept by the protocol classifier
pub const PROTOCOL_HISTORY_SIZE: usize = 10;

/// Number of enriched readings kept for live views
pub const LIVE_BUFFER_SIZE: usize = 2000;
