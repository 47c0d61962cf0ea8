//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use chrono::Local;
#[allow(unused_imports)]
pub use fnirsi_lib::ble::{BleDecoder, BleFormat, crc16_xmodem};
#[allow(unused_imports)]
pub use fnirsi_lib::error::FnirsiError;
#[allow(unused_imports)]
pub use fnirsi_lib::reading::{EnrichedReading, Reading};
#[allow(unused_imports)]
pub use fnirsi_lib::usb::{UsbDecoder, UsbSampleRaw};
#[allow(unused_imports)]
pub use hex;

use zerocopy::IntoBytes;
use zerocopy::byteorder::little_endian::{U16, U32};

/// Decode hex string to bytes for testing
#[allow(dead_code)]
pub fn hex_to_bytes(hex_data: &str) -> Vec<u8> {
    hex::decode(hex_data).expect("Failed to decode hex")
}

/// One HID sample slot in raw device units
#[allow(dead_code)]
pub fn usb_sample(voltage_raw: u32, current_raw: u32, dp_mv: u16, dn_mv: u16, temp_deci_c: u16) -> UsbSampleRaw {
    UsbSampleRaw {
        voltage_raw: U32::new(voltage_raw),
        current_raw: U32::new(current_raw),
        dp_mv: U16::new(dp_mv),
        dn_mv: U16::new(dn_mv),
        reserved: 0,
        temp_deci_c: U16::new(temp_deci_c),
    }
}

/// A full 64-byte data report carrying `samples` (at most four)
#[allow(dead_code)]
pub fn usb_report(samples: &[UsbSampleRaw]) -> Vec<u8> {
    let mut report = vec![0u8; 64];
    report[0] = 0xAA;
    report[1] = 0x04;
    for (slot, sample) in samples.iter().take(4).enumerate() {
        let offset = 2 + slot * 15;
        report[offset..offset + 15].copy_from_slice(sample.as_bytes());
    }
    report
}

/// Single-frame BLE notification with the V/I/P triplet at offset 21
#[allow(dead_code)]
pub fn ble_single_frame(voltage: i32, current: i32, power: i32) -> Vec<u8> {
    let mut payload = vec![0u8; 21];
    payload.extend_from_slice(&voltage.to_le_bytes());
    payload.extend_from_slice(&current.to_le_bytes());
    payload.extend_from_slice(&power.to_le_bytes());
    payload
}

/// `[0xAA][cmd][len][data][crc]` sub-packet of the framed BLE format
#[allow(dead_code)]
pub fn sub_packet(cmd: u8, data: &[u8]) -> Vec<u8> {
    let mut frame = vec![0xAA, cmd, data.len() as u8];
    frame.extend_from_slice(data);
    frame.push((crc16_xmodem(&frame) & 0xFF) as u8);
    frame
}

#[allow(dead_code)]
pub fn power_packet(voltage: i32, current: i32, power: i32) -> Vec<u8> {
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&voltage.to_le_bytes());
    data.extend_from_slice(&current.to_le_bytes());
    data.extend_from_slice(&power.to_le_bytes());
    sub_packet(0x04, &data)
}

/// Temperature in tenths of a degree, negative values set the sign byte to 0
#[allow(dead_code)]
pub fn temperature_packet(deci_c: i16) -> Vec<u8> {
    let mut data = vec![0x10, 0x27, 0x00, 0x00];
    data.push(if deci_c >= 0 { 1 } else { 0 });
    data.extend_from_slice(&deci_c.unsigned_abs().to_le_bytes());
    sub_packet(0x05, &data)
}

#[allow(dead_code)]
pub fn lines_packet(dn_mv: u16, dp_mv: u16) -> Vec<u8> {
    let mut data = Vec::with_capacity(6);
    data.extend_from_slice(&dn_mv.to_le_bytes());
    data.extend_from_slice(&dp_mv.to_le_bytes());
    data.extend_from_slice(&[0x00, 0x00]);
    sub_packet(0x06, &data)
}

#[allow(dead_code)]
pub fn waveform_packet(voltage_mv: u16, current_ma: u16) -> Vec<u8> {
    let mut data = Vec::with_capacity(4);
    data.extend_from_slice(&voltage_mv.to_le_bytes());
    data.extend_from_slice(&current_ma.to_le_bytes());
    sub_packet(0x07, &data)
}

/// FNB58 data report: four samples around 5.08 V / 0.49 A, idle data lines
#[allow(dead_code)]
pub const FNB58_DATA_REPORT: &str = concat!(
    "aa04",
    "a4c00700", "d8bf0000", "1400", "1300", "00", "1b01",
    "a0c00700", "ccbf0000", "1400", "1300", "00", "1b01",
    "9cc00700", "c0bf0000", "1400", "1300", "00", "1b01",
    "a8c00700", "e4bf0000", "1400", "1300", "00", "1b01",
    "0000",
);
