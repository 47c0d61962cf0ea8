use std::io;
use thiserror::Error;

/// The primary error type for the `fnirsi-lib` library.
///
/// Decoders never produce these: malformed frames are dropped, not reported.
/// Errors here come from transports, storage, and user-supplied configuration.
#[derive(Error, Debug)]
pub enum FnirsiError {
    #[error("USB device not found. Is the FNIRSI tester connected?")]
    DeviceNotFound,

    #[error("No BLE tester found matching {0:?}")]
    BleDeviceNotFound(Vec<String>),

    #[error("Device not connected")]
    NotConnected,

    /// `nusb::Error` is an `io::Error`, so this is mapped explicitly
    /// rather than converted with `?`.
    #[error("USB error: {0}")]
    Usb(nusb::Error),

    #[error("USB transfer error: {0}")]
    Transfer(#[from] nusb::transfer::TransferError),

    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    #[error("Missing GATT characteristic {0}")]
    MissingCharacteristic(uuid::Uuid),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Timeout during device operation: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Unknown threshold: {0}")]
    UnknownThreshold(String),

    #[error("Unknown trigger protocol: {0}")]
    UnknownTriggerProtocol(String),

    #[error("Unsupported mode {mode} for {protocol}")]
    UnsupportedTrigger { protocol: String, mode: String },

    #[error("QC 3.0 voltage must be between 3.6V and 12.0V, got {0:.2}V")]
    InvalidQc3Voltage(f64),

    #[error("Invalid session name: {0:?}")]
    InvalidSessionName(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}
