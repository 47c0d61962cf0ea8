pub mod alert;
pub mod analysis;
pub mod ble;
pub mod ble_device;
pub mod buffer;
pub mod command;
pub mod constants;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod monitor;
pub mod protocol;
pub mod reader;
pub mod reading;
pub mod session;
pub mod settings;
pub mod stats;
pub mod subscriber;
pub mod usb;

// Re-export the types most callers need
pub use alert::{Alert, AlertEngine, AlertThresholds};
pub use ble::BleDecoder;
pub use ble_device::BleMeter;
pub use device::UsbMeter;
pub use error::FnirsiError;
pub use monitor::Monitor;
pub use protocol::{ProtocolClassifier, ProtocolInfo};
pub use reading::{EnrichedReading, Reading};
pub use session::{Session, SessionRecorder, SessionStore};
pub use stats::StatisticsTracker;
pub use usb::UsbDecoder;
