//! RFID fallback: reader input, card decoding and window arbitration

pub mod arbiter;
pub mod decoder;
pub mod input;

pub use arbiter::{FallbackArbiter, RfidGrant, ScanOutcome, WindowHandle, WindowResult};
pub use decoder::RfidDecoder;
pub use input::{parse_trigger_key, spawn_keyboard_wedge, spawn_stdin_reader};
