//! Door lock actuation

pub mod actuator;
pub mod pin;

pub use actuator::{LockActuator, LockState, LockStatus};
pub use pin::{OutputPin, SysfsPin};
