//! Camera capture
//!
//! Provides the camera device interface, the recovering frame source the
//! session reads from, and a simulated camera for running without hardware.

mod simulated;
pub mod source;
mod traits;

pub use simulated::SimulatedCamera;
pub use source::FrameSource;
pub use traits::CameraDevice;
