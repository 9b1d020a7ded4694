//! Trait for camera devices

use crate::error::Result;
use crate::pipeline::types::Frame;

/// A video capture device.
///
/// `read` may block, but must return within one device read timeout.
pub trait CameraDevice: Send {
    /// Acquire the device handle.
    fn open(&mut self) -> Result<()>;

    /// Release the device handle. Safe to call when not open.
    fn close(&mut self);

    /// Grab the next frame.
    fn read(&mut self) -> Result<Frame>;

    fn describe(&self) -> String {
        String::from("camera")
    }
}
