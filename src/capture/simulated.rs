use crate::capture::CameraDevice;
use crate::error::{AccessError, Result};
use crate::pipeline::types::{Frame, PixelFormat};

/// Camera producing uniform grey frames, used when no capture backend is
/// linked in.
#[derive(Debug)]
pub struct SimulatedCamera {
    device_index: u32,
    width: u32,
    height: u32,
    sequence: u64,
    open: bool,
}

impl SimulatedCamera {
    pub fn new(device_index: u32, width: u32, height: u32) -> Self {
        Self {
            device_index,
            width,
            height,
            sequence: 0,
            open: false,
        }
    }
}

impl CameraDevice for SimulatedCamera {
    fn open(&mut self) -> Result<()> {
        log::info!(
            "Simulated camera {} opened at {}x{}",
            self.device_index,
            self.width,
            self.height
        );
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn read(&mut self) -> Result<Frame> {
        if !self.open {
            return Err(AccessError::device("simulated camera is not open"));
        }
        self.sequence += 1;
        Ok(Frame::blank(
            self.width,
            self.height,
            PixelFormat::Rgb8,
            self.sequence,
        ))
    }

    fn describe(&self) -> String {
        format!("simulated camera {}", self.device_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_requires_open() {
        let mut camera = SimulatedCamera::new(0, 64, 48);
        assert!(camera.read().is_err());

        camera.open().unwrap();
        let first = camera.read().unwrap();
        let second = camera.read().unwrap();
        assert_eq!((first.width, first.height), (64, 48));
        assert_eq!(second.sequence, first.sequence + 1);

        camera.close();
        assert!(camera.read().is_err());
    }
}
