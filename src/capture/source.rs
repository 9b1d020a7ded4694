//! Frame source with a single recovery cycle per failure streak

use crate::capture::CameraDevice;
use crate::config::CameraConfig;
use crate::pipeline::types::Frame;
use log::{debug, error, info, warn};
use std::time::Duration;

pub struct FrameSource {
    device: Box<dyn CameraDevice>,
    max_consecutive_failures: u32,
    recovery_delay: Duration,
    running: bool,
    failed: bool,
    consecutive_failures: u32,
    recovered_in_streak: bool,
}

impl FrameSource {
    pub fn new(device: Box<dyn CameraDevice>, config: &CameraConfig) -> Self {
        Self {
            device,
            max_consecutive_failures: config.max_consecutive_failures.max(1),
            recovery_delay: config.recovery_delay(),
            running: false,
            failed: false,
            consecutive_failures: 0,
            recovered_in_streak: false,
        }
    }

    /// Open the device. Returns true when frames can be read.
    pub fn start(&mut self) -> bool {
        if self.running {
            return true;
        }

        match self.device.open() {
            Ok(()) => {
                info!("Frame source started on {}", self.device.describe());
                self.running = true;
                self.failed = false;
                self.consecutive_failures = 0;
                self.recovered_in_streak = false;
                true
            }
            Err(e) => {
                error!("Failed to start {}: {}", self.device.describe(), e);
                false
            }
        }
    }

    pub fn stop(&mut self) {
        if self.running {
            self.device.close();
            self.running = false;
            info!("Frame source stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Set once the recovery cycle has been spent and the device still
    /// does not deliver. Cleared by the next successful `start`.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Next frame, or `None` on a read failure. The `max_consecutive_failures`
    /// failure in a row triggers the recovery cycle (stop, wait, start) once
    /// per streak.
    pub async fn get_frame(&mut self) -> Option<Frame> {
        if self.failed || !self.running {
            return None;
        }

        match self.device.read() {
            Ok(frame) => {
                self.consecutive_failures = 0;
                self.recovered_in_streak = false;
                Some(frame)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                debug!(
                    "Frame read failed ({} in a row): {}",
                    self.consecutive_failures, e
                );

                if self.consecutive_failures >= self.max_consecutive_failures {
                    if self.recovered_in_streak {
                        error!(
                            "{} still failing after recovery, giving up",
                            self.device.describe()
                        );
                        self.failed = true;
                    } else {
                        self.recover().await;
                    }
                }
                None
            }
        }
    }

    async fn recover(&mut self) {
        warn!(
            "{} consecutive frame failures, restarting {}",
            self.consecutive_failures,
            self.device.describe()
        );
        self.stop();
        tokio::time::sleep(self.recovery_delay).await;

        if self.start() {
            self.recovered_in_streak = true;
        } else {
            self.failed = true;
        }
        self.consecutive_failures = 0;
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}
