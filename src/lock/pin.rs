//! Digital output lines driving the lock relay and the buzzer

use crate::error::{AccessError, Result};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub trait OutputPin: Send {
    /// Drive the line high (`true`) or low.
    fn set_level(&mut self, high: bool) -> Result<()>;

    fn describe(&self) -> String {
        String::from("output pin")
    }
}

/// GPIO line driven through the Linux sysfs interface.
///
/// `/sys/class/gpio` is deprecated in favour of the GPIO character device and
/// is missing on kernels built without `CONFIG_GPIO_SYSFS`; there `open` fails
/// with a device error and the lock must run in simulation or behind another
/// `OutputPin`.
#[derive(Debug)]
pub struct SysfsPin {
    pin: u32,
    value_path: PathBuf,
}

const GPIO_ROOT: &str = "/sys/class/gpio";

impl SysfsPin {
    /// Export `pin` and configure it as an output.
    pub fn open(pin: u32) -> Result<Self> {
        let dir = PathBuf::from(GPIO_ROOT).join(format!("gpio{}", pin));

        if !dir.exists() {
            fs::write(PathBuf::from(GPIO_ROOT).join("export"), pin.to_string())
                .map_err(|e| AccessError::device(format!("cannot export GPIO {}: {}", pin, e)))?;
            // udev needs a moment to fix permissions on the new node
            std::thread::sleep(Duration::from_millis(100));
        }

        fs::write(dir.join("direction"), "out").map_err(|e| {
            AccessError::device(format!("cannot set GPIO {} as output: {}", pin, e))
        })?;

        Ok(Self {
            pin,
            value_path: dir.join("value"),
        })
    }
}

impl OutputPin for SysfsPin {
    fn set_level(&mut self, high: bool) -> Result<()> {
        fs::write(&self.value_path, if high { "1" } else { "0" })
            .map_err(|e| AccessError::device(format!("GPIO {} write failed: {}", self.pin, e)))
    }

    fn describe(&self) -> String {
        format!("GPIO {}", self.pin)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Records every level written; can be told to fail.
    #[derive(Clone, Default)]
    pub struct RecordingPin {
        pub levels: Arc<Mutex<Vec<bool>>>,
        pub fail: Arc<AtomicBool>,
    }

    impl RecordingPin {
        pub fn writes(&self) -> Vec<bool> {
            self.levels.lock().unwrap().clone()
        }

        pub fn set_failing(&self, failing: bool) {
            self.fail.store(failing, Ordering::SeqCst);
        }
    }

    impl OutputPin for RecordingPin {
        fn set_level(&mut self, high: bool) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AccessError::device("relay not responding"));
            }
            self.levels.lock().unwrap().push(high);
            Ok(())
        }
    }

    #[test]
    fn test_recording_pin_failure() {
        let mut pin = RecordingPin::default();
        pin.set_level(true).unwrap();
        pin.set_failing(true);
        assert!(pin.set_level(false).is_err());
        assert_eq!(pin.writes(), vec![true]);
    }
}
