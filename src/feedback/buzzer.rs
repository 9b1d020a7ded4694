use crate::error::{AccessError, Result};
use crate::feedback::{Cue, FeedbackSink};
use crate::lock::OutputPin;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

type SharedPin = Arc<Mutex<Box<dyn OutputPin>>>;

/// Piezo buzzer playing cue patterns on an output pin.
///
/// One pattern plays at a time: a new cue cancels the one in progress and
/// the line is always left low.
pub struct Buzzer {
    pin: SharedPin,
    current: Mutex<Option<CancellationToken>>,
    runtime: Handle,
}

impl Buzzer {
    pub fn new(pin: Box<dyn OutputPin>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| AccessError::configuration("buzzer needs a running tokio runtime"))?;
        log::info!("Buzzer on {}", pin.describe());
        Ok(Self {
            pin: Arc::new(Mutex::new(pin)),
            current: Mutex::new(None),
            runtime,
        })
    }

    fn set(pin: &SharedPin, high: bool) {
        let mut pin = pin.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = pin.set_level(high) {
            log::warn!("Buzzer write failed: {}", e);
        }
    }

    pub fn silence(&self) {
        if let Some(token) = self
            .current
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            token.cancel();
        }
        Self::set(&self.pin, false);
    }
}

impl FeedbackSink for Buzzer {
    fn cue(&self, cue: Cue) {
        let token = CancellationToken::new();
        {
            let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(previous) = current.replace(token.clone()) {
                previous.cancel();
            }
        }

        let pin = self.pin.clone();
        self.runtime.spawn(async move {
            for (on, duration) in cue.pattern() {
                if token.is_cancelled() {
                    return;
                }
                Buzzer::set(&pin, on);
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(duration) => {}
                }
            }
            Buzzer::set(&pin, false);
        });
    }
}

impl Drop for Buzzer {
    fn drop(&mut self) {
        self.silence();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::pin::tests::RecordingPin;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_plays_pattern_and_ends_low() {
        let pin = RecordingPin::default();
        let buzzer = Buzzer::new(Box::new(pin.clone())).unwrap();

        buzzer.cue(Cue::AuthSuccess);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(pin.writes(), vec![true, false, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_cue_cancels_running_pattern() {
        let pin = RecordingPin::default();
        let buzzer = Buzzer::new(Box::new(pin.clone())).unwrap();

        buzzer.cue(Cue::RfidTimeout);
        tokio::time::sleep(Duration::from_millis(50)).await;
        buzzer.cue(Cue::ButtonPress);
        tokio::time::sleep(Duration::from_secs(2)).await;

        // first step of the timeout pattern, then the button beep on its own
        assert_eq!(pin.writes(), vec![true, true, false]);
    }
}
