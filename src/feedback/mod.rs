//! User feedback cues (buzzer patterns or log lines)

mod buzzer;

pub use buzzer::Buzzer;

use std::time::Duration;

/// Events the person at the door should hear about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cue {
    Startup,
    Shutdown,
    ButtonPress,
    AuthStart,
    AuthSuccess,
    NoFaceDetected,
    RfidBackupActivated,
    RfidDetected,
    RfidSuccess,
    RfidUnauthorized,
    RfidNotAllowed,
    RfidTimeout,
    Error,
    CooldownWarning,
}

/// `(buzzer on, how long)` steps of a pattern
pub type Step = (bool, Duration);

fn ms(on: bool, millis: u64) -> Step {
    (on, Duration::from_millis(millis))
}

fn beeps(count: usize, on_ms: u64, off_ms: u64) -> Vec<Step> {
    (0..count)
        .flat_map(|_| [ms(true, on_ms), ms(false, off_ms)])
        .collect()
}

impl Cue {
    pub fn pattern(&self) -> Vec<Step> {
        match self {
            Cue::Startup => vec![ms(true, 100), ms(false, 100), ms(true, 100)],
            Cue::Shutdown => vec![ms(true, 100), ms(false, 100), ms(true, 300)],
            Cue::ButtonPress => vec![ms(true, 50)],
            Cue::AuthStart => beeps(3, 100, 100),
            Cue::AuthSuccess => vec![ms(true, 300), ms(false, 200), ms(true, 300)],
            Cue::NoFaceDetected => vec![ms(true, 400)],
            Cue::RfidBackupActivated => {
                let mut steps = beeps(2, 150, 100);
                steps.extend([ms(false, 200), ms(true, 200)]);
                steps
            }
            Cue::RfidDetected => vec![ms(true, 80), ms(false, 50), ms(true, 80)],
            Cue::RfidSuccess => {
                let mut steps = beeps(3, 100, 100);
                steps.extend([ms(false, 100), ms(true, 400)]);
                steps
            }
            Cue::RfidUnauthorized => beeps(4, 50, 50),
            Cue::RfidNotAllowed => vec![ms(true, 200), ms(false, 100), ms(true, 100)],
            Cue::RfidTimeout => beeps(3, 200, 200),
            Cue::Error => (0..3)
                .flat_map(|_| [ms(true, 200), ms(false, 300), ms(true, 100), ms(false, 200)])
                .collect(),
            Cue::CooldownWarning => vec![ms(true, 200)],
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.pattern().iter().map(|(_, d)| *d).sum()
    }
}

pub trait FeedbackSink: Send + Sync {
    /// Start playing `cue`. Must not block.
    fn cue(&self, cue: Cue);
}

/// Feedback sink for installations without a buzzer
#[derive(Debug, Default)]
pub struct LogFeedback;

impl FeedbackSink for LogFeedback {
    fn cue(&self, cue: Cue) {
        log::debug!("Feedback cue: {:?}", cue);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Remembers every cue for assertions.
    #[derive(Default)]
    pub struct RecordingFeedback {
        pub cues: Mutex<Vec<Cue>>,
    }

    impl RecordingFeedback {
        pub fn cues(&self) -> Vec<Cue> {
            self.cues.lock().unwrap().clone()
        }

        pub fn count(&self, cue: Cue) -> usize {
            self.cues().iter().filter(|c| **c == cue).count()
        }
    }

    impl FeedbackSink for RecordingFeedback {
        fn cue(&self, cue: Cue) {
            self.cues.lock().unwrap().push(cue);
        }
    }

    #[test]
    fn test_patterns() {
        assert_eq!(Cue::ButtonPress.total_duration(), Duration::from_millis(50));
        assert_eq!(Cue::RfidUnauthorized.pattern().len(), 8);
        assert_eq!(Cue::RfidSuccess.total_duration(), Duration::from_millis(1100));
        assert!(Cue::AuthSuccess.pattern()[0].0);
    }
}
