//! Debounce, cooldown and re-entrancy filter in front of the session

use crate::config::TriggerConfig;
use std::time::Duration;
use tokio::time::Instant;

/// Answer to a trigger request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    Accepted,
    /// A session is already active; triggers are never queued.
    AlreadyRunning,
    /// The previous session ended less than the cooldown ago.
    Cooldown { remaining: Duration },
    /// The previous trigger came less than the debounce interval ago.
    Debounced,
}

impl TriggerDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, TriggerDecision::Accepted)
    }
}

impl std::fmt::Display for TriggerDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerDecision::Accepted => write!(f, "accepted"),
            TriggerDecision::AlreadyRunning => write!(f, "authentication already running"),
            TriggerDecision::Cooldown { remaining } => {
                write!(f, "cooldown active, {:.1}s remaining", remaining.as_secs_f64())
            }
            TriggerDecision::Debounced => write!(f, "debounced"),
        }
    }
}

#[derive(Debug)]
pub struct TriggerGuard {
    debounce: Duration,
    cooldown: Duration,
    last_trigger: Option<Instant>,
    last_session_end: Option<Instant>,
    active: bool,
}

impl TriggerGuard {
    pub fn new(config: &TriggerConfig) -> Self {
        Self {
            debounce: config.debounce(),
            cooldown: config.cooldown(),
            last_trigger: None,
            last_session_end: None,
            active: false,
        }
    }

    /// Accept or reject a trigger at `now`. Rejections change nothing.
    pub fn try_trigger(&mut self, now: Instant) -> TriggerDecision {
        if self.active {
            return TriggerDecision::AlreadyRunning;
        }

        if let Some(ended) = self.last_session_end {
            let since = now.saturating_duration_since(ended);
            if since < self.cooldown {
                return TriggerDecision::Cooldown {
                    remaining: self.cooldown - since,
                };
            }
        }

        if let Some(last) = self.last_trigger
            && now.saturating_duration_since(last) < self.debounce
        {
            return TriggerDecision::Debounced;
        }

        self.last_trigger = Some(now);
        self.active = true;
        TriggerDecision::Accepted
    }

    /// The session started by the last accepted trigger is back to idle.
    pub fn session_ended(&mut self, now: Instant) {
        self.active = false;
        self.last_session_end = Some(now);
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Remaining cooldown at `now`, if any.
    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        let ended = self.last_session_end?;
        self.cooldown
            .checked_sub(now.saturating_duration_since(ended))
            .filter(|d| !d.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, secs: f64) -> Instant {
        base + Duration::from_secs_f64(secs)
    }

    #[test]
    fn test_debounce_and_cooldown_timeline() {
        let mut guard = TriggerGuard::new(&TriggerConfig::default());
        let t0 = Instant::now();

        assert_eq!(guard.try_trigger(t0), TriggerDecision::Accepted);
        assert_eq!(guard.try_trigger(at(t0, 0.3)), TriggerDecision::AlreadyRunning);

        guard.session_ended(at(t0, 1.0));
        assert!(matches!(
            guard.try_trigger(at(t0, 3.9)),
            TriggerDecision::Cooldown { .. }
        ));
        assert_eq!(guard.try_trigger(at(t0, 4.1)), TriggerDecision::Accepted);
    }

    #[test]
    fn test_debounce_independent_of_cooldown() {
        let mut guard = TriggerGuard::new(&TriggerConfig {
            cooldown_secs: 0.0,
            ..TriggerConfig::default()
        });
        let t0 = Instant::now();

        assert!(guard.try_trigger(t0).is_accepted());
        guard.session_ended(at(t0, 0.1));
        assert_eq!(guard.try_trigger(at(t0, 0.3)), TriggerDecision::Debounced);
        assert!(guard.try_trigger(at(t0, 0.6)).is_accepted());
    }

    #[test]
    fn test_rejection_does_not_move_timestamps() {
        let mut guard = TriggerGuard::new(&TriggerConfig::default());
        let t0 = Instant::now();

        guard.try_trigger(t0);
        guard.session_ended(at(t0, 1.0));
        // rejected during cooldown; must not extend the cooldown
        guard.try_trigger(at(t0, 2.0));
        assert_eq!(guard.cooldown_remaining(at(t0, 3.5)), Some(Duration::from_millis(500)));
        assert!(guard.try_trigger(at(t0, 4.0)).is_accepted());
    }

    #[test]
    fn test_cooldown_message() {
        let decision = TriggerDecision::Cooldown {
            remaining: Duration::from_millis(1500),
        };
        assert_eq!(decision.to_string(), "cooldown active, 1.5s remaining");
    }
}
