//! Session state machine

use tokio::time::Instant;

/// Where the lock's single session currently is
///
/// Transitions are validated so every owner moves through the same cycle:
/// `Idle → Authenticating → (RfidBackupWindow) → Idle`, with `Cooldown`
/// reported while the trigger guard still refuses new sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session and no cooldown
    Idle,

    /// Collecting biometric samples
    Authenticating {
        /// When the attempt started
        started_at: Instant,
    },

    /// Biometric budget exhausted, waiting for a card
    RfidBackupWindow {
        /// When the window closes
        deadline: Instant,
    },

    /// Session over, new triggers refused until `until`
    Cooldown { until: Instant },
}

impl SessionState {
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        use SessionState::*;

        match (self, target) {
            (Idle, Authenticating { .. }) => true,
            (Cooldown { .. }, Authenticating { .. }) => true,
            (Cooldown { .. }, Idle) => true,

            (Authenticating { .. }, RfidBackupWindow { .. }) => true,
            (Authenticating { .. }, Idle) => true,
            (Authenticating { .. }, Cooldown { .. }) => true,

            (RfidBackupWindow { .. }, Idle) => true,
            (RfidBackupWindow { .. }, Cooldown { .. }) => true,

            (a, b) if a == b => true,

            _ => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Authenticating { .. } => "Authenticating",
            SessionState::RfidBackupWindow { .. } => "RfidBackupWindow",
            SessionState::Cooldown { .. } => "Cooldown",
        }
    }

    /// A session is running (biometric or RFID phase)
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Authenticating { .. } | SessionState::RfidBackupWindow { .. }
        )
    }

    pub fn is_rfid_window(&self) -> bool {
        matches!(self, SessionState::RfidBackupWindow { .. })
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_valid_transitions() {
        let now = Instant::now();
        let idle = SessionState::Idle;
        let auth = SessionState::Authenticating { started_at: now };
        let rfid = SessionState::RfidBackupWindow {
            deadline: now + Duration::from_secs(30),
        };
        let cooldown = SessionState::Cooldown {
            until: now + Duration::from_secs(3),
        };

        assert!(idle.can_transition_to(&auth));
        assert!(auth.can_transition_to(&rfid));
        assert!(auth.can_transition_to(&idle));
        assert!(rfid.can_transition_to(&idle));
        assert!(cooldown.can_transition_to(&auth));
        assert!(idle.can_transition_to(&idle));
    }

    #[test]
    fn test_invalid_transitions() {
        let now = Instant::now();
        let idle = SessionState::Idle;
        let auth = SessionState::Authenticating { started_at: now };
        let rfid = SessionState::RfidBackupWindow { deadline: now };

        assert!(!idle.can_transition_to(&rfid));
        assert!(!rfid.can_transition_to(&auth));
        assert!(!idle.can_transition_to(&SessionState::Cooldown { until: now }));
    }

    #[test]
    fn test_state_checks() {
        let now = Instant::now();
        assert!(SessionState::Authenticating { started_at: now }.is_active());
        assert!(SessionState::RfidBackupWindow { deadline: now }.is_rfid_window());
        assert!(!SessionState::Idle.is_active());
        assert!(!SessionState::Cooldown { until: now }.is_active());
        assert_eq!(SessionState::Idle.to_string(), "Idle");
    }
}
