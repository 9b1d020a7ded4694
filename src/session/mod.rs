//! Authentication sessions: trigger filtering, state machine and the attempt itself

pub mod auth;
pub mod state;
pub mod trigger;

pub use auth::{AuthMethod, AuthOutcome, AuthSession, DenyReason, SessionDeps};
pub use state::SessionState;
pub use trigger::{TriggerDecision, TriggerGuard};
