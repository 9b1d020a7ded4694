//! Error taxonomy for the access pipeline

use thiserror::Error;

use crate::session::trigger::TriggerDecision;

/// Root error type for everything below the binary boundary.
#[derive(Error, Debug)]
pub enum AccessError {
    /// Camera or GPIO hardware failure.
    #[error("device error: {0}")]
    Device(String),

    /// Recognition or liveness call failed. Always treated as a negative signal.
    #[error("inference error: {0}")]
    Inference(String),

    /// Missing or invalid configuration / credential store.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A worker did not stop within its join timeout.
    #[error("concurrency error: {0}")]
    Concurrency(String),

    /// The trigger guard refused to start a session.
    #[error("trigger rejected: {0}")]
    Rejected(TriggerDecision),
}

impl AccessError {
    pub fn device(msg: impl Into<String>) -> Self {
        AccessError::Device(msg.into())
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        AccessError::Inference(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        AccessError::Configuration(msg.into())
    }

    /// Per-frame errors never end a session.
    pub fn is_per_frame(&self) -> bool {
        matches!(self, AccessError::Inference(_))
    }
}

pub type Result<T> = std::result::Result<T, AccessError>;
