//! Interfaces to the external face recognition and liveness models

use crate::error::Result;
use crate::pipeline::types::{Frame, RecognitionResult};

/// Face detection + identification. Implementations may block for the
/// duration of an inference call; they are only invoked from the recognition
/// worker (or inline when the pipeline runs unthreaded).
pub trait RecognitionPort: Send + Sync {
    /// Zero or more faces found in `frame`. Unmatched faces carry the
    /// `"Unknown"` label.
    fn recognize(&self, frame: &Frame) -> Result<Vec<RecognitionResult>>;
}

/// Presentation-attack detection on a face crop.
pub trait LivenessPort: Send + Sync {
    /// `Ok(true)` only for a live, unspoofed face. Any `Err` is handled as
    /// "not live" by the caller.
    fn is_live(&self, face: &Frame) -> Result<bool>;
}

/// Recognizer used when no model backend is linked in: never sees a face.
#[derive(Debug, Default)]
pub struct NoFaceRecognizer;

impl RecognitionPort for NoFaceRecognizer {
    fn recognize(&self, _frame: &Frame) -> Result<Vec<RecognitionResult>> {
        Ok(Vec::new())
    }
}

/// Liveness port used when no model backend is linked in: refuses every face.
#[derive(Debug, Default)]
pub struct RejectAllLiveness;

impl LivenessPort for RejectAllLiveness {
    fn is_live(&self, _face: &Frame) -> Result<bool> {
        Ok(false)
    }
}
