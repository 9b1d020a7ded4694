//! Recognition pipeline
//!
//! Frames flow from the session loop into a single recognition worker and
//! come back as per-frame analyses:
//! - `types`: frames, bounding boxes, recognition results and liveness verdicts
//! - `ports`: the external recognition and liveness models
//! - `analyzer`: recognition plus fail-closed anti-spoofing for one frame
//! - `slot`: single-item overwrite handoff
//! - `worker`: the threaded (or inline) pipeline with bounded shutdown
//! - `health`: counters shared by all of the above

pub mod analyzer;
pub mod health;
pub mod ports;
pub mod slot;
pub mod types;
pub mod worker;

pub use analyzer::{Analysis, FrameAnalyzer};
pub use health::{HealthSummary, PipelineHealth};
pub use ports::{LivenessPort, NoFaceRecognizer, RecognitionPort, RejectAllLiveness};
pub use types::{BoundingBox, FaceObservation, Frame, Liveness, PixelFormat, RecognitionResult};
pub use worker::{PipelineMode, RecognitionPipeline};
