//! Per-frame recognition and anti-spoofing pass

use crate::credentials::CredentialStore;
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::ports::{LivenessPort, RecognitionPort};
use crate::pipeline::types::{FaceObservation, Frame, Liveness, RecognitionResult};
use log::{debug, warn};
use std::sync::Arc;
use tokio::time::Instant;

/// Faces seen in one frame after the anti-spoofing pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
    pub sequence: u64,
    pub captured_at: Option<Instant>,
    pub faces: Vec<FaceObservation>,
}

impl Analysis {
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

/// Runs the recognition port and, for authorized faces, the liveness port.
///
/// Fail-closed: any liveness error or missing crop leaves the face
/// `CheckFailed`, which carries the fake label. Recognition errors produce an
/// empty face list.
#[derive(Clone)]
pub struct FrameAnalyzer {
    recognizer: Arc<dyn RecognitionPort>,
    liveness: Arc<dyn LivenessPort>,
    credentials: Arc<dyn CredentialStore>,
    anti_spoofing: bool,
    health: Arc<PipelineHealth>,
}

impl FrameAnalyzer {
    pub fn new(
        recognizer: Arc<dyn RecognitionPort>,
        liveness: Arc<dyn LivenessPort>,
        credentials: Arc<dyn CredentialStore>,
        anti_spoofing: bool,
        health: Arc<PipelineHealth>,
    ) -> Self {
        Self {
            recognizer,
            liveness,
            credentials,
            anti_spoofing,
            health,
        }
    }

    pub fn anti_spoofing(&self) -> bool {
        self.anti_spoofing
    }

    pub fn health(&self) -> &Arc<PipelineHealth> {
        &self.health
    }

    pub fn analyze(&self, frame: &Frame) -> Analysis {
        let results = match self.recognizer.recognize(frame) {
            Ok(results) => results,
            Err(e) => {
                warn!("Recognition failed on frame {}: {}", frame.sequence, e);
                self.health.record_inference_failure();
                Vec::new()
            }
        };

        let faces = results
            .into_iter()
            .map(|result| self.check_face(frame, result))
            .collect();

        self.health.record_analyzed();
        Analysis {
            sequence: frame.sequence,
            captured_at: Some(frame.captured_at),
            faces,
        }
    }

    fn check_face(&self, frame: &Frame, result: RecognitionResult) -> FaceObservation {
        if !self.anti_spoofing
            || result.is_unknown()
            || !self.credentials.is_authorized_person(&result.label)
        {
            return FaceObservation::unchecked(result);
        }

        let liveness = match frame.crop(&result.bbox) {
            None => {
                debug!("Face box for {} lies outside the frame", result.label);
                Liveness::CheckFailed
            }
            Some(crop) => match self.liveness.is_live(&crop) {
                Ok(true) => Liveness::Live,
                Ok(false) => {
                    warn!("Spoof attempt detected for {}", result.label);
                    self.health.record_spoof();
                    Liveness::Spoofed
                }
                Err(e) => {
                    warn!("Liveness check failed for {}: {}", result.label, e);
                    self.health.record_liveness_failure();
                    Liveness::CheckFailed
                }
            },
        };

        FaceObservation::checked(result, liveness)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::credentials::InMemoryCredentialStore;
    use crate::error::{AccessError, Result};
    use crate::pipeline::types::{BoundingBox, FAKE_LABEL, PixelFormat, UNKNOWN_LABEL};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns the same faces for every frame, or an error when `fail` is set.
    pub struct FixedRecognizer {
        pub faces: Mutex<Vec<RecognitionResult>>,
        pub fail: bool,
    }

    impl FixedRecognizer {
        pub fn new(faces: Vec<RecognitionResult>) -> Self {
            Self {
                faces: Mutex::new(faces),
                fail: false,
            }
        }
    }

    impl RecognitionPort for FixedRecognizer {
        fn recognize(&self, _frame: &Frame) -> Result<Vec<RecognitionResult>> {
            if self.fail {
                return Err(AccessError::inference("model crashed"));
            }
            Ok(self.faces.lock().unwrap().clone())
        }
    }

    pub enum LivenessScript {
        Live,
        Spoof,
        Error,
    }

    pub struct ScriptedLiveness {
        pub script: LivenessScript,
        pub calls: AtomicUsize,
    }

    impl ScriptedLiveness {
        pub fn new(script: LivenessScript) -> Self {
            Self {
                script,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl LivenessPort for ScriptedLiveness {
        fn is_live(&self, _face: &Frame) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script {
                LivenessScript::Live => Ok(true),
                LivenessScript::Spoof => Ok(false),
                LivenessScript::Error => Err(AccessError::inference("liveness model missing")),
            }
        }
    }

    pub fn face(label: &str) -> RecognitionResult {
        RecognitionResult::new(BoundingBox::new(60, 210, 180, 110), label, 0.8)
    }

    fn analyzer(
        faces: Vec<RecognitionResult>,
        liveness: Arc<ScriptedLiveness>,
        anti_spoofing: bool,
    ) -> FrameAnalyzer {
        FrameAnalyzer::new(
            Arc::new(FixedRecognizer::new(faces)),
            liveness,
            Arc::new(InMemoryCredentialStore::with_entries(
                ["alice"],
                Vec::<(String, String)>::new(),
            )),
            anti_spoofing,
            Arc::new(PipelineHealth::new()),
        )
    }

    fn frame() -> Frame {
        Frame::blank(320, 240, PixelFormat::Rgb8, 7)
    }

    #[test]
    fn test_live_authorized_face_keeps_identity() {
        let liveness = Arc::new(ScriptedLiveness::new(LivenessScript::Live));
        let analysis = analyzer(vec![face("alice")], liveness.clone(), true).analyze(&frame());

        assert_eq!(analysis.sequence, 7);
        assert_eq!(analysis.faces[0].label, "alice");
        assert_eq!(analysis.faces[0].liveness, Liveness::Live);
        assert_eq!(liveness.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_liveness_error_fails_closed() {
        let liveness = Arc::new(ScriptedLiveness::new(LivenessScript::Error));
        let analyzer = analyzer(vec![face("alice")], liveness, true);
        let analysis = analyzer.analyze(&frame());

        assert_eq!(analysis.faces[0].label, FAKE_LABEL);
        assert_eq!(analysis.faces[0].liveness, Liveness::CheckFailed);
        assert!(!analysis.faces[0].liveness.is_live());
        assert_eq!(analyzer.health().liveness_failures(), 1);
    }

    #[test]
    fn test_spoof_is_relabelled() {
        let liveness = Arc::new(ScriptedLiveness::new(LivenessScript::Spoof));
        let analyzer = analyzer(vec![face("alice")], liveness, true);
        let analysis = analyzer.analyze(&frame());

        assert_eq!(analysis.faces[0].liveness, Liveness::Spoofed);
        assert!(!analysis.faces[0].has_identity());
        assert_eq!(analyzer.health().spoof_detections(), 1);
    }

    #[test]
    fn test_unknown_and_unauthorized_faces_skip_liveness() {
        let liveness = Arc::new(ScriptedLiveness::new(LivenessScript::Live));
        let analysis = analyzer(
            vec![face(UNKNOWN_LABEL), face("mallory")],
            liveness.clone(),
            true,
        )
        .analyze(&frame());

        assert_eq!(analysis.faces.len(), 2);
        assert!(analysis.faces.iter().all(|f| f.liveness == Liveness::NotChecked));
        assert_eq!(liveness.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_recognition_error_yields_empty_analysis() {
        let mut recognizer = FixedRecognizer::new(vec![face("alice")]);
        recognizer.fail = true;
        let health = Arc::new(PipelineHealth::new());
        let analyzer = FrameAnalyzer::new(
            Arc::new(recognizer),
            Arc::new(ScriptedLiveness::new(LivenessScript::Live)),
            Arc::new(InMemoryCredentialStore::new()),
            true,
            health.clone(),
        );

        assert!(analyzer.analyze(&frame()).is_empty());
        assert_eq!(health.inference_failures(), 1);
        assert_eq!(health.frames_analyzed(), 1);
    }

    #[test]
    fn test_disabled_anti_spoofing_leaves_faces_unchecked() {
        let liveness = Arc::new(ScriptedLiveness::new(LivenessScript::Error));
        let analysis = analyzer(vec![face("alice")], liveness.clone(), false).analyze(&frame());

        assert_eq!(analysis.faces[0].label, "alice");
        assert_eq!(analysis.faces[0].liveness, Liveness::NotChecked);
        assert_eq!(liveness.calls.load(Ordering::SeqCst), 0);
    }
}
