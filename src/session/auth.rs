//! One authentication attempt, from trigger to unlock (or not)
//!
//! The session reads frames, feeds the recognition pipeline, fuses the
//! per-frame signals in the decision gate and, once the biometric budget
//! is spent, opens an RFID backup window. The camera is released before the
//! window opens.

use crate::capture::FrameSource;
use crate::config::{Config, GateConfig, QualityBounds, SessionConfig};
use crate::credentials::CredentialStore;
use crate::error::{AccessError, Result};
use crate::feedback::{Cue, FeedbackSink};
use crate::gate::{DecisionGate, GateSample};
use crate::lock::LockActuator;
use crate::pipeline::health::run_health_logger;
use crate::pipeline::{Analysis, FaceObservation, RecognitionPipeline};
use crate::rfid::{FallbackArbiter, WindowResult};
use crate::session::state::SessionState;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Biometric,
    Rfid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Biometric budget spent and no authorized card in the backup window
    RfidTimeout,
    /// Access was granted but the lock did not open
    ActuationFailed { identity: String },
    /// Camera would not start or kept failing after recovery
    DeviceError,
    /// Shutdown while the session was running
    Cancelled,
}

/// Result of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Granted {
        identity: String,
        method: AuthMethod,
    },
    Denied {
        reason: DenyReason,
    },
}

impl AuthOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, AuthOutcome::Granted { .. })
    }

    pub fn identity(&self) -> Option<&str> {
        match self {
            AuthOutcome::Granted { identity, .. } => Some(identity),
            AuthOutcome::Denied { .. } => None,
        }
    }

    fn denied(reason: DenyReason) -> Self {
        AuthOutcome::Denied { reason }
    }
}

impl std::fmt::Display for AuthOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthOutcome::Granted { identity, method } => {
                write!(f, "granted to {} ({:?})", identity, method)
            }
            AuthOutcome::Denied { reason } => write!(f, "denied ({:?})", reason),
        }
    }
}

/// How the biometric phase ended
enum BiometricPhase {
    Accepted(String),
    Exhausted { saw_face: bool },
    DeviceFailed,
    Cancelled,
}

/// Collaborators shared with the controller
pub struct SessionDeps {
    pub credentials: Arc<dyn CredentialStore>,
    pub actuator: LockActuator,
    pub arbiter: Arc<FallbackArbiter>,
    pub feedback: Arc<dyn FeedbackSink>,
    pub state: Arc<watch::Sender<SessionState>>,
}

pub struct AuthSession {
    source: FrameSource,
    pipeline: Option<RecognitionPipeline>,
    gate: DecisionGate,
    deps: SessionDeps,
    session: SessionConfig,
    quality: QualityBounds,
    rfid_window: Duration,
    cooldown: Duration,
    health_interval: Duration,
}

impl AuthSession {
    pub fn new(
        config: &Config,
        source: FrameSource,
        pipeline: RecognitionPipeline,
        deps: SessionDeps,
    ) -> Self {
        Self {
            source,
            pipeline: Some(pipeline),
            gate: DecisionGate::new(&config.gate),
            deps,
            session: config.session.clone(),
            quality: config.quality.clone(),
            rfid_window: config.rfid.window(),
            cooldown: config.trigger.cooldown(),
            health_interval: Duration::from_secs(config.pipeline.health_log_secs.max(1)),
        }
    }

    /// Rebuild the gate with new thresholds (takes effect next attempt).
    pub fn set_gate(&mut self, config: &GateConfig) {
        self.gate = DecisionGate::new(config);
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.deps.state.send_replace(state);
        if !previous.can_transition_to(&state) {
            warn!("Unexpected session transition {} -> {}", previous, state);
        } else if previous != state {
            debug!("Session {} -> {}", previous, state);
        }
    }

    /// Run one attempt: biometric phase, then the RFID window if needed.
    /// Always leaves the session state at `Idle`.
    pub async fn authenticate(
        &mut self,
        max_attempts: u32,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AuthOutcome {
        let started = Instant::now();
        self.set_state(SessionState::Authenticating {
            started_at: started,
        });
        info!(
            "Authentication started (max {} frames, {:.1}s)",
            max_attempts,
            timeout.as_secs_f64()
        );
        self.deps.feedback.cue(Cue::AuthStart);

        let outcome = match self.start_capture().await {
            Err(e) => {
                error!("Cannot start authentication: {}", e);
                self.deps.feedback.cue(Cue::Error);
                AuthOutcome::denied(DenyReason::DeviceError)
            }
            Ok(()) => {
                let phase = self
                    .biometric_phase(max_attempts, started + timeout, cancel)
                    .await;
                self.stop_capture().await;
                self.conclude(phase, cancel).await
            }
        };

        self.gate.reset();
        self.set_state(SessionState::Idle);
        info!("Authentication {}", outcome);
        outcome
    }

    async fn conclude(&mut self, phase: BiometricPhase, cancel: &CancellationToken) -> AuthOutcome {
        match phase {
            BiometricPhase::Accepted(identity) => {
                info!("Authentication successful: {}", identity);
                self.grant(identity, AuthMethod::Biometric)
            }
            BiometricPhase::DeviceFailed => {
                self.deps.feedback.cue(Cue::Error);
                AuthOutcome::denied(DenyReason::DeviceError)
            }
            BiometricPhase::Cancelled => AuthOutcome::denied(DenyReason::Cancelled),
            BiometricPhase::Exhausted { saw_face } => {
                info!("Authentication failed: no authorized user recognized");
                if !saw_face {
                    self.deps.feedback.cue(Cue::NoFaceDetected);
                }
                self.rfid_phase(cancel).await
            }
        }
    }

    async fn rfid_phase(&mut self, cancel: &CancellationToken) -> AuthOutcome {
        self.gate.reset();
        let handle = self.deps.arbiter.open_window(self.rfid_window);
        self.set_state(SessionState::RfidBackupWindow {
            deadline: handle.deadline(),
        });

        match self.deps.arbiter.await_grant(handle, cancel).await {
            WindowResult::Granted(grant) => self.grant(grant.label, AuthMethod::Rfid),
            WindowResult::TimedOut => AuthOutcome::denied(DenyReason::RfidTimeout),
            WindowResult::Cancelled => AuthOutcome::denied(DenyReason::Cancelled),
        }
    }

    fn grant(&self, identity: String, method: AuthMethod) -> AuthOutcome {
        if self.deps.actuator.unlock(&identity) {
            if method == AuthMethod::Biometric {
                self.deps.feedback.cue(Cue::AuthSuccess);
            }
            AuthOutcome::Granted { identity, method }
        } else {
            error!("Access granted to {} but the lock did not open", identity);
            self.deps.feedback.cue(Cue::Error);
            AuthOutcome::denied(DenyReason::ActuationFailed { identity })
        }
    }

    async fn start_capture(&mut self) -> Result<()> {
        if !self.source.start() {
            return Err(AccessError::device("camera did not start"));
        }
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.clear();
            if let Err(e) = pipeline.start() {
                self.source.stop();
                return Err(e);
            }
        }
        self.gate.reset();
        Ok(())
    }

    async fn stop_capture(&mut self) {
        self.source.stop();

        let Some(mut pipeline) = self.pipeline.take() else {
            return;
        };
        if !pipeline.is_running() {
            self.pipeline = Some(pipeline);
            return;
        }
        // joining may block up to the join timeout
        let joined = tokio::task::spawn_blocking(move || {
            let result = pipeline.stop();
            (pipeline, result)
        })
        .await;
        match joined {
            Ok((pipeline, result)) => {
                if let Err(e) = result {
                    warn!("{}", e);
                }
                self.pipeline = Some(pipeline);
            }
            Err(e) => error!("Recognition pipeline shutdown task failed: {}", e),
        }
    }

    async fn biometric_phase(
        &mut self,
        max_attempts: u32,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> BiometricPhase {
        let Some(health) = self.pipeline.as_ref().map(|p| p.health()) else {
            return BiometricPhase::DeviceFailed;
        };
        let health_cancel = cancel.child_token();
        tokio::spawn(run_health_logger(
            health,
            self.health_interval,
            health_cancel.clone(),
        ));
        let _stop_health = health_cancel.drop_guard();

        let mut ticker = tokio::time::interval(self.session.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts = 0u32;
        let mut identity: Option<String> = None;
        let mut saw_face = false;

        while attempts < max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => return BiometricPhase::Cancelled,
                _ = tokio::time::sleep_until(deadline) => break,
                _ = ticker.tick() => {}
            }

            let Some(frame) = self.source.get_frame().await else {
                if self.source.is_failed() {
                    return BiometricPhase::DeviceFailed;
                }
                continue;
            };
            let (width, height) = (frame.width, frame.height);

            let Some(pipeline) = self.pipeline.as_mut() else {
                return BiometricPhase::DeviceFailed;
            };
            pipeline.submit(frame);
            let anti_spoofing = pipeline.anti_spoofing();
            let (sample, matched) = match pipeline.latest() {
                Some(analysis) => {
                    saw_face |= !analysis.is_empty();
                    frame_sample(
                        analysis,
                        self.deps.credentials.as_ref(),
                        anti_spoofing,
                        &self.quality,
                        width,
                        height,
                    )
                }
                None => (GateSample::default(), None),
            };
            attempts += 1;

            if let Some(name) = &matched
                && identity.as_ref() != Some(name)
            {
                if identity.is_some() {
                    debug!("Matched identity switched to {}, resetting gate", name);
                    self.gate.reset();
                }
                identity = matched.clone();
            }

            if self.gate.push(sample)
                && let Some(name) = identity.take()
            {
                return BiometricPhase::Accepted(name);
            }
            debug!("Frame {}/{}: {}", attempts, max_attempts, self.gate.status());
        }

        BiometricPhase::Exhausted { saw_face }
    }

    /// Unlock for every recognized authorized person until cancelled.
    /// No attempt budget and no RFID fallback.
    pub async fn monitor<F>(&mut self, mut on_success: F, cancel: &CancellationToken) -> Result<()>
    where
        F: FnMut(&str) + Send,
    {
        self.set_state(SessionState::Authenticating {
            started_at: Instant::now(),
        });
        info!("Continuous monitoring started");

        let result = match self.start_capture().await {
            Err(e) => Err(e),
            Ok(()) => {
                let result = self.monitor_loop(&mut on_success, cancel).await;
                self.stop_capture().await;
                result
            }
        };

        self.gate.reset();
        self.set_state(SessionState::Idle);
        info!("Continuous monitoring stopped");
        result
    }

    async fn monitor_loop(
        &mut self,
        on_success: &mut (dyn FnMut(&str) + Send),
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            // an endless budget: the phase only ends on acceptance, failure or cancel
            let phase = self
                .biometric_phase(u32::MAX, Instant::now() + Duration::from_secs(86_400), cancel)
                .await;

            match phase {
                BiometricPhase::Accepted(identity) => {
                    info!("Monitoring: recognized {}", identity);
                    if self.deps.actuator.unlock(&identity) {
                        self.deps.feedback.cue(Cue::AuthSuccess);
                        on_success(&identity);
                    } else {
                        // the door stayed shut, so this is not a success
                        error!("Unlock for {} failed", identity);
                        self.deps.feedback.cue(Cue::Error);
                    }

                    self.gate.reset();
                    if let Some(pipeline) = self.pipeline.as_mut() {
                        pipeline.clear();
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(self.cooldown) => {}
                    }
                }
                BiometricPhase::Exhausted { .. } => continue,
                BiometricPhase::Cancelled => return Ok(()),
                BiometricPhase::DeviceFailed => {
                    self.deps.feedback.cue(Cue::Error);
                    return Err(AccessError::device("camera failed during monitoring"));
                }
            }
        }
    }
}

/// Turn one analysis into gate signals plus the matched identity.
///
/// The match is the most confident authorized face that kept its identity
/// through the anti-spoofing pass. Quality is judged on that face, or on the
/// largest face when nobody matched.
pub fn frame_sample(
    analysis: &Analysis,
    credentials: &dyn CredentialStore,
    anti_spoofing: bool,
    quality: &QualityBounds,
    width: u32,
    height: u32,
) -> (GateSample, Option<String>) {
    let matched: Option<&FaceObservation> = analysis
        .faces
        .iter()
        .filter(|f| f.has_identity() && credentials.is_authorized_person(&f.label))
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

    let judged = matched.or_else(|| analysis.faces.iter().max_by_key(|f| f.bbox.area()));

    let is_live = match matched {
        Some(_) if !anti_spoofing => true,
        Some(face) => face.liveness.is_live(),
        None => false,
    };
    let is_quality = judged.is_some_and(|f| quality.accepts(&f.bbox, width, height));

    (
        GateSample::new(is_live, matched.is_some(), is_quality),
        matched.map(|f| f.label.clone()),
    )
}
