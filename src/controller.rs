//! Per-lock facade tying the trigger guard, session, lock and RFID arbiter together

use crate::audit::AuditLog;
use crate::capture::{CameraDevice, FrameSource};
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::{AccessError, Result};
use crate::feedback::{Cue, FeedbackSink};
use crate::lock::{LockActuator, LockStatus, OutputPin};
use crate::pipeline::{
    FrameAnalyzer, HealthSummary, LivenessPort, PipelineHealth, PipelineMode, RecognitionPipeline,
    RecognitionPort,
};
use crate::rfid::FallbackArbiter;
use crate::session::{
    AuthOutcome, AuthSession, SessionDeps, SessionState, TriggerDecision, TriggerGuard,
};
use log::{info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Everything that talks to hardware or models
pub struct Backends {
    pub camera: Box<dyn CameraDevice>,
    pub recognizer: Arc<dyn RecognitionPort>,
    pub liveness: Arc<dyn LivenessPort>,
    pub credentials: Arc<dyn CredentialStore>,
    pub lock_pin: Option<Box<dyn OutputPin>>,
    pub feedback: Arc<dyn FeedbackSink>,
}

/// Snapshot answered to `status` requests
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub lock_id: String,
    pub session: String,
    pub lock: LockStatus,
    pub relock_in_secs: Option<f64>,
    pub simulated: bool,
    pub faulted: bool,
    pub health: HealthSummary,
}

pub struct AccessController {
    config: Config,
    guard: Mutex<TriggerGuard>,
    session: tokio::sync::Mutex<AuthSession>,
    actuator: LockActuator,
    arbiter: Arc<FallbackArbiter>,
    credentials: Arc<dyn CredentialStore>,
    feedback: Arc<dyn FeedbackSink>,
    health: Arc<PipelineHealth>,
    audit: AuditLog,
    state: Arc<watch::Sender<SessionState>>,
    cancel: CancellationToken,
}

/// Marks the guard's session as ended however the session future finishes.
struct ActiveSession<'a>(&'a AccessController);

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        self.0.guard().session_ended(Instant::now());
    }
}

impl AccessController {
    /// Build the controller for one lock. The lock is driven to locked here.
    pub fn new(config: Config, backends: Backends) -> Result<Arc<Self>> {
        config.validate()?;

        let actuator = LockActuator::new(&config.lock, backends.lock_pin)?;
        let arbiter = Arc::new(FallbackArbiter::new(
            backends.credentials.clone(),
            backends.feedback.clone(),
        ));
        let health = Arc::new(PipelineHealth::new());
        let analyzer = FrameAnalyzer::new(
            backends.recognizer,
            backends.liveness,
            backends.credentials.clone(),
            config.session.anti_spoofing,
            health.clone(),
        );
        let mode = if config.pipeline.threaded {
            PipelineMode::Threaded
        } else {
            PipelineMode::Inline
        };
        let pipeline = RecognitionPipeline::new(
            analyzer,
            mode,
            config.pipeline.slot_timeout(),
            config.pipeline.join_timeout(),
        );
        let source = FrameSource::new(backends.camera, &config.camera);
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let state = Arc::new(state_tx);

        let session = AuthSession::new(
            &config,
            source,
            pipeline,
            SessionDeps {
                credentials: backends.credentials.clone(),
                actuator: actuator.clone(),
                arbiter: arbiter.clone(),
                feedback: backends.feedback.clone(),
                state: state.clone(),
            },
        );

        info!(
            "Access controller ready for lock {:?} ({:?} pipeline)",
            config.lock_id, mode
        );

        Ok(Arc::new(Self {
            guard: Mutex::new(TriggerGuard::new(&config.trigger)),
            session: tokio::sync::Mutex::new(session),
            audit: AuditLog::new(&config.lock_id, config.audit_log.as_deref()),
            config,
            actuator,
            arbiter,
            credentials: backends.credentials,
            feedback: backends.feedback,
            health,
            state,
            cancel: CancellationToken::new(),
        }))
    }

    fn guard(&self) -> MutexGuard<'_, TriggerGuard> {
        self.guard.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn lock_id(&self) -> &str {
        &self.config.lock_id
    }

    pub fn arbiter(&self) -> Arc<FallbackArbiter> {
        self.arbiter.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn admit(&self) -> TriggerDecision {
        let decision = self.guard().try_trigger(Instant::now());
        match decision {
            TriggerDecision::Accepted => self.feedback.cue(Cue::ButtonPress),
            TriggerDecision::Cooldown { .. } => {
                info!("Trigger ignored: {}", decision);
                self.feedback.cue(Cue::CooldownWarning);
            }
            TriggerDecision::AlreadyRunning | TriggerDecision::Debounced => {
                info!("Trigger ignored: {}", decision);
            }
        }
        decision
    }

    /// Button / API entry point: start a session in the background with the
    /// configured budget.
    pub fn trigger(self: &Arc<Self>) -> TriggerDecision {
        let decision = self.admit();
        if decision.is_accepted() {
            let this = self.clone();
            tokio::spawn(async move {
                let session = &this.config.session;
                this.run_admitted(session.max_attempts, session.timeout())
                    .await;
            });
        }
        decision
    }

    /// Run one attempt and wait for its outcome.
    pub async fn authenticate(&self, max_attempts: u32, timeout: Duration) -> Result<AuthOutcome> {
        let decision = self.admit();
        if !decision.is_accepted() {
            return Err(AccessError::Rejected(decision));
        }
        Ok(self.run_admitted(max_attempts, timeout).await)
    }

    async fn run_admitted(&self, max_attempts: u32, timeout: Duration) -> AuthOutcome {
        let _active = ActiveSession(self);
        let mut session = self.session.lock().await;
        let outcome = session
            .authenticate(max_attempts, timeout, &self.cancel)
            .await;
        self.audit.record(&outcome);
        outcome
    }

    /// Unlock for every authorized face until shutdown, calling `on_success`
    /// with the identity after each unlock.
    pub async fn run_continuous_monitoring<F>(&self, on_success: F) -> Result<()>
    where
        F: FnMut(&str) + Send,
    {
        let decision = self.admit();
        if !decision.is_accepted() {
            return Err(AccessError::Rejected(decision));
        }
        let _active = ActiveSession(self);
        let mut session = self.session.lock().await;
        session.monitor(on_success, &self.cancel).await
    }

    /// Session state, reporting `Cooldown` while new triggers are refused.
    pub fn state(&self) -> SessionState {
        let state = *self.state.borrow();
        if state == SessionState::Idle {
            let now = Instant::now();
            if let Some(remaining) = self.guard().cooldown_remaining(now) {
                return SessionState::Cooldown {
                    until: now + remaining,
                };
            }
        }
        state
    }

    pub fn lock_status(&self) -> LockStatus {
        self.actuator.status()
    }

    pub fn force_lock(&self) -> bool {
        self.actuator.lock("manual lock")
    }

    /// Unlock without authentication, for `duration` or the configured default.
    /// Durations above `lock.max_manual_unlock_secs` are refused.
    pub fn force_unlock(&self, duration: Option<Duration>) -> bool {
        let duration = duration.unwrap_or_else(|| self.config.lock.unlock_duration());
        let max = self.config.lock.max_manual_unlock();
        if duration > max {
            warn!("Manual unlock for {:?} refused, limit is {:?}", duration, max);
            return false;
        }
        warn!("Manual unlock requested for {:?}", duration);
        self.actuator.unlock_for("manual unlock", duration)
    }

    pub fn reload_credentials(&self) -> Result<()> {
        self.credentials.reload()
    }

    pub fn health(&self) -> HealthSummary {
        self.health.summary()
    }

    pub fn status(&self) -> StatusReport {
        let lock = self.actuator.state();
        StatusReport {
            lock_id: self.config.lock_id.clone(),
            session: self.state().to_string(),
            lock: lock.physical,
            relock_in_secs: lock
                .pending_relock_deadline
                .map(|d| d.saturating_duration_since(Instant::now()).as_secs_f64()),
            simulated: self.actuator.is_simulated(),
            faulted: self.actuator.is_faulted(),
            health: self.health(),
        }
    }

    /// Cancel any running session and leave the door locked.
    pub fn shutdown(&self) {
        info!("Shutting down access controller");
        self.cancel.cancel();
        self.actuator.shutdown();
        self.feedback.cue(Cue::Shutdown);
    }
}
