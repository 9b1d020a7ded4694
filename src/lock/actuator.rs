//! Lock relay state machine with a single auto-relock timer
//!
//! Every path that is not an explicit, successful unlock ends with the relay
//! in its locked level. Without a pin the actuator runs in simulation mode:
//! identical states and timing, log output only.

use crate::config::LockConfig;
use crate::error::{AccessError, Result};
use crate::lock::pin::OutputPin;
use log::{error, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LockStatus {
    Locked,
    Unlocked,
}

impl std::fmt::Display for LockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockStatus::Locked => write!(f, "LOCKED"),
            LockStatus::Unlocked => write!(f, "UNLOCKED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockState {
    pub physical: LockStatus,
    pub pending_relock_deadline: Option<Instant>,
}

struct Relay {
    pin: Option<Box<dyn OutputPin>>,
    status: LockStatus,
}

struct RelockTimer {
    token: CancellationToken,
    deadline: Instant,
    generation: u64,
}

struct Inner {
    relay: Mutex<Relay>,
    timer: Mutex<Option<RelockTimer>>,
    generation: AtomicU64,
    faulted: AtomicBool,
    active_high: bool,
    unlock_duration: Duration,
    runtime: Handle,
}

#[derive(Clone)]
pub struct LockActuator {
    inner: Arc<Inner>,
}

impl LockActuator {
    /// Build the actuator and drive the relay to locked. Must be called from
    /// within a tokio runtime, which will host the relock timer.
    pub fn new(config: &LockConfig, pin: Option<Box<dyn OutputPin>>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            AccessError::configuration("lock actuator needs a running tokio runtime")
        })?;

        match &pin {
            Some(pin) => info!(
                "Lock actuator on {} ({})",
                pin.describe(),
                if config.active_high { "active high" } else { "active low" }
            ),
            None => warn!("No lock pin configured, lock actuation is simulated"),
        }

        let inner = Arc::new(Inner {
            relay: Mutex::new(Relay {
                pin,
                status: LockStatus::Locked,
            }),
            timer: Mutex::new(None),
            generation: AtomicU64::new(0),
            faulted: AtomicBool::new(false),
            active_high: config.active_high,
            unlock_duration: config.unlock_duration(),
            runtime,
        });

        inner
            .drive(&mut inner.relay(), false)
            .map_err(|e| AccessError::device(format!("cannot drive lock to locked: {}", e)))?;

        Ok(Self { inner })
    }

    /// Unlock for the configured duration.
    pub fn unlock(&self, reason: &str) -> bool {
        self.unlock_for(reason, self.inner.unlock_duration)
    }

    /// Unlock and (re)arm the relock timer for `duration`. A pending timer
    /// is cancelled and replaced.
    ///
    /// A duration whose relock deadline cannot be represented is refused and
    /// the lock stays shut.
    pub fn unlock_for(&self, reason: &str, duration: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(duration) else {
            error!("Unlock for {} refused: relock after {:?} is out of range", reason, duration);
            self.inner.lock("unlock out of range");
            return false;
        };

        let inner = &self.inner;
        {
            let mut relay = inner.relay();
            if let Err(e) = inner.drive(&mut relay, true) {
                error!("Unlock for {} failed: {}", reason, e);
                if let Err(e) = inner.drive(&mut relay, false) {
                    error!("Could not confirm locked level after failed unlock: {}", e);
                    inner.faulted.store(true, Ordering::Relaxed);
                }
                relay.status = LockStatus::Locked;
                return false;
            }
            relay.status = LockStatus::Unlocked;
            if relay.pin.is_some() {
                info!("UNLOCK: access granted to {} for {:?}", reason, duration);
            } else {
                info!("SIMULATED UNLOCK: access granted to {} for {:?}", reason, duration);
            }
        }

        self.arm_relock(deadline);
        true
    }

    /// Drive the relay to locked and cancel any pending relock.
    pub fn lock(&self, reason: &str) -> bool {
        self.inner.lock(reason)
    }

    pub fn status(&self) -> LockStatus {
        self.inner.relay().status
    }

    pub fn state(&self) -> LockState {
        LockState {
            physical: self.status(),
            pending_relock_deadline: self.pending_relock_deadline(),
        }
    }

    pub fn pending_relock_deadline(&self) -> Option<Instant> {
        self.inner.timer().as_ref().map(|t| t.deadline)
    }

    pub fn is_simulated(&self) -> bool {
        self.inner.relay().pin.is_none()
    }

    /// Set after a failed lock command; the relay may not be in its locked level.
    pub fn is_faulted(&self) -> bool {
        self.inner.faulted.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.lock("shutdown");
    }

    fn arm_relock(&self, deadline: Instant) {
        let inner = &self.inner;
        let mut slot = inner.timer();
        if let Some(previous) = slot.take() {
            previous.token.cancel();
        }

        let generation = inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        let weak: Weak<Inner> = Arc::downgrade(inner);
        let cancel = token.clone();

        inner.runtime.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.relock_from_timer(generation);
                    }
                }
            }
        });

        *slot = Some(RelockTimer {
            token,
            deadline,
            generation,
        });
    }
}

impl Inner {
    fn relay(&self) -> MutexGuard<'_, Relay> {
        self.relay.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn timer(&self) -> MutexGuard<'_, Option<RelockTimer>> {
        self.timer.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn drive(&self, relay: &mut Relay, unlocked: bool) -> Result<()> {
        let level = if unlocked {
            self.active_high
        } else {
            !self.active_high
        };
        match relay.pin.as_mut() {
            Some(pin) => pin.set_level(level),
            None => Ok(()),
        }
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.timer().take() {
            timer.token.cancel();
        }
    }

    fn relock_from_timer(&self, generation: u64) {
        {
            let mut slot = self.timer();
            match slot.as_ref() {
                Some(timer) if timer.generation == generation => {
                    slot.take();
                }
                // superseded by a newer unlock or an explicit lock
                _ => return,
            }
        }
        self.lock("auto-relock");
    }

    fn lock(&self, reason: &str) -> bool {
        self.cancel_timer();

        let mut relay = self.relay();
        let simulated = relay.pin.is_none();
        let result = self.drive(&mut relay, false);
        relay.status = LockStatus::Locked;

        match result {
            Ok(()) => {
                self.faulted.store(false, Ordering::Relaxed);
                if simulated {
                    info!("SIMULATED LOCK ({})", reason);
                } else {
                    info!("LOCK ({})", reason);
                }
                true
            }
            Err(e) => {
                error!("Lock command ({}) failed: {}", reason, e);
                self.faulted.store(true, Ordering::Relaxed);
                false
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.lock("drop");
    }
}
