//! RFID fallback arbitration
//!
//! Scans arrive at any time from the input thread. Only a scan that lands
//! inside an open backup window can grant access, and a window grants at
//! most once: the first authorized card closes it.

use crate::credentials::CredentialStore;
use crate::feedback::{Cue, FeedbackSink};
use log::{info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What happened to one scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// No backup window open (or it already granted).
    NotAllowed,
    /// Window open but the card is not enrolled. The window stays open.
    Unauthorized,
    /// Window granted and closed.
    Accepted { label: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RfidGrant {
    pub card_id: String,
    pub label: String,
}

/// How a backup window ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowResult {
    Granted(RfidGrant),
    TimedOut,
    Cancelled,
}

struct ActiveWindow {
    id: u64,
    deadline: Instant,
    grant_tx: oneshot::Sender<RfidGrant>,
}

/// Session side of an open window
pub struct WindowHandle {
    id: u64,
    deadline: Instant,
    grant_rx: oneshot::Receiver<RfidGrant>,
}

impl WindowHandle {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

pub struct FallbackArbiter {
    credentials: Arc<dyn CredentialStore>,
    feedback: Arc<dyn FeedbackSink>,
    window: Mutex<Option<ActiveWindow>>,
    next_id: AtomicU64,
}

impl FallbackArbiter {
    pub fn new(credentials: Arc<dyn CredentialStore>, feedback: Arc<dyn FeedbackSink>) -> Self {
        Self {
            credentials,
            feedback,
            window: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    fn window(&self) -> MutexGuard<'_, Option<ActiveWindow>> {
        self.window.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_window_open(&self) -> bool {
        self.window()
            .as_ref()
            .is_some_and(|w| Instant::now() < w.deadline)
    }

    /// Open a window of `timeout`, replacing any previous one.
    pub fn open_window(&self, timeout: Duration) -> WindowHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + timeout;
        let (grant_tx, grant_rx) = oneshot::channel();

        *self.window() = Some(ActiveWindow {
            id,
            deadline,
            grant_tx,
        });
        info!(
            "RFID backup activated, scan a card within {:.0}s",
            timeout.as_secs_f64()
        );
        self.feedback.cue(Cue::RfidBackupActivated);

        WindowHandle {
            id,
            deadline,
            grant_rx,
        }
    }

    /// Close window `id` if it is still the open one.
    pub fn close_window(&self, id: u64) -> bool {
        let mut window = self.window();
        if window.as_ref().is_some_and(|w| w.id == id) {
            window.take();
            true
        } else {
            false
        }
    }

    /// Evaluate one scan against the open window.
    pub fn submit(&self, card_id: &str) -> ScanOutcome {
        info!("RFID card detected: {}", card_id);
        self.feedback.cue(Cue::RfidDetected);

        let mut window = self.window();
        let open = window
            .as_ref()
            .is_some_and(|w| Instant::now() < w.deadline);
        if !open {
            warn!("RFID scan rejected: no backup window open");
            self.feedback.cue(Cue::RfidNotAllowed);
            return ScanOutcome::NotAllowed;
        }

        let Some(label) = self.credentials.card_label(card_id) else {
            warn!("RFID card {} not authorized", card_id);
            self.feedback.cue(Cue::RfidUnauthorized);
            return ScanOutcome::Unauthorized;
        };

        let Some(active) = window.take() else {
            return ScanOutcome::NotAllowed;
        };
        let grant = RfidGrant {
            card_id: card_id.to_string(),
            label: label.clone(),
        };
        if active.grant_tx.send(grant).is_err() {
            // session already gone
            warn!("RFID scan rejected: backup window was abandoned");
            self.feedback.cue(Cue::RfidNotAllowed);
            return ScanOutcome::NotAllowed;
        }

        info!("RFID authentication successful: {}", label);
        self.feedback.cue(Cue::RfidSuccess);
        ScanOutcome::Accepted { label }
    }

    /// Wait for the window behind `handle` to grant, time out or be cancelled.
    /// A grant issued before the window closed is honoured even when the
    /// countdown fires in the same instant.
    pub async fn await_grant(
        &self,
        mut handle: WindowHandle,
        cancel: &CancellationToken,
    ) -> WindowResult {
        let result = tokio::select! {
            grant = &mut handle.grant_rx => match grant {
                Ok(grant) => WindowResult::Granted(grant),
                Err(_) => WindowResult::Cancelled,
            },
            _ = tokio::time::sleep_until(handle.deadline) => {
                self.close_window(handle.id);
                match handle.grant_rx.try_recv() {
                    Ok(grant) => WindowResult::Granted(grant),
                    Err(_) => WindowResult::TimedOut,
                }
            }
            _ = cancel.cancelled() => {
                self.close_window(handle.id);
                match handle.grant_rx.try_recv() {
                    Ok(grant) => WindowResult::Granted(grant),
                    Err(_) => WindowResult::Cancelled,
                }
            }
        };

        if result == WindowResult::TimedOut {
            info!("RFID backup timed out");
            self.feedback.cue(Cue::RfidTimeout);
        }
        result
    }

    /// Drain scans from the input queue for the life of the process.
    pub async fn run(self: Arc<Self>, mut scans: mpsc::Receiver<String>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                scan = scans.recv() => match scan {
                    Some(card_id) => {
                        self.submit(&card_id);
                    }
                    None => {
                        warn!("RFID input closed");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::InMemoryCredentialStore;
    use crate::feedback::tests::RecordingFeedback;

    fn arbiter() -> (Arc<FallbackArbiter>, Arc<RecordingFeedback>) {
        let feedback = Arc::new(RecordingFeedback::default());
        let credentials = Arc::new(InMemoryCredentialStore::with_entries(
            Vec::<String>::new(),
            [("1234567890", "Admin Card"), ("0987654321", "Backup Card")],
        ));
        (
            Arc::new(FallbackArbiter::new(credentials, feedback.clone())),
            feedback,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_outside_window_not_allowed() {
        let (arbiter, feedback) = arbiter();
        assert_eq!(arbiter.submit("1234567890"), ScanOutcome::NotAllowed);
        assert_eq!(feedback.count(Cue::RfidNotAllowed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_grant_per_window() {
        let (arbiter, _) = arbiter();
        let handle = arbiter.open_window(Duration::from_secs(30));

        assert_eq!(arbiter.submit("0000000000"), ScanOutcome::Unauthorized);
        assert!(arbiter.is_window_open());
        assert_eq!(
            arbiter.submit("1234567890"),
            ScanOutcome::Accepted {
                label: "Admin Card".into()
            }
        );
        assert_eq!(arbiter.submit("0987654321"), ScanOutcome::NotAllowed);
        assert!(!arbiter.is_window_open());

        let result = arbiter.await_grant(handle, &CancellationToken::new()).await;
        assert_eq!(
            result,
            WindowResult::Granted(RfidGrant {
                card_id: "1234567890".into(),
                label: "Admin Card".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_times_out() {
        let (arbiter, feedback) = arbiter();
        let handle = arbiter.open_window(Duration::from_secs(30));

        let started = Instant::now();
        let result = arbiter.await_grant(handle, &CancellationToken::new()).await;
        assert_eq!(result, WindowResult::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(feedback.count(Cue::RfidTimeout), 1);
        assert_eq!(arbiter.submit("1234567890"), ScanOutcome::NotAllowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grant_issued_before_close_is_honoured() {
        let (arbiter, _) = arbiter();
        let handle = arbiter.open_window(Duration::from_secs(1));
        assert!(matches!(arbiter.submit("1234567890"), ScanOutcome::Accepted { .. }));

        tokio::time::sleep(Duration::from_secs(2)).await;
        let result = arbiter.await_grant(handle, &CancellationToken::new()).await;
        assert!(matches!(result, WindowResult::Granted(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_closes_window() {
        let (arbiter, _) = arbiter();
        let handle = arbiter.open_window(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(arbiter.await_grant(handle, &cancel).await, WindowResult::Cancelled);
        assert!(!arbiter.is_window_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_drains_queue() {
        let (arbiter, feedback) = arbiter();
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(arbiter.clone().run(rx, cancel.clone()));

        tx.send("1234567890".into()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(feedback.count(Cue::RfidDetected), 1);

        cancel.cancel();
        task.await.unwrap();
    }
}
