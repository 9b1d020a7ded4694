//! Health counters for the recognition pipeline

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Health metrics for the recognition worker
///
/// Written from the worker thread, read from anywhere. All fields use
/// relaxed atomics; they are statistics, not synchronization.
pub struct PipelineHealth {
    /// Frames handed to the pipeline
    pub frames_submitted: AtomicU64,

    /// Frames replaced in the slot before the worker picked them up
    pub frames_dropped: AtomicU64,

    /// Frames that went through recognition (including failed ones)
    pub frames_analyzed: AtomicU64,

    /// Recognition calls that returned an error
    pub inference_failures: AtomicU64,

    /// Liveness calls that returned an error
    pub liveness_failures: AtomicU64,

    /// Authorized faces rejected as presentation attacks
    pub spoof_detections: AtomicU64,

    /// Timestamp (as Unix microseconds) of the last analyzed frame
    pub last_frame_time: AtomicU64,

    /// Set when the worker could not be joined in time
    unhealthy: AtomicBool,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self {
            frames_submitted: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frames_analyzed: AtomicU64::new(0),
            inference_failures: AtomicU64::new(0),
            liveness_failures: AtomicU64::new(0),
            spoof_detections: AtomicU64::new(0),
            last_frame_time: AtomicU64::new(now_micros()),
            unhealthy: AtomicBool::new(false),
        }
    }

    pub fn record_submitted(&self) {
        self.frames_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_analyzed(&self) {
        self.last_frame_time.store(now_micros(), Ordering::Relaxed);
        self.frames_analyzed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inference_failure(&self) {
        self.inference_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_liveness_failure(&self) {
        self.liveness_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_spoof(&self) {
        self.spoof_detections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_unhealthy(&self) {
        self.unhealthy.store(true, Ordering::Relaxed);
    }

    pub fn is_unhealthy(&self) -> bool {
        self.unhealthy.load(Ordering::Relaxed)
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn frames_analyzed(&self) -> u64 {
        self.frames_analyzed.load(Ordering::Relaxed)
    }

    pub fn inference_failures(&self) -> u64 {
        self.inference_failures.load(Ordering::Relaxed)
    }

    pub fn liveness_failures(&self) -> u64 {
        self.liveness_failures.load(Ordering::Relaxed)
    }

    pub fn spoof_detections(&self) -> u64 {
        self.spoof_detections.load(Ordering::Relaxed)
    }

    /// Get the timestamp of the last analyzed frame (Unix microseconds)
    pub fn last_frame_time(&self) -> u64 {
        self.last_frame_time.load(Ordering::Relaxed)
    }

    /// Share of submitted frames that were overwritten before analysis
    pub fn drop_rate(&self) -> f64 {
        let submitted = self.frames_submitted();
        if submitted == 0 {
            return 0.0;
        }
        (self.frames_dropped() as f64 / submitted as f64) * 100.0
    }

    /// Check if the worker has stalled (no frames analyzed for given duration)
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        let elapsed_micros = now_micros().saturating_sub(self.last_frame_time());
        elapsed_micros > threshold.as_micros() as u64
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            frames_submitted: self.frames_submitted(),
            frames_dropped: self.frames_dropped(),
            frames_analyzed: self.frames_analyzed(),
            inference_failures: self.inference_failures(),
            liveness_failures: self.liveness_failures(),
            spoof_detections: self.spoof_detections(),
            drop_rate: self.drop_rate(),
            unhealthy: self.is_unhealthy(),
        }
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct HealthSummary {
    pub frames_submitted: u64,
    pub frames_dropped: u64,
    pub frames_analyzed: u64,
    pub inference_failures: u64,
    pub liveness_failures: u64,
    pub spoof_detections: u64,
    pub drop_rate: f64,
    pub unhealthy: bool,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} analyzed of {} submitted ({} dropped, {:.2}%), {} inference failures, {} liveness failures, {} spoofs{}",
            self.frames_analyzed,
            self.frames_submitted,
            self.frames_dropped,
            self.drop_rate,
            self.inference_failures,
            self.liveness_failures,
            self.spoof_detections,
            if self.unhealthy { ", UNHEALTHY" } else { "" }
        )
    }
}

/// Log a health summary every `interval` until `cancel` fires.
/// Quiet while nothing has been submitted since the last report.
pub async fn run_health_logger(
    health: Arc<PipelineHealth>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    let mut last_submitted = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let summary = health.summary();
                if summary.frames_submitted != last_submitted || summary.unhealthy {
                    log::info!("{}", summary);
                    last_submitted = summary.frames_submitted;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_metrics() {
        let health = PipelineHealth::new();

        for _ in 0..4 {
            health.record_submitted();
        }
        health.record_analyzed();
        health.record_analyzed();
        health.record_analyzed();
        health.record_drop();
        health.record_inference_failure();
        health.record_spoof();

        let summary = health.summary();
        assert_eq!(summary.frames_submitted, 4);
        assert_eq!(summary.frames_analyzed, 3);
        assert_eq!(summary.frames_dropped, 1);
        assert_eq!(summary.inference_failures, 1);
        assert_eq!(summary.spoof_detections, 1);
        assert!((summary.drop_rate - 25.0).abs() < f64::EPSILON);
        assert!(!summary.unhealthy);

        health.mark_unhealthy();
        assert!(health.summary().to_string().ends_with("UNHEALTHY"));
    }

    #[test]
    fn test_stall_detection() {
        let health = PipelineHealth::new();

        // Should not be stalled immediately
        assert!(!health.is_stalled(Duration::from_secs(1)));

        health.record_analyzed();
        std::thread::sleep(Duration::from_millis(150));

        assert!(health.is_stalled(Duration::from_millis(100)));
    }
}
