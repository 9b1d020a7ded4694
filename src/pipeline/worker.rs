//! Background recognition worker
//!
//! The session loop pushes every captured frame into a latest-frame slot
//! and reads back whatever the worker published last. Inference never runs
//! on the async runtime.

use crate::error::{AccessError, Result};
use crate::pipeline::analyzer::{Analysis, FrameAnalyzer};
use crate::pipeline::slot::LatestSlot;
use crate::pipeline::types::Frame;
use log::{debug, error, info};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// Dedicated recognition thread fed through the frame slot
    Threaded,
    /// Analyse each frame synchronously in `submit`
    Inline,
}

struct Worker {
    stop: CancellationToken,
    done_rx: mpsc::Receiver<()>,
    handle: JoinHandle<()>,
}

pub struct RecognitionPipeline {
    analyzer: FrameAnalyzer,
    mode: PipelineMode,
    slot_timeout: Duration,
    join_timeout: Duration,
    frames: Arc<LatestSlot<Frame>>,
    results: Arc<LatestSlot<Analysis>>,
    last: Option<Analysis>,
    worker: Option<Worker>,
}

impl RecognitionPipeline {
    pub fn new(
        analyzer: FrameAnalyzer,
        mode: PipelineMode,
        slot_timeout: Duration,
        join_timeout: Duration,
    ) -> Self {
        Self {
            analyzer,
            mode,
            slot_timeout,
            join_timeout,
            frames: Arc::new(LatestSlot::new()),
            results: Arc::new(LatestSlot::new()),
            last: None,
            worker: None,
        }
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn health(&self) -> Arc<crate::pipeline::health::PipelineHealth> {
        self.analyzer.health().clone()
    }

    pub fn anti_spoofing(&self) -> bool {
        self.analyzer.anti_spoofing()
    }

    /// Spawn the recognition thread. No-op in inline mode or when running.
    ///
    /// Each worker gets its own slots, so a worker detached by a timed out
    /// `stop` can never publish into a later run.
    pub fn start(&mut self) -> Result<()> {
        if self.mode == PipelineMode::Inline || self.worker.is_some() {
            return Ok(());
        }

        self.last = None;
        self.frames = Arc::new(LatestSlot::new());
        self.results = Arc::new(LatestSlot::new());

        let stop = CancellationToken::new();
        let (done_tx, done_rx) = mpsc::channel();
        let analyzer = self.analyzer.clone();
        let frames = self.frames.clone();
        let results = self.results.clone();
        let worker_stop = stop.clone();
        let slot_timeout = self.slot_timeout;

        let handle = std::thread::Builder::new()
            .name("recognition-worker".into())
            .spawn(move || {
                debug!("Recognition worker started");
                while !worker_stop.is_cancelled() {
                    let Some(frame) = frames.wait_take(slot_timeout) else {
                        continue;
                    };
                    if worker_stop.is_cancelled() {
                        break;
                    }
                    results.put(analyzer.analyze(&frame));
                }
                debug!("Recognition worker exiting");
                let _ = done_tx.send(());
            })
            .map_err(|e| {
                AccessError::Concurrency(format!("cannot spawn recognition worker: {}", e))
            })?;

        info!("Recognition pipeline started");
        self.worker = Some(Worker {
            stop,
            done_rx,
            handle,
        });
        Ok(())
    }

    /// Hand a frame to the pipeline. Never blocks in threaded mode; a frame
    /// the worker has not picked up yet is overwritten and counted as dropped.
    pub fn submit(&mut self, frame: Frame) {
        let health = self.analyzer.health();
        health.record_submitted();

        match self.mode {
            PipelineMode::Threaded => {
                if self.frames.put(frame) {
                    health.record_drop();
                }
            }
            PipelineMode::Inline => {
                self.last = Some(self.analyzer.analyze(&frame));
            }
        }
    }

    /// Freshest analysis available, reusing the previous one when the worker
    /// has not published since. `None` until the first frame is analysed.
    pub fn latest(&mut self) -> Option<&Analysis> {
        if let Some(fresh) = self.results.take() {
            self.last = Some(fresh);
        }
        self.last.as_ref()
    }

    /// Forget the last analysis so a new attempt starts from nothing.
    pub fn clear(&mut self) {
        self.last = None;
        let _ = self.results.take();
    }

    /// Signal the worker and wait up to the join timeout for it to exit.
    ///
    /// A worker stuck inside an inference call is detached: the pipeline is
    /// flagged unhealthy and a `Concurrency` error returned.
    pub fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        worker.stop.cancel();
        self.frames.notify();

        match worker.done_rx.recv_timeout(self.join_timeout) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                let _ = worker.handle.join();
                info!("Recognition pipeline stopped");
                Ok(())
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                self.analyzer.health().mark_unhealthy();
                let msg = format!(
                    "recognition worker did not stop within {:?}",
                    self.join_timeout
                );
                error!("{}", msg);
                Err(AccessError::Concurrency(msg))
            }
        }
    }
}

impl Drop for RecognitionPipeline {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
