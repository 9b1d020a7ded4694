//! Temporal fusion of per-frame liveness, identity and quality signals

use crate::config::GateConfig;
use std::collections::VecDeque;

/// One frame's worth of signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GateSample {
    pub is_live: bool,
    pub is_match: bool,
    pub is_quality: bool,
}

impl GateSample {
    pub fn new(is_live: bool, is_match: bool, is_quality: bool) -> Self {
        Self {
            is_live,
            is_match,
            is_quality,
        }
    }
}

/// Running tallies over the samples currently in the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateStatus {
    pub live: usize,
    pub matched: usize,
    pub quality: usize,
    pub samples: usize,
    pub window: usize,
}

impl std::fmt::Display for GateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "live {}/{}, match {}/{}, quality {}/{}",
            self.live, self.samples, self.matched, self.samples, self.quality, self.samples
        )
    }
}

/// Sliding window over the last `window` samples.
///
/// Accepts as soon as each signal has reached its absolute threshold among
/// the samples present, so a clean run can pass before the window is full.
/// The three buffers always hold the same number of samples.
#[derive(Debug, Clone)]
pub struct DecisionGate {
    window: usize,
    min_live: usize,
    min_match: usize,
    min_quality: usize,
    live: VecDeque<bool>,
    matched: VecDeque<bool>,
    quality: VecDeque<bool>,
}

impl DecisionGate {
    /// Thresholds are validated by `Config::validate`; the window is at least 1.
    pub fn new(config: &GateConfig) -> Self {
        let window = config.window.max(1);
        Self {
            window,
            min_live: config.min_live,
            min_match: config.min_match,
            min_quality: config.min_quality,
            live: VecDeque::with_capacity(window),
            matched: VecDeque::with_capacity(window),
            quality: VecDeque::with_capacity(window),
        }
    }

    /// Append one sample, evicting the oldest when full, and return the verdict.
    pub fn update(&mut self, is_live: bool, is_match: bool, is_quality: bool) -> bool {
        if self.live.len() == self.window {
            self.live.pop_front();
            self.matched.pop_front();
            self.quality.pop_front();
        }
        self.live.push_back(is_live);
        self.matched.push_back(is_match);
        self.quality.push_back(is_quality);

        self.verdict()
    }

    pub fn push(&mut self, sample: GateSample) -> bool {
        self.update(sample.is_live, sample.is_match, sample.is_quality)
    }

    pub fn verdict(&self) -> bool {
        let status = self.status();
        status.live >= self.min_live
            && status.matched >= self.min_match
            && status.quality >= self.min_quality
    }

    pub fn reset(&mut self) {
        self.live.clear();
        self.matched.clear();
        self.quality.clear();
    }

    pub fn status(&self) -> GateStatus {
        GateStatus {
            live: count(&self.live),
            matched: count(&self.matched),
            quality: count(&self.quality),
            samples: self.live.len(),
            window: self.window,
        }
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

fn count(buffer: &VecDeque<bool>) -> usize {
    buffer.iter().filter(|v| **v).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(window: usize, min: usize) -> DecisionGate {
        DecisionGate::new(&GateConfig {
            window,
            min_live: min,
            min_match: min,
            min_quality: min,
        })
    }

    #[test]
    fn test_accepts_on_twelfth_positive_sample() {
        let mut gate = gate(15, 12);
        for _ in 0..11 {
            assert!(!gate.update(true, true, true));
        }
        assert!(gate.update(true, true, true));
        assert_eq!(gate.len(), 12);
    }

    #[test]
    fn test_buffers_never_exceed_window() {
        let mut gate = gate(15, 12);
        for i in 0..40 {
            gate.update(i % 2 == 0, i % 3 == 0, true);
            let status = gate.status();
            assert!(status.samples <= 15);
            assert_eq!(status.samples, gate.live.len());
            assert_eq!(gate.live.len(), gate.matched.len());
            assert_eq!(gate.matched.len(), gate.quality.len());
        }
        assert_eq!(gate.status().quality, 15);
    }

    #[test]
    fn test_eviction_drops_oldest_positives() {
        let mut gate = gate(15, 12);
        for _ in 0..12 {
            gate.update(true, true, true);
        }
        assert!(gate.verdict());

        // each negative sample first fills the window, then pushes a positive out
        for _ in 0..3 {
            assert!(gate.update(false, false, false));
        }
        assert!(!gate.update(false, false, false));
        assert_eq!(gate.status().matched, 11);
    }

    #[test]
    fn test_single_failing_signal_blocks_acceptance() {
        let mut gate = gate(15, 12);
        for _ in 0..15 {
            assert!(!gate.update(true, true, false));
        }
        let status = gate.status();
        assert_eq!((status.live, status.matched, status.quality), (15, 15, 0));
    }

    #[test]
    fn test_verdict_monotone_in_positive_samples() {
        // with a full window, turning a negative sample positive never flips an accept to a reject
        let base: Vec<bool> = (0..15).map(|i| i % 4 != 0).collect();
        for flip in 0..15 {
            let mut before = gate(15, 11);
            let mut after = gate(15, 11);
            for (i, &positive) in base.iter().enumerate() {
                before.update(positive, positive, positive);
                let boosted = positive || i == flip;
                after.update(boosted, boosted, boosted);
            }
            assert!(!before.verdict() || after.verdict());
        }
    }

    #[test]
    fn test_thresholds_met_in_any_order() {
        let config = GateConfig {
            window: 10,
            min_live: 2,
            min_match: 3,
            min_quality: 4,
        };
        let s = GateSample::new;
        let orders = [
            // match first, quality second, live completes
            vec![
                s(false, true, false),
                s(false, true, true),
                s(false, true, true),
                s(false, false, true),
                s(false, false, true),
                s(true, false, false),
                s(true, false, false),
            ],
            // live first, quality second, match completes
            vec![
                s(true, false, true),
                s(true, false, true),
                s(false, false, true),
                s(false, false, true),
                s(false, true, false),
                s(false, true, false),
                s(false, true, false),
            ],
            // quality first, live and match interleaved
            vec![
                s(false, false, true),
                s(false, false, true),
                s(false, false, true),
                s(true, true, true),
                s(false, true, false),
                s(true, false, false),
                s(false, true, false),
            ],
        ];

        for samples in orders {
            let mut gate = DecisionGate::new(&config);
            let (last, rest) = samples.split_last().unwrap();
            for sample in rest {
                assert!(!gate.push(*sample), "accepted early at {}", gate.status());
            }
            assert!(gate.push(*last), "not accepted: {}", gate.status());
        }
    }

    #[test]
    fn test_reset_clears_window() {
        let mut gate = gate(5, 2);
        gate.push(GateSample::new(true, true, true));
        gate.reset();
        assert!(gate.is_empty());
        assert!(!gate.update(true, true, true));
        assert!(gate.update(true, true, true));
        assert_eq!(gate.status().to_string(), "live 2/2, match 2/2, quality 2/2");
    }
}
