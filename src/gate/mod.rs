//! Decision gate: turns noisy per-frame signals into one accept/reject

pub mod decision;
mod quality;

pub use decision::{DecisionGate, GateSample, GateStatus};
