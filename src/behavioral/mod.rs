//! Behavioral probing stage: prober seam, trace comparison, scoring.

pub mod prober;
pub mod runner;

pub use prober::{
    BehavioralConfig, BehavioralProber, Credentials, ScenarioTrace, TraceStep,
    UnconfiguredProber,
};
pub use runner::{
    BehavioralOutcome, BehavioralRunner, ScenarioResult, CRITICAL_DIVERGENCE_PENALTY,
    TIMING_DIVERGENCE_FACTOR,
};
