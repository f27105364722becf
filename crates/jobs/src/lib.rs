//! # Background Jobs
//!
//! The scheduled/triggered work that derives analytics from raw data. Today
//! that is a single job: the full-pass progress recompute, which rebuilds
//! every commodity's baseline, reduction, concentration, and opportunity
//! metrics from the monthly import tables.
//!
//! ## Concurrency model
//!
//! A job instance admits one run at a time. A trigger that arrives while a
//! run is active is rejected with `JobError::AlreadyRunning` rather than
//! queued; the caller decides whether to retry.

pub mod error;
pub mod recompute;

// Re-export the key components to provide a clean public API.
pub use error::JobError;
pub use recompute::{
    score_universe, RecomputeJob, RecomputeStore, RecomputeSummary, RunState, ScoringInput,
};
