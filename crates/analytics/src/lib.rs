//! # Import Analytics
//!
//! This crate provides the pure calculators behind the opportunity score:
//! supplier-concentration indices, log min-max normalization, the per-sector
//! feasibility lookup, and the baseline window selector.
//!
//! ## Architectural Principles
//!
//! - **Layer 1 Logic:** This is a pure logic crate. It has no knowledge of
//!   external systems. It depends only on `core-types` (Layer 0).
//! - **Total Functions:** Every calculator degrades to a defined value
//!   (`0.0`, `None`) on missing or degenerate input instead of failing.
//!   The recompute job relies on this to never abort mid-universe.

pub mod baseline;
pub mod engine;

// Re-export the key components to create a clean, public-facing API.
pub use baseline::{rolling_current, select_baseline, BaselineWindow};
pub use engine::{
    concentration_index, feasibility_for, normalize_log, opportunity_score, DEFAULT_FEASIBILITY,
};
