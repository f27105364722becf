//! # Trade Data ETL
//!
//! Ingestion of monthly partner-level import records from the external
//! statistics source: identifier normalization, cursor pagination, bounded
//! exponential backoff on transient failures, and idempotent upserts into
//! the persistence sink.
//!
//! ## Failure policy
//!
//! Per-unit failures (one page of one period) are retried, then recorded and
//! skipped; the rest of the run keeps going and its writes are preserved.
//! There is no fallback data source: when the source is unreachable for the
//! whole run the job fails loudly instead of substituting stale or synthetic
//! data.

pub mod error;
pub mod fetcher;
pub mod normalize;

// Re-export the key components to provide a clean public API.
pub use error::EtlError;
pub use fetcher::{FailedUnit, FetchSummary, Fetcher, PersistenceSink, RetryPolicy};
