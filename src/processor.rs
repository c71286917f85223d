//! Pipeline stages: readiness gate, retrying fetcher, backfill, live
//! reconciliation, persistence drain, and the orchestrator wiring them.

pub mod backfill;
pub mod backoff;
pub mod drain;
pub mod fetcher;
pub mod pipeline;
pub mod readiness;
pub mod reconciler;
