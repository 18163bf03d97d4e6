//! Core pipeline for inquest: webhook normalization, deduplicated event
//! ingestion, the per-issue single-flight state machine, the durable queue
//! with consumer groups and dead-lettering, and the orchestrated planning
//! loop that gates spec generation on the gap ledger.

pub mod config;
pub mod error;
pub mod idgen;
pub mod ingest;
pub mod model;
pub mod normalizer;
pub mod orchestrator;
pub mod queue;
pub mod store;
pub mod tracker;
pub mod types;
pub mod worker;

pub use error::{InquestError, Result};
