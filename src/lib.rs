//! TDDF settlement file pipeline
//!
//! Ingests fixed-width TDDF settlement files into a raw-line backlog, then
//! processes the backlog in idempotent batches: decode each line against its
//! record layout, link it into the batch hierarchy, persist it by
//! (file_id, line_no). Aggregation rebuilds per-period cache entries from
//! the persisted records. All cross-worker coordination happens through
//! atomic MongoDB operations, so any number of workers can share a backlog.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod ingest;
pub mod store;
pub mod tddf;
pub mod types;
pub mod worker;

pub use types::{PipelineError, Result};
