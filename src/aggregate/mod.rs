//! Aggregation: period keys and the cache rebuild engine

pub mod engine;
pub mod period;

pub use engine::{AggregationEngine, RebuildAllOutcome, RebuildOutcome};
pub use period::PeriodKey;
