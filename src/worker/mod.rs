//! Backlog workers: batch processing, drain orchestration, recovery

pub mod drain;
pub mod processor;
pub mod recovery;

pub use drain::{default_plan, run_drain, DrainOutcome, DrainPhase};
pub use processor::{BacklogProcessor, BatchOutcome, ProcessorConfig};
pub use recovery::RecoveryController;
