//! Backlog drain orchestration
//!
//! A drain runs batches until the backlog is empty, escalating batch size
//! between phases so a small early batch can surface systemic problems
//! before the bulk runs. Errors halt the drain: a line that failed once
//! fails the same way on retry until someone intervenes.

use tracing::{info, warn};

use crate::types::Result;
use crate::worker::processor::BacklogProcessor;

/// One phase of a drain plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainPhase {
    /// Lines per batch in this phase
    pub batch_size: u32,
    /// Batches to run before moving to the next phase
    pub batches: u32,
}

/// Totals for one drain run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    pub processed: u64,
    pub skipped: u64,
    pub errors: u64,
    pub batches_run: u32,
    /// True when the backlog in scope emptied
    pub drained: bool,
}

/// Default escalation: one small warmup batch, then full-size batches
pub fn default_plan() -> Vec<DrainPhase> {
    vec![
        DrainPhase {
            batch_size: 50,
            batches: 1,
        },
        DrainPhase {
            batch_size: 500,
            batches: 200,
        },
    ]
}

/// Run batches according to the plan until drained, errors appear, or the
/// plan is exhausted
pub async fn run_drain(
    processor: &BacklogProcessor,
    scope: Option<&str>,
    plan: &[DrainPhase],
) -> Result<DrainOutcome> {
    let mut outcome = DrainOutcome::default();

    for phase in plan {
        for _ in 0..phase.batches {
            let batch = processor
                .process_batch(scope, Some(phase.batch_size))
                .await?;
            outcome.processed += batch.processed;
            outcome.skipped += batch.skipped;
            outcome.errors += batch.errors;
            outcome.batches_run += 1;

            if batch.errors > 0 {
                warn!(
                    "Drain halted after {} batches: {} errors",
                    outcome.batches_run, outcome.errors
                );
                return Ok(outcome);
            }
            if batch.remaining == 0 {
                outcome.drained = true;
                info!(
                    "Backlog drained: {} processed, {} skipped in {} batches",
                    outcome.processed, outcome.skipped, outcome.batches_run
                );
                return Ok(outcome);
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::ingest::ingest_file;
    use crate::store::{MemoryStore, PipelineStore};
    use crate::tddf::testutil::{bh_line, dt_line};
    use crate::worker::processor::ProcessorConfig;

    fn many_lines(count: usize) -> String {
        let mut lines = vec![bh_line("MERCHANT01", "01152026", 1, 0)];
        for _ in 1..count {
            lines.push(dt_line("MERCHANT01", "4111111111111111", "01152026", 100));
        }
        lines.join("\n")
    }

    fn processor(store: Arc<MemoryStore>) -> BacklogProcessor {
        BacklogProcessor::new(
            store,
            ProcessorConfig {
                owner: "drain-test".to_string(),
                default_batch_size: 500,
                stale_after: chrono::Duration::minutes(30),
            },
        )
    }

    #[tokio::test]
    async fn drains_across_multiple_batches() {
        let store = Arc::new(MemoryStore::new());
        ingest_file(store.as_ref(), "f1", "big.tddf", &many_lines(120))
            .await
            .unwrap();

        let plan = vec![DrainPhase {
            batch_size: 50,
            batches: 10,
        }];
        let outcome = run_drain(&processor(store.clone()), None, &plan)
            .await
            .unwrap();

        assert!(outcome.drained);
        assert_eq!(outcome.processed, 120);
        assert_eq!(outcome.batches_run, 3);
        assert_eq!(store.pending_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn halts_on_first_batch_with_errors() {
        let store = Arc::new(MemoryStore::new());
        ingest_file(store.as_ref(), "f1", "big.tddf", &many_lines(120))
            .await
            .unwrap();
        store.fail_persist_on("f1", 10);

        let plan = vec![DrainPhase {
            batch_size: 50,
            batches: 10,
        }];
        let outcome = run_drain(&processor(store.clone()), None, &plan)
            .await
            .unwrap();

        assert!(!outcome.drained);
        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.batches_run, 1);
        // The rest of the backlog is still there for after the fix
        assert!(store.pending_count(None).await.unwrap() > 0);
    }

    #[tokio::test]
    async fn exhausted_plan_reports_undrained() {
        let store = Arc::new(MemoryStore::new());
        ingest_file(store.as_ref(), "f1", "big.tddf", &many_lines(30))
            .await
            .unwrap();

        let plan = vec![DrainPhase {
            batch_size: 10,
            batches: 2,
        }];
        let outcome = run_drain(&processor(store.clone()), None, &plan)
            .await
            .unwrap();

        assert!(!outcome.drained);
        assert_eq!(outcome.processed, 20);
    }
}
