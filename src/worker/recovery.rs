//! Recovery controller
//!
//! Two sweeps keep the pipeline honest after crashes: stale Processing
//! claims (a worker died mid-line) go back to Pending for any worker to
//! pick up, and files whose backlog drained without the processor noticing
//! get their completion marker and cache rebuild.

use std::sync::Arc;

use tracing::info;

use crate::store::PipelineStore;
use crate::types::Result;
use crate::worker::processor::{BacklogProcessor, ProcessorConfig};

/// Periodic recovery sweeps over claims and completion markers
pub struct RecoveryController {
    store: Arc<dyn PipelineStore>,
    owner: String,
    stale_after: chrono::Duration,
}

impl RecoveryController {
    pub fn new(store: Arc<dyn PipelineStore>, owner: String, stale_after: chrono::Duration) -> Self {
        Self {
            store,
            owner,
            stale_after,
        }
    }

    /// Revert claims older than the staleness window; returns how many
    ///
    /// Reprocessing a reclaimed line is safe: decoding is deterministic and
    /// persistence is an upsert, so a worker that died after persisting but
    /// before marking the line just overwrites its own work.
    pub async fn reclaim_stale(&self) -> Result<u64> {
        let reclaimed = self.store.reclaim_stale(self.stale_after).await?;
        if reclaimed > 0 {
            info!("Reclaimed {} stale claims", reclaimed);
        }
        Ok(reclaimed)
    }

    /// Sweep unfinished files for missed completions; returns how many
    /// files were completed
    pub async fn sweep_completions(&self) -> Result<u64> {
        let processor = BacklogProcessor::new(
            Arc::clone(&self.store),
            ProcessorConfig {
                owner: self.owner.clone(),
                default_batch_size: 0,
                stale_after: self.stale_after,
            },
        );

        let mut completed = 0;
        for file_id in self.store.unfinished_files().await? {
            if processor.complete_if_drained(&file_id).await? {
                completed += 1;
            }
        }
        if completed > 0 {
            info!("Completion sweep closed {} files", completed);
        }
        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::PeriodKey;
    use crate::db::schemas::{LineStatus, RebuildTrigger};
    use crate::ingest::ingest_file;
    use crate::store::MemoryStore;
    use crate::tddf::testutil::{bh_line, dt_line};
    use crate::worker::processor::BatchOutcome;

    fn small_body() -> String {
        format!(
            "{}\n{}",
            bh_line("MERCHANT01", "01152026", 1, 1000),
            dt_line("MERCHANT01", "4111111111111111", "01152026", 1000),
        )
    }

    fn controller(store: Arc<MemoryStore>, minutes: i64) -> RecoveryController {
        RecoveryController::new(store, "recovery-test".to_string(), chrono::Duration::minutes(minutes))
    }

    #[tokio::test]
    async fn reclaims_only_claims_past_the_window() {
        let store = Arc::new(MemoryStore::new());
        ingest_file(store.as_ref(), "f1", "a.tddf", &small_body())
            .await
            .unwrap();

        // Two claims: one stale, one fresh
        store.claim_next_pending(None, "dead-worker").await.unwrap();
        store.claim_next_pending(None, "live-worker").await.unwrap();
        store
            .backdate_claim("f1", 1, chrono::Duration::minutes(45))
            .await;

        let reclaimed = controller(store.clone(), 30).reclaim_stale().await.unwrap();
        assert_eq!(reclaimed, 1);

        let stale = store.line("f1", 1).await.unwrap();
        assert_eq!(stale.status, LineStatus::Pending);
        assert!(stale.claimed_by.is_none());
        assert_eq!(stale.audit_note.as_deref(), Some("reclaimed from stale claim"));

        let fresh = store.line("f1", 2).await.unwrap();
        assert_eq!(fresh.status, LineStatus::Processing);
        assert_eq!(fresh.claimed_by.as_deref(), Some("live-worker"));
    }

    #[tokio::test]
    async fn reclaimed_line_is_reprocessed_idempotently() {
        let store = Arc::new(MemoryStore::new());
        ingest_file(store.as_ref(), "f1", "a.tddf", &small_body())
            .await
            .unwrap();

        let processor = BacklogProcessor::new(
            store.clone(),
            ProcessorConfig {
                owner: "w1".to_string(),
                default_batch_size: 100,
                stale_after: chrono::Duration::minutes(30),
            },
        );

        // A worker claims line 1 and dies before finishing it
        store.claim_next_pending(None, "dead-worker").await.unwrap();
        store
            .backdate_claim("f1", 1, chrono::Duration::minutes(45))
            .await;

        controller(store.clone(), 30).reclaim_stale().await.unwrap();
        let outcome = processor.process_batch(None, None).await.unwrap();

        assert_eq!(
            outcome,
            BatchOutcome {
                processed: 2,
                skipped: 0,
                errors: 0,
                remaining: 0,
            }
        );
        // Linking is intact despite the detour through the reclaim
        let dt = store.persisted("f1", 2).await.unwrap();
        assert_eq!(dt.placement.header_line, Some(1));
    }

    #[tokio::test]
    async fn completion_sweep_closes_drained_files() {
        let store = Arc::new(MemoryStore::new());
        ingest_file(store.as_ref(), "f1", "a.tddf", &small_body())
            .await
            .unwrap();

        // Drain the backlog behind the processor's back
        store.claim_next_pending(None, "w").await.unwrap();
        store.mark_processed("f1", 1).await.unwrap();
        store.claim_next_pending(None, "w").await.unwrap();
        store.mark_processed("f1", 2).await.unwrap();
        assert!(!store.source_file("f1").await.unwrap().completed);

        let completed = controller(store.clone(), 30)
            .sweep_completions()
            .await
            .unwrap();
        assert_eq!(completed, 1);
        assert!(store.source_file("f1").await.unwrap().completed);

        // The sweep also triggered the file-period rebuild
        let entry = store
            .load_cache_entry(&PeriodKey::File("f1".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.trigger, RebuildTrigger::BacklogCompletion);

        // A second sweep is a no-op
        let again = controller(store.clone(), 30)
            .sweep_completions()
            .await
            .unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn sweep_ignores_files_with_open_backlog() {
        let store = Arc::new(MemoryStore::new());
        ingest_file(store.as_ref(), "f1", "a.tddf", &small_body())
            .await
            .unwrap();

        let completed = controller(store.clone(), 30)
            .sweep_completions()
            .await
            .unwrap();
        assert_eq!(completed, 0);
        assert!(!store.source_file("f1").await.unwrap().completed);
    }
}
