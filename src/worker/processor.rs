//! Backlog batch processor
//!
//! Leases a file, then claims its pending lines in order through the
//! store's atomic claim primitive, decodes them, links them into the batch
//! hierarchy and upserts the result. The lease gives the per-file hierarchy
//! cursor a single writer: another worker cannot claim lines from a leased
//! file and link them against a cursor that is still moving. Per-line
//! failures are absorbed: the line is marked with its error and the batch
//! moves on. Any worker can lease any free file; the cursor is loaded on
//! lease and saved after every link, so linking survives worker handoffs
//! between batches.

use std::sync::Arc;

use tracing::{info, warn};

use crate::aggregate::{AggregationEngine, PeriodKey};
use crate::db::schemas::RebuildTrigger;
use crate::store::PipelineStore;
use crate::tddf::decode::{decode, Decoded};
use crate::tddf::hierarchy::HierarchyBuilder;
use crate::types::Result;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Claim owner identity, recorded on every claimed line and lease
    pub owner: String,
    /// Default lines per batch when the caller does not say
    pub default_batch_size: u32,
    /// Window after which another worker may take over a lease or claim
    pub stale_after: chrono::Duration,
}

/// Counts for one processed batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub processed: u64,
    pub skipped: u64,
    pub errors: u64,
    /// Pending lines left in scope after the batch
    pub remaining: u64,
}

/// Claims and processes pending backlog lines
pub struct BacklogProcessor {
    store: Arc<dyn PipelineStore>,
    config: ProcessorConfig,
}

impl BacklogProcessor {
    pub fn new(store: Arc<dyn PipelineStore>, config: ProcessorConfig) -> Self {
        Self { store, config }
    }

    /// Process up to `max_records` lines, optionally scoped to one file
    ///
    /// Files are taken one lease at a time; within a lease, lines are
    /// claimed in order and linked through a cursor only this worker is
    /// writing. Returns after every leasable file in scope ran dry or the
    /// cap is reached. Files whose backlog drains during the batch are
    /// marked completed and get a completion-triggered cache rebuild.
    pub async fn process_batch(
        &self,
        scope: Option<&str>,
        max_records: Option<u32>,
    ) -> Result<BatchOutcome> {
        let cap = max_records.unwrap_or(self.config.default_batch_size);
        let mut outcome = BatchOutcome::default();
        let mut budget = cap;
        let mut exhausted: Vec<String> = Vec::new();

        while budget > 0 {
            let file_id = match self
                .store
                .lease_file(
                    scope,
                    &self.config.owner,
                    self.config.stale_after,
                    &exhausted,
                )
                .await?
            {
                Some(id) => id,
                None => break,
            };

            let lease_result = self.process_leased(&file_id, &mut budget, &mut outcome).await;
            self.store
                .release_lease(&file_id, &self.config.owner)
                .await?;
            lease_result?;

            self.complete_if_drained(&file_id).await?;
            if budget > 0 {
                // Lease ended because the file ran out of pending lines
                exhausted.push(file_id);
            }
        }

        outcome.remaining = self.store.pending_count(scope).await?;
        info!(
            "Batch done: {} processed, {} skipped, {} errors, {} remaining",
            outcome.processed, outcome.skipped, outcome.errors, outcome.remaining
        );
        Ok(outcome)
    }

    /// Claim and process lines of one leased file until it runs dry or the
    /// batch budget is spent
    async fn process_leased(
        &self,
        file_id: &str,
        budget: &mut u32,
        outcome: &mut BatchOutcome,
    ) -> Result<()> {
        let cursor = self.store.load_cursor(file_id).await?;
        let mut builder = HierarchyBuilder::with_cursor(cursor);

        while *budget > 0 {
            let line = match self
                .store
                .claim_next_pending(Some(file_id), &self.config.owner)
                .await?
            {
                Some(line) => line,
                None => break,
            };
            *budget -= 1;

            match decode(&line.file_id, line.line_no, &line.text) {
                Decoded::Skip(signal) => {
                    self.store
                        .mark_skipped(&line.file_id, line.line_no, &signal.reason.to_string())
                        .await?;
                    outcome.skipped += 1;
                }
                Decoded::Record(record) => {
                    // The cursor advances even if persistence fails below:
                    // group structure is a function of line order alone, and
                    // a failed line is retried under the same placement.
                    let placement = builder.link(&record);
                    self.store.save_cursor(file_id, builder.cursor()).await?;

                    match self.store.upsert_record(&record, &placement).await {
                        Ok(()) => {
                            self.store
                                .mark_processed(&line.file_id, line.line_no)
                                .await?;
                            outcome.processed += 1;
                        }
                        Err(e) => {
                            warn!(
                                "Persist failed for {}:{}: {}",
                                line.file_id, line.line_no, e
                            );
                            self.store
                                .mark_error(&line.file_id, line.line_no, &e.to_string())
                                .await?;
                            outcome.errors += 1;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Mark the file completed if its backlog has drained, and kick off the
    /// completion rebuild of its file period
    pub(crate) async fn complete_if_drained(&self, file_id: &str) -> Result<bool> {
        if !self.store.is_backlog_drained(file_id).await? {
            return Ok(false);
        }
        if !self.store.mark_file_completed(file_id).await? {
            // Lost the completion race or already swept; either way done
            return Ok(false);
        }

        info!("Backlog drained for {}, rebuilding file cache", file_id);
        let engine = AggregationEngine::new(Arc::clone(&self.store));
        let period = PeriodKey::File(file_id.to_string());
        if let Err(e) = engine
            .rebuild(&period, RebuildTrigger::BacklogCompletion, &self.config.owner)
            .await
        {
            // The completion marker stands; the sweep or a manual rebuild
            // picks the cache up later.
            warn!("Completion rebuild for {} failed: {}", file_id, e);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::PeriodKey;
    use crate::db::schemas::{CacheStatus, LineStatus, RebuildTrigger};
    use crate::ingest::ingest_file;
    use crate::store::MemoryStore;
    use crate::tddf::hierarchy::LinkDiagnostic;
    use crate::tddf::layout::RecordRole;
    use crate::tddf::testutil::{bh_line, dt_line, e1_line, fh_line, ft_line};

    fn clean_file_body() -> String {
        [
            fh_line("01152026"),
            bh_line("MERCHANT01", "01152026", 1, 15000),
            dt_line("MERCHANT01", "4111111111111111", "01152026", 10000),
            e1_line("REF0001", "LG"),
            dt_line("MERCHANT01", "4111111111111111", "01162026", 5000),
            ft_line(5, 15000),
        ]
        .join("\n")
    }

    fn worker(store: Arc<MemoryStore>, owner: &str) -> BacklogProcessor {
        BacklogProcessor::new(
            store,
            ProcessorConfig {
                owner: owner.to_string(),
                default_batch_size: 100,
                stale_after: chrono::Duration::minutes(30),
            },
        )
    }

    fn processor(store: Arc<MemoryStore>) -> BacklogProcessor {
        worker(store, "test-worker")
    }

    #[tokio::test]
    async fn processes_clean_file_and_completes_it() {
        let store = Arc::new(MemoryStore::new());
        ingest_file(store.as_ref(), "f1", "jan.tddf", &clean_file_body())
            .await
            .unwrap();

        let outcome = processor(store.clone()).process_batch(None, None).await.unwrap();
        assert_eq!(
            outcome,
            BatchOutcome {
                processed: 6,
                skipped: 0,
                errors: 0,
                remaining: 0,
            }
        );

        // Hierarchy placements
        let dt = store.persisted("f1", 3).await.unwrap();
        assert_eq!(dt.placement.header_line, Some(2));
        assert_eq!(dt.placement.diagnostic, None);
        let e1 = store.persisted("f1", 4).await.unwrap();
        assert_eq!(e1.placement.child_line, Some(3));

        // Completion marker and the completion-triggered cache entry
        let file = store.source_file("f1").await.unwrap();
        assert!(file.completed);
        let entry = store
            .load_cache_entry(&PeriodKey::File("f1".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.trigger, RebuildTrigger::BacklogCompletion);
        assert_eq!(entry.status, CacheStatus::Active);
        assert_eq!(entry.total_records, 6);
    }

    #[tokio::test]
    async fn unknown_and_short_lines_are_skipped_with_reasons() {
        let store = Arc::new(MemoryStore::new());
        let body = format!(
            "{}\nXXnot a known record\nDTtoo short\n{}",
            bh_line("MERCHANT01", "01152026", 1, 1000),
            dt_line("MERCHANT01", "4111111111111111", "01152026", 1000),
        );
        ingest_file(store.as_ref(), "f1", "odd.tddf", &body)
            .await
            .unwrap();

        let outcome = processor(store.clone()).process_batch(None, None).await.unwrap();
        assert_eq!(outcome.processed, 2);
        assert_eq!(outcome.skipped, 2);

        let unknown = store.line("f1", 2).await.unwrap();
        assert_eq!(unknown.status, LineStatus::Skipped);
        assert_eq!(unknown.failure.as_deref(), Some("unknown-type"));
        let short = store.line("f1", 3).await.unwrap();
        assert_eq!(short.failure.as_deref(), Some("short-line"));

        // Skipped lines do not disturb linking: the DT after them still
        // attaches to the header.
        let dt = store.persisted("f1", 4).await.unwrap();
        assert_eq!(dt.placement.header_line, Some(1));
    }

    #[tokio::test]
    async fn persist_failure_is_absorbed_per_line() {
        let store = Arc::new(MemoryStore::new());
        ingest_file(store.as_ref(), "f1", "jan.tddf", &clean_file_body())
            .await
            .unwrap();
        store.fail_persist_on("f1", 3);

        let outcome = processor(store.clone()).process_batch(None, None).await.unwrap();
        assert_eq!(outcome.processed, 5);
        assert_eq!(outcome.errors, 1);

        let failed = store.line("f1", 3).await.unwrap();
        assert_eq!(failed.status, LineStatus::Error);
        assert!(failed.failure.is_some());

        // The failed line never reached the record store, its neighbors did
        assert!(store.persisted("f1", 3).await.is_none());
        assert!(store.persisted("f1", 5).await.is_some());

        // Linking carried on past the failure: the extension after the
        // failed DT still references it by line number.
        let e1 = store.persisted("f1", 4).await.unwrap();
        assert_eq!(e1.placement.child_line, Some(3));
    }

    #[tokio::test]
    async fn reprocessing_a_line_overwrites_instead_of_duplicating() {
        let store = Arc::new(MemoryStore::new());
        ingest_file(store.as_ref(), "f1", "jan.tddf", &clean_file_body())
            .await
            .unwrap();

        let p = processor(store.clone());
        p.process_batch(None, None).await.unwrap();
        let count_before = store.persisted_count().await;

        store.reset_line_to_pending("f1", 3).await;
        let outcome = p.process_batch(None, None).await.unwrap();
        assert_eq!(outcome.processed, 1);

        assert_eq!(store.persisted_count().await, count_before);
        assert_eq!(
            store.line("f1", 3).await.unwrap().status,
            LineStatus::Processed
        );
    }

    #[tokio::test]
    async fn orphan_child_is_flagged_but_persisted() {
        let store = Arc::new(MemoryStore::new());
        let body = format!(
            "{}\n{}",
            dt_line("MERCHANT01", "4111111111111111", "01152026", 1000),
            bh_line("MERCHANT01", "01152026", 1, 1000),
        );
        ingest_file(store.as_ref(), "f1", "orphan.tddf", &body)
            .await
            .unwrap();

        processor(store.clone()).process_batch(None, None).await.unwrap();

        let orphan = store.persisted("f1", 1).await.unwrap();
        assert_eq!(orphan.placement.role, RecordRole::Child);
        assert_eq!(orphan.placement.header_line, None);
        assert_eq!(orphan.placement.diagnostic, Some(LinkDiagnostic::OrphanChild));
    }

    #[tokio::test]
    async fn cursor_survives_batch_boundaries_and_worker_handoff() {
        let store = Arc::new(MemoryStore::new());
        ingest_file(store.as_ref(), "f1", "jan.tddf", &clean_file_body())
            .await
            .unwrap();

        // First worker stops after the header lines
        processor(store.clone())
            .process_batch(Some("f1"), Some(2))
            .await
            .unwrap();

        // A different worker picks up the rest from the persisted cursor
        let second = worker(store.clone(), "another-worker");
        second.process_batch(Some("f1"), None).await.unwrap();

        let dt = store.persisted("f1", 3).await.unwrap();
        assert_eq!(dt.placement.header_line, Some(2));
        assert_eq!(dt.placement.diagnostic, None);
        let e1 = store.persisted("f1", 4).await.unwrap();
        assert_eq!(e1.placement.child_line, Some(3));
    }

    #[tokio::test]
    async fn scoped_batch_leaves_other_files_untouched() {
        let store = Arc::new(MemoryStore::new());
        ingest_file(store.as_ref(), "f1", "a.tddf", &clean_file_body())
            .await
            .unwrap();
        let other = bh_line("MERCHANT02", "02012026", 1, 500);
        ingest_file(store.as_ref(), "f2", "b.tddf", &other)
            .await
            .unwrap();

        let outcome = processor(store.clone())
            .process_batch(Some("f1"), None)
            .await
            .unwrap();
        assert_eq!(outcome.processed, 6);
        assert_eq!(outcome.remaining, 0);

        assert_eq!(store.pending_count(Some("f2")).await.unwrap(), 1);
        assert!(!store.source_file("f2").await.unwrap().completed);
    }

    #[tokio::test]
    async fn leased_file_is_off_limits_to_other_workers() {
        let store = Arc::new(MemoryStore::new());
        let body = format!(
            "{}\n{}",
            bh_line("MERCHANT01", "01152026", 1, 1000),
            dt_line("MERCHANT01", "4111111111111111", "01152026", 1000),
        );
        ingest_file(store.as_ref(), "f1", "a.tddf", &body)
            .await
            .unwrap();

        // Worker A takes the file, claims the header line and stalls
        // mid-flight, before linking it
        let window = chrono::Duration::minutes(30);
        let leased = store
            .lease_file(None, "worker-a", window, &[])
            .await
            .unwrap();
        assert_eq!(leased.as_deref(), Some("f1"));
        let held = store
            .claim_next_pending(Some("f1"), "worker-a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(held.line_no, 1);

        // Worker B must not reach past the lease and link the transaction
        // against a cursor that has not seen the header yet
        let outcome = worker(store.clone(), "worker-b")
            .process_batch(None, None)
            .await
            .unwrap();
        assert_eq!(outcome.processed, 0);
        assert_eq!(
            store.line("f1", 2).await.unwrap().status,
            LineStatus::Pending
        );
        assert!(store.persisted("f1", 2).await.is_none());
    }

    #[tokio::test]
    async fn takeover_after_stale_worker_links_correctly() {
        let store = Arc::new(MemoryStore::new());
        let body = format!(
            "{}\n{}",
            bh_line("MERCHANT01", "01152026", 1, 1000),
            dt_line("MERCHANT01", "4111111111111111", "01152026", 1000),
        );
        ingest_file(store.as_ref(), "f1", "a.tddf", &body)
            .await
            .unwrap();

        // Worker A dies holding the lease and the header-line claim
        let window = chrono::Duration::minutes(30);
        store
            .lease_file(None, "worker-a", window, &[])
            .await
            .unwrap();
        store
            .claim_next_pending(Some("f1"), "worker-a")
            .await
            .unwrap();
        store
            .backdate_claim("f1", 1, chrono::Duration::minutes(45))
            .await;
        store.backdate_lease("f1", chrono::Duration::minutes(45)).await;

        store.reclaim_stale(window).await.unwrap();
        let outcome = worker(store.clone(), "worker-b")
            .process_batch(None, None)
            .await
            .unwrap();
        assert_eq!(outcome.processed, 2);

        // The transaction attaches to its header, not to an empty cursor
        let dt = store.persisted("f1", 2).await.unwrap();
        assert_eq!(dt.placement.header_line, Some(1));
        assert_eq!(dt.placement.diagnostic, None);
    }
}
