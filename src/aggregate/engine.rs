//! Cache rebuild engine
//!
//! A rebuild recomputes one period's totals from the persisted records and
//! replaces the cache entry wholesale. The rebuild job collection doubles as
//! the mutex: only one running job may exist per period, so concurrent
//! triggers collapse into one rebuild and a `Conflict` outcome for the
//! losers.

use std::sync::Arc;
use std::time::Instant;

use bson::DateTime;
use tracing::{error, info, warn};

use crate::aggregate::period::PeriodKey;
use crate::db::schemas::{CacheEntryDoc, CacheStatus, JobStatus, RebuildJobDoc, RebuildTrigger};
use crate::store::{PeriodTotals, PipelineStore};
use crate::types::Result;

/// Outcome of one rebuild attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildOutcome {
    Completed {
        period_key: String,
        totals: PeriodTotals,
        duration_ms: i64,
    },
    /// Another rebuild of the same period was already running
    Conflict,
}

/// Outcome of rebuilding every known period
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildAllOutcome {
    pub completed: u64,
    pub conflicts: u64,
    /// (period_key, error) for periods whose rebuild failed
    pub failures: Vec<(String, String)>,
}

/// Rebuilds cache entries from persisted records
#[derive(Clone)]
pub struct AggregationEngine {
    store: Arc<dyn PipelineStore>,
}

impl AggregationEngine {
    pub fn new(store: Arc<dyn PipelineStore>) -> Self {
        Self { store }
    }

    /// Rebuild the cache entry for one period
    ///
    /// On scan failure the job is marked failed and the previous cache entry
    /// is left untouched; an error-status placeholder is written only when
    /// the period never had an entry.
    pub async fn rebuild(
        &self,
        period: &PeriodKey,
        trigger: RebuildTrigger,
        actor: &str,
    ) -> Result<RebuildOutcome> {
        let period_key = period.to_string();
        let job = RebuildJobDoc::new(period_key.clone(), trigger, actor.to_string());

        if !self.store.try_start_rebuild(&job).await? {
            warn!("Rebuild of {} already running, skipping", period_key);
            return Ok(RebuildOutcome::Conflict);
        }

        let started = Instant::now();
        match self.store.scan_period(period).await {
            Ok(totals) => {
                let duration_ms = started.elapsed().as_millis() as i64;
                let entry = CacheEntryDoc {
                    _id: None,
                    metadata: Default::default(),
                    period_key: period_key.clone(),
                    total_records: totals.total_records,
                    counts_by_tag: totals.counts_by_tag.clone(),
                    header_amount_minor: totals.header_amount_minor,
                    transaction_amount_minor: totals.transaction_amount_minor,
                    build_ms: duration_ms,
                    built_at: Some(DateTime::now()),
                    trigger,
                    status: CacheStatus::Active,
                };
                self.store.replace_cache_entry(entry).await?;
                self.store
                    .finish_rebuild(&job.job_id, JobStatus::Completed, None)
                    .await?;

                info!(
                    "Rebuilt {} in {}ms ({} records)",
                    period_key, duration_ms, totals.total_records
                );
                Ok(RebuildOutcome::Completed {
                    period_key,
                    totals,
                    duration_ms,
                })
            }
            Err(e) => {
                error!("Rebuild of {} failed: {}", period_key, e);
                self.store
                    .finish_rebuild(&job.job_id, JobStatus::Failed, Some(e.to_string()))
                    .await?;

                // Readers with a stale-but-valid entry keep it; a period
                // with no entry at all gets an explicit error marker.
                if self.store.load_cache_entry(period).await?.is_none() {
                    let placeholder = CacheEntryDoc {
                        _id: None,
                        metadata: Default::default(),
                        period_key: period_key.clone(),
                        built_at: Some(DateTime::now()),
                        trigger,
                        status: CacheStatus::Error,
                        ..Default::default()
                    };
                    self.store.replace_cache_entry(placeholder).await?;
                }
                Err(e)
            }
        }
    }

    /// Rebuild every known period, tolerating per-period failures
    pub async fn rebuild_all(
        &self,
        trigger: RebuildTrigger,
        actor: &str,
    ) -> Result<RebuildAllOutcome> {
        let mut outcome = RebuildAllOutcome::default();

        for period in self.store.known_periods().await? {
            match self.rebuild(&period, trigger, actor).await {
                Ok(RebuildOutcome::Completed { .. }) => outcome.completed += 1,
                Ok(RebuildOutcome::Conflict) => outcome.conflicts += 1,
                Err(e) => outcome.failures.push((period.to_string(), e.to_string())),
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::tddf::decode::{decode, Decoded};
    use crate::tddf::hierarchy::HierarchyBuilder;
    use crate::tddf::testutil::{bh_line, dt_line};

    async fn seed_records(store: &MemoryStore, file_id: &str) {
        let lines = vec![
            bh_line("MERCHANT01", "01152026", 1, 15000),
            dt_line("MERCHANT01", "4111111111111111", "01152026", 10000),
            dt_line("MERCHANT01", "4111111111111111", "01162026", 5000),
        ];
        let mut builder = HierarchyBuilder::new();
        for (idx, text) in lines.iter().enumerate() {
            match decode(file_id, idx as u32 + 1, text) {
                Decoded::Record(record) => {
                    let placement = builder.link(&record);
                    store.upsert_record(&record, &placement).await.unwrap();
                }
                Decoded::Skip(_) => panic!("seed lines must decode"),
            }
        }
    }

    #[tokio::test]
    async fn rebuild_writes_active_entry_with_totals() {
        let store = Arc::new(MemoryStore::new());
        seed_records(&store, "f1").await;
        let engine = AggregationEngine::new(store.clone() as Arc<dyn PipelineStore>);

        let period = PeriodKey::File("f1".to_string());
        let outcome = engine
            .rebuild(&period, RebuildTrigger::Manual, "tester")
            .await
            .unwrap();

        match outcome {
            RebuildOutcome::Completed { totals, .. } => {
                assert_eq!(totals.total_records, 3);
                assert_eq!(totals.header_amount_minor, 15000);
                assert_eq!(totals.transaction_amount_minor, 15000);
                assert_eq!(totals.counts_by_tag.get("DT"), Some(&2));
            }
            other => panic!("expected completion, got {:?}", other),
        }

        let entry = store.load_cache_entry(&period).await.unwrap().unwrap();
        assert_eq!(entry.status, CacheStatus::Active);
        assert_eq!(entry.total_records, 3);

        let jobs = store.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn rebuild_without_new_data_reproduces_the_same_entry() {
        let store = Arc::new(MemoryStore::new());
        seed_records(&store, "f1").await;
        let engine = AggregationEngine::new(store.clone() as Arc<dyn PipelineStore>);
        let period = PeriodKey::File("f1".to_string());

        let totals = |outcome: RebuildOutcome| match outcome {
            RebuildOutcome::Completed { totals, .. } => totals,
            other => panic!("expected completion, got {:?}", other),
        };
        let first = totals(
            engine
                .rebuild(&period, RebuildTrigger::Manual, "tester")
                .await
                .unwrap(),
        );
        let first_entry = store.load_cache_entry(&period).await.unwrap().unwrap();
        let second = totals(
            engine
                .rebuild(&period, RebuildTrigger::Manual, "tester")
                .await
                .unwrap(),
        );
        let second_entry = store.load_cache_entry(&period).await.unwrap().unwrap();

        // With no records added in between, the second scan lands on the
        // same numbers and the replaced entry carries identical totals.
        assert_eq!(second, first);
        assert_eq!(second_entry.total_records, first_entry.total_records);
        assert_eq!(second_entry.counts_by_tag, first_entry.counts_by_tag);
        assert_eq!(
            second_entry.header_amount_minor,
            first_entry.header_amount_minor
        );
        assert_eq!(
            second_entry.transaction_amount_minor,
            first_entry.transaction_amount_minor
        );
        assert_eq!(second_entry.status, CacheStatus::Active);
    }

    #[tokio::test]
    async fn concurrent_rebuild_of_same_period_conflicts() {
        let store = Arc::new(MemoryStore::new());
        seed_records(&store, "f1").await;
        let engine = AggregationEngine::new(store.clone() as Arc<dyn PipelineStore>);

        // Hold the mutex as if another worker were mid-rebuild
        let holder = RebuildJobDoc::new(
            "file:f1".to_string(),
            RebuildTrigger::Scheduled,
            "other-worker".to_string(),
        );
        assert!(store.try_start_rebuild(&holder).await.unwrap());

        let outcome = engine
            .rebuild(
                &PeriodKey::File("f1".to_string()),
                RebuildTrigger::Manual,
                "tester",
            )
            .await
            .unwrap();
        assert_eq!(outcome, RebuildOutcome::Conflict);

        // Released mutex lets the next attempt through
        store
            .finish_rebuild(&holder.job_id, JobStatus::Completed, None)
            .await
            .unwrap();
        let outcome = engine
            .rebuild(
                &PeriodKey::File("f1".to_string()),
                RebuildTrigger::Manual,
                "tester",
            )
            .await
            .unwrap();
        assert!(matches!(outcome, RebuildOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_previous_entry() {
        let store = Arc::new(MemoryStore::new());
        seed_records(&store, "f1").await;
        let engine = AggregationEngine::new(store.clone() as Arc<dyn PipelineStore>);
        let period = PeriodKey::File("f1".to_string());

        engine
            .rebuild(&period, RebuildTrigger::Manual, "tester")
            .await
            .unwrap();

        store.fail_next_scan();
        let err = engine
            .rebuild(&period, RebuildTrigger::Manual, "tester")
            .await;
        assert!(err.is_err());

        // The good entry from the first rebuild survives
        let entry = store.load_cache_entry(&period).await.unwrap().unwrap();
        assert_eq!(entry.status, CacheStatus::Active);
        assert_eq!(entry.total_records, 3);

        let jobs = store.jobs().await;
        assert_eq!(jobs.last().unwrap().status, JobStatus::Failed);
        assert!(jobs.last().unwrap().error.is_some());
    }

    #[tokio::test]
    async fn failed_rebuild_without_prior_entry_writes_error_placeholder() {
        let store = Arc::new(MemoryStore::new());
        seed_records(&store, "f1").await;
        let engine = AggregationEngine::new(store.clone() as Arc<dyn PipelineStore>);
        let period = PeriodKey::File("f1".to_string());

        store.fail_next_scan();
        assert!(engine
            .rebuild(&period, RebuildTrigger::Manual, "tester")
            .await
            .is_err());

        let entry = store.load_cache_entry(&period).await.unwrap().unwrap();
        assert_eq!(entry.status, CacheStatus::Error);
        assert_eq!(entry.total_records, 0);
    }

    #[tokio::test]
    async fn rebuild_all_covers_file_and_month_periods() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_source_file(crate::db::schemas::SourceFileDoc::new(
                "f1".to_string(),
                "f1.tddf".to_string(),
                3,
                "abc".to_string(),
            ))
            .await
            .unwrap();
        seed_records(&store, "f1").await;
        let engine = AggregationEngine::new(store.clone() as Arc<dyn PipelineStore>);

        let outcome = engine
            .rebuild_all(RebuildTrigger::Scheduled, "scheduler")
            .await
            .unwrap();

        // One file period plus the 2026-01 month period
        assert_eq!(outcome.completed, 2);
        assert!(outcome.failures.is_empty());

        let month = PeriodKey::Month {
            year: 2026,
            month: 1,
        };
        let entry = store.load_cache_entry(&month).await.unwrap().unwrap();
        assert_eq!(entry.transaction_amount_minor, 15000);
    }
}
