//! In-memory store for tests and local development
//!
//! Implements the same primitives as the MongoDB store over process-local
//! maps. Supports injecting per-line persist failures and a one-shot scan
//! failure so error paths can be exercised without a database.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bson::DateTime;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::aggregate::period::PeriodKey;
use crate::db::schemas::{
    CacheEntryDoc, JobStatus, LineStatus, RawLineDoc, RebuildJobDoc, SourceFileDoc,
};
use crate::store::{FileStatus, PeriodTotals, PipelineStore, StatusSummary};
use crate::tddf::{DecodedRecord, HierarchyCursor, Placement, RecordRole};
use crate::types::{PipelineError, Result};

/// A record as persisted, with the placement it was linked under
#[derive(Debug, Clone)]
pub struct PersistedRecord {
    pub record: DecodedRecord,
    pub placement: Placement,
}

#[derive(Default)]
struct State {
    files: BTreeMap<String, SourceFileDoc>,
    lines: BTreeMap<(String, u32), RawLineDoc>,
    records: BTreeMap<(String, u32), PersistedRecord>,
    cache: BTreeMap<String, CacheEntryDoc>,
    jobs: Vec<RebuildJobDoc>,
}

/// In-memory implementation of [`PipelineStore`]
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    fail_persist: Mutex<HashSet<(String, u32)>>,
    fail_next_scan: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every persist of (file_id, line_no) fail
    pub fn fail_persist_on(&self, file_id: &str, line_no: u32) {
        self.fail_persist
            .lock()
            .unwrap()
            .insert((file_id.to_string(), line_no));
    }

    /// Make the next period scan fail
    pub fn fail_next_scan(&self) {
        self.fail_next_scan.store(true, Ordering::SeqCst);
    }

    /// Backdate a line's claim timestamp (test support for staleness)
    pub async fn backdate_claim(&self, file_id: &str, line_no: u32, ago: chrono::Duration) {
        let mut state = self.state.write().await;
        if let Some(line) = state.lines.get_mut(&(file_id.to_string(), line_no)) {
            line.claimed_at = Some(DateTime::from_chrono(Utc::now() - ago));
        }
    }

    /// Backdate a file's lease timestamp (test support for staleness)
    pub async fn backdate_lease(&self, file_id: &str, ago: chrono::Duration) {
        let mut state = self.state.write().await;
        if let Some(file) = state.files.get_mut(file_id) {
            file.leased_at = Some(DateTime::from_chrono(Utc::now() - ago));
        }
    }

    /// Return a line to pending as if it had never been processed; reopens
    /// the file so it is leasable again
    pub async fn reset_line_to_pending(&self, file_id: &str, line_no: u32) {
        let mut state = self.state.write().await;
        if let Some(line) = state.lines.get_mut(&(file_id.to_string(), line_no)) {
            line.status = LineStatus::Pending;
            line.claimed_at = None;
            line.claimed_by = None;
            line.finished_at = None;
            line.failure = None;
        }
        if let Some(file) = state.files.get_mut(file_id) {
            file.completed = false;
        }
    }

    pub async fn line(&self, file_id: &str, line_no: u32) -> Option<RawLineDoc> {
        let state = self.state.read().await;
        state.lines.get(&(file_id.to_string(), line_no)).cloned()
    }

    pub async fn persisted(&self, file_id: &str, line_no: u32) -> Option<PersistedRecord> {
        let state = self.state.read().await;
        state.records.get(&(file_id.to_string(), line_no)).cloned()
    }

    pub async fn persisted_count(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn source_file(&self, file_id: &str) -> Option<SourceFileDoc> {
        let state = self.state.read().await;
        state.files.get(file_id).cloned()
    }

    pub async fn jobs(&self) -> Vec<RebuildJobDoc> {
        self.state.read().await.jobs.clone()
    }

    pub async fn cache_entries(&self) -> Vec<CacheEntryDoc> {
        self.state.read().await.cache.values().cloned().collect()
    }

    fn in_period(record: &DecodedRecord, period: &PeriodKey) -> bool {
        match period {
            PeriodKey::File(id) => record.file_id == *id,
            PeriodKey::Month { .. } => match record.record_date {
                Some(date) => {
                    let start = period.month_start().expect("month period");
                    let end = period.month_end_exclusive().expect("month period");
                    date >= start && date < end
                }
                None => false,
            },
        }
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn find_file_by_checksum(&self, checksum: &str) -> Result<Option<String>> {
        let state = self.state.read().await;
        Ok(state
            .files
            .values()
            .find(|f| f.checksum == checksum)
            .map(|f| f.file_id.clone()))
    }

    async fn insert_source_file(&self, file: SourceFileDoc) -> Result<()> {
        let mut state = self.state.write().await;
        if state.files.contains_key(&file.file_id) {
            return Err(PipelineError::Database(format!(
                "duplicate file_id: {}",
                file.file_id
            )));
        }
        state.files.insert(file.file_id.clone(), file);
        Ok(())
    }

    async fn insert_raw_lines(&self, lines: Vec<RawLineDoc>) -> Result<()> {
        let mut state = self.state.write().await;
        for line in lines {
            let key = (line.file_id.clone(), line.line_no);
            if state.lines.contains_key(&key) {
                return Err(PipelineError::Database(format!(
                    "duplicate line: {}:{}",
                    key.0, key.1
                )));
            }
            state.lines.insert(key, line);
        }
        Ok(())
    }

    async fn lease_file(
        &self,
        scope: Option<&str>,
        owner: &str,
        stale_after: chrono::Duration,
        skip: &[String],
    ) -> Result<Option<String>> {
        let cutoff = Utc::now() - stale_after;
        let mut state = self.state.write().await;

        let file_id = state
            .files
            .values()
            .find(|f| {
                if f.completed || skip.contains(&f.file_id) {
                    return false;
                }
                if scope.map_or(false, |s| s != f.file_id) {
                    return false;
                }
                match (&f.lease_owner, f.leased_at) {
                    (None, _) => true,
                    (Some(holder), _) if holder == owner => true,
                    (Some(_), Some(at)) => at.to_chrono() < cutoff,
                    (Some(_), None) => true,
                }
            })
            .map(|f| f.file_id.clone());

        if let Some(id) = &file_id {
            let file = state.files.get_mut(id).expect("file just found");
            file.lease_owner = Some(owner.to_string());
            file.leased_at = Some(DateTime::now());
        }
        Ok(file_id)
    }

    async fn release_lease(&self, file_id: &str, owner: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(file) = state.files.get_mut(file_id) {
            if file.lease_owner.as_deref() == Some(owner) {
                file.lease_owner = None;
                file.leased_at = None;
            }
        }
        Ok(())
    }

    async fn claim_next_pending(
        &self,
        scope: Option<&str>,
        owner: &str,
    ) -> Result<Option<RawLineDoc>> {
        let mut state = self.state.write().await;
        let key = state
            .lines
            .iter()
            .find(|((file_id, _), line)| {
                line.status == LineStatus::Pending
                    && scope.map_or(true, |s| s == file_id.as_str())
            })
            .map(|(key, _)| key.clone());

        match key {
            Some(key) => {
                let line = state.lines.get_mut(&key).expect("key just found");
                line.status = LineStatus::Processing;
                line.claimed_at = Some(DateTime::now());
                line.claimed_by = Some(owner.to_string());
                Ok(Some(line.clone()))
            }
            None => Ok(None),
        }
    }

    async fn mark_processed(&self, file_id: &str, line_no: u32) -> Result<()> {
        let mut state = self.state.write().await;
        let line = state
            .lines
            .get_mut(&(file_id.to_string(), line_no))
            .ok_or_else(|| PipelineError::NotFound(format!("line {}:{}", file_id, line_no)))?;
        line.status = LineStatus::Processed;
        line.finished_at = Some(DateTime::now());
        line.failure = None;
        Ok(())
    }

    async fn mark_skipped(&self, file_id: &str, line_no: u32, reason: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let line = state
            .lines
            .get_mut(&(file_id.to_string(), line_no))
            .ok_or_else(|| PipelineError::NotFound(format!("line {}:{}", file_id, line_no)))?;
        line.status = LineStatus::Skipped;
        line.finished_at = Some(DateTime::now());
        line.failure = Some(reason.to_string());
        Ok(())
    }

    async fn mark_error(&self, file_id: &str, line_no: u32, message: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let line = state
            .lines
            .get_mut(&(file_id.to_string(), line_no))
            .ok_or_else(|| PipelineError::NotFound(format!("line {}:{}", file_id, line_no)))?;
        line.status = LineStatus::Error;
        line.finished_at = Some(DateTime::now());
        line.failure = Some(message.to_string());
        Ok(())
    }

    async fn pending_count(&self, scope: Option<&str>) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .lines
            .values()
            .filter(|l| {
                l.status == LineStatus::Pending && scope.map_or(true, |s| s == l.file_id)
            })
            .count() as u64)
    }

    async fn load_cursor(&self, file_id: &str) -> Result<HierarchyCursor> {
        let state = self.state.read().await;
        Ok(state
            .files
            .get(file_id)
            .map(|f| f.cursor)
            .unwrap_or_default())
    }

    async fn save_cursor(&self, file_id: &str, cursor: HierarchyCursor) -> Result<()> {
        let mut state = self.state.write().await;
        let file = state
            .files
            .get_mut(file_id)
            .ok_or_else(|| PipelineError::NotFound(format!("file {}", file_id)))?;
        file.cursor = cursor;
        Ok(())
    }

    async fn upsert_record(&self, record: &DecodedRecord, placement: &Placement) -> Result<()> {
        {
            let failures = self.fail_persist.lock().unwrap();
            if failures.contains(&(record.file_id.clone(), record.line_no)) {
                return Err(PipelineError::Database("injected persist failure".into()));
            }
        }

        let mut state = self.state.write().await;
        state.records.insert(
            (record.file_id.clone(), record.line_no),
            PersistedRecord {
                record: record.clone(),
                placement: placement.clone(),
            },
        );
        Ok(())
    }

    async fn reclaim_stale(&self, stale_after: chrono::Duration) -> Result<u64> {
        let cutoff = Utc::now() - stale_after;
        let mut state = self.state.write().await;
        let mut reclaimed = 0;

        for line in state.lines.values_mut() {
            if line.status != LineStatus::Processing {
                continue;
            }
            let stale = line
                .claimed_at
                .map(|at| at.to_chrono() < cutoff)
                .unwrap_or(true);
            if stale {
                line.status = LineStatus::Pending;
                line.claimed_at = None;
                line.claimed_by = None;
                line.audit_note = Some("reclaimed from stale claim".to_string());
                reclaimed += 1;
            }
        }

        // Leases from dead workers expire on the same window
        for file in state.files.values_mut() {
            let expired = file
                .leased_at
                .map(|at| at.to_chrono() < cutoff)
                .unwrap_or(false);
            if file.lease_owner.is_some() && expired {
                file.lease_owner = None;
                file.leased_at = None;
            }
        }

        Ok(reclaimed)
    }

    async fn unfinished_files(&self) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .files
            .values()
            .filter(|f| !f.completed)
            .map(|f| f.file_id.clone())
            .collect())
    }

    async fn is_backlog_drained(&self, file_id: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(!state.lines.values().any(|l| {
            l.file_id == file_id
                && matches!(l.status, LineStatus::Pending | LineStatus::Processing)
        }))
    }

    async fn mark_file_completed(&self, file_id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let file = state
            .files
            .get_mut(file_id)
            .ok_or_else(|| PipelineError::NotFound(format!("file {}", file_id)))?;
        if file.completed {
            return Ok(false);
        }
        file.completed = true;
        file.completed_at = Some(DateTime::now());
        Ok(true)
    }

    async fn try_start_rebuild(&self, job: &RebuildJobDoc) -> Result<bool> {
        let mut state = self.state.write().await;
        let already_running = state
            .jobs
            .iter()
            .any(|j| j.status == JobStatus::Running && j.period_key == job.period_key);
        if already_running {
            return Ok(false);
        }
        state.jobs.push(job.clone());
        Ok(true)
    }

    async fn finish_rebuild(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.job_id == job_id)
            .ok_or_else(|| PipelineError::NotFound(format!("job {}", job_id)))?;
        job.status = status;
        job.finished_at = Some(DateTime::now());
        job.error = error;
        Ok(())
    }

    async fn scan_period(&self, period: &PeriodKey) -> Result<PeriodTotals> {
        if self.fail_next_scan.swap(false, Ordering::SeqCst) {
            return Err(PipelineError::Database("injected scan failure".into()));
        }

        let state = self.state.read().await;
        let mut totals = PeriodTotals::default();

        for persisted in state.records.values() {
            let record = &persisted.record;
            if !Self::in_period(record, period) {
                continue;
            }
            totals.total_records += 1;
            *totals.counts_by_tag.entry(record.tag.clone()).or_insert(0) += 1;
            match record.role {
                RecordRole::Header => {
                    totals.header_amount_minor += record.amount_minor.unwrap_or(0);
                }
                RecordRole::Child => {
                    totals.transaction_amount_minor += record.amount_minor.unwrap_or(0);
                }
                _ => {}
            }
        }

        Ok(totals)
    }

    async fn replace_cache_entry(&self, entry: CacheEntryDoc) -> Result<()> {
        let mut state = self.state.write().await;
        state.cache.insert(entry.period_key.clone(), entry);
        Ok(())
    }

    async fn load_cache_entry(&self, period: &PeriodKey) -> Result<Option<CacheEntryDoc>> {
        let state = self.state.read().await;
        Ok(state.cache.get(&period.to_string()).cloned())
    }

    async fn known_periods(&self) -> Result<Vec<PeriodKey>> {
        let state = self.state.read().await;
        let mut periods: Vec<PeriodKey> = state
            .files
            .keys()
            .map(|id| PeriodKey::File(id.clone()))
            .collect();

        let mut months: Vec<PeriodKey> = state
            .records
            .values()
            .filter_map(|p| p.record.record_date)
            .map(PeriodKey::month_of)
            .collect();
        months.sort();
        months.dedup();
        periods.extend(months);

        Ok(periods)
    }

    async fn status_summary(&self) -> Result<StatusSummary> {
        let state = self.state.read().await;
        let mut summary = StatusSummary::default();

        for file in state.files.values() {
            let mut file_status = FileStatus {
                file_id: file.file_id.clone(),
                completed: file.completed,
                ..Default::default()
            };
            for line in state.lines.values().filter(|l| l.file_id == file.file_id) {
                match line.status {
                    LineStatus::Pending => file_status.pending += 1,
                    LineStatus::Processing => file_status.processing += 1,
                    LineStatus::Processed => file_status.processed += 1,
                    LineStatus::Skipped => file_status.skipped += 1,
                    LineStatus::Error => file_status.errors += 1,
                }
            }
            summary.pending += file_status.pending;
            summary.processing += file_status.processing;
            summary.processed += file_status.processed;
            summary.skipped += file_status.skipped;
            summary.errors += file_status.errors;
            summary.files.push(file_status);
        }

        Ok(summary)
    }
}
