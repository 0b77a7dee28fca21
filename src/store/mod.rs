//! Durable store abstraction
//!
//! The pipeline coordinates exclusively through a key-indexed durable store:
//! atomic conditional updates (claim if pending), insert-if-absent (rebuild
//! mutex) and upserts by composite key (idempotent record persistence). This
//! trait captures those primitives so the engine stays independent of the
//! storage backend; `MongoStore` is the production implementation and
//! `MemoryStore` backs the tests.

pub mod memory;
pub mod mongo_store;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::aggregate::period::PeriodKey;
use crate::db::schemas::{CacheEntryDoc, JobStatus, RawLineDoc, RebuildJobDoc, SourceFileDoc};
use crate::tddf::{DecodedRecord, HierarchyCursor, Placement};
use crate::types::Result;

pub use memory::MemoryStore;
pub use mongo_store::MongoStore;

/// Aggregate totals for one period
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct PeriodTotals {
    pub total_records: u64,
    pub counts_by_tag: BTreeMap<String, u64>,
    /// Summed batch-header declared deposits, minor units
    pub header_amount_minor: i64,
    /// Summed transaction amounts, minor units
    pub transaction_amount_minor: i64,
}

/// Per-file backlog counts for the status summary
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct FileStatus {
    pub file_id: String,
    pub completed: bool,
    pub pending: u64,
    pub processing: u64,
    pub processed: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// Queue status consumed by the dashboard boundary
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct StatusSummary {
    pub pending: u64,
    pub processing: u64,
    pub processed: u64,
    pub skipped: u64,
    pub errors: u64,
    pub files: Vec<FileStatus>,
}

/// Durable-store primitives required by the pipeline
#[async_trait]
pub trait PipelineStore: Send + Sync {
    // --- ingestion ---

    /// File id of an already-ingested file with this content checksum
    async fn find_file_by_checksum(&self, checksum: &str) -> Result<Option<String>>;

    async fn insert_source_file(&self, file: SourceFileDoc) -> Result<()>;

    async fn insert_raw_lines(&self, lines: Vec<RawLineDoc>) -> Result<()>;

    // --- backlog claims ---

    /// Atomically lease an uncompleted file for exclusive line claiming,
    /// optionally restricted to one file and skipping the given file ids.
    /// A file is leasable when it has no lease, its lease is older than
    /// `stale_after`, or this owner already holds it. Returns the leased
    /// file id, or `None` when nothing in scope is leasable.
    ///
    /// The lease is what makes the per-file hierarchy cursor safe: only the
    /// lease holder claims the file's lines, so the cursor has exactly one
    /// writer while hierarchy state is carried.
    async fn lease_file(
        &self,
        scope: Option<&str>,
        owner: &str,
        stale_after: chrono::Duration,
        skip: &[String],
    ) -> Result<Option<String>>;

    /// Release a file lease, if this owner still holds it
    async fn release_lease(&self, file_id: &str, owner: &str) -> Result<()>;

    /// Atomically claim the lowest (file_id, line_no) pending line,
    /// optionally scoped to one file. Returns the claimed line or `None`
    /// when the backlog (in scope) is empty — losing a claim race is a
    /// normal outcome, not an error. Callers processing hierarchy records
    /// must hold the file's lease before claiming its lines.
    async fn claim_next_pending(
        &self,
        scope: Option<&str>,
        owner: &str,
    ) -> Result<Option<RawLineDoc>>;

    async fn mark_processed(&self, file_id: &str, line_no: u32) -> Result<()>;

    async fn mark_skipped(&self, file_id: &str, line_no: u32, reason: &str) -> Result<()>;

    async fn mark_error(&self, file_id: &str, line_no: u32, message: &str) -> Result<()>;

    async fn pending_count(&self, scope: Option<&str>) -> Result<u64>;

    // --- hierarchy cursor ---

    async fn load_cursor(&self, file_id: &str) -> Result<HierarchyCursor>;

    async fn save_cursor(&self, file_id: &str, cursor: HierarchyCursor) -> Result<()>;

    // --- record persistence ---

    /// Upsert a decoded record into its category table, keyed by
    /// (file_id, line_no). Reprocessing the same line overwrites.
    async fn upsert_record(&self, record: &DecodedRecord, placement: &Placement) -> Result<()>;

    // --- recovery ---

    /// Revert stale Processing claims to Pending and clear file leases
    /// older than the window; returns the reclaimed line count
    async fn reclaim_stale(&self, stale_after: chrono::Duration) -> Result<u64>;

    /// Files whose completion marker is unset
    async fn unfinished_files(&self) -> Result<Vec<String>>;

    /// True when no line of the file is pending or processing
    async fn is_backlog_drained(&self, file_id: &str) -> Result<bool>;

    /// Set the completion marker; returns true only for the transition
    async fn mark_file_completed(&self, file_id: &str) -> Result<bool>;

    // --- aggregation ---

    /// Atomic insert-if-absent of a running rebuild job; false = a job for
    /// this period is already running
    async fn try_start_rebuild(&self, job: &RebuildJobDoc) -> Result<bool>;

    async fn finish_rebuild(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<()>;

    /// Scan all persisted records in scope and compute totals
    async fn scan_period(&self, period: &PeriodKey) -> Result<PeriodTotals>;

    /// Replace (upsert) the cache entry for its period key
    async fn replace_cache_entry(&self, entry: CacheEntryDoc) -> Result<()>;

    async fn load_cache_entry(&self, period: &PeriodKey) -> Result<Option<CacheEntryDoc>>;

    /// Every period with data: one per ingested file plus one per calendar
    /// month observed on persisted records
    async fn known_periods(&self) -> Result<Vec<PeriodKey>>;

    // --- status ---

    async fn status_summary(&self) -> Result<StatusSummary>;
}
