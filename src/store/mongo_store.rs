//! MongoDB-backed pipeline store
//!
//! All coordination runs on atomic document operations: claims are single
//! conditional updates, the rebuild mutex is an insert against a partial
//! unique index, and record persistence is an upsert keyed by
//! (file_id, line_no). Nothing here takes an application-level lock.

use async_trait::async_trait;
use bson::{doc, Bson, DateTime, Document};
use chrono::{NaiveDate, Utc};
use tracing::debug;

use crate::aggregate::period::PeriodKey;
use crate::db::mongo::{is_duplicate_key, MongoClient, MongoCollection};
use crate::db::schemas::{
    CacheEntryDoc, ExtensionRecordDoc, HeaderRecordDoc, JobStatus, OtherRecordDoc, RawLineDoc,
    RebuildJobDoc, SourceFileDoc, TransactionRecordDoc, CACHE_ENTRY_COLLECTION,
    EXTENSION_RECORD_COLLECTION, HEADER_RECORD_COLLECTION, OTHER_RECORD_COLLECTION,
    RAW_LINE_COLLECTION, REBUILD_JOB_COLLECTION, SOURCE_FILE_COLLECTION,
    TRANSACTION_RECORD_COLLECTION,
};
use crate::store::{FileStatus, PeriodTotals, PipelineStore, StatusSummary};
use crate::tddf::{DecodedRecord, HierarchyCursor, Placement, RecordRole};
use crate::types::Result;

/// MongoDB implementation of [`PipelineStore`]
#[derive(Clone)]
pub struct MongoStore {
    files: MongoCollection<SourceFileDoc>,
    lines: MongoCollection<RawLineDoc>,
    headers: MongoCollection<HeaderRecordDoc>,
    transactions: MongoCollection<TransactionRecordDoc>,
    extensions: MongoCollection<ExtensionRecordDoc>,
    others: MongoCollection<OtherRecordDoc>,
    cache: MongoCollection<CacheEntryDoc>,
    jobs: MongoCollection<RebuildJobDoc>,
}

impl MongoStore {
    /// Open all pipeline collections and apply their indexes
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            files: client.collection(SOURCE_FILE_COLLECTION).await?,
            lines: client.collection(RAW_LINE_COLLECTION).await?,
            headers: client.collection(HEADER_RECORD_COLLECTION).await?,
            transactions: client.collection(TRANSACTION_RECORD_COLLECTION).await?,
            extensions: client.collection(EXTENSION_RECORD_COLLECTION).await?,
            others: client.collection(OTHER_RECORD_COLLECTION).await?,
            cache: client.collection(CACHE_ENTRY_COLLECTION).await?,
            jobs: client.collection(REBUILD_JOB_COLLECTION).await?,
        })
    }

    /// Filter selecting the records of one period
    ///
    /// Month scans range over record_date, which is persisted as an ISO
    /// "YYYY-MM-DD" string so lexicographic order is calendar order.
    fn period_filter(period: &PeriodKey) -> Document {
        match period {
            PeriodKey::File(id) => doc! { "file_id": id },
            PeriodKey::Month { .. } => {
                let start = period.month_start().expect("month period").to_string();
                let end = period
                    .month_end_exclusive()
                    .expect("month period")
                    .to_string();
                doc! { "record_date": { "$gte": start, "$lt": end } }
            }
        }
    }

    async fn status_count(&self, file_id: &str, status: &str) -> Result<u64> {
        self.lines
            .count(doc! { "file_id": file_id, "status": status })
            .await
    }

    async fn line_counts(&self, file_id: &str) -> Result<FileStatus> {
        Ok(FileStatus {
            file_id: file_id.to_string(),
            completed: false,
            pending: self.status_count(file_id, "pending").await?,
            processing: self.status_count(file_id, "processing").await?,
            processed: self.status_count(file_id, "processed").await?,
            skipped: self.status_count(file_id, "skipped").await?,
            errors: self.status_count(file_id, "error").await?,
        })
    }
}

#[async_trait]
impl PipelineStore for MongoStore {
    async fn find_file_by_checksum(&self, checksum: &str) -> Result<Option<String>> {
        Ok(self
            .files
            .find_one(doc! { "checksum": checksum })
            .await?
            .map(|f| f.file_id))
    }

    async fn insert_source_file(&self, file: SourceFileDoc) -> Result<()> {
        self.files.insert_one(file).await
    }

    async fn insert_raw_lines(&self, lines: Vec<RawLineDoc>) -> Result<()> {
        self.lines.insert_many(lines).await
    }

    async fn lease_file(
        &self,
        scope: Option<&str>,
        owner: &str,
        stale_after: chrono::Duration,
        skip: &[String],
    ) -> Result<Option<String>> {
        let cutoff = DateTime::from_chrono(Utc::now() - stale_after);
        let mut filter = doc! {
            "completed": false,
            // Free, stale, or already ours
            "$or": [
                { "lease_owner": { "$exists": false } },
                { "lease_owner": owner },
                { "leased_at": { "$lt": cutoff } },
            ],
        };
        if let Some(file_id) = scope {
            filter.insert("file_id", file_id);
        } else if !skip.is_empty() {
            filter.insert("file_id", doc! { "$nin": skip.to_vec() });
        }

        let now = DateTime::now();
        let leased = self
            .files
            .find_one_and_update(
                filter,
                doc! { "$set": {
                    "lease_owner": owner,
                    "leased_at": now,
                    "metadata.updated_at": now,
                }},
                doc! { "file_id": 1 },
            )
            .await?;

        if let Some(file) = &leased {
            debug!("Leased file {} for {}", file.file_id, owner);
        }
        Ok(leased.map(|f| f.file_id))
    }

    async fn release_lease(&self, file_id: &str, owner: &str) -> Result<()> {
        self.files
            .update_one(
                doc! { "file_id": file_id, "lease_owner": owner },
                doc! {
                    "$unset": { "lease_owner": "", "leased_at": "" },
                    "$set": { "metadata.updated_at": DateTime::now() },
                },
            )
            .await?;
        Ok(())
    }

    async fn claim_next_pending(
        &self,
        scope: Option<&str>,
        owner: &str,
    ) -> Result<Option<RawLineDoc>> {
        let mut filter = doc! { "status": "pending" };
        if let Some(file_id) = scope {
            filter.insert("file_id", file_id);
        }

        let now = DateTime::now();
        let claimed = self
            .lines
            .find_one_and_update(
                filter,
                doc! { "$set": {
                    "status": "processing",
                    "claimed_at": now,
                    "claimed_by": owner,
                    "metadata.updated_at": now,
                }},
                doc! { "file_id": 1, "line_no": 1 },
            )
            .await?;

        if let Some(line) = &claimed {
            debug!("Claimed line {}:{} for {}", line.file_id, line.line_no, owner);
        }
        Ok(claimed)
    }

    async fn mark_processed(&self, file_id: &str, line_no: u32) -> Result<()> {
        let now = DateTime::now();
        self.lines
            .update_one(
                doc! { "file_id": file_id, "line_no": line_no as i64 },
                doc! {
                    "$set": {
                        "status": "processed",
                        "finished_at": now,
                        "metadata.updated_at": now,
                    },
                    "$unset": { "failure": "" },
                },
            )
            .await?;
        Ok(())
    }

    async fn mark_skipped(&self, file_id: &str, line_no: u32, reason: &str) -> Result<()> {
        let now = DateTime::now();
        self.lines
            .update_one(
                doc! { "file_id": file_id, "line_no": line_no as i64 },
                doc! { "$set": {
                    "status": "skipped",
                    "finished_at": now,
                    "failure": reason,
                    "metadata.updated_at": now,
                }},
            )
            .await?;
        Ok(())
    }

    async fn mark_error(&self, file_id: &str, line_no: u32, message: &str) -> Result<()> {
        let now = DateTime::now();
        self.lines
            .update_one(
                doc! { "file_id": file_id, "line_no": line_no as i64 },
                doc! { "$set": {
                    "status": "error",
                    "finished_at": now,
                    "failure": message,
                    "metadata.updated_at": now,
                }},
            )
            .await?;
        Ok(())
    }

    async fn pending_count(&self, scope: Option<&str>) -> Result<u64> {
        let mut filter = doc! { "status": "pending" };
        if let Some(file_id) = scope {
            filter.insert("file_id", file_id);
        }
        self.lines.count(filter).await
    }

    async fn load_cursor(&self, file_id: &str) -> Result<HierarchyCursor> {
        Ok(self
            .files
            .find_one(doc! { "file_id": file_id })
            .await?
            .map(|f| f.cursor)
            .unwrap_or_default())
    }

    async fn save_cursor(&self, file_id: &str, cursor: HierarchyCursor) -> Result<()> {
        self.files
            .update_one(
                doc! { "file_id": file_id },
                doc! { "$set": {
                    "cursor": bson::to_bson(&cursor)?,
                    "metadata.updated_at": DateTime::now(),
                }},
            )
            .await?;
        Ok(())
    }

    async fn upsert_record(&self, record: &DecodedRecord, placement: &Placement) -> Result<()> {
        let filter = doc! { "file_id": &record.file_id, "line_no": record.line_no as i64 };
        let orphan = placement.diagnostic.is_some();

        match placement.role {
            RecordRole::Header => {
                let item = HeaderRecordDoc::from_record(record);
                self.headers
                    .upsert_one(filter, doc! { "$set": bson::to_document(&item)? })
                    .await?;
            }
            RecordRole::Child => {
                let item =
                    TransactionRecordDoc::from_record(record, placement.header_line, orphan);
                self.transactions
                    .upsert_one(filter, doc! { "$set": bson::to_document(&item)? })
                    .await?;
            }
            RecordRole::Extension => {
                let item = ExtensionRecordDoc::from_record(
                    record,
                    placement.child_line,
                    placement.header_line,
                    orphan,
                );
                self.extensions
                    .upsert_one(filter, doc! { "$set": bson::to_document(&item)? })
                    .await?;
            }
            RecordRole::Other => {
                let item = OtherRecordDoc::from_record(record);
                self.others
                    .upsert_one(filter, doc! { "$set": bson::to_document(&item)? })
                    .await?;
            }
        }
        Ok(())
    }

    async fn reclaim_stale(&self, stale_after: chrono::Duration) -> Result<u64> {
        let cutoff = DateTime::from_chrono(Utc::now() - stale_after);
        let result = self
            .lines
            .update_many(
                doc! { "status": "processing", "claimed_at": { "$lt": cutoff } },
                doc! {
                    "$set": {
                        "status": "pending",
                        "audit_note": "reclaimed from stale claim",
                        "metadata.updated_at": DateTime::now(),
                    },
                    "$unset": { "claimed_at": "", "claimed_by": "" },
                },
            )
            .await?;

        // Leases from dead workers expire on the same window
        self.files
            .update_many(
                doc! { "leased_at": { "$lt": cutoff } },
                doc! {
                    "$unset": { "lease_owner": "", "leased_at": "" },
                    "$set": { "metadata.updated_at": DateTime::now() },
                },
            )
            .await?;

        Ok(result.modified_count)
    }

    async fn unfinished_files(&self) -> Result<Vec<String>> {
        let files = self
            .files
            .find_many(doc! { "completed": false }, doc! { "file_id": 1 })
            .await?;
        Ok(files.into_iter().map(|f| f.file_id).collect())
    }

    async fn is_backlog_drained(&self, file_id: &str) -> Result<bool> {
        let open = self
            .lines
            .count(doc! {
                "file_id": file_id,
                "status": { "$in": ["pending", "processing"] },
            })
            .await?;
        Ok(open == 0)
    }

    async fn mark_file_completed(&self, file_id: &str) -> Result<bool> {
        let now = DateTime::now();
        let result = self
            .files
            .update_one(
                doc! { "file_id": file_id, "completed": false },
                doc! { "$set": {
                    "completed": true,
                    "completed_at": now,
                    "metadata.updated_at": now,
                }},
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn try_start_rebuild(&self, job: &RebuildJobDoc) -> Result<bool> {
        let mut job = job.clone();
        let now = DateTime::now();
        job.metadata.created_at = Some(now);
        job.metadata.updated_at = Some(now);

        // The partial unique index on (period_key, status = "running") turns
        // this insert into the mutex acquisition.
        match self.jobs.inner().insert_one(job).await {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn finish_rebuild(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<()> {
        let now = DateTime::now();
        let mut set = doc! {
            "status": bson::to_bson(&status)?,
            "finished_at": now,
            "metadata.updated_at": now,
        };
        if let Some(error) = error {
            set.insert("error", error);
        }
        self.jobs
            .update_one(doc! { "job_id": job_id }, doc! { "$set": set })
            .await?;
        Ok(())
    }

    async fn scan_period(&self, period: &PeriodKey) -> Result<PeriodTotals> {
        let filter = Self::period_filter(period);
        let sort = doc! { "file_id": 1, "line_no": 1 };
        let mut totals = PeriodTotals::default();

        for header in self.headers.find_many(filter.clone(), sort.clone()).await? {
            totals.total_records += 1;
            *totals.counts_by_tag.entry(header.tag).or_insert(0) += 1;
            totals.header_amount_minor += header.amount_minor.unwrap_or(0);
        }
        for tx in self
            .transactions
            .find_many(filter.clone(), sort.clone())
            .await?
        {
            totals.total_records += 1;
            *totals.counts_by_tag.entry(tx.tag).or_insert(0) += 1;
            totals.transaction_amount_minor += tx.amount_minor.unwrap_or(0);
        }
        for ext in self
            .extensions
            .find_many(filter.clone(), sort.clone())
            .await?
        {
            totals.total_records += 1;
            *totals.counts_by_tag.entry(ext.tag).or_insert(0) += 1;
        }
        for other in self.others.find_many(filter, sort).await? {
            totals.total_records += 1;
            *totals.counts_by_tag.entry(other.tag).or_insert(0) += 1;
        }

        Ok(totals)
    }

    async fn replace_cache_entry(&self, entry: CacheEntryDoc) -> Result<()> {
        let mut entry = entry;
        let now = DateTime::now();
        if entry.metadata.created_at.is_none() {
            entry.metadata.created_at = Some(now);
        }
        entry.metadata.updated_at = Some(now);

        self.cache
            .upsert_one(
                doc! { "period_key": &entry.period_key },
                doc! { "$set": bson::to_document(&entry)? },
            )
            .await?;
        Ok(())
    }

    async fn load_cache_entry(&self, period: &PeriodKey) -> Result<Option<CacheEntryDoc>> {
        self.cache
            .find_one(doc! { "period_key": period.to_string() })
            .await
    }

    async fn known_periods(&self) -> Result<Vec<PeriodKey>> {
        let mut periods: Vec<PeriodKey> = Vec::new();
        for value in self.files.distinct("file_id", doc! {}).await? {
            if let Bson::String(id) = value {
                periods.push(PeriodKey::File(id));
            }
        }

        let mut months: Vec<PeriodKey> = Vec::new();
        for dates in [
            self.headers.distinct("record_date", doc! {}).await?,
            self.transactions.distinct("record_date", doc! {}).await?,
            self.extensions.distinct("record_date", doc! {}).await?,
            self.others.distinct("record_date", doc! {}).await?,
        ] {
            for value in dates {
                if let Bson::String(s) = value {
                    if let Ok(date) = NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
                        months.push(PeriodKey::month_of(date));
                    }
                }
            }
        }
        months.sort();
        months.dedup();
        periods.extend(months);

        Ok(periods)
    }

    async fn status_summary(&self) -> Result<StatusSummary> {
        let files = self.files.find_many(doc! {}, doc! { "file_id": 1 }).await?;
        let mut summary = StatusSummary::default();

        for file in files {
            let mut file_status = self.line_counts(&file.file_id).await?;
            file_status.completed = file.completed;
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
