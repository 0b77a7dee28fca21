//! Rebuild job document schema
//!
//! One document per aggregation run. The partial unique index on
//! (period_key, status = "running") is the rebuild mutex: starting a rebuild
//! is a single atomic insert, and the loser of a race gets a duplicate-key
//! error instead of a second concurrent rebuild.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::{Metadata, RebuildTrigger};

/// Collection name for rebuild jobs
pub const REBUILD_JOB_COLLECTION: &str = "rebuild_jobs";

/// Rebuild job state
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Running,
    Completed,
    Failed,
}

/// Rebuild job document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct RebuildJobDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Job identifier (UUID)
    pub job_id: String,

    /// Target aggregation period
    pub period_key: String,

    /// Current state
    #[serde(default)]
    pub status: JobStatus,

    /// What started the rebuild
    #[serde(default)]
    pub trigger: RebuildTrigger,

    /// Triggering user or system actor
    pub actor: String,

    /// When the job started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime>,

    /// When the job completed or failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime>,

    /// Error message for failed jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RebuildJobDoc {
    /// Create a new running job
    pub fn new(period_key: String, trigger: RebuildTrigger, actor: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            job_id: Uuid::new_v4().to_string(),
            period_key,
            status: JobStatus::Running,
            trigger,
            actor,
            started_at: Some(DateTime::now()),
            finished_at: None,
            error: None,
        }
    }
}

impl IntoIndexes for RebuildJobDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on job_id
            (
                doc! { "job_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("job_id_unique".to_string())
                        .build(),
                ),
            ),
            // At most one running job per period: the rebuild mutex
            (
                doc! { "period_key": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(doc! { "status": "running" })
                        .name("running_period_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for RebuildJobDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
