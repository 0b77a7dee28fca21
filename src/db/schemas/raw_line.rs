//! Raw line document schema
//!
//! One document per physical line of an ingested file. Lines are never
//! deleted: even after successful processing they remain as the audit trail
//! for reconciliation.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for raw lines
pub const RAW_LINE_COLLECTION: &str = "raw_lines";

/// Processing status of one raw line
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LineStatus {
    /// Waiting to be claimed by a backlog worker
    #[default]
    Pending,
    /// Claimed by a worker, decode/persist in flight
    Processing,
    /// Decoded and persisted
    Processed,
    /// Skipped (unknown type, short line)
    Skipped,
    /// Decode or persist failed; failure reason recorded
    Error,
}

/// Raw line document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct RawLineDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Source file identifier
    pub file_id: String,

    /// 1-based line number within the file; (file_id, line_no) is unique
    pub line_no: u32,

    /// Literal line text as received
    pub text: String,

    /// Detected 2-character record-type tag
    pub tag: String,

    /// Current processing status
    #[serde(default)]
    pub status: LineStatus,

    /// When the current claim was taken
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime>,

    /// Worker identity holding the current claim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,

    /// When the line reached a terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime>,

    /// Skip reason or error message for non-processed terminal states
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,

    /// Audit note appended by the recovery controller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_note: Option<String>,
}

impl RawLineDoc {
    /// Create a pending raw line for ingestion
    pub fn new(file_id: String, line_no: u32, text: String, tag: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            file_id,
            line_no,
            text,
            tag,
            status: LineStatus::Pending,
            claimed_at: None,
            claimed_by: None,
            finished_at: None,
            failure: None,
            audit_note: None,
        }
    }
}

impl IntoIndexes for RawLineDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on (file_id, line_no): idempotent persistence key
            (
                doc! { "file_id": 1, "line_no": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("file_line_unique".to_string())
                        .build(),
                ),
            ),
            // Index on status for backlog claims
            (
                doc! { "status": 1, "file_id": 1, "line_no": 1 },
                Some(
                    IndexOptions::builder()
                        .name("status_claim_index".to_string())
                        .build(),
                ),
            ),
            // Index on claimed_at for stale-claim scans
            (
                doc! { "claimed_at": 1 },
                Some(
                    IndexOptions::builder()
                        .name("claimed_at_index".to_string())
                        .sparse(true)
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for RawLineDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
