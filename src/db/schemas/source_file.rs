//! Source file document schema
//!
//! Tracks one ingested TDDF file: line count, content checksum for
//! duplicate-ingest detection, the per-file hierarchy cursor carried across
//! batches, the worker lease guarding that cursor, and the file-level
//! completion marker.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::tddf::hierarchy::HierarchyCursor;

/// Collection name for source files
pub const SOURCE_FILE_COLLECTION: &str = "source_files";

/// Source file document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SourceFileDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Unique file identifier assigned at the ingestion boundary
    pub file_id: String,

    /// Original file name
    pub name: String,

    /// Number of raw lines ingested
    pub line_count: u32,

    /// SHA-256 of the file content, hex encoded
    pub checksum: String,

    /// Hierarchy linking state carried across batch boundaries
    #[serde(default)]
    pub cursor: HierarchyCursor,

    /// Worker currently holding the file lease; only the lease holder may
    /// claim this file's lines, so the cursor has one writer at a time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_owner: Option<String>,

    /// When the lease was taken; leases older than the staleness window are
    /// up for grabs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leased_at: Option<DateTime>,

    /// Set once every line has reached a terminal status
    #[serde(default)]
    pub completed: bool,

    /// When the completion marker was set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime>,
}

impl SourceFileDoc {
    /// Create a new source file document
    pub fn new(file_id: String, name: String, line_count: u32, checksum: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            file_id,
            name,
            line_count,
            checksum,
            cursor: HierarchyCursor::default(),
            lease_owner: None,
            leased_at: None,
            completed: false,
            completed_at: None,
        }
    }
}

impl IntoIndexes for SourceFileDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on file_id
            (
                doc! { "file_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("file_id_unique".to_string())
                        .build(),
                ),
            ),
            // Unique index on checksum for duplicate-ingest detection
            (
                doc! { "checksum": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("checksum_unique".to_string())
                        .build(),
                ),
            ),
            // Index on completed for the recovery controller's sweep
            (
                doc! { "completed": 1 },
                Some(
                    IndexOptions::builder()
                        .name("completed_index".to_string())
                        .build(),
                ),
            ),
            // Index on leased_at for stale-lease scans
            (
                doc! { "leased_at": 1 },
                Some(
                    IndexOptions::builder()
                        .name("leased_at_index".to_string())
                        .sparse(true)
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for SourceFileDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
