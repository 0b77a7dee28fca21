//! Cache entry document schema
//!
//! Pre-computed aggregates per period key, consumed read-only by the
//! reporting layer. A rebuild fully replaces the entry or leaves the
//! previous one intact; a partially built entry is never visible.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for cache entries
pub const CACHE_ENTRY_COLLECTION: &str = "cache_entries";

/// What started a rebuild
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RebuildTrigger {
    #[default]
    Manual,
    Scheduled,
    /// Fired by the backlog processor when a file's backlog drains
    BacklogCompletion,
}

/// Cache entry health
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    #[default]
    Active,
    /// Placeholder written when a rebuild failed and no prior entry existed
    Error,
}

/// Cache entry document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CacheEntryDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Aggregation scope, e.g. "file:20260115-001" or "month:2026-01"
    pub period_key: String,

    /// Total persisted records in scope
    pub total_records: u64,

    /// Record counts by 2-character type tag
    pub counts_by_tag: BTreeMap<String, u64>,

    /// Summed batch-header declared deposits, minor units
    pub header_amount_minor: i64,

    /// Summed transaction amounts, minor units; reconciled against
    /// header_amount_minor by downstream business checks
    pub transaction_amount_minor: i64,

    /// How long the rebuild took
    pub build_ms: i64,

    /// When the entry was built
    #[serde(skip_serializing_if = "Option::is_none")]
    pub built_at: Option<DateTime>,

    /// What started the rebuild
    #[serde(default)]
    pub trigger: RebuildTrigger,

    /// Entry health
    #[serde(default)]
    pub status: CacheStatus,
}

impl IntoIndexes for CacheEntryDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "period_key": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("period_key_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for CacheEntryDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
