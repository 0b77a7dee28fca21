//! Decoded record document schemas
//!
//! One collection per record category. Every document is keyed by
//! (file_id, line_no) and written with an upsert, so reprocessing the same
//! line after a stale-claim reclaim overwrites rather than duplicates.
//! Parent references are (same-file) line numbers, which stay valid even
//! when a parent line is persisted later than its children.

use bson::{doc, oid::ObjectId, Document};
use chrono::NaiveDate;
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::tddf::extract::{FieldDiagnostic, FieldValue};
use crate::tddf::DecodedRecord;

/// Collection name for batch header records
pub const HEADER_RECORD_COLLECTION: &str = "header_records";
/// Collection name for detail transaction records
pub const TRANSACTION_RECORD_COLLECTION: &str = "transaction_records";
/// Collection name for transaction extension records
pub const EXTENSION_RECORD_COLLECTION: &str = "extension_records";
/// Collection name for records outside the hierarchy (file header/trailer)
pub const OTHER_RECORD_COLLECTION: &str = "other_records";

fn record_indices() -> Vec<(Document, Option<IndexOptions>)> {
    vec![
        // Idempotent upsert key
        (
            doc! { "file_id": 1, "line_no": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("file_line_unique".to_string())
                    .build(),
            ),
        ),
        // Period scans by record date (ISO string, range-queryable)
        (
            doc! { "record_date": 1 },
            Some(
                IndexOptions::builder()
                    .name("record_date_index".to_string())
                    .sparse(true)
                    .build(),
            ),
        ),
    ]
}

/// Batch header record
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct HeaderRecordDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub file_id: String,
    pub line_no: u32,
    pub tag: String,
    pub fields: BTreeMap<String, FieldValue>,
    /// Declared net deposit in minor units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_minor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<FieldDiagnostic>,
}

impl HeaderRecordDoc {
    pub fn from_record(record: &DecodedRecord) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            file_id: record.file_id.clone(),
            line_no: record.line_no,
            tag: record.tag.clone(),
            fields: record.fields.clone(),
            amount_minor: record.amount_minor,
            record_date: record.record_date,
            diagnostics: record.diagnostics.clone(),
        }
    }
}

impl IntoIndexes for HeaderRecordDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        record_indices()
    }
}

impl MutMetadata for HeaderRecordDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/// Detail transaction record with its batch-header back-reference
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TransactionRecordDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub file_id: String,
    pub line_no: u32,
    pub tag: String,
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_minor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<FieldDiagnostic>,

    /// Line number of the owning batch header within the same file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_line: Option<u32>,
    /// True when no batch header was open at link time
    #[serde(default)]
    pub orphan: bool,
}

impl TransactionRecordDoc {
    pub fn from_record(record: &DecodedRecord, header_line: Option<u32>, orphan: bool) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            file_id: record.file_id.clone(),
            line_no: record.line_no,
            tag: record.tag.clone(),
            fields: record.fields.clone(),
            amount_minor: record.amount_minor,
            record_date: record.record_date,
            diagnostics: record.diagnostics.clone(),
            header_line,
            orphan,
        }
    }
}

impl IntoIndexes for TransactionRecordDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        let mut indices = record_indices();
        indices.push((
            doc! { "file_id": 1, "header_line": 1 },
            Some(
                IndexOptions::builder()
                    .name("header_ref_index".to_string())
                    .build(),
            ),
        ));
        indices
    }
}

impl MutMetadata for TransactionRecordDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/// Extension record with its transaction back-reference
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ExtensionRecordDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub file_id: String,
    pub line_no: u32,
    pub tag: String,
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_minor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<FieldDiagnostic>,

    /// Line number of the owning transaction within the same file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_line: Option<u32>,
    /// Group the orphan extension is buffered against, when no child existed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_line: Option<u32>,
    /// True when no transaction preceded this extension in the group
    #[serde(default)]
    pub orphan: bool,
}

impl ExtensionRecordDoc {
    pub fn from_record(
        record: &DecodedRecord,
        transaction_line: Option<u32>,
        header_line: Option<u32>,
        orphan: bool,
    ) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            file_id: record.file_id.clone(),
            line_no: record.line_no,
            tag: record.tag.clone(),
            fields: record.fields.clone(),
            amount_minor: record.amount_minor,
            record_date: record.record_date,
            diagnostics: record.diagnostics.clone(),
            transaction_line,
            header_line,
            orphan,
        }
    }
}

impl IntoIndexes for ExtensionRecordDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        let mut indices = record_indices();
        indices.push((
            doc! { "file_id": 1, "transaction_line": 1 },
            Some(
                IndexOptions::builder()
                    .name("transaction_ref_index".to_string())
                    .build(),
            ),
        ));
        indices
    }
}

impl MutMetadata for ExtensionRecordDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/// Record outside the hierarchy (file header, file trailer)
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct OtherRecordDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub file_id: String,
    pub line_no: u32,
    pub tag: String,
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_minor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<FieldDiagnostic>,
}

impl OtherRecordDoc {
    pub fn from_record(record: &DecodedRecord) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            file_id: record.file_id.clone(),
            line_no: record.line_no,
            tag: record.tag.clone(),
            fields: record.fields.clone(),
            amount_minor: record.amount_minor,
            record_date: record.record_date,
            diagnostics: record.diagnostics.clone(),
        }
    }
}

impl IntoIndexes for OtherRecordDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        record_indices()
    }
}

impl MutMetadata for OtherRecordDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
