//! Ingestion boundary
//!
//! Splits a received file into raw line documents and registers the source
//! file. The content checksum makes ingestion idempotent: re-submitting the
//! same file body is detected and reported instead of duplicating the
//! backlog.

use sha2::{Digest, Sha256};
use tracing::info;

use crate::db::schemas::{RawLineDoc, SourceFileDoc};
use crate::store::PipelineStore;
use crate::tddf::decode::detect_tag;
use crate::types::{PipelineError, Result};

/// Outcome of one ingestion attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// File registered and its lines queued as pending
    Ingested { file_id: String, line_count: u32 },
    /// Identical content was ingested before, under the returned file id
    AlreadyIngested { file_id: String },
}

/// Hex-encoded SHA-256 of the file body
pub fn checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Ingest one file body under the given id
///
/// Every physical line becomes a pending raw line, including lines that will
/// later be skipped; skip decisions belong to the processor, not the
/// ingestion boundary.
pub async fn ingest_file(
    store: &dyn PipelineStore,
    file_id: &str,
    name: &str,
    content: &str,
) -> Result<IngestOutcome> {
    if file_id.is_empty() {
        return Err(PipelineError::Config("file id must not be empty".into()));
    }

    let checksum = checksum(content);
    if let Some(existing) = store.find_file_by_checksum(&checksum).await? {
        info!("File '{}' already ingested as {}", name, existing);
        return Ok(IngestOutcome::AlreadyIngested { file_id: existing });
    }

    let lines: Vec<RawLineDoc> = content
        .lines()
        .enumerate()
        .map(|(idx, text)| {
            RawLineDoc::new(
                file_id.to_string(),
                idx as u32 + 1,
                text.to_string(),
                detect_tag(text),
            )
        })
        .collect();
    let line_count = lines.len() as u32;

    store
        .insert_source_file(SourceFileDoc::new(
            file_id.to_string(),
            name.to_string(),
            line_count,
            checksum,
        ))
        .await?;
    store.insert_raw_lines(lines).await?;

    info!(
        "Ingested '{}' as {} ({} lines pending)",
        name, file_id, line_count
    );
    Ok(IngestOutcome::Ingested {
        file_id: file_id.to_string(),
        line_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::LineStatus;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn ingests_lines_as_pending_with_detected_tags() {
        let store = MemoryStore::new();
        let body = "FH01152026FIRSTDATA           000001\nXXmystery\n";

        let outcome = ingest_file(&store, "f1", "jan.tddf", body).await.unwrap();
        assert_eq!(
            outcome,
            IngestOutcome::Ingested {
                file_id: "f1".to_string(),
                line_count: 2,
            }
        );

        let first = store.line("f1", 1).await.unwrap();
        assert_eq!(first.tag, "FH");
        assert_eq!(first.status, LineStatus::Pending);
        let second = store.line("f1", 2).await.unwrap();
        assert_eq!(second.tag, "XX");
    }

    #[tokio::test]
    async fn duplicate_content_is_reported_not_requeued() {
        let store = MemoryStore::new();
        let body = "FH01152026FIRSTDATA           000001\n";

        ingest_file(&store, "f1", "jan.tddf", body).await.unwrap();
        let outcome = ingest_file(&store, "f2", "jan-copy.tddf", body)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            IngestOutcome::AlreadyIngested {
                file_id: "f1".to_string()
            }
        );
        assert!(store.source_file("f2").await.is_none());
    }

    #[tokio::test]
    async fn rejects_empty_file_id() {
        let store = MemoryStore::new();
        assert!(ingest_file(&store, "", "x.tddf", "FT").await.is_err());
    }
}
