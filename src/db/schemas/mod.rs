//! Database schemas for the TDDF pipeline
//!
//! One document type per table: raw lines, source files, decoded records by
//! category, cache entries and rebuild jobs.

mod cache_entry;
mod metadata;
mod raw_line;
mod rebuild_job;
mod records;
mod source_file;

pub use cache_entry::{CacheEntryDoc, CacheStatus, RebuildTrigger, CACHE_ENTRY_COLLECTION};
pub use metadata::Metadata;
pub use raw_line::{LineStatus, RawLineDoc, RAW_LINE_COLLECTION};
pub use rebuild_job::{JobStatus, RebuildJobDoc, REBUILD_JOB_COLLECTION};
pub use records::{
    ExtensionRecordDoc, HeaderRecordDoc, OtherRecordDoc, TransactionRecordDoc,
    EXTENSION_RECORD_COLLECTION, HEADER_RECORD_COLLECTION, OTHER_RECORD_COLLECTION,
    TRANSACTION_RECORD_COLLECTION,
};
pub use source_file::{SourceFileDoc, SOURCE_FILE_COLLECTION};
