//! TDDF fixed-width record decoding
//!
//! A TDDF settlement file is a stream of fixed-width lines. Every line carries
//! a 2-character record-type tag at a fixed offset; the tag selects an
//! immutable position table describing where each field lives and how to
//! decode it. Decoded records are then assembled into batch hierarchies
//! (batch header -> transactions -> extensions) in original line order.

pub mod decode;
pub mod extract;
pub mod hierarchy;
pub mod layout;

pub use decode::{decode, Decoded, DecodedRecord, SkipReason, SkipSignal};
pub use extract::{extract, Extraction, FieldDiagnostic, FieldValue};
pub use hierarchy::{
    build_groups, BatchGroup, HierarchyBuilder, HierarchyCursor, LinkDiagnostic, Placement,
};
pub use layout::{layout_for, FieldKind, FieldSpec, RecordLayout, RecordRole, TAG_LEN, TAG_OFFSET};
