//! Batch hierarchy reconstruction
//!
//! Records arrive in file order and play one of three structural roles:
//! a HEADER opens a batch group, a CHILD attaches to the open group, an
//! EXTENSION attaches to the most recent child. Orphans (a child with no
//! open header, an extension with no preceding child) are flagged but never
//! dropped.
//!
//! The builder's state is a small cursor (open header line, last child line)
//! that is persisted per file, so linking survives batch boundaries and
//! worker restarts: any worker can restore the cursor and continue exactly
//! where the previous batch left off.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tddf::decode::DecodedRecord;
use crate::tddf::layout::RecordRole;

/// Carried linking state for one source file
///
/// Line numbers refer to lines of the same file. `open_header == None` with
/// `last_child == Some(..)` means an implicit headerless group is open
/// (started by an orphan child).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HierarchyCursor {
    /// Line number of the batch header currently open, if any
    pub open_header: Option<u32>,
    /// Line number of the most recently appended child, if any
    pub last_child: Option<u32>,
}

/// Structural anomaly observed while linking
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LinkDiagnostic {
    /// Child with no open batch header
    OrphanChild,
    /// Extension with no preceding child in the open group
    OrphanExtension,
}

impl fmt::Display for LinkDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkDiagnostic::OrphanChild => write!(f, "orphan-child"),
            LinkDiagnostic::OrphanExtension => write!(f, "orphan-extension"),
        }
    }
}

/// Where one record landed in the hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub role: RecordRole,
    /// Line number of the parent batch header, if any
    pub header_line: Option<u32>,
    /// Line number of the parent transaction (extensions only)
    pub child_line: Option<u32>,
    pub diagnostic: Option<LinkDiagnostic>,
}

/// Incremental linker over the per-file cursor
#[derive(Debug, Clone, Default)]
pub struct HierarchyBuilder {
    cursor: HierarchyCursor,
}

impl HierarchyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a builder from a persisted cursor
    pub fn with_cursor(cursor: HierarchyCursor) -> Self {
        Self { cursor }
    }

    /// Current cursor, for persisting between batches
    pub fn cursor(&self) -> HierarchyCursor {
        self.cursor
    }

    /// Link one record, in file order, and return its placement
    ///
    /// Group structure is a pure function of line order, so the cursor
    /// advances regardless of whether the caller later persists the record.
    pub fn link(&mut self, record: &DecodedRecord) -> Placement {
        match record.role {
            RecordRole::Header => {
                self.cursor.open_header = Some(record.line_no);
                self.cursor.last_child = None;
                Placement {
                    role: RecordRole::Header,
                    header_line: None,
                    child_line: None,
                    diagnostic: None,
                }
            }
            RecordRole::Child => {
                let header_line = self.cursor.open_header;
                let diagnostic = if header_line.is_none() {
                    Some(LinkDiagnostic::OrphanChild)
                } else {
                    None
                };
                self.cursor.last_child = Some(record.line_no);
                Placement {
                    role: RecordRole::Child,
                    header_line,
                    child_line: None,
                    diagnostic,
                }
            }
            RecordRole::Extension => {
                let child_line = self.cursor.last_child;
                let diagnostic = if child_line.is_none() {
                    // Buffered against the group itself for manual linking
                    Some(LinkDiagnostic::OrphanExtension)
                } else {
                    None
                };
                Placement {
                    role: RecordRole::Extension,
                    header_line: self.cursor.open_header,
                    child_line,
                    diagnostic,
                }
            }
            // File headers/trailers sit outside the hierarchy and do not
            // disturb the open group
            RecordRole::Other => Placement {
                role: RecordRole::Other,
                header_line: None,
                child_line: None,
                diagnostic: None,
            },
        }
    }
}

/// One reconstructed batch group
///
/// `header == None` marks an implicit headerless group opened by an orphan
/// child. Children and their extensions retain original line order.
#[derive(Debug, Clone, Default)]
pub struct BatchGroup {
    pub header: Option<DecodedRecord>,
    pub children: Vec<(DecodedRecord, Vec<DecodedRecord>)>,
    /// Extensions with no preceding child, buffered against the group
    pub orphan_extensions: Vec<DecodedRecord>,
    pub diagnostics: Vec<(u32, LinkDiagnostic)>,
}

impl BatchGroup {
    /// Line numbers of header, children and extensions in emission order
    pub fn line_order(&self) -> Vec<u32> {
        let mut lines = Vec::new();
        if let Some(header) = &self.header {
            lines.push(header.line_no);
        }
        for (child, extensions) in &self.children {
            lines.push(child.line_no);
            lines.extend(extensions.iter().map(|e| e.line_no));
        }
        lines
    }
}

/// Assemble a full in-order record stream into batch groups
///
/// Convenience over [`HierarchyBuilder::link`] for whole-file views and
/// reconciliation reports. Records with the Other role pass through without
/// affecting grouping.
pub fn build_groups(records: impl IntoIterator<Item = DecodedRecord>) -> Vec<BatchGroup> {
    let mut groups: Vec<BatchGroup> = Vec::new();
    let mut open: Option<BatchGroup> = None;

    for record in records {
        match record.role {
            RecordRole::Header => {
                if let Some(group) = open.take() {
                    groups.push(group);
                }
                open = Some(BatchGroup {
                    header: Some(record),
                    ..Default::default()
                });
            }
            RecordRole::Child => {
                let group = open.get_or_insert_with(BatchGroup::default);
                if group.header.is_none() {
                    group
                        .diagnostics
                        .push((record.line_no, LinkDiagnostic::OrphanChild));
                }
                group.children.push((record, Vec::new()));
            }
            RecordRole::Extension => {
                let group = open.get_or_insert_with(BatchGroup::default);
                match group.children.last_mut() {
                    Some((_, extensions)) => extensions.push(record),
                    None => {
                        group
                            .diagnostics
                            .push((record.line_no, LinkDiagnostic::OrphanExtension));
                        group.orphan_extensions.push(record);
                    }
                }
            }
            RecordRole::Other => {}
        }
    }

    if let Some(group) = open.take() {
        groups.push(group);
    }

    groups
}
