//! Static position tables for TDDF record types
//!
//! One immutable layout per record-type tag. Adding a new record type means
//! adding a layout here; the extractor and decoder never change.

use serde::{Deserialize, Serialize};

/// Byte offset of the record-type tag within every line
pub const TAG_OFFSET: usize = 0;

/// Length of the record-type tag
pub const TAG_LEN: usize = 2;

/// How a field's bytes are decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Raw text, trailing whitespace trimmed
    Text,
    /// Unsigned integer; non-digit characters are stripped before parsing
    Uint,
    /// Signed fixed-point currency stored as an unscaled integer string
    /// with `decimals` implied decimal digits
    Money { decimals: u8 },
    /// Packed calendar date in MMDDCCYY form
    PackedDate,
}

/// Structural role a record type plays in the batch hierarchy
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordRole {
    /// Opens a batch group
    Header,
    /// Transaction attached to the open batch
    Child,
    /// Detail attached to the most recent transaction
    Extension,
    /// Known record type outside the hierarchy (file header/trailer)
    #[default]
    Other,
}

/// Position of one field within a fixed-width line
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    /// 0-based byte offset
    pub offset: usize,
    pub len: usize,
    pub kind: FieldKind,
}

impl FieldSpec {
    /// Byte position one past the field's last byte
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Immutable position table for one record type
#[derive(Debug, Clone, Copy)]
pub struct RecordLayout {
    pub tag: &'static str,
    pub role: RecordRole,
    /// Minimum line length covering all mandatory fields. Fields that start
    /// at or beyond this cutoff are optional; a shorter line decodes them
    /// as null instead of failing.
    pub required_len: usize,
    pub fields: &'static [FieldSpec],
    /// Field supplying the record's canonical amount, if any
    pub amount_field: Option<&'static str>,
    /// Field supplying the record's calendar date, if any
    pub date_field: Option<&'static str>,
}

impl RecordLayout {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// FH - file header
const FILE_HEADER: RecordLayout = RecordLayout {
    tag: "FH",
    role: RecordRole::Other,
    required_len: 10,
    fields: &[
        FieldSpec { name: "file_date", offset: 2, len: 8, kind: FieldKind::PackedDate },
        FieldSpec { name: "processor_name", offset: 10, len: 20, kind: FieldKind::Text },
        FieldSpec { name: "file_sequence", offset: 30, len: 6, kind: FieldKind::Uint },
    ],
    amount_field: None,
    date_field: Some("file_date"),
};

/// BH - batch header (opens a deposit batch)
const BATCH_HEADER: RecordLayout = RecordLayout {
    tag: "BH",
    role: RecordRole::Header,
    required_len: 43,
    fields: &[
        FieldSpec { name: "merchant_number", offset: 2, len: 16, kind: FieldKind::Text },
        FieldSpec { name: "batch_date", offset: 18, len: 8, kind: FieldKind::PackedDate },
        FieldSpec { name: "batch_number", offset: 26, len: 6, kind: FieldKind::Uint },
        FieldSpec { name: "net_deposit", offset: 32, len: 11, kind: FieldKind::Money { decimals: 2 } },
        FieldSpec { name: "currency_code", offset: 43, len: 3, kind: FieldKind::Text },
    ],
    amount_field: Some("net_deposit"),
    date_field: Some("batch_date"),
};

/// DT - detail transaction
const DETAIL_TRANSACTION: RecordLayout = RecordLayout {
    tag: "DT",
    role: RecordRole::Child,
    required_len: 53,
    fields: &[
        FieldSpec { name: "merchant_number", offset: 2, len: 16, kind: FieldKind::Text },
        FieldSpec { name: "card_number", offset: 18, len: 16, kind: FieldKind::Text },
        FieldSpec { name: "transaction_date", offset: 34, len: 8, kind: FieldKind::PackedDate },
        FieldSpec { name: "transaction_amount", offset: 42, len: 11, kind: FieldKind::Money { decimals: 2 } },
        FieldSpec { name: "auth_code", offset: 53, len: 6, kind: FieldKind::Text },
        FieldSpec { name: "reference_number", offset: 59, len: 23, kind: FieldKind::Text },
    ],
    amount_field: Some("transaction_amount"),
    date_field: Some("transaction_date"),
};

/// E1 - transaction extension (supplemental detail for the preceding DT)
const TRANSACTION_EXTENSION: RecordLayout = RecordLayout {
    tag: "E1",
    role: RecordRole::Extension,
    required_len: 27,
    fields: &[
        FieldSpec { name: "reference_number", offset: 2, len: 23, kind: FieldKind::Text },
        FieldSpec { name: "extension_type", offset: 25, len: 2, kind: FieldKind::Text },
        FieldSpec { name: "extension_data", offset: 27, len: 50, kind: FieldKind::Text },
    ],
    amount_field: None,
    date_field: None,
};

/// FT - file trailer
const FILE_TRAILER: RecordLayout = RecordLayout {
    tag: "FT",
    role: RecordRole::Other,
    required_len: 26,
    fields: &[
        FieldSpec { name: "record_count", offset: 2, len: 9, kind: FieldKind::Uint },
        FieldSpec { name: "file_total", offset: 11, len: 15, kind: FieldKind::Money { decimals: 2 } },
    ],
    amount_field: Some("file_total"),
    date_field: None,
};

const LAYOUTS: &[RecordLayout] = &[
    FILE_HEADER,
    BATCH_HEADER,
    DETAIL_TRANSACTION,
    TRANSACTION_EXTENSION,
    FILE_TRAILER,
];

/// Look up the layout for a record-type tag
pub fn layout_for(tag: &str) -> Option<&'static RecordLayout> {
    LAYOUTS.iter().find(|l| l.tag == tag)
}

/// All registered layouts
pub fn all_layouts() -> &'static [RecordLayout] {
    LAYOUTS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tags_resolve() {
        assert_eq!(layout_for("BH").unwrap().role, RecordRole::Header);
        assert_eq!(layout_for("DT").unwrap().role, RecordRole::Child);
        assert_eq!(layout_for("E1").unwrap().role, RecordRole::Extension);
        assert_eq!(layout_for("FH").unwrap().role, RecordRole::Other);
        assert!(layout_for("ZZ").is_none());
    }

    #[test]
    fn required_len_covers_all_mandatory_fields() {
        for layout in all_layouts() {
            for field in layout.fields {
                if field.offset < layout.required_len {
                    assert!(
                        field.end() <= layout.required_len,
                        "mandatory field {} of {} crosses the optional cutoff",
                        field.name,
                        layout.tag
                    );
                }
            }
        }
    }

    #[test]
    fn fields_do_not_overlap() {
        for layout in all_layouts() {
            let mut prev_end = TAG_OFFSET + TAG_LEN;
            for field in layout.fields {
                assert!(
                    field.offset >= prev_end,
                    "field {} of {} overlaps its predecessor",
                    field.name,
                    layout.tag
                );
                prev_end = field.end();
            }
        }
    }
}
