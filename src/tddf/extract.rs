//! Field extraction from fixed-width lines
//!
//! Pure byte-position decoding. A field that fails its decode rule yields
//! `FieldValue::Null` plus a diagnostic; the rest of the line still decodes.
//! A single bad field never invalidates the record.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::tddf::layout::{FieldKind, FieldSpec, RecordLayout};

/// Decoded value of one field
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FieldValue {
    Text(String),
    Uint(u64),
    /// Currency amount in minor units (cents)
    Money(i64),
    Date(NaiveDate),
    Null,
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_money(&self) -> Option<i64> {
        match self {
            FieldValue::Money(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }
}

/// Why one field decoded to null
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FieldDiagnostic {
    pub field: String,
    pub reason: String,
}

/// Result of extracting all fields of one line
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub fields: BTreeMap<String, FieldValue>,
    pub diagnostics: Vec<FieldDiagnostic>,
}

/// Extract every field of `layout` from `line`
///
/// Pure function: no side effects, deterministic. Fields past the end of a
/// short line decode to null with a "truncated" diagnostic (the decoder
/// rejects lines short of the mandatory cutoff before calling this).
pub fn extract(line: &str, layout: &RecordLayout) -> Extraction {
    let bytes = line.as_bytes();
    let mut out = Extraction::default();

    for field in layout.fields {
        let (value, diagnostic) = extract_field(bytes, field);
        if let Some(reason) = diagnostic {
            out.diagnostics.push(FieldDiagnostic {
                field: field.name.to_string(),
                reason,
            });
        }
        out.fields.insert(field.name.to_string(), value);
    }

    out
}

fn extract_field(bytes: &[u8], field: &FieldSpec) -> (FieldValue, Option<String>) {
    if field.offset >= bytes.len() {
        return (FieldValue::Null, Some("truncated".to_string()));
    }

    let end = field.end().min(bytes.len());
    let raw = String::from_utf8_lossy(&bytes[field.offset..end]);
    let truncated = end < field.end();

    let (value, reason) = decode_value(&raw, field.kind);
    match reason {
        Some(r) => (value, Some(r)),
        None if truncated => (value, Some("truncated".to_string())),
        None => (value, None),
    }
}

fn decode_value(raw: &str, kind: FieldKind) -> (FieldValue, Option<String>) {
    match kind {
        FieldKind::Text => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                (FieldValue::Null, None)
            } else {
                (FieldValue::Text(trimmed.to_string()), None)
            }
        }
        FieldKind::Uint => decode_uint(raw),
        FieldKind::Money { decimals } => decode_money(raw, decimals),
        FieldKind::PackedDate => decode_packed_date(raw),
    }
}

fn decode_uint(raw: &str) -> (FieldValue, Option<String>) {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return (FieldValue::Null, Some("no digits".to_string()));
    }
    match digits.parse::<u64>() {
        Ok(v) => (FieldValue::Uint(v), None),
        Err(_) => (FieldValue::Null, Some("integer out of range".to_string())),
    }
}

/// Decode an unscaled signed integer string into minor currency units
fn decode_money(raw: &str, decimals: u8) -> (FieldValue, Option<String>) {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return (FieldValue::Null, Some("empty amount".to_string()));
    }

    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return (FieldValue::Null, Some("unparseable amount".to_string()));
    }

    let unscaled: i64 = match digits.parse() {
        Ok(v) => v,
        Err(_) => return (FieldValue::Null, Some("amount out of range".to_string())),
    };
    let unscaled = if negative { -unscaled } else { unscaled };

    // Canonical representation is minor units (2 implied decimals). Layouts
    // with a different scale are normalized here; truncation only happens
    // for scales finer than cents, which no current layout uses.
    let minor = match decimals {
        2 => unscaled,
        d if d < 2 => unscaled.saturating_mul(10_i64.pow(u32::from(2 - d))),
        d => unscaled / 10_i64.pow(u32::from(d - 2)),
    };

    (FieldValue::Money(minor), None)
}

/// Decode MMDDCCYY into a calendar date
fn decode_packed_date(raw: &str) -> (FieldValue, Option<String>) {
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return (FieldValue::Null, Some("malformed packed date".to_string()));
    }

    let month: u32 = raw[0..2].parse().unwrap_or(0);
    let day: u32 = raw[2..4].parse().unwrap_or(0);
    let century: i32 = raw[4..6].parse().unwrap_or(0);
    let year_in_century: i32 = raw[6..8].parse().unwrap_or(0);
    let year = century * 100 + year_in_century;

    match NaiveDate::from_ymd_opt(year, month, day) {
        Some(date) => (FieldValue::Date(date), None),
        None => (FieldValue::Null, Some("invalid calendar date".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tddf::layout::layout_for;

    #[test]
    fn decodes_money_as_minor_units() {
        let (value, diag) = decode_money("00000012345", 2);
        assert_eq!(value, FieldValue::Money(12345));
        assert!(diag.is_none());

        let (value, _) = decode_money("   -1250", 2);
        assert_eq!(value, FieldValue::Money(-1250));
    }

    #[test]
    fn bad_money_yields_null_with_diagnostic() {
        let (value, diag) = decode_money("12AB5", 2);
        assert_eq!(value, FieldValue::Null);
        assert_eq!(diag.as_deref(), Some("unparseable amount"));
    }

    #[test]
    fn uint_strips_non_digits() {
        let (value, _) = decode_uint(" 00-42 ");
        assert_eq!(value, FieldValue::Uint(42));

        let (value, diag) = decode_uint("   ");
        assert_eq!(value, FieldValue::Null);
        assert_eq!(diag.as_deref(), Some("no digits"));
    }

    #[test]
    fn packed_date_decomposes_mmddccyy() {
        let (value, _) = decode_packed_date("01152026");
        assert_eq!(
            value,
            FieldValue::Date(NaiveDate::from_ymd_opt(2026, 1, 15).unwrap())
        );
    }

    #[test]
    fn invalid_packed_date_yields_null() {
        let (value, diag) = decode_packed_date("02302026");
        assert_eq!(value, FieldValue::Null);
        assert_eq!(diag.as_deref(), Some("invalid calendar date"));

        let (value, diag) = decode_packed_date("0115202");
        assert_eq!(value, FieldValue::Null);
        assert_eq!(diag.as_deref(), Some("malformed packed date"));
    }

    #[test]
    fn one_bad_field_does_not_invalidate_the_rest() {
        let layout = layout_for("BH").unwrap();
        // batch_date bytes are garbage, everything else valid
        let line = format!("BH{:<16}XXXXXXXX{:0>6}{:0>11}840", "MERCH001", 7, 250000);
        let extraction = extract(&line, layout);

        assert_eq!(extraction.fields["batch_date"], FieldValue::Null);
        assert_eq!(
            extraction.fields["merchant_number"],
            FieldValue::Text("MERCH001".to_string())
        );
        assert_eq!(extraction.fields["net_deposit"], FieldValue::Money(250000));
        assert_eq!(extraction.diagnostics.len(), 1);
        assert_eq!(extraction.diagnostics[0].field, "batch_date");
    }

    #[test]
    fn optional_fields_past_line_end_decode_to_null() {
        let layout = layout_for("BH").unwrap();
        // exactly required_len bytes: currency_code is absent
        let line = format!("BH{:<16}{}{:0>6}{:0>11}", "MERCH001", "01152026", 7, 250000);
        assert_eq!(line.len(), layout.required_len);

        let extraction = extract(&line, layout);
        assert_eq!(extraction.fields["currency_code"], FieldValue::Null);
        assert!(extraction
            .diagnostics
            .iter()
            .any(|d| d.field == "currency_code" && d.reason == "truncated"));
    }
}
