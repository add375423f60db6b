//! Canonical column schema and header mapping.
//!
//! The accepted CSV columns are a fixed table: each external header name maps
//! to one canonical field, which names the database column and declares how
//! its cells are coerced.

use crate::error::{IngestError, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Target kind of a canonical field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Text that the store requires (`NOT NULL`).
    Text,
    /// Text that may be absent.
    NullableText,
    /// Arbitrary-precision decimal (`NUMERIC`).
    Decimal,
    /// 64-bit integer (`BIGINT`).
    Integer,
}

impl ValueKind {
    /// PostgreSQL column definition for this kind.
    pub fn pg_column_type(&self) -> &'static str {
        match self {
            ValueKind::Text => "TEXT NOT NULL",
            ValueKind::NullableText => "TEXT",
            ValueKind::Decimal => "NUMERIC",
            ValueKind::Integer => "BIGINT",
        }
    }

    /// Whether the store rejects NULL for this kind.
    pub fn is_required(&self) -> bool {
        matches!(self, ValueKind::Text)
    }

    /// Whether cells of this kind are parsed as numbers.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueKind::Decimal | ValueKind::Integer)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Text => "text",
            ValueKind::NullableText => "nullable-text",
            ValueKind::Decimal => "decimal",
            ValueKind::Integer => "integer",
        };
        f.write_str(s)
    }
}

/// One row of the canonical schema table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CanonicalField {
    /// Accepted header name, lower-case.
    pub external: &'static str,
    /// Database column name.
    pub canonical: &'static str,
    /// How cells are coerced.
    pub kind: ValueKind,
}

const fn field(external: &'static str, canonical: &'static str, kind: ValueKind) -> CanonicalField {
    CanonicalField {
        external,
        canonical,
        kind,
    }
}

const MARKET_SIGNAL_FIELDS: &[CanonicalField] = &[
    field("symbol", "symbol", ValueKind::Text),
    field("action", "action", ValueKind::NullableText),
    field("quantity", "quantity", ValueKind::Decimal),
    field("sectype", "sectype", ValueKind::NullableText),
    field("exchange", "exchange", ValueKind::NullableText),
    field("timeinforce", "time_in_force", ValueKind::NullableText),
    field("ordertype", "order_type", ValueKind::NullableText),
    field("lmtprice", "lmt_price", ValueKind::Decimal),
    field("orderid", "order_id", ValueKind::Integer),
    field("baskettag", "basket_tag", ValueKind::NullableText),
    field("orderref", "order_ref", ValueKind::NullableText),
    field("account", "account", ValueKind::NullableText),
    field("auxprice", "aux_price", ValueKind::Decimal),
    field("parentorderid", "parent_order_id", ValueKind::Integer),
];

static MARKET_SIGNAL: CanonicalSchema = CanonicalSchema {
    table: "market_signal",
    upload_column: "source_file_id",
    fields: MARKET_SIGNAL_FIELDS,
};

/// Fixed mapping from external column names to canonical fields.
#[derive(Debug)]
pub struct CanonicalSchema {
    table: &'static str,
    upload_column: &'static str,
    fields: &'static [CanonicalField],
}

impl CanonicalSchema {
    /// The order/trade schema stored in `market_signal`.
    pub fn market_signal() -> &'static CanonicalSchema {
        &MARKET_SIGNAL
    }

    /// Build a schema from a static field table.
    ///
    /// Fails if an external or canonical name repeats.
    pub fn new(
        table: &'static str,
        upload_column: &'static str,
        fields: &'static [CanonicalField],
    ) -> Result<Self> {
        let mut external = HashSet::new();
        let mut canonical = HashSet::new();
        for f in fields {
            if !external.insert(f.external) {
                return Err(IngestError::Config(format!(
                    "schema {}: external column {:?} listed twice",
                    table, f.external
                )));
            }
            if !canonical.insert(f.canonical) || f.canonical == upload_column {
                return Err(IngestError::Config(format!(
                    "schema {}: canonical field {:?} listed twice",
                    table, f.canonical
                )));
            }
        }
        Ok(Self {
            table,
            upload_column,
            fields,
        })
    }

    /// Table receiving ingested rows.
    pub fn table(&self) -> &'static str {
        self.table
    }

    /// Trailing column referencing the upload record.
    pub fn upload_column(&self) -> &'static str {
        self.upload_column
    }

    /// All fields in table order.
    pub fn fields(&self) -> &'static [CanonicalField] {
        self.fields
    }

    /// Look up a raw header cell (case-insensitive, surrounding whitespace and BOM ignored).
    pub fn lookup(&self, raw: &str) -> Option<&'static CanonicalField> {
        let key = normalize_header(raw);
        self.fields.iter().find(|f| f.external == key)
    }

    /// Map a header row to canonical fields, position for position.
    ///
    /// Every cell must be known; nothing is skipped.
    pub fn map_header<S: AsRef<str>>(&self, header: &[S]) -> Result<MappedHeader> {
        let mut fields: Vec<&'static CanonicalField> = Vec::with_capacity(header.len());

        for cell in header {
            let raw = cell.as_ref();
            let field = self.lookup(raw).ok_or_else(|| IngestError::UnknownColumn {
                column: raw.to_string(),
            })?;
            if fields.iter().any(|f| f.canonical == field.canonical) {
                return Err(IngestError::DuplicateColumn {
                    column: raw.to_string(),
                });
            }
            fields.push(field);
        }

        if fields.is_empty() {
            return Err(IngestError::EmptySchema);
        }

        Ok(MappedHeader { fields })
    }
}

fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}').trim().to_lowercase()
}

/// Canonical fields in the order they appear in an uploaded header.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedHeader {
    fields: Vec<&'static CanonicalField>,
}

impl MappedHeader {
    /// Mapped fields in header order.
    pub fn fields(&self) -> &[&'static CanonicalField] {
        &self.fields
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Always false for a successfully mapped header.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Canonical column names in header order.
    pub fn columns(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.canonical).collect()
    }

    /// Whether the header supplies the given canonical column.
    pub fn contains(&self, canonical: &str) -> bool {
        self.fields.iter().any(|f| f.canonical == canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> &'static CanonicalSchema {
        CanonicalSchema::market_signal()
    }

    #[test]
    fn test_market_signal_table_is_consistent() {
        let s = schema();
        assert!(CanonicalSchema::new(s.table(), s.upload_column(), s.fields()).is_ok());
        assert_eq!(s.fields().len(), 14);
    }

    #[test]
    fn test_map_header_preserves_order() {
        let mapped = schema()
            .map_header(&["Symbol", " TimeInForce ", "LMTPRICE", "parentOrderId"])
            .unwrap();
        assert_eq!(
            mapped.columns(),
            vec!["symbol", "time_in_force", "lmt_price", "parent_order_id"]
        );
        assert_eq!(mapped.fields()[2].kind, ValueKind::Decimal);
        assert_eq!(mapped.fields()[3].kind, ValueKind::Integer);
    }

    #[test]
    fn test_unknown_column_rejected() {
        let err = schema().map_header(&["symbol", "bogus_column"]).unwrap_err();
        match err {
            IngestError::UnknownColumn { column } => assert_eq!(column, "bogus_column"),
            other => panic!("expected UnknownColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_canonical_name_is_not_an_external_name() {
        // time_in_force is the column, timeinforce is what uploads use
        assert!(matches!(
            schema().map_header(&["time_in_force"]),
            Err(IngestError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_empty_header_rejected() {
        let header: Vec<String> = Vec::new();
        assert!(matches!(
            schema().map_header(&header[..]),
            Err(IngestError::EmptySchema)
        ));
    }

    #[test]
    fn test_duplicate_column_rejected() {
        assert!(matches!(
            schema().map_header(&["symbol", "SYMBOL"]),
            Err(IngestError::DuplicateColumn { .. })
        ));
    }

    #[test]
    fn test_bom_on_first_header_cell() {
        let mapped = schema().map_header(&["\u{feff}symbol", "action"]).unwrap();
        assert_eq!(mapped.columns(), vec!["symbol", "action"]);
    }

    #[test]
    fn test_new_rejects_duplicate_canonical() {
        static DUP: &[CanonicalField] = &[
            field("a", "x", ValueKind::Text),
            field("b", "x", ValueKind::Decimal),
        ];
        assert!(CanonicalSchema::new("t", "upload_id", DUP).is_err());
    }

    #[test]
    fn test_new_rejects_field_named_like_upload_column() {
        static CLASH: &[CanonicalField] = &[field("a", "upload_id", ValueKind::Text)];
        assert!(CanonicalSchema::new("t", "upload_id", CLASH).is_err());
    }
}
