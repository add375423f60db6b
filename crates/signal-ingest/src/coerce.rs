//! Row coercion: raw CSV cells to typed values.
//!
//! Empty cells become NULL for every kind. Text is kept byte for byte.
//! Numeric cells that fail to parse abort the ingestion with
//! [`IngestError::InvalidNumericValue`]; they are never silently nulled.

use crate::error::{IngestError, Result};
use crate::schema::{CanonicalField, MappedHeader, ValueKind};
use crate::value::SqlValue;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Coerce one data row against the mapped header.
///
/// `row` is the 1-based data row number used in error messages.
pub fn coerce_row<S: AsRef<str>>(
    row: usize,
    cells: &[S],
    header: &MappedHeader,
) -> Result<Vec<SqlValue>> {
    if cells.len() != header.len() {
        return Err(IngestError::RowWidthMismatch {
            row,
            expected: header.len(),
            found: cells.len(),
        });
    }

    header
        .fields()
        .iter()
        .zip(cells)
        .map(|(field, cell)| coerce_cell(row, field, cell.as_ref()))
        .collect()
}

/// Coerce a single cell according to its field kind.
pub fn coerce_cell(row: usize, field: &CanonicalField, raw: &str) -> Result<SqlValue> {
    if raw.is_empty() {
        return Ok(SqlValue::Null(field.kind));
    }

    match field.kind {
        ValueKind::Text | ValueKind::NullableText => Ok(SqlValue::Text(raw.to_string())),
        ValueKind::Decimal => parse_decimal(raw.trim())
            .map(SqlValue::Decimal)
            .ok_or_else(|| invalid(row, field, raw)),
        ValueKind::Integer => raw
            .trim()
            .parse::<i64>()
            .map(SqlValue::Integer)
            .map_err(|_| invalid(row, field, raw)),
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    // Decimal::from_str tolerates '_' separators, which are not numbers in a CSV
    if s.is_empty() || s.contains('_') {
        return None;
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

fn invalid(row: usize, field: &CanonicalField, raw: &str) -> IngestError {
    IngestError::InvalidNumericValue {
        row,
        column: field.canonical.to_string(),
        value: raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CanonicalSchema;

    fn header(cols: &[&str]) -> MappedHeader {
        CanonicalSchema::market_signal().map_header(cols).unwrap()
    }

    #[test]
    fn test_coerce_typed_row() {
        let h = header(&["symbol", "action", "quantity", "orderid"]);
        let values = coerce_row(1, &["AAPL", "BUY", "100", "42"], &h).unwrap();
        assert_eq!(
            values,
            vec![
                SqlValue::Text("AAPL".into()),
                SqlValue::Text("BUY".into()),
                SqlValue::Decimal(Decimal::from(100)),
                SqlValue::Integer(42),
            ]
        );
    }

    #[test]
    fn test_empty_cells_become_null_with_kind() {
        let h = header(&["symbol", "quantity", "orderid", "orderref"]);
        let values = coerce_row(1, &["", "", "", ""], &h).unwrap();
        assert_eq!(
            values,
            vec![
                SqlValue::Null(ValueKind::Text),
                SqlValue::Null(ValueKind::Decimal),
                SqlValue::Null(ValueKind::Integer),
                SqlValue::Null(ValueKind::NullableText),
            ]
        );
    }

    #[test]
    fn test_text_is_not_trimmed() {
        let h = header(&["orderref"]);
        let values = coerce_row(1, &["  two  words "], &h).unwrap();
        assert_eq!(values[0].as_text(), Some("  two  words "));
    }

    #[test]
    fn test_decimal_grammar() {
        let h = header(&["lmtprice"]);
        let parse = |s: &str| coerce_row(1, &[s], &h).unwrap()[0].as_decimal().unwrap();
        assert_eq!(parse("189.25"), Decimal::from_str("189.25").unwrap());
        assert_eq!(parse("-0.5"), Decimal::from_str("-0.5").unwrap());
        assert_eq!(parse(" 12 "), Decimal::from(12));
        assert_eq!(parse("1.5e2"), Decimal::from(150));
    }

    #[test]
    fn test_invalid_decimal_aborts() {
        let h = header(&["symbol", "quantity"]);
        let err = coerce_row(7, &["AAPL", "abc"], &h).unwrap_err();
        match err {
            IngestError::InvalidNumericValue { row, column, value } => {
                assert_eq!(row, 7);
                assert_eq!(column, "quantity");
                assert_eq!(value, "abc");
            }
            other => panic!("expected InvalidNumericValue, got {:?}", other),
        }
        assert!(coerce_row(1, &["AAPL", "1_000"], &h).is_err());
    }

    #[test]
    fn test_invalid_integer_aborts() {
        let h = header(&["orderid"]);
        assert!(matches!(
            coerce_row(2, &["12.5"], &h),
            Err(IngestError::InvalidNumericValue { .. })
        ));
        assert!(matches!(
            coerce_row(2, &["99999999999999999999"], &h),
            Err(IngestError::InvalidNumericValue { .. })
        ));
    }

    #[test]
    fn test_row_width_mismatch() {
        let h = header(&["symbol", "action", "quantity"]);
        let err = coerce_row(2, &["AAPL", "BUY"], &h).unwrap_err();
        match err {
            IngestError::RowWidthMismatch {
                row,
                expected,
                found,
            } => assert_eq!((row, expected, found), (2, 3, 2)),
            other => panic!("expected RowWidthMismatch, got {:?}", other),
        }
        assert!(coerce_row(2, &["AAPL", "BUY", "1", "extra"], &h).is_err());
    }
}
