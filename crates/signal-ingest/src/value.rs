//! Typed cell values produced by row coercion.

use crate::schema::ValueKind;
use rust_decimal::Decimal;
use std::fmt;

/// A coerced cell, ready to be bound as a statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL with the kind of the column it fills.
    Null(ValueKind),

    /// Text, stored exactly as it appeared in the cell.
    Text(String),

    /// Decimal quantity or price.
    Decimal(Decimal),

    /// Integer identifier.
    Integer(i64),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Borrow the text content, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Decimal content, if any.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            SqlValue::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// Integer content, if any.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null(_) => f.write_str("NULL"),
            SqlValue::Text(s) => write!(f, "{:?}", s),
            SqlValue::Decimal(d) => write!(f, "{}", d),
            SqlValue::Integer(n) => write!(f, "{}", n),
        }
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}
