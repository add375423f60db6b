//! Identifier validation and quoting for dynamically built SQL.
//!
//! Column and table names cannot be bound as statement parameters, so the
//! insert statement for an upload is assembled from canonical field names.
//! Those names come from the static schema table, never from the uploaded
//! header, and are still validated and quoted here before use.

use crate::error::{IngestError, Result};

/// PostgreSQL truncates identifiers at 63 bytes.
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes and
/// identifiers exceeding the PostgreSQL length limit.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(IngestError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(IngestError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(IngestError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a PostgreSQL table name with schema.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_pg() {
        assert_eq!(quote_pg("symbol").unwrap(), "\"symbol\"");
        assert_eq!(quote_pg("odd\"name").unwrap(), "\"odd\"\"name\"");
    }

    #[test]
    fn test_qualify_pg() {
        assert_eq!(
            qualify_pg("public", "market_signal").unwrap(),
            "\"public\".\"market_signal\""
        );
    }

    #[test]
    fn test_rejects_empty_null_and_long() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("a\0b").is_err());
        assert!(validate_identifier(&"x".repeat(64)).is_err());
        assert!(validate_identifier(&"x".repeat(63)).is_ok());
    }
}
