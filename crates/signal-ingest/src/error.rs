//! Error types for the ingestion library.

use thiserror::Error;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code when the database cannot be reached.
pub const EXIT_STORAGE_UNAVAILABLE: u8 = 2;
/// Exit code for documents rejected before any write.
pub const EXIT_INVALID_INPUT: u8 = 3;
/// Exit code for failures while writing or committing.
pub const EXIT_WRITE_FAILED: u8 = 4;
/// Exit code for timeouts and cancellation.
pub const EXIT_INTERRUPTED: u8 = 5;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for ingestion operations.
#[derive(Error, Debug)]
pub enum IngestError {
    /// A header cell has no entry in the canonical schema.
    #[error("Unknown CSV column: {column:?}")]
    UnknownColumn { column: String },

    /// The header produced no recognized columns.
    #[error("No valid columns found in CSV header")]
    EmptySchema,

    /// Two header cells map to the same canonical field.
    #[error("Column {column:?} appears more than once in CSV header")]
    DuplicateColumn { column: String },

    /// A data row does not have one cell per header column.
    #[error("Row {row} has {found} cells, header has {expected}")]
    RowWidthMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },

    /// A numeric cell could not be parsed.
    #[error("Row {row}: invalid numeric value {value:?} for column {column}")]
    InvalidNumericValue {
        row: usize,
        column: String,
        value: String,
    },

    /// The document is not well-formed CSV.
    #[error("Invalid CSV format{}: {message}", line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    MalformedCsv { line: Option<u64>, message: String },

    /// The document exceeds the configured size bound.
    #[error("Upload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Connection or transaction-begin failure.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The store rejected a data row, or (`row` is `None`) the upload record
    /// or the row statement itself.
    #[error("Insert failed{}: {message}", row.map(|r| format!(" for row {}", r)).unwrap_or_default())]
    InsertFailed { row: Option<usize>, message: String },

    /// The store rejected the commit.
    #[error("Transaction commit failed: {0}")]
    CommitFailed(String),

    /// The transactional phase ran past its deadline.
    #[error("Ingestion timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Database error outside an ingestion transaction
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation was cancelled (SIGINT, etc.)
    #[error("Operation cancelled")]
    Cancelled,
}

impl IngestError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        IngestError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create an InsertFailed error for a data row.
    pub fn insert(row: usize, message: impl Into<String>) -> Self {
        IngestError::InsertFailed {
            row: Some(row),
            message: message.into(),
        }
    }

    /// Create an InsertFailed error for the upload record.
    pub fn upload_insert(message: impl Into<String>) -> Self {
        IngestError::InsertFailed {
            row: None,
            message: format!("upload record: {}", message.into()),
        }
    }

    /// Create an InsertFailed error for a row statement the store refused to prepare.
    pub fn prepare_rows(message: impl Into<String>) -> Self {
        IngestError::InsertFailed {
            row: None,
            message: format!("row statement: {}", message.into()),
        }
    }

    /// Stable machine-readable code, used in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::UnknownColumn { .. } => "unknown_column",
            IngestError::EmptySchema => "empty_schema",
            IngestError::DuplicateColumn { .. } => "duplicate_column",
            IngestError::RowWidthMismatch { .. } => "row_width_mismatch",
            IngestError::InvalidNumericValue { .. } => "invalid_numeric_value",
            IngestError::MalformedCsv { .. } => "malformed_csv",
            IngestError::PayloadTooLarge { .. } => "payload_too_large",
            IngestError::StorageUnavailable(_) => "storage_unavailable",
            IngestError::InsertFailed { .. } => "insert_failed",
            IngestError::CommitFailed(_) => "commit_failed",
            IngestError::Timeout { .. } => "timeout",
            IngestError::Config(_) => "config",
            IngestError::Pool { .. } => "pool",
            IngestError::Database(_) => "database",
            IngestError::Io(_) => "io",
            IngestError::Yaml(_) => "yaml",
            IngestError::Json(_) => "json",
            IngestError::Cancelled => "cancelled",
        }
    }

    /// Whether the error was caused by the submitted document rather than the system.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            IngestError::UnknownColumn { .. }
                | IngestError::EmptySchema
                | IngestError::DuplicateColumn { .. }
                | IngestError::RowWidthMismatch { .. }
                | IngestError::InvalidNumericValue { .. }
                | IngestError::MalformedCsv { .. }
                | IngestError::PayloadTooLarge { .. }
        )
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            IngestError::Config(_) | IngestError::Yaml(_) | IngestError::Json(_) => {
                EXIT_CONFIG_ERROR
            }
            IngestError::StorageUnavailable(_) | IngestError::Pool { .. } => {
                EXIT_STORAGE_UNAVAILABLE
            }
            IngestError::InsertFailed { .. }
            | IngestError::CommitFailed(_)
            | IngestError::Database(_) => EXIT_WRITE_FAILED,
            IngestError::Timeout { .. } | IngestError::Cancelled => EXIT_INTERRUPTED,
            IngestError::Io(_) => EXIT_IO_ERROR,
            _ if self.is_input_error() => EXIT_INVALID_INPUT,
            _ => EXIT_CONFIG_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_failed_names_row_or_upload() {
        let row = IngestError::insert(3, "null value in column \"symbol\"");
        assert!(row.to_string().contains("row 3"));

        let upload = IngestError::upload_insert("relation does not exist");
        assert_eq!(
            upload.to_string(),
            "Insert failed: upload record: relation does not exist"
        );

        let prepare = IngestError::prepare_rows("column \"lmt_price\" does not exist");
        assert!(matches!(prepare, IngestError::InsertFailed { row: None, .. }));
        assert!(prepare.to_string().contains("row statement"));
        assert_eq!(prepare.exit_code(), EXIT_WRITE_FAILED);
    }

    #[test]
    fn test_malformed_csv_mentions_line_when_known() {
        let err = IngestError::MalformedCsv {
            line: Some(4),
            message: "invalid utf-8".into(),
        };
        assert_eq!(err.to_string(), "Invalid CSV format at line 4: invalid utf-8");

        let err = IngestError::MalformedCsv {
            line: None,
            message: "unexpected end".into(),
        };
        assert_eq!(err.to_string(), "Invalid CSV format: unexpected end");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(IngestError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(IngestError::EmptySchema.exit_code(), EXIT_INVALID_INPUT);
        assert_eq!(
            IngestError::StorageUnavailable("refused".into()).exit_code(),
            EXIT_STORAGE_UNAVAILABLE
        );
        assert_eq!(
            IngestError::CommitFailed("deferred fk".into()).exit_code(),
            EXIT_WRITE_FAILED
        );
        assert_eq!(IngestError::Timeout { seconds: 1 }.exit_code(), EXIT_INTERRUPTED);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(IngestError::from(io).exit_code(), EXIT_IO_ERROR);
    }

    #[test]
    fn test_format_detailed_includes_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let detailed = IngestError::from(io).format_detailed();
        assert!(detailed.starts_with("Error: IO error: denied"));
    }
}
