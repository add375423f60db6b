//! CSV ingestion: read, map, coerce, then write atomically.
//!
//! The document is fully validated before a transaction is opened. Header
//! mapping, row widths and numeric coercion are all checked up front, so a
//! bad document never holds a connection. The write phase then runs in one
//! transaction under a deadline: the upload record, then every row through
//! one prepared statement, then commit. Any failure rolls back all of it.

use crate::coerce::coerce_row;
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::reader::UploadReader;
use crate::schema::{CanonicalSchema, MappedHeader};
use crate::store::{IngestTransaction, NewUpload, Store};
use crate::value::SqlValue;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A validated document, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedBatch {
    /// Mapped header, defining column order for every row.
    pub header: MappedHeader,
    /// Coerced rows in document order.
    pub rows: Vec<Vec<SqlValue>>,
}

/// Result of a committed ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReceipt {
    /// Identity of the created upload record.
    pub upload_id: i64,
    /// Number of rows committed.
    pub rows: u64,
}

/// Size and time bounds for one ingestion.
#[derive(Debug, Clone, Copy)]
pub struct IngestLimits {
    /// Largest accepted document in bytes.
    pub max_bytes: usize,
    /// Deadline for the transactional phase.
    pub timeout: Duration,
}

impl From<&IngestConfig> for IngestLimits {
    fn from(config: &IngestConfig) -> Self {
        Self {
            max_bytes: config.max_upload_bytes,
            timeout: config.timeout(),
        }
    }
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl IngestLimits {
    /// Reject a document larger than the configured bound.
    pub fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_bytes {
            return Err(IngestError::PayloadTooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }
}

/// Runs ingestions against a store.
pub struct Ingestor {
    store: Arc<dyn Store>,
    schema: &'static CanonicalSchema,
    limits: IngestLimits,
}

impl Ingestor {
    /// Create an ingestor for the order/trade schema.
    pub fn new(store: Arc<dyn Store>, limits: IngestLimits) -> Self {
        Self::with_schema(store, CanonicalSchema::market_signal(), limits)
    }

    /// Create an ingestor for a custom schema.
    pub fn with_schema(
        store: Arc<dyn Store>,
        schema: &'static CanonicalSchema,
        limits: IngestLimits,
    ) -> Self {
        Self {
            store,
            schema,
            limits,
        }
    }

    /// Canonical schema uploads are mapped against.
    pub fn schema(&self) -> &'static CanonicalSchema {
        self.schema
    }

    /// Configured bounds.
    pub fn limits(&self) -> IngestLimits {
        self.limits
    }

    /// Validate and coerce a document without touching the store.
    pub fn prepare(&self, bytes: &[u8]) -> Result<PreparedBatch> {
        prepare_document(self.schema, bytes, &self.limits)
    }

    /// Ingest a document: validate it, then commit it with its upload record.
    ///
    /// Validation runs on the blocking pool; only the write phase is bound
    /// by the deadline.
    pub async fn ingest(&self, upload: &NewUpload, bytes: &[u8]) -> Result<IngestReceipt> {
        self.limits.check_size(bytes.len())?;
        let schema = self.schema;
        let document = bytes.to_vec();
        let batch = tokio::task::spawn_blocking(move || prepare_batch(schema, &document))
            .await
            .map_err(|e| match e.try_into_panic() {
                Ok(panic) => std::panic::resume_unwind(panic),
                Err(_) => IngestError::Cancelled,
            })??;
        debug!(
            "{}: {} columns, {} rows validated",
            upload.filename,
            batch.header.len(),
            batch.rows.len()
        );

        let started = Instant::now();
        let write = write_batch(self.store.as_ref(), self.schema, upload, &batch);
        let receipt = match tokio::time::timeout(self.limits.timeout, write).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "{}: ingestion exceeded {:?}, transaction abandoned",
                    upload.filename, self.limits.timeout
                );
                return Err(IngestError::Timeout {
                    seconds: self.limits.timeout.as_secs(),
                });
            }
        };

        info!(
            "{}: committed {} rows as upload {} from {} in {:.2?}",
            upload.filename,
            receipt.rows,
            receipt.upload_id,
            upload.source_addr,
            started.elapsed()
        );
        Ok(receipt)
    }
}

/// Check the size bound, then read, map and coerce a document.
pub fn prepare_document(
    schema: &CanonicalSchema,
    bytes: &[u8],
    limits: &IngestLimits,
) -> Result<PreparedBatch> {
    limits.check_size(bytes.len())?;
    prepare_batch(schema, bytes)
}

/// Read, map and coerce a whole document.
pub fn prepare_batch(schema: &CanonicalSchema, bytes: &[u8]) -> Result<PreparedBatch> {
    let mut reader = UploadReader::new(bytes)?;
    let header = match reader.read_header()? {
        Some(cells) => schema.map_header(&cells[..])?,
        None => return Err(IngestError::EmptySchema),
    };

    let mut rows = Vec::new();
    for data_row in reader {
        let data_row = data_row?;
        rows.push(coerce_row(data_row.number, &data_row.cells[..], &header)?);
    }

    Ok(PreparedBatch { header, rows })
}

/// Write a prepared batch in one transaction, rolling back on any failure.
pub async fn write_batch(
    store: &dyn Store,
    schema: &'static CanonicalSchema,
    upload: &NewUpload,
    batch: &PreparedBatch,
) -> Result<IngestReceipt> {
    let mut tx = store.begin().await?;

    let upload_id = match insert_all(tx.as_mut(), schema, upload, batch).await {
        Ok(id) => id,
        Err(e) => {
            warn!("{}: {}; rolling back", upload.filename, e);
            if let Err(rollback_err) = tx.rollback().await {
                warn!("{}: rollback failed: {}", upload.filename, rollback_err);
            }
            return Err(e);
        }
    };

    tx.commit().await?;

    Ok(IngestReceipt {
        upload_id,
        rows: batch.rows.len() as u64,
    })
}

async fn insert_all(
    tx: &mut dyn IngestTransaction,
    schema: &'static CanonicalSchema,
    upload: &NewUpload,
    batch: &PreparedBatch,
) -> Result<i64> {
    let upload_id = tx.insert_upload(upload).await?;
    tx.prepare_rows(schema, &batch.header).await?;
    for (i, values) in batch.rows.iter().enumerate() {
        tx.insert_row(upload_id, i + 1, values).await?;
    }
    Ok(upload_id)
}
