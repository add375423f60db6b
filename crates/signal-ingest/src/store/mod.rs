//! Storage backends for uploads, ingested rows and signals.
//!
//! The [`Store`] trait is the only way the rest of the crate touches the
//! database. Implementations:
//!
//! - **PostgreSQL**: [`PgStore`] in `postgres.rs`
//! - **Memory**: [`MemoryStore`] in `memory.rs`, with fault injection for tests
//!
//! The store handle is created once at startup and passed around as
//! `Arc<dyn Store>`.

mod memory;
mod postgres;

pub use memory::{MemoryStore, StoredRow, StoredUpload};
pub use postgres::PgStore;

use crate::error::Result;
use crate::schema::{CanonicalSchema, MappedHeader};
use crate::value::SqlValue;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provenance of one uploaded document, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUpload {
    /// Filename as submitted by the client.
    pub filename: String,
    /// Where the archived copy was written, if it was.
    pub path: Option<String>,
    /// Submitting client address.
    pub source_addr: String,
}

/// A signal value as returned by the read path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub data: String,
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
}

/// Trait for storage backends.
///
/// Implementations must be `Send + Sync` to be shared across request handlers.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create tables if they don't exist. Idempotent.
    async fn init_schema(&self, schema: &CanonicalSchema) -> Result<()>;

    /// Begin an ingestion transaction.
    ///
    /// Fails with `StorageUnavailable` when no connection can be obtained or
    /// the transaction cannot be started.
    async fn begin(&self) -> Result<Box<dyn IngestTransaction>>;

    /// Insert one signal value.
    async fn insert_signal(&self, data: &str, ip_address: &str) -> Result<()>;

    /// Most recently created signal.
    async fn latest_signal(&self) -> Result<Option<Signal>>;

    /// Round trip to the store.
    async fn ping(&self) -> Result<()>;

    /// Backend name for logging.
    fn backend_type(&self) -> &'static str;
}

/// One open ingestion transaction.
///
/// Nothing written through a transaction is visible to others until
/// [`commit`](IngestTransaction::commit) succeeds. Dropping a transaction
/// without committing discards its writes.
#[async_trait]
pub trait IngestTransaction: Send {
    /// Insert the upload record and return its generated identity.
    async fn insert_upload(&mut self, upload: &NewUpload) -> Result<i64>;

    /// Prepare the row insert for the given header's column order.
    async fn prepare_rows(
        &mut self,
        schema: &'static CanonicalSchema,
        header: &MappedHeader,
    ) -> Result<()>;

    /// Insert one coerced row. `row` is the 1-based data row number.
    async fn insert_row(&mut self, upload_id: i64, row: usize, values: &[SqlValue]) -> Result<()>;

    /// Commit every write made through this transaction.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every write made through this transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
