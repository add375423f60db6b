//! In-memory storage backend.
//!
//! Holds committed data behind a mutex and stages each transaction's writes
//! until commit, so it honors the same all-or-nothing contract as the
//! PostgreSQL backend. Required (`NOT NULL`) fields are enforced the way the
//! database would. Faults can be injected to exercise rollback paths.

use super::{IngestTransaction, NewUpload, Signal, Store};
use crate::error::{IngestError, Result};
use crate::schema::{CanonicalField, CanonicalSchema, MappedHeader};
use crate::value::SqlValue;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// A committed upload record.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredUpload {
    pub id: i64,
    pub filename: String,
    pub path: Option<String>,
    pub source_addr: String,
    pub created_at: DateTime<Utc>,
}

/// A committed data row, keyed by canonical column.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub upload_id: i64,
    pub values: BTreeMap<&'static str, SqlValue>,
}

impl StoredRow {
    /// Value of a column; columns absent from the upload read as NULL.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.get(column)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    uploads: Vec<StoredUpload>,
    rows: Vec<StoredRow>,
    signals: Vec<Signal>,
    next_upload_id: i64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    unavailable: bool,
    fail_upload: bool,
    fail_prepare: bool,
    fail_row: Option<usize>,
    fail_commit: bool,
}

/// In-memory store for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Faults,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails as if the database were down.
    pub fn unavailable(mut self) -> Self {
        self.faults.unavailable = true;
        self
    }

    /// Inserting the upload record fails.
    pub fn with_failing_upload(mut self) -> Self {
        self.faults.fail_upload = true;
        self
    }

    /// Preparing the row statement fails, as with a missing table or column.
    pub fn with_failing_prepare(mut self) -> Self {
        self.faults.fail_prepare = true;
        self
    }

    /// Inserting the given 1-based data row fails.
    pub fn with_failing_row(mut self, row: usize) -> Self {
        self.faults.fail_row = Some(row);
        self
    }

    /// Commit fails, as with a constraint deferred to commit time.
    pub fn with_failing_commit(mut self) -> Self {
        self.faults.fail_commit = true;
        self
    }

    /// Committed uploads.
    pub fn uploads(&self) -> Vec<StoredUpload> {
        self.lock().uploads.clone()
    }

    /// Committed rows.
    pub fn rows(&self) -> Vec<StoredRow> {
        self.lock().rows.clone()
    }

    /// Committed rows belonging to one upload.
    pub fn rows_for(&self, upload_id: i64) -> Vec<StoredRow> {
        self.lock()
            .rows
            .iter()
            .filter(|r| r.upload_id == upload_id)
            .cloned()
            .collect()
    }

    /// Stored signals, oldest first.
    pub fn signals(&self) -> Vec<Signal> {
        self.lock().signals.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panic while holding the lock cannot leave partial writes behind,
        // since commits are applied with a single extend.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<()> {
        if self.faults.unavailable {
            return Err(IngestError::StorageUnavailable(
                "memory store marked unavailable".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn init_schema(&self, _schema: &CanonicalSchema) -> Result<()> {
        self.check_available()
    }

    async fn begin(&self) -> Result<Box<dyn IngestTransaction>> {
        self.check_available()?;
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            upload: None,
            rows: Vec::new(),
            columns: Vec::new(),
            required: Vec::new(),
        }))
    }

    async fn insert_signal(&self, data: &str, ip_address: &str) -> Result<()> {
        self.check_available()?;
        self.lock().signals.push(Signal {
            data: data.to_string(),
            ip_address: ip_address.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn latest_signal(&self) -> Result<Option<Signal>> {
        self.check_available()?;
        Ok(self.lock().signals.last().cloned())
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

struct MemoryTransaction {
    store: MemoryStore,
    upload: Option<StoredUpload>,
    rows: Vec<StoredRow>,
    columns: Vec<&'static CanonicalField>,
    required: Vec<&'static str>,
}

#[async_trait]
impl IngestTransaction for MemoryTransaction {
    async fn insert_upload(&mut self, upload: &NewUpload) -> Result<i64> {
        if self.store.faults.fail_upload {
            return Err(IngestError::upload_insert("injected upload failure"));
        }

        // Identities are consumed even if the transaction rolls back, like a sequence
        let id = {
            let mut state = self.store.lock();
            state.next_upload_id += 1;
            state.next_upload_id
        };

        self.upload = Some(StoredUpload {
            id,
            filename: upload.filename.clone(),
            path: upload.path.clone(),
            source_addr: upload.source_addr.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn prepare_rows(
        &mut self,
        schema: &'static CanonicalSchema,
        header: &MappedHeader,
    ) -> Result<()> {
        if self.store.faults.fail_prepare {
            return Err(IngestError::prepare_rows("injected prepare failure"));
        }
        self.columns = header.fields().to_vec();
        self.required = schema
            .fields()
            .iter()
            .filter(|f| f.kind.is_required())
            .map(|f| f.canonical)
            .collect();
        Ok(())
    }

    async fn insert_row(&mut self, upload_id: i64, row: usize, values: &[SqlValue]) -> Result<()> {
        if self.store.faults.fail_row == Some(row) {
            return Err(IngestError::insert(row, "injected row failure"));
        }
        if self.upload.as_ref().map(|u| u.id) != Some(upload_id) {
            return Err(IngestError::insert(
                row,
                format!("upload {} does not exist in this transaction", upload_id),
            ));
        }
        if values.len() != self.columns.len() {
            return Err(IngestError::insert(
                row,
                format!(
                    "expected {} parameters, got {}",
                    self.columns.len(),
                    values.len()
                ),
            ));
        }

        let values: BTreeMap<&'static str, SqlValue> = self
            .columns
            .iter()
            .map(|f| f.canonical)
            .zip(values.iter().cloned())
            .collect();

        for column in &self.required {
            if values.get(column).map_or(true, SqlValue::is_null) {
                return Err(IngestError::insert(
                    row,
                    format!("null value in column \"{}\" violates not-null constraint", column),
                ));
            }
        }

        self.rows.push(StoredRow { upload_id, values });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.store.faults.fail_commit {
            return Err(IngestError::CommitFailed("injected commit failure".into()));
        }

        let this = *self;
        let mut state = this.store.lock();
        if let Some(upload) = this.upload {
            state.uploads.push(upload);
        }
        state.rows.extend(this.rows);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
