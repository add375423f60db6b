//! # signal-ingest
//!
//! Atomic ingestion of order/trade CSV documents into PostgreSQL.
//!
//! An upload is read, its header mapped onto a fixed canonical schema and
//! every cell coerced to its column's type before anything is written. The
//! upload record and all of its rows are then committed in a single
//! transaction, or not at all.
//!
//! - **Header mapping** with case-insensitive, whitespace-tolerant matching
//! - **Typed coercion** of decimal and integer columns, empty cells as NULL
//! - **All-or-nothing writes** through one prepared statement per upload
//! - **HTTP API** (axum) for file uploads and single signal values
//! - **Dated archive** of every uploaded document
//!
//! ## Example
//!
//! ```rust,no_run
//! use signal_ingest::{Config, IngestLimits, Ingestor, NewUpload, PgStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> signal_ingest::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let store = Arc::new(PgStore::new(&config.database).await?);
//!     let ingestor = Ingestor::new(store, IngestLimits::from(&config.ingest));
//!
//!     let upload = NewUpload {
//!         filename: "orders.csv".into(),
//!         path: None,
//!         source_addr: "127.0.0.1".into(),
//!     };
//!     let receipt = ingestor.ingest(&upload, b"symbol,quantity\nAAPL,100\n").await?;
//!     println!("upload {} with {} rows", receipt.upload_id, receipt.rows);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod archive;
pub mod coerce;
pub mod config;
pub mod error;
pub mod identifier;
pub mod ingest;
pub mod reader;
pub mod schema;
pub mod store;
pub mod value;

// Re-exports for convenient access
pub use archive::UploadArchive;
pub use config::{Config, DatabaseConfig, IngestConfig, ServerConfig};
pub use error::{IngestError, Result};
pub use ingest::{IngestLimits, IngestReceipt, Ingestor, PreparedBatch};
pub use schema::{CanonicalField, CanonicalSchema, MappedHeader, ValueKind};
pub use store::{MemoryStore, NewUpload, PgStore, Signal, Store};
pub use value::SqlValue;
