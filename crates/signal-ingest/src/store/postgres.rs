//! PostgreSQL storage backend.

use super::{IngestTransaction, NewUpload, Signal, Store};
use crate::config::DatabaseConfig;
use crate::error::{IngestError, Result};
use crate::identifier::{qualify_pg, quote_pg};
use crate::schema::{CanonicalSchema, MappedHeader};
use crate::value::SqlValue;
use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use rust_decimal::Decimal;
use tokio_postgres::types::{IsNull, ToSql, Type, WrongType};
use tokio_postgres::{NoTls, Statement};
use tracing::{debug, info, warn};

/// Table holding one provenance record per upload.
const UPLOAD_TABLE: &str = "source_file";

/// Table holding JSON-submitted signal values.
const SIGNAL_TABLE: &str = "signal";

/// PostgreSQL store backed by a deadpool connection pool.
pub struct PgStore {
    pool: Pool,
    schema: String,
}

impl PgStore {
    /// Create the pool and test one connection.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pg_config = config.pg_config()?;

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(config.max_connections)
            .build()
            .map_err(|e| IngestError::pool(e.to_string(), "building connection pool"))?;

        // Test connection
        let client = pool
            .get()
            .await
            .map_err(|e| IngestError::StorageUnavailable(e.to_string()))?;

        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| IngestError::StorageUnavailable(describe_pg_error(&e)))?;

        info!("Connected to PostgreSQL: {}", config.describe());

        Ok(Self {
            pool,
            schema: config.schema.clone(),
        })
    }

    async fn client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| IngestError::pool(e.to_string(), context))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn init_schema(&self, schema: &CanonicalSchema) -> Result<()> {
        let client = self.client("init_schema").await?;

        for sql in schema_ddl(&self.schema, schema)? {
            debug!("{}", sql);
            client.batch_execute(&sql).await?;
        }

        info!(
            "Ensured tables {}, {} and {} in schema '{}'",
            UPLOAD_TABLE,
            schema.table(),
            SIGNAL_TABLE,
            self.schema
        );
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn IngestTransaction>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| IngestError::StorageUnavailable(e.to_string()))?;

        client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| IngestError::StorageUnavailable(describe_pg_error(&e)))?;

        Ok(Box::new(PgIngestTransaction {
            client: Some(client),
            db_schema: self.schema.clone(),
            statement: None,
        }))
    }

    async fn insert_signal(&self, data: &str, ip_address: &str) -> Result<()> {
        let client = self.client("insert_signal").await?;
        let sql = format!(
            "INSERT INTO {} (data, ip_address) VALUES ($1, $2)",
            qualify_pg(&self.schema, SIGNAL_TABLE)?
        );
        client.execute(&sql, &[&data, &ip_address]).await?;
        Ok(())
    }

    async fn latest_signal(&self) -> Result<Option<Signal>> {
        let client = self.client("latest_signal").await?;
        let sql = format!(
            "SELECT data, ip_address, created_at FROM {} ORDER BY created_at DESC, id DESC LIMIT 1",
            qualify_pg(&self.schema, SIGNAL_TABLE)?
        );
        let row = client.query_opt(&sql, &[]).await?;

        Ok(row.map(|r| {
            let created_at: DateTime<Utc> = r.get(2);
            Signal {
                data: r.get(0),
                ip_address: r.get(1),
                created_at,
            }
        }))
    }

    async fn ping(&self) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| IngestError::StorageUnavailable(e.to_string()))?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| IngestError::StorageUnavailable(describe_pg_error(&e)))?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }
}

/// An open transaction on a pooled connection.
///
/// The connection is held for the transaction's lifetime. If the
/// transaction is dropped unfinished (for example when an ingestion times
/// out), the connection is detached from the pool and closed, which makes
/// the server roll the transaction back.
pub struct PgIngestTransaction {
    client: Option<Object>,
    db_schema: String,
    statement: Option<Statement>,
}

impl PgIngestTransaction {
    fn client(&self) -> Result<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| IngestError::StorageUnavailable("transaction already finished".into()))
    }
}

#[async_trait]
impl IngestTransaction for PgIngestTransaction {
    async fn insert_upload(&mut self, upload: &NewUpload) -> Result<i64> {
        let sql = format!(
            "INSERT INTO {} (name, path, source_ip_address) VALUES ($1, $2, $3) RETURNING id",
            qualify_pg(&self.db_schema, UPLOAD_TABLE)?
        );
        let row = self
            .client()?
            .query_one(&sql, &[&upload.filename, &upload.path, &upload.source_addr])
            .await
            .map_err(|e| IngestError::upload_insert(describe_pg_error(&e)))?;
        Ok(row.get(0))
    }

    async fn prepare_rows(
        &mut self,
        schema: &'static CanonicalSchema,
        header: &MappedHeader,
    ) -> Result<()> {
        let sql = build_row_insert_sql(&self.db_schema, schema, header)?;
        debug!("Prepared row insert: {}", sql);
        let statement = self
            .client()?
            .prepare_cached(&sql)
            .await
            .map_err(|e| {
                if e.is_closed() {
                    IngestError::StorageUnavailable(describe_pg_error(&e))
                } else {
                    IngestError::prepare_rows(describe_pg_error(&e))
                }
            })?;
        self.statement = Some(statement);
        Ok(())
    }

    async fn insert_row(&mut self, upload_id: i64, row: usize, values: &[SqlValue]) -> Result<()> {
        let statement = self
            .statement
            .as_ref()
            .ok_or_else(|| IngestError::insert(row, "row insert was not prepared"))?;

        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(values.len() + 1);
        for value in values {
            params.push(value);
        }
        params.push(&upload_id);

        self.client()?
            .execute(statement, &params)
            .await
            .map_err(|e| IngestError::insert(row, describe_pg_error(&e)))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let client = this
            .client
            .take()
            .ok_or_else(|| IngestError::CommitFailed("transaction already finished".into()))?;
        client
            .batch_execute("COMMIT")
            .await
            .map_err(|e| IngestError::CommitFailed(describe_pg_error(&e)))?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let Some(client) = this.client.take() else {
            return Ok(());
        };
        if let Err(e) = client.batch_execute("ROLLBACK").await {
            // Never hand a connection with an open transaction back to the pool
            drop(Object::take(client));
            return Err(IngestError::StorageUnavailable(describe_pg_error(&e)));
        }
        Ok(())
    }
}

impl Drop for PgIngestTransaction {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            warn!("Ingestion transaction abandoned before completion; closing its connection");
            drop(Object::take(client));
        }
    }
}

/// Build the parameterized row insert for a mapped header.
///
/// Columns follow the header order, with the upload reference last.
pub fn build_row_insert_sql(
    db_schema: &str,
    schema: &CanonicalSchema,
    header: &MappedHeader,
) -> Result<String> {
    let mut columns = Vec::with_capacity(header.len() + 1);
    for field in header.fields() {
        columns.push(quote_pg(field.canonical)?);
    }
    columns.push(quote_pg(schema.upload_column())?);

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();

    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualify_pg(db_schema, schema.table())?,
        columns.join(", "),
        placeholders.join(", ")
    ))
}

/// DDL statements creating the schema, upload, row and signal tables.
pub fn schema_ddl(db_schema: &str, schema: &CanonicalSchema) -> Result<Vec<String>> {
    let uploads = qualify_pg(db_schema, UPLOAD_TABLE)?;
    let rows = qualify_pg(db_schema, schema.table())?;
    let signals = qualify_pg(db_schema, SIGNAL_TABLE)?;

    let mut row_columns = vec!["    id BIGSERIAL PRIMARY KEY".to_string()];
    for field in schema.fields() {
        row_columns.push(format!(
            "    {} {}",
            quote_pg(field.canonical)?,
            field.kind.pg_column_type()
        ));
    }
    row_columns.push(format!(
        "    {} BIGINT NOT NULL REFERENCES {} (id) ON DELETE CASCADE",
        quote_pg(schema.upload_column())?,
        uploads
    ));
    row_columns.push("    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()".to_string());

    Ok(vec![
        format!("CREATE SCHEMA IF NOT EXISTS {}", quote_pg(db_schema)?),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    path TEXT,
    source_ip_address TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)",
            uploads
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            rows,
            row_columns.join(",\n")
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_pg(&format!("idx_{}_{}", schema.table(), schema.upload_column()))?,
            rows,
            quote_pg(schema.upload_column())?
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
    id BIGSERIAL PRIMARY KEY,
    data TEXT NOT NULL,
    ip_address TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)",
            signals
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_signal_created_at ON {} (created_at DESC)",
            signals
        ),
    ])
}

/// Prefer the server's message (constraint, column) over the generic wrapper.
fn describe_pg_error(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => match db.detail() {
            Some(detail) => format!("{} ({})", db.message(), detail),
            None => db.message().to_string(),
        },
        None => e.to_string(),
    }
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Null(_) => Ok(IsNull::Yes),
            SqlValue::Text(s) => s.to_sql(ty, out),
            SqlValue::Decimal(d) => d.to_sql(ty, out),
            SqlValue::Integer(n) => n.to_sql(ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        <String as ToSql>::accepts(ty)
            || <Decimal as ToSql>::accepts(ty)
            || <i64 as ToSql>::accepts(ty)
    }

    // The per-variant check keeps a text cell from being encoded into a
    // NUMERIC parameter just because some variant accepts that type.
    fn to_sql_checked(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        let accepted = match self {
            SqlValue::Null(_) => true,
            SqlValue::Text(_) => <String as ToSql>::accepts(ty),
            SqlValue::Decimal(_) => <Decimal as ToSql>::accepts(ty),
            SqlValue::Integer(_) => <i64 as ToSql>::accepts(ty),
        };
        if !accepted {
            return Err(Box::new(WrongType::new::<SqlValue>(ty.clone())));
        }
        self.to_sql(ty, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ValueKind;

    fn header(cols: &[&str]) -> MappedHeader {
        CanonicalSchema::market_signal().map_header(cols).unwrap()
    }

    #[test]
    fn test_row_insert_follows_header_order() {
        let sql = build_row_insert_sql(
            "public",
            CanonicalSchema::market_signal(),
            &header(&["quantity", "Symbol", "action"]),
        )
        .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"public\".\"market_signal\" (\"quantity\", \"symbol\", \"action\", \"source_file_id\") VALUES ($1, $2, $3, $4)"
        );
    }

    #[test]
    fn test_schema_ddl_declares_every_field() {
        let ddl = schema_ddl("trading", CanonicalSchema::market_signal()).unwrap();
        assert_eq!(ddl[0], "CREATE SCHEMA IF NOT EXISTS \"trading\"");
        let rows = &ddl[2];
        assert!(rows.contains("\"symbol\" TEXT NOT NULL"));
        assert!(rows.contains("\"lmt_price\" NUMERIC"));
        assert!(rows.contains("\"parent_order_id\" BIGINT"));
        assert!(rows.contains(
            "\"source_file_id\" BIGINT NOT NULL REFERENCES \"trading\".\"source_file\" (id)"
        ));
        assert!(ddl.iter().any(|s| s.contains("\"trading\".\"signal\"")));
    }

    #[test]
    fn test_to_sql_rejects_mismatched_variant() {
        let mut buf = BytesMut::new();
        let text = SqlValue::Text("abc".into());
        assert!(text.to_sql_checked(&Type::NUMERIC, &mut buf).is_err());

        let qty = SqlValue::Decimal(Decimal::from(100));
        assert!(qty.to_sql_checked(&Type::NUMERIC, &mut buf).is_ok());

        let id = SqlValue::Integer(7);
        assert!(id.to_sql_checked(&Type::INT8, &mut buf).is_ok());
        assert!(id.to_sql_checked(&Type::TEXT, &mut buf).is_err());
    }

    #[test]
    fn test_null_binds_any_type() {
        let mut buf = BytesMut::new();
        let null = SqlValue::Null(ValueKind::Decimal);
        assert!(matches!(
            null.to_sql_checked(&Type::NUMERIC, &mut buf),
            Ok(IsNull::Yes)
        ));
    }
}
