//! sqlx-backed warehouse client. Redshift speaks the Postgres wire protocol,
//! so a plain `PgPool` is enough.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Executor, Postgres, Row as _, Transaction, TypeInfo};
use tracing::{info, instrument};

use super::{redact_credentials, Row, SqlValue, Warehouse, WarehouseTx};
use crate::error::{LoaderError, Result};

/// Connection settings for the warehouse pool.
#[derive(Clone)]
pub struct PoolSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl PoolSettings {
    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
    }
}

/// Warehouse client over a shared connection pool.
#[derive(Debug, Clone)]
pub struct PgWarehouse {
    pool: PgPool,
}

impl PgWarehouse {
    /// Opens the pool and checks it with a trivial query.
    #[instrument(skip_all, fields(host = %settings.host, database = %settings.database), err)]
    pub async fn connect(settings: &PoolSettings) -> Result<Self> {
        info!(
            "Connecting to warehouse host={} port={} dbname={}",
            settings.host, settings.port, settings.database
        );

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(settings.connect_options())
            .await
            .map_err(|e| LoaderError::Database(format!("Failed to connect to warehouse: {}", e)))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| LoaderError::Database(format!("Failed to test connection: {}", e)))?;

        info!("Warehouse connection pool ready");
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn execute(&self, sql: &str) -> Result<u64> {
        info!("Running command: {}", redact_credentials(sql));
        let done = sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        info!("Running query: {}", sql);
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn begin(&self) -> Result<Box<dyn WarehouseTx>> {
        let mut tx = self.pool.begin().await?;
        let backend_pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
            .fetch_one(&mut *tx)
            .await?;
        Ok(Box::new(PgTransaction {
            tx,
            pool: self.pool.clone(),
            backend_pid,
        }))
    }
}

/// Open transaction on one pooled connection. sqlx rolls it back on drop.
struct PgTransaction {
    tx: Transaction<'static, Postgres>,
    /// Used to reach the connection from elsewhere in the pool
    pool: PgPool,
    backend_pid: i32,
}

#[async_trait]
impl WarehouseTx for PgTransaction {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        info!("Running command: {}", redact_credentials(sql));
        let conn: &mut PgConnection = &mut self.tx;
        let done = conn.execute(sqlx::raw_sql(sql)).await?;
        Ok(done.rows_affected())
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        info!("Running query: {}", sql);
        let rows = sqlx::query(sql).fetch_all(&mut *self.tx).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    async fn cancel(&self) -> Result<()> {
        info!("Cancelling statement on backend {}", self.backend_pid);
        // Redshift answers with an int, Postgres with a bool; neither is needed
        sqlx::query("SELECT pg_cancel_backend($1)")
            .bind(self.backend_pid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn decode_row(row: &PgRow) -> Result<Row> {
    row.columns()
        .iter()
        .map(|column| decode_value(row, column.ordinal(), column.type_info().name()))
        .collect()
}

fn decode_value(row: &PgRow, idx: usize, type_name: &str) -> Result<SqlValue> {
    let value = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(idx)?.map(SqlValue::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(idx)?
            .map(|v| SqlValue::Int(i64::from(v))),
        "INT4" => row
            .try_get::<Option<i32>, _>(idx)?
            .map(|v| SqlValue::Int(i64::from(v))),
        "INT8" => row.try_get::<Option<i64>, _>(idx)?.map(SqlValue::Int),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)?
            .map(|v| SqlValue::Float(f64::from(v))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx)?.map(SqlValue::Float),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map(SqlValue::Timestamp),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)?
            .map(SqlValue::TimestampTz),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(idx)?.map(SqlValue::Date),
        // catalog queries cast everything else to text
        _ => row.try_get::<Option<String>, _>(idx)?.map(SqlValue::Text),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}
