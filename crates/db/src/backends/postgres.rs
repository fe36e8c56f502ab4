//! PostgreSQL Backend Implementation
//!
//! The networked dialect: a bounded sqlx pool with acquire, idle and lifetime
//! limits taken from `DatabasePoolConfig`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::TimeZone;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Pool, Postgres, Row as SqlxRow, TypeInfo, ValueRef};

use super::core::*;
use crate::error::{DbError, DbResult};

/// PostgreSQL database backend implementation
#[derive(Debug, Default)]
pub struct PostgresBackend;

impl PostgresBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DatabaseBackend for PostgresBackend {
    async fn create_pool(&self, database_url: &str, config: DatabasePoolConfig) -> DbResult<Arc<dyn DatabasePool>> {
        if config.min_connections > config.max_connections {
            return Err(DbError::Configuration(format!(
                "min_connections ({}) exceeds max_connections ({})",
                config.min_connections, config.max_connections
            )));
        }

        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .test_before_acquire(config.test_before_acquire);

        if let Some(idle_timeout) = config.idle_timeout_seconds {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }

        if let Some(max_lifetime) = config.max_lifetime_seconds {
            options = options.max_lifetime(Duration::from_secs(max_lifetime));
        }

        let pool = options
            .connect(database_url)
            .await
            .map_err(|e| match DbError::from_sqlx(e, config.acquire_timeout_seconds) {
                timeout @ DbError::ConnectionTimeout { .. } => timeout,
                other => DbError::Connection(format!("Failed to create PostgreSQL pool: {}", other)),
            })?;

        tracing::debug!(
            "PostgreSQL pool created (max: {}, min: {}, acquire timeout: {}s)",
            config.max_connections,
            config.min_connections,
            config.acquire_timeout_seconds
        );

        Ok(Arc::new(PostgresPool::new(pool, config.acquire_timeout_seconds)))
    }

    fn sql_dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
    }

    fn validate_database_url(&self, url: &str) -> DbResult<()> {
        if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
            return Err(DbError::Configuration("Invalid PostgreSQL URL scheme".to_string()));
        }
        Ok(())
    }
}

/// PostgreSQL connection pool implementation
pub struct PostgresPool {
    pool: Pool<Postgres>,
    acquire_timeout_secs: u64,
}

impl PostgresPool {
    pub fn new(pool: Pool<Postgres>, acquire_timeout_secs: u64) -> Self {
        Self {
            pool,
            acquire_timeout_secs,
        }
    }
}

#[async_trait]
impl DatabasePool for PostgresPool {
    async fn acquire(&self) -> DbResult<Box<dyn DatabaseConnection>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DbError::from_sqlx(e, self.acquire_timeout_secs))?;

        Ok(Box::new(PostgresConnection {
            conn,
            acquire_timeout_secs: self.acquire_timeout_secs,
        }))
    }

    async fn begin_transaction(&self) -> DbResult<Box<dyn DatabaseTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::from_sqlx(e, self.acquire_timeout_secs))?;

        Ok(Box::new(PostgresTransaction {
            tx: Some(tx),
            acquire_timeout_secs: self.acquire_timeout_secs,
        }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn stats(&self) -> DatabasePoolStats {
        DatabasePoolStats::from_counts(self.pool.size(), self.pool.num_idle())
    }

    async fn health_check(&self) -> DbResult<Duration> {
        let start = Instant::now();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| DbError::from_sqlx(e, self.acquire_timeout_secs))?;

        Ok(start.elapsed())
    }
}

/// PostgreSQL connection implementation
pub struct PostgresConnection {
    conn: sqlx::pool::PoolConnection<Postgres>,
    acquire_timeout_secs: u64,
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64> {
        let result = build_query(sql, params)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| DbError::from_sqlx(e, self.acquire_timeout_secs))?;

        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<Vec<Box<dyn DatabaseRow>>> {
        let rows = build_query(sql, params)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|e| DbError::from_sqlx(e, self.acquire_timeout_secs))?;

        Ok(wrap_rows(rows))
    }

    async fn execute_script(&mut self, sql: &str) -> DbResult<()> {
        // An unprepared &str goes over the simple query protocol, which accepts
        // several statements in one message.
        sqlx::Executor::execute(&mut *self.conn, sql)
            .await
            .map_err(|e| DbError::from_sqlx(e, self.acquire_timeout_secs))?;
        Ok(())
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
    acquire_timeout_secs: u64,
}

impl PostgresTransaction {
    fn open(&mut self) -> DbResult<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| DbError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64> {
        let timeout = self.acquire_timeout_secs;
        let tx = self.open()?;

        let result = build_query(sql, params)
            .execute(&mut **tx)
            .await
            .map_err(|e| DbError::from_sqlx(e, timeout))?;

        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<Vec<Box<dyn DatabaseRow>>> {
        let timeout = self.acquire_timeout_secs;
        let tx = self.open()?;

        let rows = build_query(sql, params)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| DbError::from_sqlx(e, timeout))?;

        Ok(wrap_rows(rows))
    }

    async fn execute_script(&mut self, sql: &str) -> DbResult<()> {
        let timeout = self.acquire_timeout_secs;
        let tx = self.open()?;

        sqlx::Executor::execute(&mut **tx, sql)
            .await
            .map_err(|e| DbError::from_sqlx(e, timeout))?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> DbResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| DbError::Transaction("Transaction already completed".to_string()))?;

        tx.commit()
            .await
            .map_err(|e| DbError::Transaction(format!("Transaction commit failed: {}", e)))
    }

    async fn rollback(mut self: Box<Self>) -> DbResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| DbError::Transaction("Transaction already completed".to_string()))?;

        tx.rollback()
            .await
            .map_err(|e| DbError::Transaction(format!("Transaction rollback failed: {}", e)))
    }
}

/// PostgreSQL row implementation
pub struct PostgresRow {
    row: PgRow,
}

impl PostgresRow {
    pub fn new(row: PgRow) -> Self {
        Self { row }
    }
}

impl DatabaseRow for PostgresRow {
    fn get_by_index(&self, index: usize) -> DbResult<DatabaseValue> {
        if index >= self.row.len() {
            return Err(DbError::ColumnNotFound(format!("#{}", index)));
        }
        postgres_value_to_database_value(&self.row, index)
    }

    fn get_by_name(&self, name: &str) -> DbResult<DatabaseValue> {
        let index = self
            .row
            .columns()
            .iter()
            .position(|col| col.name() == name)
            .ok_or_else(|| DbError::ColumnNotFound(name.to_string()))?;

        postgres_value_to_database_value(&self.row, index)
    }

    fn column_count(&self) -> usize {
        self.row.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.row.columns().iter().map(|col| col.name().to_string()).collect()
    }
}

fn wrap_rows(rows: Vec<PgRow>) -> Vec<Box<dyn DatabaseRow>> {
    rows.into_iter()
        .map(|row| Box::new(PostgresRow::new(row)) as Box<dyn DatabaseRow>)
        .collect()
}

fn build_query<'q>(sql: &'q str, params: &[DatabaseValue]) -> Query<'q, Postgres, PgArguments> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, param| bind_database_value(query, param))
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &DatabaseValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float32(f) => query.bind(*f),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Uuid(u) => query.bind(*u),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Date(d) => query.bind(*d),
        DatabaseValue::Time(t) => query.bind(*t),
        DatabaseValue::Json(j) => query.bind(j.clone()),
    }
}

fn decode_err(type_name: &str, e: sqlx::Error) -> DbError {
    DbError::Serialization(format!("Failed to decode {} value: {}", type_name, e))
}

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &PgRow, index: usize) -> DbResult<DatabaseValue> {
    let raw = row.try_get_raw(index).map_err(|e| decode_err("raw", e))?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "BOOL" => DatabaseValue::Bool(row.try_get(index).map_err(|e| decode_err(&type_name, e))?),
        "INT2" => {
            let v: i16 = row.try_get(index).map_err(|e| decode_err(&type_name, e))?;
            DatabaseValue::Int32(v as i32)
        }
        "INT4" => DatabaseValue::Int32(row.try_get(index).map_err(|e| decode_err(&type_name, e))?),
        "INT8" => DatabaseValue::Int64(row.try_get(index).map_err(|e| decode_err(&type_name, e))?),
        "FLOAT4" => DatabaseValue::Float32(row.try_get(index).map_err(|e| decode_err(&type_name, e))?),
        "FLOAT8" => DatabaseValue::Float64(row.try_get(index).map_err(|e| decode_err(&type_name, e))?),
        "BYTEA" => DatabaseValue::Bytes(row.try_get(index).map_err(|e| decode_err(&type_name, e))?),
        "UUID" => DatabaseValue::Uuid(row.try_get(index).map_err(|e| decode_err(&type_name, e))?),
        "TIMESTAMPTZ" => DatabaseValue::DateTime(row.try_get(index).map_err(|e| decode_err(&type_name, e))?),
        "TIMESTAMP" => {
            let naive: chrono::NaiveDateTime = row.try_get(index).map_err(|e| decode_err(&type_name, e))?;
            DatabaseValue::DateTime(chrono::Utc.from_utc_datetime(&naive))
        }
        "DATE" => DatabaseValue::Date(row.try_get(index).map_err(|e| decode_err(&type_name, e))?),
        "TIME" => DatabaseValue::Time(row.try_get(index).map_err(|e| decode_err(&type_name, e))?),
        "JSON" | "JSONB" => {
            let v: JsonValue = row.try_get(index).map_err(|e| decode_err(&type_name, e))?;
            DatabaseValue::Json(v)
        }
        _ => DatabaseValue::String(row.try_get(index).map_err(|e| decode_err(&type_name, e))?),
    };

    Ok(value)
}
