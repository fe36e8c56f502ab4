//! SQLite Backend Implementation
//!
//! The embedded dialect. The pool is pinned to exactly one connection that is
//! opened at startup and never expires, so every operation serialises through
//! it and an in-memory database lives as long as the pool.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Pool, Row as SqlxRow, Sqlite, TypeInfo, ValueRef};

use super::core::*;
use crate::error::{DbError, DbResult};

/// SQLite database backend implementation
#[derive(Debug, Default)]
pub struct SqliteBackend;

impl SqliteBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DatabaseBackend for SqliteBackend {
    async fn create_pool(&self, database_url: &str, config: DatabasePoolConfig) -> DbResult<Arc<dyn DatabasePool>> {
        let connect_options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| DbError::Configuration(format!("Invalid SQLite URL: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        if config.max_connections != 1 {
            tracing::debug!(
                "Ignoring max_connections={} for SQLite; the embedded engine uses a single connection",
                config.max_connections
            );
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(connect_options)
            .await
            .map_err(|e| match DbError::from_sqlx(e, config.acquire_timeout_seconds) {
                timeout @ DbError::ConnectionTimeout { .. } => timeout,
                other => DbError::Connection(format!("Failed to open SQLite database: {}", other)),
            })?;

        tracing::debug!("SQLite connection opened");

        Ok(Arc::new(SqlitePool::new(pool, config.acquire_timeout_seconds)))
    }

    fn sql_dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    fn validate_database_url(&self, url: &str) -> DbResult<()> {
        if !url.starts_with("sqlite:") {
            return Err(DbError::Configuration("Invalid SQLite URL scheme".to_string()));
        }
        Ok(())
    }
}

/// Single-connection SQLite pool
pub struct SqlitePool {
    pool: Pool<Sqlite>,
    acquire_timeout_secs: u64,
}

impl SqlitePool {
    pub fn new(pool: Pool<Sqlite>, acquire_timeout_secs: u64) -> Self {
        Self {
            pool,
            acquire_timeout_secs,
        }
    }
}

#[async_trait]
impl DatabasePool for SqlitePool {
    async fn acquire(&self) -> DbResult<Box<dyn DatabaseConnection>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DbError::from_sqlx(e, self.acquire_timeout_secs))?;

        Ok(Box::new(SqliteConnection {
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

        Ok(Box::new(SqliteTransaction {
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

/// The shared SQLite connection, checked out
pub struct SqliteConnection {
    conn: sqlx::pool::PoolConnection<Sqlite>,
    acquire_timeout_secs: u64,
}

#[async_trait]
impl DatabaseConnection for SqliteConnection {
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
        sqlx::Executor::execute(&mut *self.conn, sql)
            .await
            .map_err(|e| DbError::from_sqlx(e, self.acquire_timeout_secs))?;
        Ok(())
    }
}

/// SQLite transaction implementation
pub struct SqliteTransaction {
    tx: Option<sqlx::Transaction<'static, Sqlite>>,
    acquire_timeout_secs: u64,
}

impl SqliteTransaction {
    fn open(&mut self) -> DbResult<&mut sqlx::Transaction<'static, Sqlite>> {
        self.tx
            .as_mut()
            .ok_or_else(|| DbError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseTransaction for SqliteTransaction {
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

/// SQLite row implementation
pub struct SqliteRowAdapter {
    row: SqliteRow,
}

impl DatabaseRow for SqliteRowAdapter {
    fn get_by_index(&self, index: usize) -> DbResult<DatabaseValue> {
        if index >= self.row.len() {
            return Err(DbError::ColumnNotFound(format!("#{}", index)));
        }
        sqlite_value_to_database_value(&self.row, index)
    }

    fn get_by_name(&self, name: &str) -> DbResult<DatabaseValue> {
        let index = self
            .row
            .columns()
            .iter()
            .position(|col| col.name() == name)
            .ok_or_else(|| DbError::ColumnNotFound(name.to_string()))?;

        sqlite_value_to_database_value(&self.row, index)
    }

    fn column_count(&self) -> usize {
        self.row.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.row.columns().iter().map(|col| col.name().to_string()).collect()
    }
}

fn wrap_rows(rows: Vec<SqliteRow>) -> Vec<Box<dyn DatabaseRow>> {
    rows.into_iter()
        .map(|row| Box::new(SqliteRowAdapter { row }) as Box<dyn DatabaseRow>)
        .collect()
}

fn build_query<'q>(sql: &'q str, params: &[DatabaseValue]) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, param| bind_database_value(query, param))
}

fn bind_database_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &DatabaseValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float32(f) => query.bind(*f),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Uuid(u) => query.bind(u.to_string()),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Date(d) => query.bind(*d),
        DatabaseValue::Time(t) => query.bind(*t),
        // SQLite has no JSON storage class; store the text form
        DatabaseValue::Json(j) => query.bind(j.to_string()),
    }
}

fn decode_err(type_name: &str, e: sqlx::Error) -> DbError {
    DbError::Serialization(format!("Failed to decode {} value: {}", type_name, e))
}

/// Convert a SQLite value to DatabaseValue.
///
/// SQLite types values, not columns, so the runtime storage class decides the
/// variant. Anything that is not an integer, real or blob comes back as text.
fn sqlite_value_to_database_value(row: &SqliteRow, index: usize) -> DbResult<DatabaseValue> {
    let raw = row.try_get_raw(index).map_err(|e| decode_err("raw", e))?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let type_name = raw.type_info().name().to_uppercase();

    let value = match type_name.as_str() {
        "INTEGER" | "BIGINT" | "INT" | "INT8" => {
            DatabaseValue::Int64(row.try_get_unchecked(index).map_err(|e| decode_err(&type_name, e))?)
        }
        "BOOLEAN" => DatabaseValue::Bool(row.try_get_unchecked(index).map_err(|e| decode_err(&type_name, e))?),
        "REAL" | "FLOAT" | "DOUBLE" => {
            DatabaseValue::Float64(row.try_get_unchecked(index).map_err(|e| decode_err(&type_name, e))?)
        }
        "BLOB" => DatabaseValue::Bytes(row.try_get_unchecked(index).map_err(|e| decode_err(&type_name, e))?),
        _ => DatabaseValue::String(row.try_get_unchecked(index).map_err(|e| decode_err(&type_name, e))?),
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> Arc<dyn DatabasePool> {
        SqliteBackend::new()
            .create_pool("sqlite::memory:", DatabasePoolConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_single_connection_pool() {
        let pool = memory_pool().await;
        let stats = pool.stats();
        assert_eq!(stats.total_connections, 1);
        assert!(pool.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_state_survives_between_acquires() {
        let pool = memory_pool().await;

        {
            let mut conn = pool.acquire().await.unwrap();
            conn.execute_script("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT); INSERT INTO notes (body) VALUES ('a');")
                .await
                .unwrap();
        }

        let mut conn = pool.acquire().await.unwrap();
        let rows = conn.fetch_all("SELECT id, body FROM notes", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("id").unwrap(), DatabaseValue::Int64(1));
        assert_eq!(rows[0].get_by_name("body").unwrap(), DatabaseValue::String("a".into()));
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let pool = memory_pool().await;
        pool.acquire()
            .await
            .unwrap()
            .execute_script("CREATE TABLE t (v INTEGER)")
            .await
            .unwrap();

        let mut tx = pool.begin_transaction().await.unwrap();
        tx.execute("INSERT INTO t (v) VALUES (?)", &[DatabaseValue::Int64(5)])
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let rows = conn.fetch_all("SELECT v FROM t", &[]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_missing_table_is_classified() {
        let pool = memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let Err(err) = conn.fetch_all("SELECT * FROM nowhere", &[]).await else {
            panic!("expected an error for a missing table");
        };
        assert!(err.is_undefined_table(), "unexpected error: {:?}", err);
    }

    #[tokio::test]
    async fn test_duplicate_primary_key_is_classified() {
        let pool = memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        conn.execute_script("CREATE TABLE k (id INTEGER PRIMARY KEY)").await.unwrap();
        conn.execute("INSERT INTO k (id) VALUES (?)", &[DatabaseValue::Int64(1)])
            .await
            .unwrap();
        let err = conn
            .execute("INSERT INTO k (id) VALUES (?)", &[DatabaseValue::Int64(1)])
            .await
            .unwrap_err();
        assert!(err.is_unique_violation(), "unexpected error: {:?}", err);
    }

    #[tokio::test]
    async fn test_null_and_real_values() {
        let pool = memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let rows = conn
            .fetch_all("SELECT NULL AS empty, 1.5 AS ratio", &[])
            .await
            .unwrap();
        assert!(rows[0].get_by_name("empty").unwrap().is_null());
        assert_eq!(rows[0].get_by_name("ratio").unwrap(), DatabaseValue::Float64(1.5));
        assert!(matches!(rows[0].get_by_name("missing"), Err(DbError::ColumnNotFound(_))));
    }
}
