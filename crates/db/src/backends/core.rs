//! Core Database Backend Traits
//!
//! The traits here hide the two physical engines behind one interface. A
//! backend builds a pool; the pool hands out scoped connections and
//! transactions; both return rows as `DatabaseRow` trait objects holding
//! `DatabaseValue`s.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::{DbError, DbResult};

/// A connection checked out of a pool.
///
/// Dropping the handle returns the connection to its pool, so every acquire is
/// paired with a release on every path out of the caller.
#[async_trait]
pub trait DatabaseConnection: Send {
    /// Execute one statement and return the affected row count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64>;

    /// Execute one statement and return all rows
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute a multi-statement script without parameters
    async fn execute_script(&mut self, sql: &str) -> DbResult<()>;
}

/// An open transaction holding its own connection.
///
/// Dropping a transaction that was neither committed nor rolled back rolls it
/// back before the connection is reused.
#[async_trait]
pub trait DatabaseTransaction: Send {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64>;

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<Vec<Box<dyn DatabaseRow>>>;

    async fn execute_script(&mut self, sql: &str) -> DbResult<()>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> DbResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> DbResult<()>;
}

/// Abstract database connection pool trait
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Acquire a connection, waiting at most the configured acquire timeout
    async fn acquire(&self) -> DbResult<Box<dyn DatabaseConnection>>;

    /// Acquire a connection and issue BEGIN on it
    async fn begin_transaction(&self) -> DbResult<Box<dyn DatabaseTransaction>>;

    /// Close the pool, waiting for checked-out connections to come back
    async fn close(&self);

    /// Get pool statistics
    fn stats(&self) -> DatabasePoolStats;

    /// Round-trip a trivial query and report how long it took
    async fn health_check(&self) -> DbResult<Duration>;
}

/// Database pool statistics
#[derive(Debug, Clone, Serialize)]
pub struct DatabasePoolStats {
    pub total_connections: u32,
    pub idle_connections: u32,
    pub active_connections: u32,
}

impl DatabasePoolStats {
    pub(crate) fn from_counts(size: u32, idle: usize) -> Self {
        let idle = idle as u32;
        Self {
            total_connections: size,
            idle_connections: idle,
            active_connections: size.saturating_sub(idle),
        }
    }
}

/// Abstract database row trait
pub trait DatabaseRow: Send + Sync {
    /// Get a column value by index
    fn get_by_index(&self, index: usize) -> DbResult<DatabaseValue>;

    /// Get a column value by name
    fn get_by_name(&self, name: &str) -> DbResult<DatabaseValue>;

    fn column_count(&self) -> usize;

    fn column_names(&self) -> Vec<String>;
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    DateTime(chrono::DateTime<chrono::Utc>),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    Json(JsonValue),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int32(i) => Some(*i as i64),
            DatabaseValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// The two SQL dialects the engine speaks.
///
/// `SQLite` is the embedded single-file engine, `PostgreSQL` the networked
/// pooled one. Which one is active is decided once from the database URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    PostgreSQL,
    SQLite,
}

impl SqlDialect {
    /// Detect the dialect from a database URL scheme
    pub fn from_database_url(url: &str) -> DbResult<Self> {
        if url.starts_with("postgresql://") || url.starts_with("postgres://") {
            Ok(SqlDialect::PostgreSQL)
        } else if url.starts_with("sqlite:") {
            Ok(SqlDialect::SQLite)
        } else {
            Err(DbError::Configuration(format!(
                "Unable to detect database backend from URL scheme: {}",
                url.split(':').next().unwrap_or_default()
            )))
        }
    }

    /// Native placeholder for the parameter at `index` (zero-based)
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::SQLite => "?".to_string(),
        }
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self, SqlDialect::SQLite)
    }

    pub fn is_networked(&self) -> bool {
        matches!(self, SqlDialect::PostgreSQL)
    }
}

impl std::fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlDialect::PostgreSQL => write!(f, "postgresql"),
            SqlDialect::SQLite => write!(f, "sqlite"),
        }
    }
}

/// Database backend trait that provides database-specific implementations
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Create a connection pool from a database URL
    async fn create_pool(&self, database_url: &str, config: DatabasePoolConfig) -> DbResult<Arc<dyn DatabasePool>>;

    /// Get the SQL dialect used by this backend
    fn sql_dialect(&self) -> SqlDialect;

    /// Validate a database URL for this backend
    fn validate_database_url(&self, url: &str) -> DbResult<()>;
}

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct DatabasePoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// Bounds every acquire, including opening a fresh connection
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: Option<u64>,
    pub max_lifetime_seconds: Option<u64>,
    pub test_before_acquire: bool,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 30,
            idle_timeout_seconds: Some(600), // 10 minutes
            max_lifetime_seconds: Some(1800), // 30 minutes
            test_before_acquire: true,
        }
    }
}

impl From<&ordinal_core::config::PoolSettings> for DatabasePoolConfig {
    fn from(settings: &ordinal_core::config::PoolSettings) -> Self {
        Self {
            max_connections: settings.max_connections,
            min_connections: settings.min_connections,
            acquire_timeout_seconds: settings.connect_timeout_secs,
            idle_timeout_seconds: settings.idle_timeout_secs,
            max_lifetime_seconds: settings.max_lifetime_secs,
            ..Self::default()
        }
    }
}

/// Pick the backend for a database URL
pub fn backend_for_url(url: &str) -> DbResult<Arc<dyn DatabaseBackend>> {
    let backend: Arc<dyn DatabaseBackend> = match SqlDialect::from_database_url(url)? {
        SqlDialect::PostgreSQL => Arc::new(super::postgres::PostgresBackend::new()),
        SqlDialect::SQLite => Arc::new(super::sqlite::SqliteBackend::new()),
    };
    backend.validate_database_url(url)?;
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_detection_from_url() {
        assert_eq!(
            SqlDialect::from_database_url("postgres://localhost/app").unwrap(),
            SqlDialect::PostgreSQL
        );
        assert_eq!(
            SqlDialect::from_database_url("postgresql://u:p@db:5432/app").unwrap(),
            SqlDialect::PostgreSQL
        );
        assert_eq!(SqlDialect::from_database_url("sqlite::memory:").unwrap(), SqlDialect::SQLite);
        assert_eq!(SqlDialect::from_database_url("sqlite://data/app.db").unwrap(), SqlDialect::SQLite);
        assert!(SqlDialect::from_database_url("mysql://localhost/app").is_err());
    }

    #[test]
    fn test_parameter_placeholder() {
        assert_eq!(SqlDialect::PostgreSQL.parameter_placeholder(0), "$1");
        assert_eq!(SqlDialect::PostgreSQL.parameter_placeholder(4), "$5");
        assert_eq!(SqlDialect::SQLite.parameter_placeholder(4), "?");
    }

    #[test]
    fn test_dialect_display() {
        assert_eq!(SqlDialect::SQLite.to_string(), "sqlite");
        assert_eq!(SqlDialect::PostgreSQL.to_string(), "postgresql");
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(DatabaseValue::from(3i64).as_i64(), Some(3));
        assert_eq!(DatabaseValue::from(3i32).as_i64(), Some(3));
        assert_eq!(DatabaseValue::from("abc").as_str(), Some("abc"));
        assert!(DatabaseValue::from(None::<String>).is_null());
    }

    #[test]
    fn test_pool_stats_from_counts() {
        let stats = DatabasePoolStats::from_counts(4, 1);
        assert_eq!(stats.total_connections, 4);
        assert_eq!(stats.idle_connections, 1);
        assert_eq!(stats.active_connections, 3);
    }
}
