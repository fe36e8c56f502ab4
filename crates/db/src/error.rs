//! Error types for the database layer
//!
//! `DbError` covers everything below the migration engine: connecting,
//! acquiring, executing and decoding. Driver errors are classified here so the
//! engine can tell a missing table or a unique violation apart from any other
//! fault without looking at driver-specific codes.

/// Result type alias for database operations
pub type DbResult<T> = Result<T, DbError>;

/// Error types for database operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DbError {
    /// Could not open or reach the database
    #[error("Connection error: {0}")]
    Connection(String),
    /// A connection could not be acquired within the configured bound
    #[error("Timed out acquiring a connection after {timeout_secs}s")]
    ConnectionTimeout { timeout_secs: u64 },
    /// Statement preparation or execution failed
    #[error("Query error: {0}")]
    Query(String),
    /// The statement referenced a table that does not exist
    #[error("Undefined table: {0}")]
    UndefinedTable(String),
    /// A unique or primary key constraint rejected the statement
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),
    /// BEGIN, COMMIT or ROLLBACK failed, or the transaction was already closed
    #[error("Transaction error: {0}")]
    Transaction(String),
    /// Invalid URL or pool settings
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// A column value could not be decoded into the requested type
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Column lookup by name failed
    #[error("Column '{0}' not found")]
    ColumnNotFound(String),
}

impl DbError {
    /// Classify a driver error.
    ///
    /// `acquire_timeout_secs` is reported when the pool gave up waiting for a
    /// connection.
    pub fn from_sqlx(err: sqlx::Error, acquire_timeout_secs: u64) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => DbError::ConnectionTimeout {
                timeout_secs: acquire_timeout_secs,
            },
            sqlx::Error::PoolClosed => DbError::Connection("connection pool is closed".to_string()),
            sqlx::Error::Io(e) => DbError::Connection(e.to_string()),
            sqlx::Error::Tls(e) => DbError::Connection(e.to_string()),
            sqlx::Error::Configuration(e) => DbError::Configuration(e.to_string()),
            sqlx::Error::ColumnNotFound(name) => DbError::ColumnNotFound(name),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::Serialization(format!("column {}: {}", index, source))
            }
            sqlx::Error::Decode(e) => DbError::Serialization(e.to_string()),
            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                let code = db_err.code().map(|c| c.into_owned());

                // 42P01 is PostgreSQL's undefined_table
                if code.as_deref() == Some("42P01") || message.contains("no such table") {
                    DbError::UndefinedTable(message)
                } else if db_err.is_unique_violation()
                    || message.contains("UNIQUE constraint failed")
                {
                    DbError::UniqueViolation(message)
                } else {
                    DbError::Query(message)
                }
            }
            other => DbError::Query(other.to_string()),
        }
    }

    /// True when the error means the table is absent
    pub fn is_undefined_table(&self) -> bool {
        matches!(self, DbError::UndefinedTable(_))
    }

    /// True when a unique or primary key constraint fired
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DbError::UniqueViolation(_))
    }

    /// True when the pool could not hand out a connection in time
    pub fn is_timeout(&self) -> bool {
        matches!(self, DbError::ConnectionTimeout { .. })
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}
