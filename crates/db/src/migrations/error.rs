//! Migration error taxonomy
//!
//! None of these are retried by the engine. Every one of them stops the run
//! and is reported as a startup failure.

use std::path::PathBuf;

use crate::connection::PoolError;
use crate::error::DbError;

pub type MigrationResult<T> = Result<T, MigrationError>;

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Invalid migration file {file_name}: {reason}")]
    Parse { file_name: String, reason: String },

    #[error("{file_name} modified after being applied")]
    Drift {
        version: i64,
        file_name: String,
        recorded: String,
        current: String,
    },

    #[error("Migration {version} ({file_name}) failed: {source}")]
    Failed {
        version: i64,
        file_name: String,
        #[source]
        source: DbError,
    },

    #[error("Migration {version} was recorded by another runner")]
    DuplicateVersion { version: i64 },

    #[error("Timed out acquiring a database connection after {timeout_secs}s")]
    ConnectionTimeout { timeout_secs: u64 },

    #[error("Migration ledger unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Migrations {versions:?} still blocked after {passes} passes")]
    UnresolvedDeferral { versions: Vec<i64>, passes: usize },

    #[error("Migrations have already been started in this process")]
    AlreadyStarted,

    #[error("Shutdown requested before migration {version} was applied")]
    Interrupted { version: i64 },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Database(#[from] DbError),
}

impl MigrationError {
    pub fn parse(file_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            file_name: file_name.into(),
            reason: reason.into(),
        }
    }

    /// Map a ledger fault. Timeouts keep their own kind; everything else means
    /// the ledger could not be reached.
    pub(crate) fn store(err: DbError) -> Self {
        match err {
            DbError::ConnectionTimeout { timeout_secs } => Self::ConnectionTimeout { timeout_secs },
            other => Self::StoreUnavailable(other.to_string()),
        }
    }

    /// Version this error is about, when there is one
    pub fn version(&self) -> Option<i64> {
        match self {
            Self::Drift { version, .. }
            | Self::Failed { version, .. }
            | Self::DuplicateVersion { version }
            | Self::Interrupted { version } => Some(*version),
            _ => None,
        }
    }
}

impl From<PoolError> for MigrationError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::ConnectionTimeout { timeout } => Self::ConnectionTimeout { timeout_secs: timeout },
            other => Self::Database(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drift_message_names_file() {
        let err = MigrationError::Drift {
            version: 2,
            file_name: "002-add-col.sql".into(),
            recorded: "aa".into(),
            current: "bb".into(),
        };
        assert_eq!(err.to_string(), "002-add-col.sql modified after being applied");
        assert_eq!(err.version(), Some(2));
    }

    #[test]
    fn test_store_mapping() {
        assert!(matches!(
            MigrationError::store(DbError::ConnectionTimeout { timeout_secs: 5 }),
            MigrationError::ConnectionTimeout { timeout_secs: 5 }
        ));
        assert!(matches!(
            MigrationError::store(DbError::Query("disk I/O error".into())),
            MigrationError::StoreUnavailable(_)
        ));
    }

    #[test]
    fn test_pool_timeout_conversion() {
        let err: MigrationError = PoolError::ConnectionTimeout { timeout: 30 }.into();
        assert!(matches!(err, MigrationError::ConnectionTimeout { timeout_secs: 30 }));
    }
}
