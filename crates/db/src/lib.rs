//! # ordinal-db
//!
//! Versioned, checksum-verified schema migrations over an embedded SQLite
//! database or a pooled PostgreSQL server.
//!
//! ```ignore
//! let manager = Arc::new(ConnectionManager::connect(&url, pool_config).await?);
//! let adapter = adapter_for(manager.clone());
//! let runner = MigrationRunner::new(adapter, MigrationConfig::default())?;
//! runner.run().await?;
//! ```

pub mod backends;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod migrations;

pub use backends::{
    DatabaseBackend, DatabaseConnection, DatabasePool, DatabasePoolConfig, DatabasePoolStats, DatabaseRow,
    DatabaseTransaction, DatabaseValue, SqlDialect,
};
pub use connection::{ConnectionManager, ExtendedPoolStats, PoolError, PoolHealthReport};
pub use dialect::{adapter_for, with_transaction, DialectAdapter, EmbeddedAdapter, NetworkedAdapter, Transaction};
pub use error::{DbError, DbResult};
pub use migrations::{
    ChecksumStore, MigrationConfig, MigrationError, MigrationFile, MigrationRegistry, MigrationResult,
    MigrationRunResult, MigrationRunner, MigrationStatus, MigrationStatusEntry, RunnerState,
};
