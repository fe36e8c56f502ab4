//! Connection Management
//!
//! `ConnectionManager` owns the process's only pool. It is created once at
//! the composition root and shared by reference; nothing else opens
//! connections.

use super::health::PoolHealthReport;
use super::statistics::ExtendedPoolStats;
use crate::backends::{
    backend_for_url, DatabaseConnection, DatabasePool, DatabasePoolConfig, DatabasePoolStats,
    DatabaseTransaction, SqlDialect,
};
use crate::error::DbError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Database connection pool error types
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Connection acquisition failed: {0}")]
    AcquisitionFailed(String),

    #[error("Connection timeout after {timeout}s")]
    ConnectionTimeout { timeout: u64 },

    #[error("Health check failed: {reason}")]
    HealthCheckFailed { reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },
}

impl PoolError {
    fn from_db(err: DbError) -> Self {
        match err {
            DbError::ConnectionTimeout { timeout_secs } => PoolError::ConnectionTimeout { timeout: timeout_secs },
            DbError::Configuration(message) => PoolError::ConfigurationError { message },
            other => PoolError::AcquisitionFailed(other.to_string()),
        }
    }
}

impl From<PoolError> for DbError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::AcquisitionFailed(msg) => DbError::Connection(format!("Database connection failed: {}", msg)),
            PoolError::ConnectionTimeout { timeout } => DbError::ConnectionTimeout { timeout_secs: timeout },
            PoolError::HealthCheckFailed { reason } => {
                DbError::Connection(format!("Database health check failed: {}", reason))
            }
            PoolError::ConfigurationError { message } => DbError::Configuration(message),
        }
    }
}

/// Owner of the embedded connection or the networked pool
pub struct ConnectionManager {
    pool: Arc<dyn DatabasePool>,
    dialect: SqlDialect,
    config: DatabasePoolConfig,
    acquire_count: AtomicU64,
    acquire_errors: AtomicU64,
    created_at: Instant,
}

impl ConnectionManager {
    /// Open the pool for `database_url`, choosing the backend from its scheme
    pub async fn connect(database_url: &str, config: DatabasePoolConfig) -> Result<Self, PoolError> {
        let backend = backend_for_url(database_url).map_err(PoolError::from_db)?;
        let dialect = backend.sql_dialect();

        let pool = backend
            .create_pool(database_url, config.clone())
            .await
            .map_err(|e| {
                let pool_error = PoolError::from_db(e);
                tracing::error!("Failed to open {} database: {}", dialect, pool_error);
                pool_error
            })?;

        tracing::info!("Connected to {} database", dialect);
        Ok(Self::new(pool, dialect, config))
    }

    pub fn new(pool: Arc<dyn DatabasePool>, dialect: SqlDialect, config: DatabasePoolConfig) -> Self {
        Self {
            pool,
            dialect,
            config,
            acquire_count: AtomicU64::new(0),
            acquire_errors: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Acquire a connection; it goes back to the pool when the handle drops
    pub async fn acquire(&self) -> Result<Box<dyn DatabaseConnection>, PoolError> {
        self.acquire_count.fetch_add(1, Ordering::Relaxed);

        match self.pool.acquire().await {
            Ok(conn) => {
                let stats = self.pool.stats();
                tracing::debug!(
                    "Database connection acquired (total: {}, idle: {})",
                    stats.total_connections,
                    stats.idle_connections
                );
                Ok(conn)
            }
            Err(e) => {
                self.acquire_errors.fetch_add(1, Ordering::Relaxed);
                let pool_error = PoolError::from_db(e);
                tracing::error!("Failed to acquire database connection: {}", pool_error);
                Err(pool_error)
            }
        }
    }

    /// Acquire a connection and open a transaction on it
    pub async fn begin_transaction(&self) -> Result<Box<dyn DatabaseTransaction>, PoolError> {
        self.acquire_count.fetch_add(1, Ordering::Relaxed);

        match self.pool.begin_transaction().await {
            Ok(tx) => {
                tracing::debug!("Database transaction started");
                Ok(tx)
            }
            Err(e) => {
                self.acquire_errors.fetch_add(1, Ordering::Relaxed);
                let pool_error = PoolError::from_db(e);
                tracing::error!("Failed to begin database transaction: {}", pool_error);
                Err(pool_error)
            }
        }
    }

    pub fn extended_stats(&self) -> ExtendedPoolStats {
        ExtendedPoolStats {
            pool_stats: self.pool.stats(),
            acquire_count: self.acquire_count.load(Ordering::Relaxed),
            acquire_errors: self.acquire_errors.load(Ordering::Relaxed),
            created_at: self.created_at,
        }
    }

    pub fn stats(&self) -> DatabasePoolStats {
        self.pool.stats()
    }

    pub async fn health_check(&self) -> Result<Duration, PoolError> {
        match self.pool.health_check().await {
            Ok(duration) => {
                tracing::debug!("Database health check passed in {:?}", duration);
                Ok(duration)
            }
            Err(e) => {
                let pool_error = PoolError::HealthCheckFailed { reason: e.to_string() };
                tracing::error!("Database health check failed: {}", pool_error);
                Err(pool_error)
            }
        }
    }

    /// Run a health check and bundle it with the current counters
    pub async fn detailed_health_check(&self) -> Result<PoolHealthReport, PoolError> {
        let start = Instant::now();
        let check_duration = self.health_check().await?;
        let stats = self.extended_stats();

        let report = PoolHealthReport {
            dialect: self.dialect,
            check_duration,
            total_check_time: start.elapsed(),
            pool_size: stats.pool_stats.total_connections,
            max_connections: self.max_connections(),
            idle_connections: stats.pool_stats.idle_connections,
            active_connections: stats.pool_stats.active_connections,
            total_acquires: stats.acquire_count,
            total_errors: stats.acquire_errors,
            error_rate: stats.error_rate(),
            uptime: stats.uptime(),
        };

        tracing::debug!("Database pool health report: {:?}", report);
        Ok(report)
    }

    pub fn config(&self) -> &DatabasePoolConfig {
        &self.config
    }

    /// Effective upper bound on open connections
    pub fn max_connections(&self) -> u32 {
        if self.dialect.is_embedded() {
            1
        } else {
            self.config.max_connections
        }
    }

    /// Close the pool; waits for checked-out connections to be returned
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }
}
