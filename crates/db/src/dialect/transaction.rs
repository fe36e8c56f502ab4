//! Transaction Management
//!
//! `Transaction` wraps a backend transaction with the adapter's placeholder
//! translation. `with_transaction` is the scoped form: BEGIN, run the closure,
//! COMMIT on `Ok`, ROLLBACK on `Err`, and release the connection either way.

use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use super::adapter::DialectAdapter;
use super::placeholders::rewrite_placeholders;
use crate::backends::{DatabaseRow, DatabaseTransaction, DatabaseValue, SqlDialect};
use crate::error::{DbError, DbResult};

/// An open transaction bound to one connection
pub struct Transaction {
    inner: Option<Box<dyn DatabaseTransaction>>,
    dialect: SqlDialect,
}

impl Transaction {
    pub(crate) fn new(inner: Box<dyn DatabaseTransaction>, dialect: SqlDialect) -> Self {
        Self {
            inner: Some(inner),
            dialect,
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    fn inner_mut(&mut self) -> DbResult<&mut Box<dyn DatabaseTransaction>> {
        self.inner
            .as_mut()
            .ok_or_else(|| DbError::Transaction("Transaction already completed".to_string()))
    }

    /// Execute one statement written with `?` placeholders
    pub async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64> {
        let sql = rewrite_placeholders(sql, self.dialect, params.len())?;
        self.inner_mut()?.execute(&sql, params).await
    }

    /// Run one query written with `?` placeholders and return its rows
    pub async fn query(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<Vec<Box<dyn DatabaseRow>>> {
        let sql = rewrite_placeholders(sql, self.dialect, params.len())?;
        self.inner_mut()?.fetch_all(&sql, params).await
    }

    /// Execute a parameterless multi-statement script verbatim
    pub async fn execute_script(&mut self, sql: &str) -> DbResult<()> {
        self.inner_mut()?.execute_script(sql).await
    }

    pub async fn commit(mut self) -> DbResult<()> {
        let inner = self
            .inner
            .take()
            .ok_or_else(|| DbError::Transaction("Transaction already completed".to_string()))?;
        inner.commit().await?;
        debug!("Transaction committed");
        Ok(())
    }

    pub async fn rollback(mut self) -> DbResult<()> {
        let inner = self
            .inner
            .take()
            .ok_or_else(|| DbError::Transaction("Transaction already completed".to_string()))?;
        inner.rollback().await?;
        debug!("Transaction rolled back");
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.inner.is_some() {
            // The backend rolls back when its handle drops.
            warn!("Transaction dropped without commit or rollback - rolling back");
        }
    }
}

/// Run `f` inside one transaction.
///
/// The closure's error type only needs to absorb `DbError`, so callers can
/// return their own errors from inside the transaction and get them back
/// unchanged after the rollback.
///
/// ```ignore
/// with_transaction(adapter, |tx| Box::pin(async move {
///     tx.execute("INSERT INTO audit (note) VALUES (?)", &["hello".into()]).await?;
///     Ok::<_, DbError>(())
/// })).await?;
/// ```
pub async fn with_transaction<R, E, F>(adapter: &dyn DialectAdapter, f: F) -> Result<R, E>
where
    F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, Result<R, E>> + Send,
    E: From<DbError>,
{
    let mut tx = adapter.begin().await?;

    match f(&mut tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("Rollback after failed transaction also failed: {}", rollback_err);
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::DatabasePoolConfig;
    use crate::connection::ConnectionManager;
    use crate::dialect::adapter::adapter_for;
    use std::sync::Arc;

    async fn adapter() -> Arc<dyn DialectAdapter> {
        let manager = ConnectionManager::connect("sqlite::memory:", DatabasePoolConfig::default())
            .await
            .unwrap();
        let adapter = adapter_for(Arc::new(manager));
        adapter
            .execute_script("CREATE TABLE ledger (id INTEGER PRIMARY KEY, note TEXT NOT NULL)")
            .await
            .unwrap();
        adapter
    }

    async fn count(adapter: &dyn DialectAdapter) -> i64 {
        let rows = adapter.query("SELECT COUNT(*) AS n FROM ledger", &[]).await.unwrap();
        rows[0].get_by_name("n").unwrap().as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_commit_on_success() {
        let adapter = adapter().await;

        let inserted = with_transaction(adapter.as_ref(), |tx| {
            Box::pin(async move {
                tx.execute("INSERT INTO ledger (note) VALUES (?)", &["first".into()]).await?;
                tx.execute("INSERT INTO ledger (note) VALUES (?)", &["second".into()]).await?;
                let rows = tx.query("SELECT note FROM ledger WHERE note = ?", &["second".into()]).await?;
                Ok::<_, DbError>(rows.len())
            })
        })
        .await
        .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(count(adapter.as_ref()).await, 2);
    }

    #[tokio::test]
    async fn test_rollback_on_error() {
        let adapter = adapter().await;

        let result: Result<(), DbError> = with_transaction(adapter.as_ref(), |tx| {
            Box::pin(async move {
                tx.execute("INSERT INTO ledger (note) VALUES (?)", &["doomed".into()]).await?;
                tx.execute("INSERT INTO missing_table (note) VALUES (?)", &["x".into()]).await?;
                Ok(())
            })
        })
        .await;

        assert!(result.unwrap_err().is_undefined_table());
        assert_eq!(count(adapter.as_ref()).await, 0);
    }

    #[tokio::test]
    async fn test_translates_like_its_adapter() {
        let adapter = adapter().await;
        let outside = adapter.translate("INSERT INTO ledger (note) VALUES (?)", vec![]).unwrap_err();

        let mut tx = adapter.begin().await.unwrap();
        let inside = tx.execute("INSERT INTO ledger (note) VALUES (?)", &[]).await.unwrap_err();
        assert_eq!(inside, outside);

        let quoted = tx.execute("INSERT INTO ledger (note) VALUES ('why?')", &[]).await.unwrap();
        assert_eq!(quoted, 1);
        tx.rollback().await.unwrap();
        assert_eq!(count(adapter.as_ref()).await, 0);
    }

    #[derive(Debug, PartialEq)]
    enum AppError {
        Db(String),
        Rejected,
    }

    impl From<DbError> for AppError {
        fn from(err: DbError) -> Self {
            AppError::Db(err.to_string())
        }
    }

    #[tokio::test]
    async fn test_caller_error_type_is_preserved() {
        let adapter = adapter().await;

        let result = with_transaction(adapter.as_ref(), |tx| {
            Box::pin(async move {
                tx.execute("INSERT INTO ledger (note) VALUES (?)", &["pending".into()]).await?;
                Err::<(), _>(AppError::Rejected)
            })
        })
        .await;

        assert_eq!(result, Err(AppError::Rejected));
        assert_eq!(count(adapter.as_ref()).await, 0);
    }

    #[tokio::test]
    async fn test_connection_released_after_failure() {
        let adapter = adapter().await;

        for _ in 0..3 {
            let _ = with_transaction(adapter.as_ref(), |tx| {
                Box::pin(async move { tx.execute_script("NOT VALID SQL").await })
            })
            .await;
        }

        // The single embedded connection must be free again.
        adapter
            .execute("INSERT INTO ledger (note) VALUES (?)", &["after".into()])
            .await
            .unwrap();
        assert_eq!(count(adapter.as_ref()).await, 1);
    }
}
