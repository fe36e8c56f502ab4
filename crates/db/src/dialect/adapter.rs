//! Dialect Adapters
//!
//! One adapter is chosen when the connection manager is opened and used for
//! every statement afterwards. Callers write SQL with `?` placeholders and
//! never branch on the dialect themselves.

use std::sync::Arc;

use async_trait::async_trait;

use super::placeholders::rewrite_placeholders;
use super::transaction::Transaction;
use crate::backends::{DatabaseRow, DatabaseValue, SqlDialect};
use crate::connection::ConnectionManager;
use crate::error::DbResult;

/// Dialect-specific statement execution
#[async_trait]
pub trait DialectAdapter: Send + Sync {
    fn dialect(&self) -> SqlDialect;

    fn manager(&self) -> &ConnectionManager;

    /// Turn `?`-style SQL into the dialect's native form, keeping `params` in order.
    ///
    /// Transactions opened by `begin` translate through the same
    /// `rewrite_placeholders` call, so both paths accept the same SQL.
    fn translate(&self, sql: &str, params: Vec<DatabaseValue>) -> DbResult<(String, Vec<DatabaseValue>)> {
        let sql = rewrite_placeholders(sql, self.dialect(), params.len())?;
        Ok((sql, params))
    }

    /// Execute one statement on a pooled connection
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64> {
        let (sql, params) = self.translate(sql, params.to_vec())?;
        let mut conn = self.manager().acquire().await?;
        conn.execute(&sql, &params).await
    }

    /// Run one query on a pooled connection
    async fn query(&self, sql: &str, params: &[DatabaseValue]) -> DbResult<Vec<Box<dyn DatabaseRow>>> {
        let (sql, params) = self.translate(sql, params.to_vec())?;
        let mut conn = self.manager().acquire().await?;
        conn.fetch_all(&sql, &params).await
    }

    /// Execute a multi-statement script without parameters
    async fn execute_script(&self, sql: &str) -> DbResult<()> {
        let mut conn = self.manager().acquire().await?;
        conn.execute_script(sql).await
    }

    /// Open a transaction on a freshly acquired connection
    async fn begin(&self) -> DbResult<Transaction> {
        let inner = self.manager().begin_transaction().await?;
        Ok(Transaction::new(inner, self.dialect()))
    }
}

/// SQLite: one shared connection, `?` placeholders passed through
pub struct EmbeddedAdapter {
    manager: Arc<ConnectionManager>,
}

impl EmbeddedAdapter {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl DialectAdapter for EmbeddedAdapter {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    fn manager(&self) -> &ConnectionManager {
        &self.manager
    }
}

/// PostgreSQL: pooled connections, `?` rewritten to `$1..$n`
pub struct NetworkedAdapter {
    manager: Arc<ConnectionManager>,
}

impl NetworkedAdapter {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl DialectAdapter for NetworkedAdapter {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
    }

    fn manager(&self) -> &ConnectionManager {
        &self.manager
    }
}

/// Build the adapter matching the manager's dialect
pub fn adapter_for(manager: Arc<ConnectionManager>) -> Arc<dyn DialectAdapter> {
    match manager.dialect() {
        SqlDialect::SQLite => Arc::new(EmbeddedAdapter::new(manager)),
        SqlDialect::PostgreSQL => Arc::new(NetworkedAdapter::new(manager)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::DatabasePoolConfig;

    async fn embedded() -> Arc<dyn DialectAdapter> {
        let manager = ConnectionManager::connect("sqlite::memory:", DatabasePoolConfig::default())
            .await
            .unwrap();
        adapter_for(Arc::new(manager))
    }

    #[tokio::test]
    async fn test_embedded_adapter_selected_for_sqlite() {
        let adapter = embedded().await;
        assert_eq!(adapter.dialect(), SqlDialect::SQLite);

        let (sql, params) = adapter
            .translate("SELECT * FROM t WHERE id = ? AND x = ?", vec![1i64.into(), "a".into()])
            .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE id = ? AND x = ?");
        assert_eq!(params, vec![DatabaseValue::Int64(1), DatabaseValue::String("a".into())]);
    }

    #[tokio::test]
    async fn test_embedded_translate_rejects_count_mismatch() {
        let adapter = embedded().await;
        assert!(adapter.translate("SELECT ?", vec![]).is_err());
    }

    #[tokio::test]
    async fn test_embedded_round_trip() {
        let adapter = embedded().await;
        adapter
            .execute_script(
                "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL);
                 CREATE INDEX notes_body ON notes (body);",
            )
            .await
            .unwrap();

        let affected = adapter
            .execute("INSERT INTO notes (id, body) VALUES (?, ?)", &[7i64.into(), "what?".into()])
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let rows = adapter
            .query("SELECT body FROM notes WHERE id = ? AND body <> 'x?'", &[7i64.into()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("body").unwrap(), DatabaseValue::String("what?".into()));
    }

    #[tokio::test]
    async fn test_begin_uses_adapter_dialect() {
        let adapter = embedded().await;
        let tx = adapter.begin().await.unwrap();
        assert_eq!(tx.dialect(), SqlDialect::SQLite);
        assert!(tx.is_active());
        tx.rollback().await.unwrap();
    }
}
