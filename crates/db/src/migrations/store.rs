//! Checksum Store - the ledger of applied migrations
//!
//! Rows are only ever inserted, inside the transaction that applies the
//! migration they describe.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

use super::definitions::AppliedMigrationRecord;
use super::error::{MigrationError, MigrationResult};
use crate::backends::{DatabaseRow, DatabaseValue};
use crate::dialect::{DialectAdapter, Transaction};
use crate::error::{DbError, DbResult};

static TABLE_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("table name pattern is valid"));

/// Whether `name` can be interpolated into SQL as a bare table identifier
pub fn is_valid_table_name(name: &str) -> bool {
    name.len() <= 63 && TABLE_NAME_PATTERN.is_match(name)
}

#[derive(Clone)]
pub struct ChecksumStore {
    adapter: Arc<dyn DialectAdapter>,
    table: String,
}

impl ChecksumStore {
    pub fn new(adapter: Arc<dyn DialectAdapter>, table: impl Into<String>) -> DbResult<Self> {
        let table = table.into();
        if !is_valid_table_name(&table) {
            return Err(DbError::Configuration(format!(
                "Invalid migrations table name '{}'",
                table
            )));
        }
        Ok(Self { adapter, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger if it does not exist yet
    pub async fn ensure_table(&self) -> MigrationResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                version INTEGER PRIMARY KEY, \
                name TEXT NOT NULL, \
                checksum TEXT NOT NULL, \
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP\
            )",
            self.table
        );

        self.adapter.execute_script(&sql).await.map_err(MigrationError::store)?;
        debug!("Migration ledger {} is ready", self.table);
        Ok(())
    }

    /// All ledger rows ordered by version; empty when the ledger does not exist yet
    pub async fn list(&self) -> MigrationResult<Vec<AppliedMigrationRecord>> {
        let sql = format!(
            "SELECT CAST(version AS BIGINT) AS version, name, checksum, \
             CAST(applied_at AS TEXT) AS applied_at FROM {} ORDER BY version",
            self.table
        );

        let rows = match self.adapter.query(&sql, &[]).await {
            Ok(rows) => rows,
            Err(err) if err.is_undefined_table() => return Ok(Vec::new()),
            Err(err) => return Err(MigrationError::store(err)),
        };

        rows.iter()
            .map(|row| record_from_row(row.as_ref()))
            .collect::<DbResult<Vec<_>>>()
            .map_err(MigrationError::store)
    }

    /// Insert one ledger row inside the caller's transaction
    pub async fn record(&self, tx: &mut Transaction, version: i64, name: &str, checksum: &str) -> MigrationResult<()> {
        let sql = format!("INSERT INTO {} (version, name, checksum) VALUES (?, ?, ?)", self.table);
        let params = [DatabaseValue::Int64(version), name.into(), checksum.into()];

        match tx.execute(&sql, &params).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_unique_violation() => Err(MigrationError::DuplicateVersion { version }),
            Err(err) => Err(MigrationError::store(err)),
        }
    }
}

fn record_from_row(row: &dyn DatabaseRow) -> DbResult<AppliedMigrationRecord> {
    let version = row
        .get_by_name("version")?
        .as_i64()
        .ok_or_else(|| DbError::Serialization("ledger version is not an integer".to_string()))?;
    let text = |column: &str| -> DbResult<String> {
        row.get_by_name(column)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DbError::Serialization(format!("ledger {} is not text", column)))
    };

    let applied_at = match row.get_by_name("applied_at")? {
        DatabaseValue::String(s) => parse_timestamp(&s),
        DatabaseValue::DateTime(dt) => Some(dt),
        _ => None,
    };

    Ok(AppliedMigrationRecord {
        version,
        name: text("name")?,
        checksum: text("checksum")?,
        applied_at,
    })
}

/// Both engines render `TIMESTAMP` as `YYYY-MM-DD HH:MM:SS[.ffffff]`, sometimes with an offset
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}
