//! Migration Definitions - Core types shared by the registry, ledger and runner

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::backends::SqlDialect;

/// Which backend a migration file targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DialectTag {
    Generic,
    EmbeddedOnly,
    NetworkedOnly,
}

impl DialectTag {
    /// Whether a file with this tag runs against `dialect`
    pub fn applies_to(&self, dialect: SqlDialect) -> bool {
        match self {
            DialectTag::Generic => true,
            DialectTag::EmbeddedOnly => dialect.is_embedded(),
            DialectTag::NetworkedOnly => dialect.is_networked(),
        }
    }
}

/// A migration file read from disk. Immutable for the duration of a run.
#[derive(Debug, Clone)]
pub struct MigrationFile {
    pub version: i64,
    /// Descriptive part of the filename, without version, tag or suffix
    pub name: String,
    /// Full filename, e.g. `002-add-col.sql`
    pub file_name: String,
    pub path: PathBuf,
    pub dialect_tag: DialectTag,
    pub body: String,
    /// Lowercase hex SHA-256 of the raw file bytes
    pub checksum: String,
}

/// One row of the ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedMigrationRecord {
    pub version: i64,
    pub name: String,
    pub checksum: String,
    pub applied_at: Option<DateTime<Utc>>,
}

/// The files one pass may apply, and the ones held back by gating
#[derive(Debug, Clone, Default)]
pub struct MigrationPlan {
    pub eligible: Vec<MigrationFile>,
    pub deferred: Vec<MigrationFile>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.eligible.is_empty() && self.deferred.is_empty()
    }
}

/// Configuration for the migration system
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Directory where migration files are stored
    pub migrations_dir: PathBuf,
    /// Table name for the ledger
    pub migrations_table: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("migrations"),
            migrations_table: "schema_migrations".to_string(),
        }
    }
}

/// Result of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct MigrationRunResult {
    /// Versions applied by this run, in application order
    pub applied: Vec<i64>,
    /// Files whose checksum matched an existing ledger row
    pub skipped_count: usize,
    pub passes: usize,
    pub execution_time_ms: u128,
}

impl MigrationRunResult {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

/// Where a single migration stands against the ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MigrationStatus {
    Pending,
    Applied { applied_at: Option<DateTime<Utc>> },
    /// Applied, but the file no longer matches the recorded checksum
    Drifted { recorded: String, current: String },
    /// In the ledger with no file on disk
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatusEntry {
    pub version: i64,
    pub name: String,
    pub status: MigrationStatus,
}

/// Lifecycle of a runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunnerState {
    Init,
    TableReady,
    Planning,
    Applying { pass: usize },
    Done,
    Failed { error: String },
}

impl RunnerState {
    pub fn name(&self) -> &'static str {
        match self {
            RunnerState::Init => "init",
            RunnerState::TableReady => "table_ready",
            RunnerState::Planning => "planning",
            RunnerState::Applying { .. } => "applying",
            RunnerState::Done => "done",
            RunnerState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunnerState::Done | RunnerState::Failed { .. })
    }
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerState::Applying { pass } => write!(f, "applying (pass {})", pass),
            RunnerState::Failed { error } => write!(f, "failed: {}", error),
            other => f.write_str(other.name()),
        }
    }
}
