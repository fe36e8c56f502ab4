//! Schema Migrations
//!
//! File discovery, the applied-migration ledger and the runner that ties them
//! together.

pub mod checksum;
pub mod definitions;
pub mod error;
pub mod registry;
pub mod runner;
pub mod store;

pub use checksum::checksum;
pub use definitions::{
    AppliedMigrationRecord, DialectTag, MigrationConfig, MigrationFile, MigrationPlan, MigrationRunResult,
    MigrationStatus, MigrationStatusEntry, RunnerState,
};
pub use error::{MigrationError, MigrationResult};
pub use registry::{parse_file_name, MigrationRegistry, ParsedFileName};
pub use runner::{plan, MigrationRunner};
pub use store::{is_valid_table_name, ChecksumStore};
