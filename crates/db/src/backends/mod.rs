//! Database Backend Abstractions
//!
//! Two backends implement the core traits: SQLite for the embedded dialect and
//! PostgreSQL for the networked one.

pub mod core;
pub mod postgres;
pub mod sqlite;

pub use core::*;
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;
