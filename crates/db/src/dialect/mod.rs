//! SQL Dialect Handling
//!
//! Placeholder translation, the per-dialect adapters and scoped transactions.

pub mod adapter;
pub mod placeholders;
pub mod transaction;

pub use adapter::{adapter_for, DialectAdapter, EmbeddedAdapter, NetworkedAdapter};
pub use placeholders::{positional_placeholders, rewrite_placeholders};
pub use transaction::{with_transaction, Transaction};
