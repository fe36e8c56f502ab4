//! Connection Management
//!
//! The single `ConnectionManager`, its error type, and the statistics and
//! health reports it produces.

pub mod health;
pub mod pool;
pub mod statistics;

pub use health::PoolHealthReport;
pub use pool::{ConnectionManager, PoolError};
pub use statistics::ExtendedPoolStats;
