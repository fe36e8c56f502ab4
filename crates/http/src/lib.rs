//! # ordinal-http
//!
//! The startup contract: run migrations once in the background and report
//! their progress on a health endpoint until the schema is ready.

pub mod bootstrap;
pub mod error;
pub mod health;
pub mod server;

pub use bootstrap::{Bootstrap, InitGuard, MigrationTask, PROCESS_INIT_GUARD};
pub use error::{HttpError, HttpResult};
pub use health::{health_check_handler, DatabaseStatus, HealthState, HealthStatus};
pub use server::{build_router, shutdown_signal, start_server};
