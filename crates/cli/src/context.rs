//! Composition root: the one connection manager and the runner built on it

use std::sync::Arc;

use ordinal_core::{mask_database_url, AppConfig};
use ordinal_db::{adapter_for, ConnectionManager, DatabasePoolConfig, MigrationConfig, MigrationRunner};
use tracing::info;

pub struct Engine {
    pub manager: Arc<ConnectionManager>,
    pub runner: Arc<MigrationRunner>,
}

impl Engine {
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let url = config.database_url()?;
        info!("Connecting to {}", mask_database_url(url));

        let manager = Arc::new(ConnectionManager::connect(url, DatabasePoolConfig::from(&config.pool)).await?);
        let runner = MigrationRunner::new(
            adapter_for(manager.clone()),
            MigrationConfig {
                migrations_dir: config.migrations_dir.clone(),
                migrations_table: config.migrations_table.clone(),
            },
        )?;

        Ok(Self {
            manager,
            runner: Arc::new(runner),
        })
    }
}
