use std::net::SocketAddr;

use anyhow::Context;
use ordinal_core::AppConfig;
use ordinal_http::{build_router, start_server, Bootstrap, HealthState};
use tracing::{info, warn};

use crate::context::Engine;

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_address()))?;

    let engine = Engine::connect(config).await?;
    let bootstrap = Bootstrap::new(engine.runner.clone());
    let state = HealthState::new(bootstrap.state()).with_manager(engine.manager.clone());

    let migrations = bootstrap.spawn()?;
    let served = start_server(addr, build_router(state)).await;

    // The migration in flight still finishes; later ones are not started.
    if !migrations.is_finished() {
        bootstrap.request_stop();
        warn!("Waiting for the in-flight migration to finish before exit");
    }
    let outcome = migrations.await.context("Migration task panicked")?;
    engine.manager.close().await;

    served?;
    let result = outcome?;
    info!("Shut down after applying {} migration(s)", result.applied_count());
    Ok(())
}
