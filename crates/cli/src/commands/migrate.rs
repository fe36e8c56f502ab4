use ordinal_core::AppConfig;
use ordinal_http::Bootstrap;

use crate::context::Engine;

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    let engine = Engine::connect(config).await?;
    let outcome = Bootstrap::new(engine.runner.clone()).run().await;
    engine.manager.close().await;
    let result = outcome?;

    if result.applied.is_empty() {
        println!("Schema is up to date ({} migration(s) verified)", result.skipped_count);
    } else {
        let versions: Vec<String> = result.applied.iter().map(|v| v.to_string()).collect();
        println!(
            "Applied {} migration(s): {} ({}ms)",
            result.applied_count(),
            versions.join(", "),
            result.execution_time_ms
        );
    }
    Ok(())
}
