use ordinal_core::AppConfig;
use ordinal_db::MigrationStatus;

use crate::context::Engine;

pub async fn run(config: &AppConfig, json: bool) -> anyhow::Result<()> {
    let engine = Engine::connect(config).await?;
    let entries = engine.runner.status().await?;
    let health = engine.manager.detailed_health_check().await?;
    engine.manager.close().await;

    if json {
        let report = serde_json::json!({
            "migrations": entries,
            "database": health,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No migrations found in {}", config.migrations_dir.display());
    } else {
        println!("{:>8}  {:<8}  {:<19}  {}", "VERSION", "STATUS", "APPLIED AT", "NAME");
        for entry in &entries {
            let (label, applied_at) = match &entry.status {
                MigrationStatus::Pending => ("pending", None),
                MigrationStatus::Applied { applied_at } => ("applied", *applied_at),
                MigrationStatus::Drifted { .. } => ("DRIFTED", None),
                MigrationStatus::Missing => ("missing", None),
            };
            let applied_at = applied_at
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            println!("{:>8}  {:<8}  {:<19}  {}", entry.version, label, applied_at, entry.name);
        }
    }

    let pending = entries.iter().filter(|e| e.status == MigrationStatus::Pending).count();
    let drifted = entries
        .iter()
        .filter(|e| matches!(e.status, MigrationStatus::Drifted { .. }))
        .count();
    println!();
    println!("{} pending, {} drifted", pending, drifted);
    println!("Database ({}): {}", health.dialect, health.status_summary());
    Ok(())
}
