mod commands;
mod context;

use std::path::PathBuf;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use ordinal_core::{init_logging, AppConfig, AppConfigTrait, LoggingConfig};

#[derive(Parser)]
#[command(name = "ordinal")]
#[command(about = "Versioned, checksum-verified schema migrations", version)]
struct Cli {
    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Migrations directory (overrides MIGRATIONS_DIR)
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations and exit
    Migrate,

    /// Show each migration's state against the ledger
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run migrations in the background and serve the health endpoint
    Serve {
        /// Port to bind the server to (overrides PORT)
        #[arg(long, short)]
        port: Option<u16>,

        /// Host to bind the server to (overrides HOST)
        #[arg(long)]
        host: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::from_env()?;
    if let Some(url) = cli.database_url {
        config.database_url = Some(url);
    }
    if let Some(dir) = cli.migrations_dir {
        config.migrations_dir = dir;
    }
    if let Commands::Serve { port, host } = &cli.command {
        if let Some(port) = port {
            config.port = *port;
        }
        if let Some(host) = host {
            config.host = host.clone();
        }
    }
    config.validate()?;

    init_logging(LoggingConfig::for_app(&config).with_service("ordinal", ordinal_core::VERSION))
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    match cli.command {
        Commands::Migrate => commands::migrate::run(&config).await,
        Commands::Status { json } => commands::status::run(&config, json).await,
        Commands::Serve { .. } => commands::serve::run(&config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_overrides_parse_after_subcommand() {
        let cli = Cli::parse_from(["ordinal", "status", "--json", "--migrations-dir", "db/migrations"]);
        assert_eq!(cli.migrations_dir, Some(PathBuf::from("db/migrations")));
        assert!(matches!(cli.command, Commands::Status { json: true }));
    }

    #[test]
    fn test_serve_overrides() {
        let cli = Cli::parse_from(["ordinal", "serve", "-p", "8081", "--host", "0.0.0.0"]);
        match cli.command {
            Commands::Serve { port, host } => {
                assert_eq!(port, Some(8081));
                assert_eq!(host.as_deref(), Some("0.0.0.0"));
            }
            _ => panic!("expected serve"),
        }
    }
}
