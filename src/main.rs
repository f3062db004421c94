use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use qgrid_studio::{
    cli::{execute_command, Cli, Commands},
    config::{Config, LogFormat, StorageBackend},
    remote::RemoteStorage,
    server::{AppState, RpcServer},
    storage::{SqliteStorage, Storage},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Serve => return serve().await,
        other => other,
    };

    let result = execute_command(command);
    if result.exit_code == 0 {
        println!("{}", result.message);
    } else {
        eprintln!("{}", result.message);
    }
    std::process::exit(result.exit_code);
}

async fn serve() -> anyhow::Result<()> {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "qgrid server starting..."
    );

    let storage: Arc<dyn Storage> = match config.gateway.backend {
        StorageBackend::Sqlite => match SqliteStorage::new(&config.database).await {
            Ok(s) => {
                info!(path = %config.database.path.display(), "Database initialized");
                Arc::new(s)
            }
            Err(e) => {
                error!(error = %e, "Failed to initialize database");
                return Err(e.into());
            }
        },
        StorageBackend::Remote => {
            match RemoteStorage::new(&config.gateway, config.request.clone()) {
                Ok(c) => {
                    info!(base_url = %config.gateway.base_url, "Gateway client initialized");
                    Arc::new(c)
                }
                Err(e) => {
                    error!(error = %e, "Failed to initialize gateway client");
                    return Err(e.into());
                }
            }
        }
    };

    // Create application state
    let state = Arc::new(AppState::new(config, storage));
    let server = RpcServer::new(state);

    info!("Server ready, waiting for requests on stdin...");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
