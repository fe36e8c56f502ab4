//! Server lifecycle - routing, startup and signal handling

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tokio::signal;
use tracing::{error, info, warn};

use crate::error::{HttpError, HttpResult};
use crate::health::{health_check_handler, HealthState};

/// Routes served while and after migrations run
pub fn build_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_check_handler))
        .route("/api/health", get(health_check_handler))
        .with_state(state)
}

/// Serve until ctrl-c or SIGTERM
pub async fn start_server(addr: SocketAddr, router: Router) -> HttpResult<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| HttpError::startup(format!("Failed to bind to {}: {}", addr, e)))?;

    info!("Health endpoint listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| HttpError::internal(format!("Server error: {}", e)))?;

    Ok(())
}

/// Resolves on the first shutdown signal
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            warn!("Received terminate signal, shutting down gracefully");
        },
    }
}
