mod config;
mod error;
mod handlers;
mod io;
mod lifecycle;
mod results;
mod routes;
mod runner;
mod sanitize;
mod session;
mod ws;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use crate::config::Config;
use crate::lifecycle::ContainerManager;
use crate::runner::Engine;
use crate::sanitize::RegexDenyPolicy;
use crate::session::SessionCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Engine,
    pub sessions: Arc<SessionCoordinator>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::from_env()?);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .init();

    info!("crucible server booting...");

    let containers = ContainerManager::new()?;
    let policy = Arc::new(RegexDenyPolicy::standard());
    let engine = Engine::new(config.clone(), containers.clone(), policy.clone());
    let sessions = Arc::new(SessionCoordinator::new(
        config.clone(),
        containers,
        policy,
    ));

    let state = AppState {
        config: config.clone(),
        engine,
        sessions: sessions.clone(),
    };

    let app = routes::routes().with_state(state);

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "HTTP server listening");
    info!(
        runtime = %config.docker_runtime,
        execution_time_limit_ms = config.execution_time_limit_ms,
        "ready to accept executions"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Interactive containers outlive their requests; reclaim them before
    // the process exits.
    sessions.close_all().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "failed to install shutdown handler");
        return;
    }
    warn!("shutdown signal received, draining requests");
}
