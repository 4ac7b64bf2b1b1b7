//! HTTP server exposing task submission, querying, and event streaming.

mod handlers;
mod routes;

pub use routes::create_router;

use std::sync::Arc;

use tracing::info;

use crate::pipeline::Orchestrator;
use crate::tasks::TaskRegistry;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<TaskRegistry>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let registry = orchestrator.registry().clone();
        Self {
            orchestrator,
            registry,
        }
    }
}

/// Run the server until ctrl-c.
pub async fn serve(orchestrator: Arc<Orchestrator>, bind: &str) -> anyhow::Result<()> {
    let state = AppState::new(orchestrator);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
