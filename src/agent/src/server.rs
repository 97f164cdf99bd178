//! HTTP server setup for the agent endpoints.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{any, get};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::api::{self, AgentContext};
use crate::{executor_api, writers};

/// Agent HTTP server.
pub struct AgentServer {
    context: Arc<AgentContext>,
}

impl AgentServer {
    pub fn new(context: AgentContext) -> Self {
        Self {
            context: Arc::new(context),
        }
    }

    pub fn context(&self) -> Arc<AgentContext> {
        self.context.clone()
    }

    /// Routes for every endpoint. The call APIs accept any method so the
    /// recovery check can answer before the method check.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/v1", any(api::handle))
            .route("/api/v1/executor", any(executor_api::handle))
            .route("/health", get(|| async { StatusCode::OK }))
            .route("/state", get(writers::handle))
            .layer(TraceLayer::new_for_http())
            .with_state(self.context.clone())
    }

    /// Serves until ctrl-c.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        tracing::info!(
            listen = %listener.local_addr()?,
            agent_id = %self.context.agent_id,
            "Agent API listening"
        );

        axum::serve(listener, self.router().into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
