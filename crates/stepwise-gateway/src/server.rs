use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use stepwise_core::config::GatewayConfig;
use stepwise_engine::WorkflowRegistry;

use crate::routes;
use crate::state::AppState;

/// HTTP + SSE gateway server built on axum.
pub struct GatewayServer {
    config: GatewayConfig,
    registry: Arc<WorkflowRegistry>,
}

/// Routes of the workflow API over the given state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/workflows", get(routes::list_workflows))
        .route("/workflows/{id}", get(routes::get_workflow))
        .route("/workflows/{id}/execute", post(routes::execute))
        .route("/workflows/{id}/stream", post(routes::stream))
        .route("/workflows/{id}/executions", get(routes::list_executions))
        .route(
            "/workflows/{id}/executions/{exec_id}/suspend",
            post(routes::suspend),
        )
        .route(
            "/workflows/{id}/executions/{exec_id}/resume",
            post(routes::resume),
        )
        .route(
            "/workflows/{id}/executions/{exec_id}/resume-stream",
            post(routes::resume_stream),
        )
        .route(
            "/workflows/{id}/executions/{exec_id}/state",
            get(routes::execution_state),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, registry: Arc<WorkflowRegistry>) -> Self {
        Self { config, registry }
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            registry: self.registry.clone(),
        });
        let app = router(state);

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}
