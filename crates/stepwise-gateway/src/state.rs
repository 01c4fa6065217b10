use std::sync::Arc;

use stepwise_core::config::GatewayConfig;
use stepwise_engine::WorkflowRegistry;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub registry: Arc<WorkflowRegistry>,
}
