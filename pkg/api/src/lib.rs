pub mod error;
pub mod handlers;
pub mod server;

use std::sync::Arc;

use pkg_metrics::StoreMetrics;
use pkg_state::StateStore;

/// Shared application state injected into all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: StateStore,
    pub metrics: Arc<StoreMetrics>,
}
