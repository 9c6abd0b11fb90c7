use axum::{extract::State, http::header, response::IntoResponse};

use crate::AppState;

/// GET /metrics — Prometheus text exposition.
pub async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.store.stats().await;
    state.metrics.observe(stats.revision, stats.leases, stats.keys);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
