use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use pkg_state::CoordinationStore;
use pkg_types::kv::{LeaseGrantRequest, LeaseId};
use std::time::Duration;
use tracing::info;

use crate::AppState;
use crate::error::ApiError;

/// POST /api/v1/leases — grant a lease.
pub async fn grant_lease(
    State(state): State<AppState>,
    Json(req): Json<LeaseGrantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let grant = state
        .store
        .grant_lease(Duration::from_secs(req.ttl_seconds))
        .await?;
    state.metrics.lease_granted();
    info!(lease = grant.id, ttl_seconds = grant.ttl_seconds, "Granted lease");
    Ok((StatusCode::CREATED, Json(grant)))
}

/// PUT /api/v1/leases/{id}/keepalive — restart a lease's TTL.
pub async fn keep_alive(
    State(state): State<AppState>,
    Path(id): Path<LeaseId>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = state.store.keep_alive(id).await?;
    state.metrics.lease_kept_alive();
    Ok(Json(resp))
}

/// DELETE /api/v1/leases/{id} — revoke a lease and delete its keys.
pub async fn revoke_lease(
    State(state): State<AppState>,
    Path(id): Path<LeaseId>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.revoke_lease(id).await?;
    state.metrics.lease_revoked();
    info!(lease = id, "Revoked lease");
    Ok(StatusCode::NO_CONTENT)
}
