use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use pkg_state::CoordinationStore;
use pkg_types::kv::TxnPutRequest;
use tracing::debug;

use crate::AppState;
use crate::error::ApiError;

/// GET /api/v1/kv/{key} — point read; `kv` is null when the key is absent.
pub async fn get_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.get(&key).await?))
}

/// POST /api/v1/txn/put — put iff the key's version matches.
pub async fn txn_put(
    State(state): State<AppState>,
    Json(req): Json<TxnPutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = state
        .store
        .put_if_version(&req.key, req.expected_version, &req.value, req.lease)
        .await?;
    state.metrics.txn(resp.succeeded);
    debug!(
        key = %req.key,
        expected_version = req.expected_version,
        succeeded = resp.succeeded,
        revision = resp.revision,
        "Conditional put"
    );
    Ok(Json(resp))
}
