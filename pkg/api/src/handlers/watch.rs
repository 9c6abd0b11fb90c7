use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use pkg_state::CoordinationStore;
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct WatchQuery {
    pub key: String,
    /// First revision to deliver (inclusive); omitted means live events only
    #[serde(default)]
    pub from: Option<u64>,
}

/// GET /api/v1/watch — SSE stream of `WatchEvent`s for one key.
///
/// The stream ends when the store closes or the subscriber falls behind;
/// clients resume from their last revision + 1.
pub async fn watch_key(
    State(state): State<AppState>,
    Query(query): Query<WatchQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let events = state.store.watch(&query.key, query.from).await?;
    state.metrics.watch_subscribed();
    info!(key = %query.key, from = ?query.from, "Watch subscription");

    let key = query.key;
    let stream = events.map_while(move |item| match item {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(data) => Some(Ok::<_, Infallible>(Event::default().data(data))),
            Err(_) => None,
        },
        Err(e) => {
            debug!(key = %key, error = %e, "Ending watch stream");
            None
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
