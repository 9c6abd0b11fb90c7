use axum::{
    Router,
    routing::{delete, get, post, put},
};
use pkg_metrics::StoreMetrics;
use pkg_state::StateStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::AppState;
use crate::handlers::{kv, lease, metrics, watch};

/// Server configuration passed from the binary's CLI.
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub watch_history: usize,
}

/// Build the store API routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/leases", post(lease::grant_lease))
        .route("/api/v1/leases/{id}", delete(lease::revoke_lease))
        .route("/api/v1/leases/{id}/keepalive", put(lease::keep_alive))
        .route("/api/v1/txn/put", post(kv::txn_put))
        .route("/api/v1/kv/{key}", get(kv::get_key))
        .route("/api/v1/watch", get(watch::watch_key))
        .route("/metrics", get(metrics::render_metrics))
        .with_state(state)
}

/// Serve `store` on an already bound listener until `shutdown` resolves.
/// The store is closed first so open watch streams end.
pub async fn serve<F>(listener: TcpListener, store: StateStore, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    let reaper = store.spawn_lease_reaper();
    let state = AppState {
        store: store.clone(),
        metrics: Arc::new(StoreMetrics::new()),
    };

    let closing = store.clone();
    info!("Coordination store listening on {}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            closing.close().await;
        })
        .await?;

    reaper.await?;
    info!("Coordination store stopped");
    Ok(())
}

pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    let store = StateStore::new(config.watch_history);
    let listener = TcpListener::bind(config.addr).await?;
    serve(listener, store, shutdown_signal()).await
}

/// Resolve on SIGINT or (on Unix) SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
