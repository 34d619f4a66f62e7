//! Health probe and Prometheus metrics endpoints.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Content type of the Prometheus text format
const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// `GET /` answering `ok` while the process is serving
pub fn health_router() -> Router {
    Router::new().route("/", get(|| async { "ok" }))
}

/// `GET /metrics` rendering every registered metric
pub fn metrics_router(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn render_metrics(State(metrics): State<Metrics>) -> Response {
    match metrics.render() {
        Ok(text) => ([(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)], text).into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to render metrics").into_response()
        }
    }
}

/// Resolves once `stop` flips to `true` or its sender is gone
pub fn shutdown_signal(mut stop: watch::Receiver<bool>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        if stop.wait_for(|stopped| *stopped).await.is_err() {
            info!("Shutdown sender dropped");
        }
    }
}

/// Serves `router` on `addr` until `shutdown` resolves
pub async fn serve<F>(addr: SocketAddr, router: Router, name: &str, shutdown: F) -> Result<(), ControllerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!("{} server listening on {}", name, addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("{} server stopped", name);
    Ok(())
}
