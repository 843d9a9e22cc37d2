//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  (Prometheus text format)
//!   GET /healthz  (liveness, always 200 while the process runs)
//!   GET /readyz   (readiness, 200 if the object store root is writable)

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;

use crate::http::AppState;

/// Counters updated by the upload channel and the retrieval API.
#[derive(Debug, Default)]
pub struct Metrics {
    pub uploads_started: Counter,
    pub uploads_completed: Counter,
    pub uploads_aborted: Counter,
    pub bytes_received: Counter,
    pub ranged_reads: Counter,
}

impl Metrics {
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "tcshare_uploads_started",
            "Upload sessions opened",
            metrics.uploads_started.clone(),
        );
        registry.register(
            "tcshare_uploads_completed",
            "Uploads committed after the end-of-upload sentinel",
            metrics.uploads_completed.clone(),
        );
        registry.register(
            "tcshare_uploads_aborted",
            "Upload sessions that ended without committing",
            metrics.uploads_aborted.clone(),
        );
        registry.register(
            "tcshare_bytes_received",
            "Segment bytes accepted over the upload channel",
            metrics.bytes_received.clone(),
        );
        registry.register(
            "tcshare_ranged_reads",
            "Byte ranges served by the retrieval API",
            metrics.ranged_reads.clone(),
        );
        metrics
    }
}

pub fn routes(with_metrics: bool) -> Router<AppState> {
    let router = Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler));
    if with_metrics {
        router.route("/metrics", get(metrics_handler))
    } else {
        router
    }
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &state.registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: returns 200 if the process is running.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe: returns 200 if new objects can be created, 503 otherwise.
async fn readyz_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.store.is_writable().await {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "storage not writable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_encoded() {
        let mut registry = Registry::default();
        let metrics = Metrics::register(&mut registry);
        metrics.uploads_started.inc();
        metrics.bytes_received.inc_by(42);

        let mut body = String::new();
        encode(&mut body, &registry).unwrap();
        assert!(body.contains("tcshare_uploads_started_total 1"));
        assert!(body.contains("tcshare_bytes_received_total 42"));
    }
}
