//! Ranged retrieval API
//!
//!   GET /api/size/{id}                            → {"size": n}
//!   GET /api/download/{id}                        (X-Range-Start / X-Range-End)
//!   GET /api/download/{id}/chunk/{n}?body_start=b
//!   GET /api/random/{n}                           n random bytes, n ≤ 64

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use prometheus_client::registry::Registry;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

use tcshare_core::types::SizeResponse;
use tcshare_core::TcshareError;
use tcshare_crypto::{local_random, MAX_RANDOM_SIZE};
use tcshare_storage::FileStore;
use tcshare_transfer::backend::self_hosted::{RANGE_END_HEADER, RANGE_START_HEADER};

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub store: FileStore,
    pub metrics: Arc<Metrics>,
    pub registry: Arc<Registry>,
}

pub fn router(state: AppState, with_metrics: bool) -> Router {
    Router::new()
        .route("/api/size/{id}", get(size_handler))
        .route("/api/download/{id}", get(download_handler))
        .route("/api/download/{id}/chunk/{n}", get(chunk_handler))
        .route("/api/random/{n}", get(random_handler))
        .merge(crate::metrics::routes(with_metrics))
        .with_state(state)
}

/// Maps the error taxonomy onto HTTP status codes.
pub struct ApiError(TcshareError);

impl From<TcshareError> for ApiError {
    fn from(e: TcshareError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        match self.0 {
            TcshareError::NotFound(_) => {
                (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": message })))
                    .into_response()
            }
            TcshareError::OutOfRange { size, .. } => {
                (StatusCode::RANGE_NOT_SATISFIABLE, Json(SizeResponse { size })).into_response()
            }
            TcshareError::InvalidArgument(_) => {
                (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message })))
                    .into_response()
            }
            _ => {
                error!("request failed: {message}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}

fn octets(data: Bytes) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    )
        .into_response()
}

fn range_header(headers: &HeaderMap, name: &str) -> Result<Option<u64>, ApiError> {
    headers
        .get(name)
        .map(|v| {
            v.to_str()
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .ok_or_else(|| TcshareError::invalid(format!("malformed {name} header")).into())
        })
        .transpose()
}

async fn size_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SizeResponse>, ApiError> {
    let reader = state.store.reader(&id).await?;
    let size = reader.size();
    reader.close();
    Ok(Json(SizeResponse { size }))
}

/// Without range headers the whole object is returned.
async fn download_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let reader = state.store.reader(&id).await?;
    let start = range_header(&headers, RANGE_START_HEADER)?.unwrap_or(0);
    let end = range_header(&headers, RANGE_END_HEADER)?.unwrap_or(reader.size());
    let range = reader.into_range(start, end).await?;

    state.metrics.ranged_reads.inc();
    debug!(id = %id, start, end, "range served");
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, (end - start).to_string()),
        ],
        Body::from_stream(ReaderStream::new(range)),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct ChunkQuery {
    #[serde(default)]
    body_start: u64,
}

async fn chunk_handler(
    State(state): State<AppState>,
    Path((id, n)): Path<(String, u64)>,
    Query(query): Query<ChunkQuery>,
) -> Result<Response, ApiError> {
    let mut reader = state.store.reader(&id).await?;
    let data = reader.read_chunk(n, query.body_start).await?;
    reader.close();

    state.metrics.ranged_reads.inc();
    Ok(octets(data))
}

async fn random_handler(Path(n): Path<usize>) -> Result<Response, ApiError> {
    if n > MAX_RANDOM_SIZE {
        return Err(TcshareError::invalid(format!(
            "cannot serve {n} random bytes (max {MAX_RANDOM_SIZE})"
        ))
        .into());
    }
    Ok(octets(Bytes::from(local_random(n))))
}
