use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use stackup_types::{RecordBody, RecordSource, Signal, TelemetryRecord};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use super::forwarder::ForwarderStats;

#[derive(Clone)]
pub(crate) struct IngestState {
    pub records: mpsc::Sender<TelemetryRecord>,
    pub stats: Arc<ForwarderStats>,
}

pub(crate) fn router(state: IngestState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/v1/:signal", post(ingest))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn error(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn ingest(
    State(state): State<IngestState>,
    Path(signal): Path<String>,
    body: Bytes,
) -> Response {
    let signal: Signal = match signal.parse() {
        Ok(signal) => signal,
        Err(_) => return error(StatusCode::NOT_FOUND, format!("Unknown signal '{}'", signal)),
    };

    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            state.stats.record_rejected();
            debug!("Rejected {} payload: {}", signal, e);
            return error(StatusCode::BAD_REQUEST, format!("Invalid JSON: {}", e));
        }
    };

    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    let mut accepted = 0usize;
    for item in items {
        let record = TelemetryRecord::new(signal, RecordSource::Http, RecordBody::Json(item));
        if state.records.send(record).await.is_err() {
            warn!("Forwarder is shutting down, refusing {} records", signal);
            return error(
                StatusCode::SERVICE_UNAVAILABLE,
                "Forwarder is shutting down".to_string(),
            );
        }
        state.stats.record_received();
        accepted += 1;
    }

    (StatusCode::ACCEPTED, Json(json!({ "accepted": accepted }))).into_response()
}
