//! HTTP request handlers.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Json, Response};
use serde::Serialize;
use tracing::error;

use walkstat_core::walker::WalkReport;

use crate::state::AppState;

/// Text exposition of the last completed walk plus lifetime counters.
pub(crate) async fn handle_metrics(State(state): State<AppState>) -> Response {
    match state.backend.snapshot().encode_text() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub(crate) async fn handle_index(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<html>\n<head><title>walkstat exporter</title></head>\n<body>\n\
         <h1>walkstat exporter</h1>\n\
         <p><a href=\"{path}\">{path}</a></p>\n\
         <p><a href=\"/status\">/status</a></p>\n\
         </body>\n</html>\n",
        path = state.metrics_path
    ))
}

pub(crate) async fn handle_health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
pub(crate) struct StatusResponse {
    version: &'static str,
    backend: &'static str,
    published: bool,
    last_walk: Option<WalkReport>,
}

pub(crate) async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: walkstat_core::VERSION,
        backend: state.backend.name(),
        published: state.backend.snapshot().has_published_generation(),
        last_walk: state.last_report(),
    })
}
