// SPDX-License-Identifier: Apache-2.0

//! The metrics endpoint.
//!
//! - GET `/metrics` - prometheus text exposition of the process registry

use crate::MonitoringState;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tracing::warn;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

pub(crate) fn routes() -> Router<MonitoringState> {
    Router::new().route("/metrics", get(render_metrics))
}

async fn render_metrics(State(state): State<MonitoringState>) -> Response {
    match state.metrics.render_text() {
        Ok(body) => ([(CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "cannot render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
