// SPDX-License-Identifier: Apache-2.0

//! Health and status endpoints.
//!
//! - GET `/status` - lifecycle snapshot of every registered pipeline
//! - GET `/livez` - liveness probe, 200 while the process serves
//! - GET `/readyz` - readiness probe, 200 once at least one pipeline is
//!   ready to take traffic

use crate::MonitoringState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use cortex_engine::registry::{PipelinePhase, PipelineSnapshot};
use serde::Serialize;

pub(crate) fn routes() -> Router<MonitoringState> {
    Router::new()
        .route("/status", get(show_status))
        .route("/livez", get(livez))
        .route("/readyz", get(readyz))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    generated_at: String,
    pipelines: Vec<PipelineSnapshot>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProbeResponse {
    probe: &'static str,
    status: &'static str,
    generated_at: String,
}

impl ProbeResponse {
    fn ok(probe: &'static str) -> Self {
        ProbeResponse {
            probe,
            status: "ok",
            generated_at: Utc::now().to_rfc3339(),
        }
    }

    fn fail(probe: &'static str) -> Self {
        ProbeResponse {
            probe,
            status: "fail",
            generated_at: Utc::now().to_rfc3339(),
        }
    }
}

async fn show_status(State(state): State<MonitoringState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        generated_at: Utc::now().to_rfc3339(),
        pipelines: state.registry.snapshot(),
    })
}

async fn livez() -> (StatusCode, Json<ProbeResponse>) {
    (StatusCode::OK, Json(ProbeResponse::ok("livez")))
}

async fn readyz(State(state): State<MonitoringState>) -> (StatusCode, Json<ProbeResponse>) {
    let ready = state
        .registry
        .snapshot()
        .iter()
        .any(|p| p.phase == PipelinePhase::Ready);
    if ready {
        (StatusCode::OK, Json(ProbeResponse::ok("readyz")))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ProbeResponse::fail("readyz")),
        )
    }
}
