// SPDX-License-Identifier: Apache-2.0

//! The scheduling endpoints.
//!
//! - POST `/scheduler/nova/external` - re-rank compute placements
//! - POST `/scheduler/manila/external` - re-rank shared-filesystem placements
//! - POST `/scheduler/cinder/external` - re-rank block-storage placements
//!
//! Each accepts the placement request shape of its upstream service and
//! returns `{"hosts": [...]}` ordered best-first. Malformed bodies and
//! invariant violations are `400` with a user-safe message; everything
//! that makes the pipeline output wrong or absent is `500` with the
//! canonical message, details logged only.

use crate::AppState;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Json;
use cortex_config::objects::DecisionResult;
use cortex_config::{HostId, SchedulingDomain};
use cortex_controller::DecisionUpdate;
use cortex_engine::request::PlacementRequest;
use cortex_engine::tracer::RunTracer;
use cortex_engine::Error as EngineError;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

/// The canonical body of every `500` response on this surface.
pub const INTERNAL_ERROR_BODY: &str = "failed to process scheduling request";

/// Header the request id is read from and echoed back on.
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Upstream services forward their global request id under this header.
const OPENSTACK_REQUEST_ID_HEADER: &str = "x-openstack-request-id";

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/scheduler/nova/external", post(schedule_nova))
        .route("/scheduler/manila/external", post(schedule_manila))
        .route("/scheduler/cinder/external", post(schedule_cinder))
}

#[derive(Serialize)]
struct ScheduleResponse {
    hosts: Vec<HostId>,
}

enum ApiError {
    /// Request invariants violated; the message is safe to return.
    BadRequest(String),
    /// Anything that makes the output wrong or absent; details logged.
    Internal,
}

async fn schedule_nova(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    schedule(state, SchedulingDomain::Compute, headers, body).await
}

async fn schedule_manila(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    schedule(state, SchedulingDomain::SharedFilesystem, headers, body).await
}

async fn schedule_cinder(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    schedule(state, SchedulingDomain::BlockStorage, headers, body).await
}

/// The caller's request id, or a fresh uuid when none was forwarded.
fn request_id_from(headers: &HeaderMap) -> String {
    for header in [OPENSTACK_REQUEST_ID_HEADER, REQUEST_ID_HEADER] {
        if let Some(value) = headers.get(header).and_then(|v| v.to_str().ok()) {
            if !value.is_empty() {
                return value.to_owned();
            }
        }
    }
    uuid::Uuid::new_v4().to_string()
}

async fn schedule(
    state: AppState,
    domain: SchedulingDomain,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let request_id = request_id_from(&headers);

    let mut response = match handle(&state, domain, &request_id, &body).await {
        Ok(hosts) => (StatusCode::OK, Json(ScheduleResponse { hosts })).into_response(),
        Err(ApiError::BadRequest(message)) => {
            (StatusCode::BAD_REQUEST, message).into_response()
        }
        Err(ApiError::Internal) => {
            (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY).into_response()
        }
    };
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        let _ = response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    state.metrics.observe_request(
        domain.as_str(),
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

async fn handle(
    state: &AppState,
    domain: SchedulingDomain,
    request_id: &str,
    body: &Bytes,
) -> Result<Vec<HostId>, ApiError> {
    let request: PlacementRequest = serde_json::from_slice(body).map_err(|e| {
        debug!(request_id, domain = %domain, error = %e, "malformed request body");
        ApiError::BadRequest("invalid request body".to_owned())
    })?;

    request.validate().map_err(|e| match e {
        EngineError::InvalidRequest { details } => {
            debug!(request_id, domain = %domain, details, "request invariant violated");
            ApiError::BadRequest(details)
        }
        other => {
            warn!(request_id, domain = %domain, error = %other, "unexpected validation error");
            ApiError::Internal
        }
    })?;

    let pipeline_name = if request.pipeline.is_empty() {
        state
            .settings
            .default_pipelines
            .get(&domain)
            .cloned()
            .ok_or_else(|| {
                debug!(request_id, domain = %domain, "no default pipeline configured");
                ApiError::BadRequest(
                    "no pipeline named and no default configured for this domain".to_owned(),
                )
            })?
    } else {
        request.pipeline.clone()
    };

    // Serialize runs within one domain; other domains proceed in parallel.
    let _domain_lock = state.domain_locks[domain.index()].lock().await;

    let permit = state
        .registry
        .begin_run(domain, &pipeline_name)
        .map_err(|e| {
            warn!(request_id, domain = %domain, pipeline = %pipeline_name, error = %e, "pipeline unavailable");
            ApiError::Internal
        })?;

    let tracer = RunTracer::new(
        request_id,
        pipeline_name.clone(),
        domain,
        state.settings.request_timeout,
        state.shutdown.child_token(),
    )
    .with_metrics(state.engine_metrics.clone());

    let output = permit.pipeline().run(&tracer, &request).await.map_err(|e| {
        warn!(request_id, domain = %domain, pipeline = %pipeline_name, error = %e, "pipeline run failed");
        ApiError::Internal
    })?;

    if output.ordered_hosts.is_empty() {
        warn!(
            request_id,
            domain = %domain,
            pipeline = %pipeline_name,
            "pipeline returned no hosts"
        );
        return Err(ApiError::Internal);
    }

    if permit.pipeline().create_decisions {
        if let Some(decisions) = &state.decisions {
            decisions.enqueue(DecisionUpdate {
                domain,
                pipeline: pipeline_name.clone(),
                resource_id: request.resource_id(),
                input_spec_digest: request.spec_digest(),
                result: DecisionResult::from_ordered(
                    output.ordered_hosts.clone(),
                    output.per_step_deltas.clone(),
                ),
            });
        }
    }

    debug!(
        request_id,
        domain = %domain,
        pipeline = %pipeline_name,
        hosts = output.ordered_hosts.len(),
        "scheduling request served"
    );
    Ok(output.ordered_hosts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_router;
    use axum::body::Body;
    use axum::http::Request;
    use cortex_config::settings::ApiSettings;
    use cortex_controller::decision_channel;
    use cortex_engine::registry::PipelineRegistry;
    use cortex_engine::step::StepRole;
    use cortex_engine::testing::{self, StepBehavior};
    use cortex_engine::pipeline::BuiltPipeline;
    use cortex_store::{ControlPlaneStore, MemoryStore};
    use cortex_telemetry::{DecisionMetrics, MetricsHandle};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn metrics_handle() -> MetricsHandle {
        MetricsHandle::new(&BTreeMap::new()).unwrap()
    }

    fn pipeline(name: &str, create_decisions: bool) -> BuiltPipeline {
        testing::built_pipeline(
            name,
            SchedulingDomain::Compute,
            create_decisions,
            vec![testing::bound_step(
                "no-op",
                StepRole::Filter,
                StepBehavior::Echo { delta: 0.0 },
            )],
            vec![testing::bound_step(
                "penalize-a",
                StepRole::Weigher,
                StepBehavior::Deltas {
                    deltas: [("A".to_owned(), -2.0)].into(),
                },
            )],
        )
    }

    fn state_with(
        registry: PipelineRegistry,
        decisions: Option<cortex_controller::DecisionSender>,
        default_pipeline: Option<&str>,
    ) -> AppState {
        let handle = metrics_handle();
        let mut settings = ApiSettings::default();
        if let Some(name) = default_pipeline {
            let _ = settings
                .default_pipelines
                .insert(SchedulingDomain::Compute, name.to_owned());
        }
        AppState::new(
            registry,
            decisions,
            settings,
            cortex_telemetry::ApiMetrics::new(&handle).unwrap(),
            cortex_telemetry::EngineMetrics::new(&handle).unwrap(),
            CancellationToken::new(),
        )
    }

    fn request_body() -> serde_json::Value {
        json!({
            "spec": {"instance_uuid": "inst-1"},
            "context": {},
            "hosts": [{"host_id": "A"}, {"host_id": "B"}],
            "weights": {"A": 1.0, "B": 0.5},
            "pipeline": "default",
            "rebuild": false
        })
    }

    async fn post(router: Router, path: &str, body: serde_json::Value) -> (StatusCode, String) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(path)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn returns_reranked_hosts() {
        let registry = PipelineRegistry::new();
        registry.insert(pipeline("default", false));
        let router = api_router(state_with(registry, None, None));

        let (status, body) = post(router, "/scheduler/nova/external", request_body()).await;
        assert_eq!(status, StatusCode::OK);
        // The weigher drops A below B.
        assert_eq!(body, json!({"hosts": ["B", "A"]}).to_string());
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let registry = PipelineRegistry::new();
        registry.insert(pipeline("default", false));
        let router = api_router(state_with(registry, None, None));

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/scheduler/nova/external")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invariant_violation_is_bad_request_with_safe_message() {
        let registry = PipelineRegistry::new();
        registry.insert(pipeline("default", false));
        let router = api_router(state_with(registry, None, None));

        let mut body = request_body();
        body["weights"] = json!({"A": 1.0});
        let (status, message) = post(router, "/scheduler/nova/external", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, "host `B` has no weight");
    }

    #[tokio::test]
    async fn non_post_is_method_not_allowed() {
        let registry = PipelineRegistry::new();
        registry.insert(pipeline("default", false));
        let router = api_router(state_with(registry, None, None));

        let response = router
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/scheduler/nova/external")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn missing_pipeline_is_internal_with_canonical_body() {
        let router = api_router(state_with(PipelineRegistry::new(), None, None));

        let mut body = request_body();
        body["pipeline"] = json!("missing");
        let (status, message) = post(router, "/scheduler/nova/external", body).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, INTERNAL_ERROR_BODY);
    }

    #[tokio::test]
    async fn empty_pipeline_name_uses_the_domain_default() {
        let registry = PipelineRegistry::new();
        registry.insert(pipeline("default-nova", false));
        let router = api_router(state_with(registry, None, Some("default-nova")));

        let mut body = request_body();
        body["pipeline"] = json!("");
        let (status, _) = post(router, "/scheduler/nova/external", body).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn empty_pipeline_name_without_default_is_bad_request() {
        let registry = PipelineRegistry::new();
        registry.insert(pipeline("default", false));
        let router = api_router(state_with(registry, None, None));

        let mut body = request_body();
        body["pipeline"] = json!("");
        let (status, _) = post(router, "/scheduler/nova/external", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_result_is_internal() {
        let registry = PipelineRegistry::new();
        let lossy = testing::built_pipeline(
            "default",
            SchedulingDomain::Compute,
            false,
            vec![testing::bound_step(
                "drop-all",
                StepRole::Filter,
                StepBehavior::Keep {
                    deltas: BTreeMap::new(),
                },
            )],
            vec![],
        );
        registry.insert(lossy);
        let router = api_router(state_with(registry, None, None));

        let (status, message) = post(router, "/scheduler/nova/external", request_body()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, INTERNAL_ERROR_BODY);
    }

    #[tokio::test]
    async fn decisions_are_enqueued_for_opted_in_pipelines() {
        let registry = PipelineRegistry::new();
        registry.insert(pipeline("default", true));

        let store = Arc::new(MemoryStore::new());
        let decision_metrics =
            DecisionMetrics::new(&metrics_handle()).unwrap();
        let (sender, writer) = decision_channel(
            8,
            store.clone() as Arc<dyn ControlPlaneStore>,
            decision_metrics,
        );
        let cancel = CancellationToken::new();
        let writer_task = tokio::spawn(writer.run(cancel.clone()));

        let router = api_router(state_with(registry, Some(sender), None));
        let (status, _) = post(router, "/scheduler/nova/external", request_body()).await;
        assert_eq!(status, StatusCode::OK);

        for _ in 0..100 {
            if !store
                .list_decisions(SchedulingDomain::Compute)
                .await
                .unwrap()
                .is_empty()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let decisions = store.list_decisions(SchedulingDomain::Compute).await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].spec.resource_id, "inst-1");
        let result = decisions[0].status.result.as_ref().unwrap();
        assert_eq!(result.ordered_hosts, ["B", "A"]);
        assert_eq!(result.target_host.as_deref(), Some("B"));

        cancel.cancel();
        writer_task.await.unwrap();
    }

    #[tokio::test]
    async fn forwarded_request_ids_are_echoed() {
        let registry = PipelineRegistry::new();
        registry.insert(pipeline("default", false));
        let router = api_router(state_with(registry, None, None));

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/scheduler/nova/external")
                    .header("x-openstack-request-id", "req-abc123")
                    .body(Body::from(request_body().to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok()),
            Some("req-abc123")
        );
    }

    #[tokio::test]
    async fn missing_request_id_gets_a_generated_one() {
        let registry = PipelineRegistry::new();
        registry.insert(pipeline("default", false));
        let router = api_router(state_with(registry, None, None));

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/scheduler/nova/external")
                    .body(Body::from(request_body().to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let echoed = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap();
        assert!(uuid::Uuid::parse_str(echoed).is_ok());
    }

    #[tokio::test]
    async fn domains_are_isolated() {
        let registry = PipelineRegistry::new();
        registry.insert(pipeline("default", false));
        let router = api_router(state_with(registry, None, None));

        // The pipeline lives in the compute domain only.
        let (status, message) = post(router, "/scheduler/cinder/external", request_body()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, INTERNAL_ERROR_BODY);
    }
}
