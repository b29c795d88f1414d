use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::config::{EnrichmentConfig, PolicyConfig};
use crate::error::PlausibilityError;
use crate::history::{AttendanceLog, AttendanceRecord};
use crate::service::{EnrichmentOutcome, PlausibilityService};
use crate::telemetry::Metrics;
use crate::verdict::{PlausibilityRequest, PlausibilityVerdict};
use crate::workflow::{SessionRequest, SubmissionWorkflow, SubmitRequest, WorkflowError};

pub const ENV_AI_CONFIG_PATH: &str = "AI_CONFIG_PATH";
const ATTENDANCE_LOG_CAP: usize = 2_000;

#[derive(Clone)]
pub struct AppState {
    pub workflow: SubmissionWorkflow,
}

impl AppState {
    pub fn new(service: PlausibilityService) -> Self {
        let log = Arc::new(AttendanceLog::with_capacity(ATTENDANCE_LOG_CAP));
        Self {
            workflow: SubmissionWorkflow::new(service, log),
        }
    }

    /// Load policy + provider config from disk/env.
    pub fn from_env() -> anyhow::Result<Self> {
        let policy = PolicyConfig::from_env()?;
        let ai_path = std::env::var(ENV_AI_CONFIG_PATH)
            .unwrap_or_else(|_| crate::config::ai::DEFAULT_AI_CONFIG_PATH.to_string());
        let ai = EnrichmentConfig::load_or_default(&ai_path)?;
        Ok(Self::new(PlausibilityService::from_config(policy, &ai)))
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/evaluate", post(evaluate))
        .route("/sessions", post(set_session))
        .route("/attendance/submit", post(submit_attendance))
        .route("/attendance/recent", get(recent_attendance))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Router plus `/metrics` when `DEBUG_ROUTES=1`.
pub fn router(state: AppState) -> Router {
    let base = create_router(state.clone());
    if debug_routes_enabled() {
        let metrics = Metrics::init(state.workflow.service().policy().enrichment_timeout_ms);
        base.merge(metrics.router())
    } else {
        base
    }
}

fn debug_routes_enabled() -> bool {
    std::env::var("DEBUG_ROUTES").ok().as_deref() == Some("1")
}

// ------------------------------------------------------------
// POST /evaluate
// ------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateReq {
    #[serde(default)]
    subject_id: String,
    claimed_lat: Option<f64>,
    claimed_lon: Option<f64>,
    reference_lat: Option<f64>,
    reference_lon: Option<f64>,
}

impl EvaluateReq {
    fn into_request(self) -> Result<PlausibilityRequest, PlausibilityError> {
        match (
            self.claimed_lat,
            self.claimed_lon,
            self.reference_lat,
            self.reference_lon,
        ) {
            (Some(a), Some(b), Some(c), Some(d)) => {
                Ok(PlausibilityRequest::new(self.subject_id, a, b, c, d))
            }
            _ => Err(PlausibilityError::invalid(
                "claimedLat, claimedLon, referenceLat and referenceLon are required",
            )),
        }
    }
}

#[derive(Serialize)]
struct EvaluateResp {
    #[serde(flatten)]
    verdict: PlausibilityVerdict,
    enrichment: EnrichmentOutcome,
}

async fn evaluate(
    State(state): State<AppState>,
    body: Result<Json<EvaluateReq>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return rejected_body(rejection),
    };
    let request = match body.into_request() {
        Ok(r) => r,
        Err(e) => return bad_request(&e.to_string()),
    };
    match state.workflow.service().evaluate(&request).await {
        Ok(eval) => {
            let headers = enrichment_headers(eval.enrichment);
            let body = EvaluateResp {
                verdict: eval.verdict,
                enrichment: eval.enrichment,
            };
            (StatusCode::OK, headers, Json(body)).into_response()
        }
        Err(e) => bad_request(&e.to_string()),
    }
}

fn enrichment_headers(outcome: EnrichmentOutcome) -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(
        "x-enrichment-used",
        HeaderValue::from_static(if outcome.is_applied() { "true" } else { "false" }),
    );
    if let Some(reason) = outcome.reason_label() {
        h.insert("x-enrichment-reason", HeaderValue::from_static(reason));
    }
    h
}

// ------------------------------------------------------------
// Sessions + submissions
// ------------------------------------------------------------

async fn set_session(
    State(state): State<AppState>,
    body: Result<Json<SessionRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return rejected_body(rejection),
    };
    match state.workflow.set_session(body) {
        Ok(session) => (
            StatusCode::OK,
            Json(json!({ "message": "Attendance code set successfully", "session": session })),
        )
            .into_response(),
        Err(e) => workflow_error(e),
    }
}

async fn submit_attendance(
    State(state): State<AppState>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return rejected_body(rejection),
    };
    match state.workflow.submit(body).await {
        Ok(sub) => {
            let headers = enrichment_headers(sub.enrichment);
            (
                StatusCode::CREATED,
                headers,
                Json(json!({ "message": sub.message(), "data": sub.record })),
            )
                .into_response()
        }
        Err(e) => workflow_error(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentQuery {
    limit: Option<usize>,
    student_id: Option<String>,
}

async fn recent_attendance(
    State(state): State<AppState>,
    Query(q): Query<RecentQuery>,
) -> Json<Vec<AttendanceRecord>> {
    let limit = q.limit.unwrap_or(50);
    let log = state.workflow.log();
    let rows = match q.student_id {
        Some(id) => {
            let mut all = log.for_student(&id);
            let start = all.len().saturating_sub(limit);
            all.split_off(start)
        }
        None => log.snapshot_last_n(limit),
    };
    Json(rows)
}

fn workflow_error(e: WorkflowError) -> Response {
    let status = match e {
        WorkflowError::UnknownCourse(_) => StatusCode::NOT_FOUND,
        WorkflowError::MissingFields(_)
        | WorkflowError::LocationNotSet(_)
        | WorkflowError::InvalidCode
        | WorkflowError::Plausibility(_) => StatusCode::BAD_REQUEST,
    };
    (status, Json(json!({ "message": e.to_string() }))).into_response()
}

/// Malformed JSON, wrong field types and a missing content-type are all
/// invalid input: 400 rather than axum's 415/422.
fn rejected_body(rejection: JsonRejection) -> Response {
    crate::telemetry::record_invalid_input();
    bad_request(&PlausibilityError::invalid(rejection.body_text()).to_string())
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
}
