// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - POST /evaluate        (verdict shape, 400 on invalid input)
// - POST /sessions + POST /attendance/submit (one-time code, status)
// - GET /attendance/recent

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::json;
use serde_json::Value as Json;
use tower::ServiceExt as _; // for `oneshot`

use attendance_verifier::api::{self, AppState};
use attendance_verifier::config::PolicyConfig;
use attendance_verifier::PlausibilityService;

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

/// Deterministic router; no env or config files involved.
fn test_router() -> Router {
    let state = AppState::new(PlausibilityService::deterministic_only(
        PolicyConfig::default(),
    ));
    api::create_router(state)
}

async fn post_json(app: &Router, uri: &str, payload: Json) -> (StatusCode, Json) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST");
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let v: Json = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, v)
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let app = test_router();
    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");

    let resp = app.oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK, "health should be 200");

    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    assert_eq!(String::from_utf8(bytes).expect("utf8").trim(), "OK");
}

#[tokio::test]
async fn api_evaluate_returns_verdict_fields() {
    let app = test_router();
    let (status, v) = post_json(
        &app,
        "/evaluate",
        json!({
            "subjectId": "FPO/CS/2021/001",
            "claimedLat": 6.02245, "claimedLon": 7.07004,
            "referenceLat": 6.0224, "referenceLon": 7.0700
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {v}");
    assert_eq!(v["probability"], json!(0.9));
    assert_eq!(v["tier"], json!("near_field"));
    assert_eq!(v["source"], json!("deterministic"));
    assert_eq!(v["policyOverridden"], json!(false));
    assert!(v["distanceMeters"].as_f64().unwrap() > 7.0);
    assert!(v["rationale"].as_str().unwrap().contains("7.1"));
    assert_eq!(v["enrichment"]["status"], json!("skipped"));
    assert_eq!(v["enrichment"]["reason"], json!("disabled"));
}

#[tokio::test]
async fn api_evaluate_rejects_invalid_input_with_400() {
    let app = test_router();

    let (status, v) = post_json(
        &app,
        "/evaluate",
        json!({
            "subjectId": "FPO/CS/2021/001",
            "claimedLat": 95.0, "claimedLon": 7.07,
            "referenceLat": 6.0224, "referenceLon": 7.0700
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(v["message"].as_str().unwrap().contains("latitude"));

    let (status, _) = post_json(
        &app,
        "/evaluate",
        json!({
            "subjectId": "",
            "claimedLat": 6.0, "claimedLon": 7.0,
            "referenceLat": 6.0, "referenceLon": 7.0
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(
        &app,
        "/evaluate",
        json!({ "subjectId": "s", "claimedLat": 6.0 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn api_rejects_malformed_bodies_with_400() {
    let app = test_router();

    let (status, v) = post_json(
        &app,
        "/evaluate",
        json!({
            "subjectId": "FPO/CS/2021/001",
            "claimedLat": "6.0", "claimedLon": 7.07,
            "referenceLat": 6.0224, "referenceLon": 7.0700
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "body: {v}");
    assert!(v["message"].as_str().unwrap().starts_with("invalid input"));

    let (status, _) = post_json(
        &app,
        "/attendance/submit",
        json!({ "studentId": "s1", "courseCode": "CSC101", "attendanceCode": "x",
                "latitude": "north", "longitude": 7.0 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Broken JSON, then a body without a content-type.
    for (content_type, body) in [
        (Some("application/json"), "{\"subjectId\": "),
        (None, r#"{"subjectId":"s","claimedLat":6.0,"claimedLon":7.0,"referenceLat":6.0,"referenceLon":7.0}"#),
    ] {
        let mut req = Request::builder().method("POST").uri("/evaluate");
        if let Some(ct) = content_type {
            req = req.header("content-type", ct);
        }
        let resp = app
            .clone()
            .oneshot(req.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body: {body}");
    }
}

#[tokio::test]
async fn api_session_then_submit_records_attendance() {
    let app = test_router();

    let (status, _) = post_json(
        &app,
        "/sessions",
        json!({ "courseCode": "CSC101", "attendanceCode": "7G4K",
                "latitude": 6.0224, "longitude": 7.0700 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let submit = json!({
        "studentId": "FPO/CS/2021/001", "courseCode": "CSC101",
        "attendanceCode": "7G4K", "latitude": 6.0224, "longitude": 7.0700
    });
    let (status, v) = post_json(&app, "/attendance/submit", submit.clone()).await;
    assert_eq!(status, StatusCode::CREATED, "body: {v}");
    assert_eq!(
        v["message"],
        json!("Attendance recorded as Present. On-site probability: 100%.")
    );
    assert_eq!(v["data"]["status"], json!("Present"));
    assert_eq!(v["data"]["locationScore"], json!(1.0));
    assert_eq!(v["data"]["remarks"], json!("Exact location match."));

    // Code is one-time.
    let (status, v) = post_json(&app, "/attendance/submit", submit).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["message"], json!("invalid attendance code"));

    let req = Request::builder()
        .method("GET")
        .uri("/attendance/recent?limit=5")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    let rows: Json = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["courseCode"], json!("CSC101"));
}

#[tokio::test]
async fn api_submit_status_codes() {
    let app = test_router();

    let (status, _) = post_json(
        &app,
        "/attendance/submit",
        json!({ "studentId": "s1", "courseCode": "NOPE", "attendanceCode": "x",
                "latitude": 6.0, "longitude": 7.0 }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, v) = post_json(
        &app,
        "/attendance/submit",
        json!({ "studentId": "s1", "courseCode": "CSC101", "attendanceCode": "x" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(v["message"].as_str().unwrap().contains("missing required fields"));

    post_json(
        &app,
        "/sessions",
        json!({ "courseCode": "CSC101", "attendanceCode": "x",
                "latitude": 6.0224, "longitude": 7.0700 }),
    )
    .await;
    let (status, v) = post_json(
        &app,
        "/attendance/submit",
        json!({ "studentId": "s1", "courseCode": "CSC101", "attendanceCode": "x",
                "latitude": 6.0250, "longitude": 7.0730 }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(v["data"]["status"], json!("Absent"));
    assert!(v["data"]["remarks"].as_str().unwrap().contains("440.0"));
}
