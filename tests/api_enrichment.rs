// tests/api_enrichment.rs
// Env-driven enrichment modes through the full `app()`. Serialized because we
// mutate process env.

use std::env;

use axum::body::{self, Body};
use axum::http::{HeaderMap, Request, StatusCode};
use serde_json::{json, Value};
use serial_test::serial;
use tower::ServiceExt; // for `oneshot`

/// Small RAII helper to snapshot & restore env vars in each test.
struct EnvSnapshot {
    saved: Vec<(String, Option<String>)>,
}
impl EnvSnapshot {
    /// Provide a list of (KEY, Some(VALUE)) to set, or (KEY, None) to remove.
    fn set(pairs: &[(&str, Option<&str>)]) -> Self {
        let mut saved = Vec::with_capacity(pairs.len());
        for (k, v) in pairs {
            let key = k.to_string();
            saved.push((key.clone(), env::var(k).ok()));
            match v {
                Some(val) => env::set_var(&key, val),
                None => env::remove_var(&key),
            }
        }
        Self { saved }
    }
}
impl Drop for EnvSnapshot {
    fn drop(&mut self) {
        for (k, maybe_v) in self.saved.drain(..) {
            match maybe_v {
                Some(v) => env::set_var(&k, v),
                None => env::remove_var(&k),
            }
        }
    }
}

fn get_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

/// POST /evaluate for an exact match; returns (status, headers, json).
async fn evaluate_exact() -> (StatusCode, HeaderMap, Value) {
    let app = attendance_verifier::app()
        .await
        .expect("app() should build Router in tests");
    let payload = json!({
        "subjectId": "FPO/CS/2021/001",
        "claimedLat": 6.0224, "claimedLon": 7.0700,
        "referenceLat": 6.0224, "referenceLon": 7.0700
    });
    let req = Request::builder()
        .method("POST")
        .uri("/evaluate")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("failed to build request");
    let resp = app.oneshot(req).await.expect("request failed");
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    (status, headers, serde_json::from_slice(&bytes).unwrap())
}

fn base_env(mode: Option<&str>, enabled: &str) -> EnvSnapshot {
    EnvSnapshot::set(&[
        ("AI_TEST_MODE", mode),
        ("AI_ENABLED", Some(enabled)),
        ("AI_TIMEOUT_MS", Some("50")),
        ("VERIFIER_CONFIG_PATH", None),
        ("AI_CONFIG_PATH", None),
        ("OPENAI_API_KEY", None),
    ])
}

#[tokio::test]
#[serial]
async fn disabled_enrichment_is_reported() {
    let _env = base_env(Some("mock"), "0");
    let (status, headers, v) = evaluate_exact().await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(get_header(&headers, "x-enrichment-used"), Some("false"));
    assert_eq!(get_header(&headers, "x-enrichment-reason"), Some("disabled"));
    assert_eq!(v["probability"], json!(1.0));
}

#[tokio::test]
#[serial]
async fn provider_error_degrades_to_deterministic() {
    let _env = base_env(Some("error"), "1");
    let (status, headers, v) = evaluate_exact().await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(get_header(&headers, "x-enrichment-used"), Some("false"));
    assert_eq!(get_header(&headers, "x-enrichment-reason"), Some("unavailable"));
    assert_eq!(v["probability"], json!(1.0));
    assert_eq!(v["rationale"], json!("Exact location match."));
    assert_eq!(v["source"], json!("deterministic"));
}

#[tokio::test]
#[serial]
async fn provider_timeout_degrades_to_deterministic() {
    let _env = base_env(Some("timeout"), "1");
    let (status, headers, v) = evaluate_exact().await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(get_header(&headers, "x-enrichment-reason"), Some("timeout"));
    assert_eq!(v["probability"], json!(1.0));
}

#[tokio::test]
#[serial]
async fn mock_provider_enriches_verdict() {
    let _env = base_env(Some("mock"), "1");
    let (status, headers, v) = evaluate_exact().await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(get_header(&headers, "x-enrichment-used"), Some("true"));
    assert!(get_header(&headers, "x-enrichment-reason").is_none());
    assert_eq!(v["source"], json!("enriched"));
    assert_eq!(v["probability"], json!(1.0));
}

#[tokio::test]
#[serial]
async fn missing_api_key_degrades_to_deterministic() {
    let _env = base_env(None, "1");
    let (status, headers, v) = evaluate_exact().await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(get_header(&headers, "x-enrichment-used"), Some("false"));
    assert_eq!(
        get_header(&headers, "x-enrichment-reason"),
        Some("missing_credentials")
    );
    assert_eq!(v["probability"], json!(1.0));
}
