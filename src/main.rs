//! Attendance Verifier binary entrypoint.
//! Boots the Axum HTTP server, wiring routes, shared state, and middleware.

use attendance_verifier::{api, run_enrichment_probe};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Enable compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - VERIFIER_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("VERIFIER_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("attendance_verifier=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    // Initialize dev tracing early (no-op in production).
    enable_dev_tracing();

    let state = api::AppState::from_env()
        .map_err(|e| shuttle_runtime::Error::Custom(e.context("loading verifier config")))?;

    if std::env::var("AI_PROBE").ok().as_deref() == Some("1") {
        if let Err(e) = run_enrichment_probe().await {
            tracing::warn!(error = ?e, "enrichment probe didn't run");
        }
    }

    let router = api::router(state);
    Ok(router.into())
}
