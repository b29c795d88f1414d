// src/lib.rs
// Public library surface for integration tests (and embedding in other services).

pub mod api;
pub mod config;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod geo;
pub mod history;
pub mod service;
pub mod telemetry;
pub mod verdict;
pub mod workflow;

pub mod ai_bootstrap;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::error::{EnrichmentFault, PlausibilityError};
pub use crate::geo::{haversine_meters, Coordinate, DistanceTier, TierPolicy};
pub use crate::service::{EnrichmentOutcome, Evaluation, PlausibilityService};
pub use crate::verdict::{AttendanceStatus, PlausibilityRequest, PlausibilityVerdict};

use tracing::info;

/// Build the full in-process app from `.env`, config files and env vars.
pub async fn app() -> anyhow::Result<axum::Router> {
    let _ = dotenvy::dotenv();
    let state = AppState::from_env()?;
    Ok(router(state))
}

/// Call this from the Shuttle entrypoint (after tracing init) to perform a one-off
/// smoke test of the enrichment provider. It won't panic on failure; it just logs the result.
pub async fn run_enrichment_probe() -> anyhow::Result<()> {
    let rt = ai_bootstrap::EnrichmentRuntime::from_env()?;
    rt.quick_probe().await;
    info!("enrichment probe finished");
    Ok(())
}
