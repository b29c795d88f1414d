use axum::{routing::get, Router};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::warn;

use crate::error::EnrichmentFault;
use crate::geo::DistanceTier;
use crate::verdict::AttendanceStatus;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder once per process and expose the configured
    /// enrichment timeout as a static gauge.
    pub fn init(enrichment_timeout_ms: u64) -> Self {
        let handle = HANDLE
            .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
                Ok(h) => h,
                Err(e) => {
                    // Another recorder owns the process; render an empty local one.
                    warn!(error = %e, "prometheus recorder not installed");
                    PrometheusBuilder::new().build_recorder().handle()
                }
            })
            .clone();

        gauge!("enrichment_timeout_ms").set(enrichment_timeout_ms as f64);

        Self { handle }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

pub fn record_evaluation(tier: DistanceTier) {
    let tier = match tier {
        DistanceTier::Exact => "exact",
        DistanceTier::NearField => "near_field",
        DistanceTier::FarField => "far_field",
    };
    counter!("plausibility_evaluations_total", "tier" => tier).increment(1);
}

pub fn record_invalid_input() {
    counter!("plausibility_invalid_input_total").increment(1);
}

pub fn record_enrichment_applied(duration_ms: f64) {
    counter!("enrichment_applied_total").increment(1);
    histogram!("enrichment_duration_ms").record(duration_ms);
}

pub fn record_enrichment_fallback(fault: EnrichmentFault) {
    counter!("enrichment_fallback_total", "reason" => fault.label()).increment(1);
}

pub fn record_submission(status: AttendanceStatus) {
    counter!("attendance_submissions_total", "status" => status.as_str()).increment(1);
}
