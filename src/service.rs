//! # Plausibility Decision Service
//! Deterministic floor first, optional enrichment second.
//!
//! Only `InvalidInput` leaves this module as an error. Every enrichment fault
//! (disabled, timeout, schema, tolerance, open breaker) degrades to the
//! deterministic verdict. The service holds no per-request state, so dropping
//! an `evaluate` future only cancels that request's enrichment call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{EnrichmentConfig, PolicyConfig};
use crate::engine::{self, format_distance};
use crate::enrich::{
    build_client_from_config, CircuitBreaker, DisabledClient, DynEnrichmentClient,
    EnrichmentProposal,
};
use crate::error::{EnrichmentFault, PlausibilityError};
use crate::geo::DistanceTier;
use crate::telemetry;
use crate::verdict::{PlausibilityRequest, PlausibilityVerdict};

const MAX_ATTEMPTS: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(100);
/// Slack for float rounding: a proposal exactly `tolerance` away is accepted.
const TOLERANCE_EPSILON: f64 = 1e-9;

/// Whether enrichment shaped the verdict, and if not, why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum EnrichmentOutcome {
    Applied,
    Skipped(EnrichmentFault),
}

impl EnrichmentOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, EnrichmentOutcome::Applied)
    }

    pub fn reason_label(self) -> Option<&'static str> {
        match self {
            EnrichmentOutcome::Applied => None,
            EnrichmentOutcome::Skipped(f) => Some(f.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub verdict: PlausibilityVerdict,
    pub enrichment: EnrichmentOutcome,
}

#[derive(Clone)]
pub struct PlausibilityService {
    inner: Arc<Inner>,
}

struct Inner {
    policy: PolicyConfig,
    client: DynEnrichmentClient,
    breaker: CircuitBreaker,
}

impl PlausibilityService {
    pub fn new(policy: PolicyConfig, client: DynEnrichmentClient, breaker: CircuitBreaker) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                client,
                breaker,
            }),
        }
    }

    /// Build from loaded config; provider chosen by `build_client_from_config`.
    pub fn from_config(policy: PolicyConfig, ai: &EnrichmentConfig) -> Self {
        let client = build_client_from_config(ai);
        let breaker = CircuitBreaker::new(
            ai.max_concurrency,
            ai.breaker_threshold,
            ai.breaker_cooldown_secs,
        );
        info!(
            provider = client.provider_name(),
            enabled = policy.enrichment_enabled,
            "plausibility service ready"
        );
        Self::new(policy, client, breaker)
    }

    /// No enrichment at all, whatever the policy says.
    pub fn deterministic_only(policy: PolicyConfig) -> Self {
        let policy = PolicyConfig {
            enrichment_enabled: false,
            ..policy
        };
        Self::new(policy, Arc::new(DisabledClient), CircuitBreaker::new(1, 1, 1))
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.inner.policy
    }

    pub fn provider_name(&self) -> &'static str {
        self.inner.client.provider_name()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    pub async fn evaluate(
        &self,
        request: &PlausibilityRequest,
    ) -> Result<Evaluation, PlausibilityError> {
        let policy = &self.inner.policy;
        let subject = anon_hash(&request.subject_id);

        let floor = match engine::evaluate_deterministic(request, policy) {
            Ok(v) => v,
            Err(e) => {
                telemetry::record_invalid_input();
                debug!(%subject, error = %e, "rejected plausibility request");
                return Err(e);
            }
        };
        telemetry::record_evaluation(floor.tier);

        if !policy.enrichment_enabled {
            return Ok(Evaluation {
                verdict: floor,
                enrichment: EnrichmentOutcome::Skipped(EnrichmentFault::Disabled),
            });
        }

        let started = Instant::now();
        let evaluation = match self.propose_with_retry(request, &floor).await {
            Ok(proposal) => self.reconcile(floor, proposal),
            Err(fault) => Evaluation {
                verdict: floor,
                enrichment: EnrichmentOutcome::Skipped(fault),
            },
        };

        match evaluation.enrichment {
            EnrichmentOutcome::Applied => {
                telemetry::record_enrichment_applied(started.elapsed().as_secs_f64() * 1_000.0);
            }
            EnrichmentOutcome::Skipped(fault) => {
                telemetry::record_enrichment_fallback(fault);
                warn!(
                    %subject,
                    reason = fault.label(),
                    provider = self.provider_name(),
                    "enrichment skipped; deterministic verdict used"
                );
            }
        }
        Ok(evaluation)
    }

    /// One call plus at most one retry on a transient fault, each bounded by the
    /// configured timeout.
    async fn propose_with_retry(
        &self,
        request: &PlausibilityRequest,
        floor: &PlausibilityVerdict,
    ) -> Result<EnrichmentProposal, EnrichmentFault> {
        let breaker = &self.inner.breaker;
        let _permit = breaker.try_acquire()?;
        let timeout = self.inner.policy.enrichment_timeout();

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let res = match tokio::time::timeout(timeout, self.inner.client.propose(request, floor))
                .await
            {
                Ok(r) => r,
                Err(_) => Err(EnrichmentFault::Timeout),
            };

            match res {
                Ok(p) => {
                    breaker.record_success();
                    return p.validate();
                }
                Err(fault) => {
                    if fault == EnrichmentFault::Timeout {
                        breaker.record_timeout();
                    }
                    let retry = fault.is_transient()
                        && attempt < MAX_ATTEMPTS
                        && !breaker.is_open_at(chrono::Utc::now());
                    if !retry {
                        return Err(fault);
                    }
                    debug!(attempt, reason = fault.label(), "retrying enrichment");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }

    /// Accept the proposal only within tolerance of the baseline, and only keep a
    /// rationale that still states the computed distance.
    fn reconcile(&self, floor: PlausibilityVerdict, proposal: EnrichmentProposal) -> Evaluation {
        let tolerance = self.inner.policy.enrichment_tolerance;
        let drift = (proposal.probability - floor.probability).abs();
        if drift - tolerance > TOLERANCE_EPSILON {
            return Evaluation {
                verdict: floor.overridden(),
                enrichment: EnrichmentOutcome::Skipped(EnrichmentFault::OutOfTolerance),
            };
        }

        let distance_text = format_distance(floor.distance_meters);
        let rationale = match proposal.rationale {
            Some(r) if floor.tier == DistanceTier::Exact || r.contains(&distance_text) => r,
            _ => floor.rationale.clone(),
        };
        Evaluation {
            verdict: floor.enriched(proposal.probability, rationale),
            enrichment: EnrichmentOutcome::Applied,
        }
    }
}

/// Short SHA-256 prefix; identifiers never reach logs in the clear.
pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
