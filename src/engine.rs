//! # Decision Engine
//! Pure, testable logic that maps a `PlausibilityRequest` → `PlausibilityVerdict`.
//! No I/O, suitable for unit tests and offline replay of stored submissions.
//!
//! Policy: validate → distance → tier → baseline probability → rationale.
//! The same input and config always produce the same verdict.

use crate::config::PolicyConfig;
use crate::error::PlausibilityError;
use crate::geo::{haversine_meters, DistanceTier};
use crate::verdict::{PlausibilityRequest, PlausibilityVerdict};

/// Deterministic floor beneath any enrichment.
pub fn evaluate_deterministic(
    request: &PlausibilityRequest,
    policy: &PolicyConfig,
) -> Result<PlausibilityVerdict, PlausibilityError> {
    // 1) Validation precedes everything; no partial verdict on failure.
    request.validate()?;

    // 2) Distance
    let distance = haversine_meters(request.claimed, request.reference);

    // 3) Tier
    let tier = policy.tier_policy().classify(distance);

    // 4) Baseline probability
    let probability = baseline_probability(tier, policy);

    // 5) Rationale
    let rationale = rationale_for(tier, distance, policy.near_field_radius_m);

    Ok(PlausibilityVerdict::deterministic(
        probability,
        rationale,
        distance,
        tier,
    ))
}

/// Tier → probability constants from config.
pub fn baseline_probability(tier: DistanceTier, policy: &PolicyConfig) -> f64 {
    match tier {
        DistanceTier::Exact => policy.exact_probability,
        DistanceTier::NearField => policy.near_field_probability,
        DistanceTier::FarField => policy.far_field_probability,
    }
}

/// One decimal place, the only distance format used in rationales.
pub fn format_distance(meters: f64) -> String {
    format!("{meters:.1}")
}

fn rationale_for(tier: DistanceTier, distance: f64, radius: f64) -> String {
    let d = format_distance(distance);
    let r = format_radius(radius);
    match tier {
        DistanceTier::Exact => "Exact location match.".to_string(),
        DistanceTier::NearField => {
            format!("Student is {d} meters away, which is within the {r}-meter allowance.")
        }
        DistanceTier::FarField => {
            format!("Student is {d} meters away, which is outside the {r}-meter allowance.")
        }
    }
}

// "10" rather than "10.0" for whole radii.
fn format_radius(radius: f64) -> String {
    if radius.fract() == 0.0 {
        format!("{radius:.0}")
    } else {
        format!("{radius}")
    }
}
