//! Request and verdict shapes shared by the engine, service and workflow.

use serde::{Deserialize, Serialize};

use crate::error::PlausibilityError;
use crate::geo::{Coordinate, DistanceTier};

/// One attendance submission's location claim. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlausibilityRequest {
    pub subject_id: String,
    pub claimed: Coordinate,
    pub reference: Coordinate,
}

impl PlausibilityRequest {
    /// Flat constructor matching the external `evaluate(...)` call shape.
    /// Coordinates are checked later by the engine, so this never fails.
    pub fn new(
        subject_id: impl Into<String>,
        claimed_lat: f64,
        claimed_lon: f64,
        reference_lat: f64,
        reference_lon: f64,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            claimed: Coordinate {
                lat: claimed_lat,
                lon: claimed_lon,
            },
            reference: Coordinate {
                lat: reference_lat,
                lon: reference_lon,
            },
        }
    }

    pub fn validate(&self) -> Result<(), PlausibilityError> {
        if self.subject_id.trim().is_empty() {
            return Err(PlausibilityError::invalid("subjectId must be non-empty"));
        }
        self.claimed
            .validate()
            .map_err(|e| prefix_reason("claimed", e))?;
        self.reference
            .validate()
            .map_err(|e| prefix_reason("reference", e))?;
        Ok(())
    }
}

fn prefix_reason(which: &str, e: PlausibilityError) -> PlausibilityError {
    match e {
        PlausibilityError::InvalidInput { reason } => {
            PlausibilityError::invalid(format!("{which}: {reason}"))
        }
    }
}

/// Who produced the verdict's probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    Deterministic,
    Enriched,
}

/// Outcome of one evaluation. Built once, never mutated by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlausibilityVerdict {
    /// In `[0.0, 1.0]`.
    pub probability: f64,
    /// Advisory only; always mentions the distance unless the tier is Exact.
    pub rationale: String,
    pub distance_meters: f64,
    pub tier: DistanceTier,
    pub source: VerdictSource,
    /// Set when an enrichment proposal was rejected against the baseline.
    #[serde(default)]
    pub policy_overridden: bool,
}

impl PlausibilityVerdict {
    pub fn deterministic(
        probability: f64,
        rationale: impl Into<String>,
        distance_meters: f64,
        tier: DistanceTier,
    ) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
            rationale: rationale.into(),
            distance_meters,
            tier,
            source: VerdictSource::Deterministic,
            policy_overridden: false,
        }
    }

    pub fn overridden(mut self) -> Self {
        self.policy_overridden = true;
        self
    }

    /// Swap in an accepted enrichment proposal. Distance and tier stay as computed.
    pub fn enriched(mut self, probability: f64, rationale: impl Into<String>) -> Self {
        self.probability = probability.clamp(0.0, 1.0);
        self.rationale = rationale.into();
        self.source = VerdictSource::Enriched;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    /// `probability > threshold` ⇒ Present.
    pub fn from_probability(probability: f64, threshold: f64) -> Self {
        if probability > threshold {
            AttendanceStatus::Present
        } else {
            AttendanceStatus::Absent
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
        }
    }
}
