//! Error taxonomy for plausibility evaluation.
//!
//! Only [`PlausibilityError`] crosses the service boundary. [`EnrichmentFault`]
//! is absorbed by the service and turned into a deterministic verdict.

use std::fmt;

/// Fatal to a single request; no verdict is produced.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlausibilityError {
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },
}

impl PlausibilityError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }
}

/// Why the optional enrichment step did not contribute to a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnrichmentFault {
    /// Enrichment is switched off in config.
    Disabled,
    /// Provider unreachable or answered with an HTTP error.
    Unavailable,
    /// Provider configured without an API key; retrying cannot help.
    MissingCredentials,
    Timeout,
    /// Provider answered but the payload failed validation.
    SchemaViolation,
    /// Proposed probability too far from the tier baseline.
    OutOfTolerance,
    /// Breaker open or concurrency cap reached.
    CircuitOpen,
}

impl EnrichmentFault {
    /// Stable label for logs, metrics and response headers.
    pub fn label(self) -> &'static str {
        match self {
            EnrichmentFault::Disabled => "disabled",
            EnrichmentFault::Unavailable => "unavailable",
            EnrichmentFault::MissingCredentials => "missing_credentials",
            EnrichmentFault::Timeout => "timeout",
            EnrichmentFault::SchemaViolation => "schema_violation",
            EnrichmentFault::OutOfTolerance => "out_of_tolerance",
            EnrichmentFault::CircuitOpen => "circuit_open",
        }
    }

    /// Faults worth exactly one retry.
    pub fn is_transient(self) -> bool {
        matches!(self, EnrichmentFault::Unavailable | EnrichmentFault::Timeout)
    }
}

impl serde::Serialize for EnrichmentFault {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.label())
    }
}

impl fmt::Display for EnrichmentFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
