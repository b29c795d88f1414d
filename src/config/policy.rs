// src/config/policy.rs
//! Decision policy loaded from `config/verifier.toml`.
//!
//! TOML shape (every key optional):
//! ```toml
//! near_field_radius_m = 10.0
//! exact_probability = 1.0
//! near_field_probability = 0.9
//! far_field_probability = 0.1
//! presence_threshold = 0.5
//! enrichment_enabled = false
//! enrichment_timeout_ms = 7000
//! enrichment_tolerance = 0.3
//! ```
//!
//! Env overrides win over the file. Out-of-range values are reset to defaults.

use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::geo::{TierPolicy, DEFAULT_NEAR_FIELD_RADIUS_M};

pub const DEFAULT_VERIFIER_CONFIG_PATH: &str = "config/verifier.toml";

pub const ENV_VERIFIER_CONFIG_PATH: &str = "VERIFIER_CONFIG_PATH";
pub const ENV_NEAR_FIELD_RADIUS: &str = "VERIFIER_NEAR_FIELD_RADIUS_M";
pub const ENV_PRESENCE_THRESHOLD: &str = "VERIFIER_PRESENCE_THRESHOLD";
pub const ENV_AI_ENABLED: &str = "AI_ENABLED";
pub const ENV_AI_TIMEOUT_MS: &str = "AI_TIMEOUT_MS";
pub const ENV_AI_TOLERANCE: &str = "AI_TOLERANCE";

fn default_radius() -> f64 {
    DEFAULT_NEAR_FIELD_RADIUS_M
}
fn default_exact() -> f64 {
    1.0
}
fn default_near() -> f64 {
    0.9
}
fn default_far() -> f64 {
    0.1
}
fn default_threshold() -> f64 {
    0.5
}
fn default_timeout_ms() -> u64 {
    7_000
}
fn default_tolerance() -> f64 {
    0.3
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_radius")]
    pub near_field_radius_m: f64,
    #[serde(default = "default_exact")]
    pub exact_probability: f64,
    #[serde(default = "default_near")]
    pub near_field_probability: f64,
    #[serde(default = "default_far")]
    pub far_field_probability: f64,
    /// Probability strictly above this marks the student Present.
    #[serde(default = "default_threshold")]
    pub presence_threshold: f64,
    #[serde(default)]
    pub enrichment_enabled: bool,
    #[serde(default = "default_timeout_ms")]
    pub enrichment_timeout_ms: u64,
    #[serde(default = "default_tolerance")]
    pub enrichment_tolerance: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            near_field_radius_m: default_radius(),
            exact_probability: default_exact(),
            near_field_probability: default_near(),
            far_field_probability: default_far(),
            presence_threshold: default_threshold(),
            enrichment_enabled: false,
            enrichment_timeout_ms: default_timeout_ms(),
            enrichment_tolerance: default_tolerance(),
        }
    }
}

impl PolicyConfig {
    /// Load using `$VERIFIER_CONFIG_PATH` or `config/verifier.toml`, then apply env overrides.
    ///
    /// A missing default file yields defaults; a missing explicit path is an error.
    pub fn from_env() -> anyhow::Result<Self> {
        let cfg = match std::env::var(ENV_VERIFIER_CONFIG_PATH) {
            Ok(p) => {
                let pb = PathBuf::from(p);
                if !pb.exists() {
                    return Err(anyhow!(
                        "{ENV_VERIFIER_CONFIG_PATH} points to non-existent path {}",
                        pb.display()
                    ));
                }
                Self::load_from_file(&pb)?
            }
            Err(_) => {
                let pb = PathBuf::from(DEFAULT_VERIFIER_CONFIG_PATH);
                if pb.exists() {
                    Self::load_from_file(&pb)?
                } else {
                    Self::default()
                }
            }
        };
        let cfg = cfg.with_env_overrides().sanitized();
        info!(
            radius_m = cfg.near_field_radius_m,
            threshold = cfg.presence_threshold,
            enrichment = cfg.enrichment_enabled,
            "verifier policy loaded"
        );
        Ok(cfg)
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading verifier config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let cfg: PolicyConfig = toml::from_str(s).context("parsing verifier config")?;
        Ok(cfg.sanitized())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(v) = parse_env::<f64>(ENV_NEAR_FIELD_RADIUS) {
            self.near_field_radius_m = v;
        }
        if let Some(v) = parse_env::<f64>(ENV_PRESENCE_THRESHOLD) {
            self.presence_threshold = v;
        }
        if let Ok(v) = std::env::var(ENV_AI_ENABLED) {
            self.enrichment_enabled = matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(v) = parse_env::<u64>(ENV_AI_TIMEOUT_MS) {
            self.enrichment_timeout_ms = v;
        }
        if let Some(v) = parse_env::<f64>(ENV_AI_TOLERANCE) {
            self.enrichment_tolerance = v;
        }
        self
    }

    /// Reset any out-of-range value to its default.
    pub fn sanitized(mut self) -> Self {
        if !(self.near_field_radius_m.is_finite() && self.near_field_radius_m >= 0.0) {
            warn!(value = self.near_field_radius_m, "near_field_radius_m invalid; using default");
            self.near_field_radius_m = default_radius();
        }
        for (slot, fallback, field) in [
            (&mut self.exact_probability, default_exact(), "exact_probability"),
            (&mut self.near_field_probability, default_near(), "near_field_probability"),
            (&mut self.far_field_probability, default_far(), "far_field_probability"),
            (&mut self.presence_threshold, default_threshold(), "presence_threshold"),
        ] {
            if !is_unit(*slot) {
                warn!(value = *slot, field, "probability outside [0,1]; using default");
                *slot = fallback;
            }
        }
        if self.enrichment_timeout_ms == 0 {
            self.enrichment_timeout_ms = default_timeout_ms();
        }
        if !(self.enrichment_tolerance.is_finite() && self.enrichment_tolerance >= 0.0) {
            self.enrichment_tolerance = default_tolerance();
        }
        self
    }

    pub fn tier_policy(&self) -> TierPolicy {
        TierPolicy::new(self.near_field_radius_m)
    }

    pub fn enrichment_timeout(&self) -> Duration {
        Duration::from_millis(self.enrichment_timeout_ms)
    }
}

fn is_unit(x: f64) -> bool {
    x.is_finite() && (0.0..=1.0).contains(&x)
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}
