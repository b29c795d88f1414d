// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

pub const DEFAULT_AI_CONFIG_PATH: &str = "config/ai.json";

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_concurrency() -> usize {
    8
}
fn default_breaker_threshold() -> u32 {
    3
}
fn default_breaker_cooldown_secs() -> i64 {
    30
}

/// Provider settings for the enrichment endpoint. Whether enrichment runs at all
/// is a policy switch (`PolicyConfig::enrichment_enabled`), not part of this file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// "openai" | "mock" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    /// "ENV" means: read from OPENAI_API_KEY
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// In-flight calls allowed against the endpoint.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Consecutive timeouts before the breaker opens.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: i64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: String::new(),
            model: default_model(),
            max_concurrency: default_max_concurrency(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
        }
    }
}

impl EnrichmentConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: EnrichmentConfig = serde_json::from_str(&data)?;
        cfg.resolved()
    }

    /// Like `load_from_file`, but a missing file yields defaults with the key from env.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            Self {
                api_key: "ENV".to_string(),
                ..Self::default()
            }
            .resolved()
        }
    }

    fn resolved(mut self) -> anyhow::Result<Self> {
        self.provider = self.provider.trim().to_lowercase();

        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = match self.provider.as_str() {
                // Missing key is not fatal: the provider reports Unavailable and the
                // deterministic verdict is used.
                "openai" => env::var("OPENAI_API_KEY").unwrap_or_default(),
                "mock" => String::new(),
                other => anyhow::bail!("Unsupported provider in config: {other}"),
            };
        }

        if self.max_concurrency == 0 {
            self.max_concurrency = default_max_concurrency();
        }
        if self.breaker_threshold == 0 {
            self.breaker_threshold = default_breaker_threshold();
        }
        if self.breaker_cooldown_secs <= 0 {
            self.breaker_cooldown_secs = default_breaker_cooldown_secs();
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_defaults_fill_missing_fields() {
        let cfg: EnrichmentConfig = serde_json::from_str(r#"{"provider":"OpenAI"}"#).unwrap();
        let cfg = cfg.resolved().unwrap();
        assert_eq!(cfg.provider, "openai");
        assert_eq!(cfg.model, "gpt-4o-mini");
        assert_eq!(cfg.max_concurrency, 8);
        assert_eq!(cfg.breaker_threshold, 3);
        assert_eq!(cfg.breaker_cooldown_secs, 30);
    }

    #[test]
    fn zero_limits_are_sanitized() {
        let cfg: EnrichmentConfig = serde_json::from_str(
            r#"{"provider":"mock","max_concurrency":0,"breaker_threshold":0,"breaker_cooldown_secs":-5}"#,
        )
        .unwrap();
        let cfg = cfg.resolved().unwrap();
        assert_eq!(cfg.max_concurrency, 8);
        assert_eq!(cfg.breaker_threshold, 3);
        assert_eq!(cfg.breaker_cooldown_secs, 30);
    }

    #[test]
    fn unknown_provider_with_env_key_is_rejected() {
        let cfg: EnrichmentConfig =
            serde_json::from_str(r#"{"provider":"gemini","api_key":"ENV"}"#).unwrap();
        assert!(cfg.resolved().is_err());
    }
}
