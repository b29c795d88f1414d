// src/ai_bootstrap.rs
use tracing::{info, warn};

use crate::config::ai::DEFAULT_AI_CONFIG_PATH;
use crate::config::{EnrichmentConfig, PolicyConfig};
use crate::service::PlausibilityService;
use crate::verdict::PlausibilityRequest;

pub struct EnrichmentRuntime {
    pub cfg: EnrichmentConfig,
    pub service: PlausibilityService,
}

impl EnrichmentRuntime {
    pub fn from_env() -> anyhow::Result<Self> {
        let path = std::env::var(crate::api::ENV_AI_CONFIG_PATH)
            .unwrap_or_else(|_| DEFAULT_AI_CONFIG_PATH.to_string());
        let cfg = EnrichmentConfig::load_or_default(&path)?;
        // Safe diagnostics: only provider + model + key length
        info!(
            "enrichment cfg loaded: provider={}, model={}, key_len={}",
            cfg.provider,
            cfg.model,
            cfg.api_key.len()
        );
        let policy = PolicyConfig::from_env()?;
        let service = PlausibilityService::from_config(policy, &cfg);
        Ok(Self { cfg, service })
    }

    /// Evaluate one near-field sample and log how enrichment behaved.
    pub async fn quick_probe(&self) {
        if !self.service.policy().enrichment_enabled {
            warn!("enrichment quick_probe skipped: enrichment is disabled in policy");
            return;
        }
        let sample = PlausibilityRequest::new("probe", 6.02245, 7.07004, 6.0224, 7.0700);
        match self.service.evaluate(&sample).await {
            Ok(e) => info!(
                provider = self.service.provider_name(),
                outcome = ?e.enrichment,
                probability = e.verdict.probability,
                "enrichment quick_probe"
            ),
            Err(e) => warn!(error = %e, "enrichment quick_probe rejected sample"),
        }
    }
}
