//! Enrichment adapter: provider abstraction + replay cache + circuit breaker.
//!
//! A provider only *proposes* a probability and a rationale. The service decides
//! whether to accept it; nothing here can fail a submission.

pub mod breaker;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::EnrichmentConfig;
use crate::engine::format_distance;
use crate::error::EnrichmentFault;
use crate::verdict::{PlausibilityRequest, PlausibilityVerdict};

pub use breaker::{BreakerPermit, CircuitBreaker};

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// What a provider suggests. Advisory until the service validates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentProposal {
    pub probability: f64,
    #[serde(default)]
    pub rationale: Option<String>,
}

impl EnrichmentProposal {
    /// Probability must be finite and in `[0, 1]`; rationale is sanitized.
    pub fn validate(mut self) -> Result<Self, EnrichmentFault> {
        if !self.probability.is_finite() || !(0.0..=1.0).contains(&self.probability) {
            return Err(EnrichmentFault::SchemaViolation);
        }
        self.rationale = self
            .rationale
            .map(|r| sanitize_rationale(&r))
            .filter(|r| !r.is_empty());
        Ok(self)
    }
}

pub type ProposalFuture<'a> =
    Pin<Box<dyn Future<Output = Result<EnrichmentProposal, EnrichmentFault>> + Send + 'a>>;

/// Trait object used by the service (and tests).
pub trait EnrichmentClient: Send + Sync {
    /// Ask the provider for a proposal, given the deterministic baseline.
    fn propose<'a>(
        &'a self,
        request: &'a PlausibilityRequest,
        baseline: &'a PlausibilityVerdict,
    ) -> ProposalFuture<'a>;
    /// Provider name for diagnostics/headers.
    fn provider_name(&self) -> &'static str;
}

/// Convenient alias used by callers.
pub type DynEnrichmentClient = Arc<dyn EnrichmentClient>;

/// Factory: build a client according to config and environment variables.
///
/// * `AI_TEST_MODE=mock` → deterministic mock that echoes the baseline.
/// * `AI_TEST_MODE=error` → always `Unavailable`.
/// * `AI_TEST_MODE=timeout` → never answers within any sane timeout.
/// * Else builds the configured provider wrapped with the replay cache.
pub fn build_client_from_config(config: &EnrichmentConfig) -> DynEnrichmentClient {
    match std::env::var("AI_TEST_MODE").as_deref() {
        Ok("mock") => return Arc::new(ReplayCache::new(EchoProvider)),
        Ok("error") => return Arc::new(FailingProvider::new(EnrichmentFault::Unavailable)),
        Ok("timeout") => return Arc::new(StalledProvider::new(Duration::from_secs(3_600))),
        _ => {}
    }

    match config.provider.as_str() {
        "openai" => Arc::new(ReplayCache::new(OpenAiProvider::new(
            config.api_key.clone(),
            &config.model,
        ))),
        "mock" => Arc::new(ReplayCache::new(EchoProvider)),
        _ => Arc::new(DisabledClient),
    }
}

// ------------------------------------------------------------
// Concrete providers
// ------------------------------------------------------------

/// OpenAI provider (Chat Completions, JSON object output).
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: &str) -> Self {
        // Builder only fails on TLS backend init; fall back to the default client.
        let http = reqwest::Client::builder()
            .user_agent("attendance-verifier/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_key,
            model: model.to_string(),
        }
    }

    fn user_prompt(request: &PlausibilityRequest, baseline: &PlausibilityVerdict) -> String {
        format!(
            "Submitted latitude: {}\nSubmitted longitude: {}\nExpected latitude: {}\nExpected longitude: {}\n\
             Computed distance: {} meters\nDistance tier: {:?}\nBaseline probability: {}",
            request.claimed.lat,
            request.claimed.lon,
            request.reference.lat,
            request.reference.lon,
            format_distance(baseline.distance_meters),
            baseline.tier,
            baseline.probability,
        )
    }
}

impl EnrichmentClient for OpenAiProvider {
    fn propose<'a>(
        &'a self,
        request: &'a PlausibilityRequest,
        baseline: &'a PlausibilityVerdict,
    ) -> ProposalFuture<'a> {
        Box::pin(async move {
            if self.api_key.is_empty() {
                return Err(EnrichmentFault::MissingCredentials);
            }

            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct ResponseFormat {
                #[serde(rename = "type")]
                kind: &'static str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
                max_tokens: u32,
                response_format: ResponseFormat,
            }
            #[derive(Deserialize)]
            struct Resp {
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                content: String,
            }
            // Output schema the prompt asks for.
            #[derive(Deserialize)]
            #[serde(rename_all = "camelCase")]
            struct Output {
                is_on_site_probability: f64,
                #[serde(default)]
                reasoning: Option<String>,
            }

            let sys = "You are an attendance verification assistant. The distance between the student and \
                       the class location has already been computed. Do not recompute it. Return a JSON object \
                       {\"isOnSiteProbability\": number between 0 and 1, \"reasoning\": one short sentence that \
                       states the given distance in meters}. Output only the JSON object.";
            let user = Self::user_prompt(request, baseline);
            let req = Req {
                model: &self.model,
                messages: vec![
                    Msg {
                        role: "system",
                        content: sys,
                    },
                    Msg {
                        role: "user",
                        content: &user,
                    },
                ],
                temperature: 0.0,
                max_tokens: 120,
                response_format: ResponseFormat {
                    kind: "json_object",
                },
            };

            let resp = self
                .http
                .post("https://api.openai.com/v1/chat/completions")
                .bearer_auth(&self.api_key)
                .json(&req)
                .send()
                .await
                .map_err(classify_transport_error)?;

            if !resp.status().is_success() {
                return Err(EnrichmentFault::Unavailable);
            }
            let body: Resp = resp
                .json()
                .await
                .map_err(|_| EnrichmentFault::SchemaViolation)?;
            let content = body
                .choices
                .first()
                .map(|c| c.message.content.as_str())
                .ok_or(EnrichmentFault::SchemaViolation)?;
            let out: Output =
                serde_json::from_str(content).map_err(|_| EnrichmentFault::SchemaViolation)?;

            EnrichmentProposal {
                probability: out.is_on_site_probability,
                rationale: out.reasoning,
            }
            .validate()
        })
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

fn classify_transport_error(e: reqwest::Error) -> EnrichmentFault {
    if e.is_timeout() {
        EnrichmentFault::Timeout
    } else {
        EnrichmentFault::Unavailable
    }
}

/// Always `Disabled`; used when the provider is unknown.
pub struct DisabledClient;

impl EnrichmentClient for DisabledClient {
    fn propose<'a>(
        &'a self,
        _request: &'a PlausibilityRequest,
        _baseline: &'a PlausibilityVerdict,
    ) -> ProposalFuture<'a> {
        Box::pin(async { Err(EnrichmentFault::Disabled) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Mock that agrees with the baseline and restates its rationale.
#[derive(Clone, Copy)]
pub struct EchoProvider;

impl EnrichmentClient for EchoProvider {
    fn propose<'a>(
        &'a self,
        _request: &'a PlausibilityRequest,
        baseline: &'a PlausibilityVerdict,
    ) -> ProposalFuture<'a> {
        let out = EnrichmentProposal {
            probability: baseline.probability,
            rationale: Some(format!("{} (confirmed)", baseline.rationale)),
        };
        Box::pin(async move { Ok(out) })
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

/// Mock returning a fixed proposal regardless of input.
#[derive(Clone)]
pub struct MockProvider {
    pub fixed: EnrichmentProposal,
}

impl EnrichmentClient for MockProvider {
    fn propose<'a>(
        &'a self,
        _request: &'a PlausibilityRequest,
        _baseline: &'a PlausibilityVerdict,
    ) -> ProposalFuture<'a> {
        let out = self.fixed.clone();
        Box::pin(async move { Ok(out) })
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

/// Fails every call with a fixed fault and counts attempts.
pub struct FailingProvider {
    fault: EnrichmentFault,
    calls: std::sync::atomic::AtomicUsize,
}

impl FailingProvider {
    pub fn new(fault: EnrichmentFault) -> Self {
        Self {
            fault,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl EnrichmentClient for FailingProvider {
    fn propose<'a>(
        &'a self,
        _request: &'a PlausibilityRequest,
        _baseline: &'a PlausibilityVerdict,
    ) -> ProposalFuture<'a> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let fault = self.fault;
        Box::pin(async move { Err(fault) })
    }
    fn provider_name(&self) -> &'static str {
        "failing"
    }
}

/// Sleeps before echoing the baseline; drives timeout paths.
pub struct StalledProvider {
    delay: Duration,
}

impl StalledProvider {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl EnrichmentClient for StalledProvider {
    fn propose<'a>(
        &'a self,
        request: &'a PlausibilityRequest,
        baseline: &'a PlausibilityVerdict,
    ) -> ProposalFuture<'a> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            EchoProvider.propose(request, baseline).await
        })
    }
    fn provider_name(&self) -> &'static str {
        "stalled"
    }
}

// ------------------------------------------------------------
// Replay cache
// ------------------------------------------------------------

const REPLAY_CACHE_CAP: usize = 4_096;

/// Remembers accepted-shape proposals per request fingerprint so a replayed
/// submission gets the same enrichment answer without a second remote call.
pub struct ReplayCache<C: EnrichmentClient> {
    inner: C,
    entries: Mutex<HashMap<String, EnrichmentProposal>>,
}

impl<C: EnrichmentClient> ReplayCache<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lookup(&self, key: &str) -> Option<EnrichmentProposal> {
        let g = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        g.get(key).cloned()
    }

    fn store(&self, key: String, value: EnrichmentProposal) {
        let mut g = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if g.len() >= REPLAY_CACHE_CAP {
            // Coarse eviction; a full cache only costs extra provider calls.
            g.clear();
        }
        g.insert(key, value);
    }

    async fn propose_impl(
        &self,
        request: &PlausibilityRequest,
        baseline: &PlausibilityVerdict,
    ) -> Result<EnrichmentProposal, EnrichmentFault> {
        let key = fingerprint(request);
        if let Some(hit) = self.lookup(&key) {
            return Ok(hit);
        }
        let fresh = self.inner.propose(request, baseline).await?.validate()?;
        self.store(key, fresh.clone());
        Ok(fresh)
    }
}

impl<C: EnrichmentClient> EnrichmentClient for ReplayCache<C> {
    fn propose<'a>(
        &'a self,
        request: &'a PlausibilityRequest,
        baseline: &'a PlausibilityVerdict,
    ) -> ProposalFuture<'a> {
        Box::pin(self.propose_impl(request, baseline))
    }
    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }
}

/// SHA-256 over subject and exact coordinate bits.
pub fn fingerprint(request: &PlausibilityRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.subject_id.as_bytes());
    for x in [
        request.claimed.lat,
        request.claimed.lon,
        request.reference.lat,
        request.reference.lon,
    ] {
        hasher.update(x.to_bits().to_le_bytes());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

// ------------------------------------------------------------
// Sanitization
// ------------------------------------------------------------

/// Ensure ASCII-only, single line, and <=160 chars. Collapses whitespace.
pub fn sanitize_rationale(input: &str) -> String {
    let mut out = String::with_capacity(160);
    let mut prev_space = false;
    for ch in input.chars() {
        let c = match ch {
            '\r' | '\n' | '\t' => ' ',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => ' ',
        };
        if c == ' ' {
            if !prev_space && !out.is_empty() {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
        if out.len() >= 160 {
            break;
        }
    }
    out.trim().to_string()
}
