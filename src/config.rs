use std::env;
use std::time::Duration;

use crate::sources::SourceId;

const DEFAULT_CONTACT_EMAIL: &str = "litgate@example.com";

/// Retry discipline for upstream calls: exponential backoff starting at
/// `base_delay`, doubling each attempt, `attempts` tries total.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Process-level configuration, read once from the environment.
///
/// API keys raise upstream rate limits but are never required; the gateway
/// degrades to the keyless tier.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Contact email sent to polite-pool APIs (Crossref, OpenAlex, CORE).
    pub contact_email: String,
    pub ncbi_api_key: Option<String>,
    pub s2_api_key: Option<String>,
    pub core_api_key: Option<String>,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub article_cache_ttl: Duration,
    pub entity_cache_ttl: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            contact_email: DEFAULT_CONTACT_EMAIL.to_string(),
            ncbi_api_key: None,
            s2_api_key: None,
            core_api_key: None,
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            article_cache_ttl: Duration::from_secs(7 * 24 * 3600),
            entity_cache_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(email) = non_empty_env("LITGATE_EMAIL") {
            config.contact_email = email;
        }
        config.ncbi_api_key = non_empty_env("NCBI_API_KEY");
        config.s2_api_key = non_empty_env("S2_API_KEY");
        config.core_api_key = non_empty_env("CORE_API_KEY");
        config
    }

    /// Minimum spacing between two calls to the same upstream.
    ///
    /// PubMed allows 3 rps without an API key and 10 rps with one; CORE is
    /// the outlier with per-minute quotas (10/min keyless, 25/min keyed).
    pub fn min_request_interval(&self, source: SourceId) -> Duration {
        match source {
            SourceId::Pubmed => {
                if self.ncbi_api_key.is_some() {
                    Duration::from_millis(100)
                } else {
                    Duration::from_millis(334)
                }
            }
            SourceId::Crossref => Duration::from_millis(20),
            SourceId::Openalex | SourceId::SemanticScholar => Duration::from_millis(100),
            SourceId::Core => {
                if self.core_api_key.is_some() {
                    Duration::from_millis(2400)
                } else {
                    Duration::from_secs(6)
                }
            }
        }
    }
}
