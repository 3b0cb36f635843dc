use std::borrow::Cow;

use serde::Deserialize;

use crate::config::{GatewayConfig, RetryPolicy};
use crate::error::LitGateError;
use crate::sources::{RateLimiter, SourceId};

const PUBTATOR_BASE: &str = "https://www.ncbi.nlm.nih.gov/research/pubtator3-api";
const PUBTATOR_API: &str = "pubtator3";
const PUBTATOR_BASE_ENV: &str = "LITGATE_PUBTATOR_BASE";

/// Canonical biomedical entity resolved from free text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EntityMatch {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub biotype: Option<String>,
}

/// PubTator3 entity autocomplete client. Idempotent and retriable; the
/// enhancer treats every failure here as soft.
pub struct PubtatorClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl PubtatorClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, LitGateError> {
        Ok(Self {
            client: crate::sources::shared_client(config)?,
            base: crate::sources::env_base(PUBTATOR_BASE, PUBTATOR_BASE_ENV),
            // PubTator is an NCBI service; pace it like one.
            limiter: RateLimiter::new(config.min_request_interval(SourceId::Pubmed)),
            retry: config.retry,
        })
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(base: String) -> Self {
        let config = GatewayConfig::default();
        Self {
            client: crate::sources::shared_client(&config).unwrap(),
            base: Cow::Owned(base),
            limiter: RateLimiter::new(std::time::Duration::ZERO),
            retry: RetryPolicy {
                attempts: 3,
                base_delay: std::time::Duration::from_millis(5),
            },
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_ref().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Resolve free text to canonical entities, best match first.
    pub async fn resolve(&self, text: &str, limit: usize) -> Result<Vec<EntityMatch>, LitGateError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LitGateError::InvalidInput("Lookup text is required".into()));
        }

        let url = self.endpoint("entity/autocomplete/");
        let limit_str = limit.clamp(1, 25).to_string();

        self.limiter.acquire().await;
        let resp = crate::sources::retry_send(PUBTATOR_API, self.retry, || async {
            let req = self
                .client
                .get(&url)
                .query(&[("query", text), ("limit", limit_str.as_str())]);
            crate::sources::apply_cache_mode(req).send().await
        })
        .await?;

        let status = resp.status();
        let bytes = crate::sources::read_limited_body(resp, PUBTATOR_API).await?;
        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            return Err(LitGateError::UpstreamUnavailable {
                api: PUBTATOR_API.to_string(),
                message: format!("HTTP {status}: {excerpt}"),
            });
        }

        let matches: Vec<EntityMatch> =
            serde_json::from_slice(&bytes).map_err(|_| LitGateError::UpstreamParse {
                api: PUBTATOR_API.to_string(),
                snippet: crate::sources::body_excerpt(&bytes),
            })?;
        Ok(matches.into_iter().filter(|m| !m.name.is_empty()).collect())
    }
}
