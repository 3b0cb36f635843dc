//! Upstream source adapters and the HTTP plumbing they share.
//!
//! Each adapter owns its HTTP client, token-bucket rate limiter, and retry
//! policy; nothing here is process-global, so tests can build fresh
//! instances pointed at a mock server via the `LITGATE_*_BASE` env vars.

use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use http_cache_reqwest::{CACacheManager, Cache, CacheMode, HttpCache, HttpCacheOptions};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{GatewayConfig, RetryPolicy};
use crate::entities::Article;
use crate::error::LitGateError;

pub mod core;
pub mod crossref;
pub mod icite;
pub mod openalex;
pub mod pubmed;
pub mod pubtator;
pub mod rate_limit;
pub mod semantic_scholar;

pub use rate_limit::RateLimiter;

/// The upstream sources this gateway federates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Pubmed,
    Crossref,
    Openalex,
    SemanticScholar,
    Core,
}

pub const ALL_SOURCES: &[SourceId] = &[
    SourceId::Pubmed,
    SourceId::Crossref,
    SourceId::Openalex,
    SourceId::SemanticScholar,
    SourceId::Core,
];

impl SourceId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pubmed => "pubmed",
            Self::Crossref => "crossref",
            Self::Openalex => "openalex",
            Self::SemanticScholar => "semantic_scholar",
            Self::Core => "core",
        }
    }

    pub fn from_flag(value: &str) -> Result<Self, LitGateError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pubmed" => Ok(Self::Pubmed),
            "crossref" => Ok(Self::Crossref),
            "openalex" => Ok(Self::Openalex),
            "semantic_scholar" | "s2" => Ok(Self::SemanticScholar),
            "core" => Ok(Self::Core),
            other => Err(LitGateError::InvalidInput(format!(
                "Unknown source \"{other}\". Available: pubmed, crossref, openalex, semantic_scholar, core"
            ))),
        }
    }

    /// Baseline trust weight used by merge tie-breaking and ranking.
    pub fn trust_prior(self) -> f64 {
        match self {
            Self::Pubmed => 1.0,
            Self::Crossref => 0.9,
            Self::Openalex | Self::SemanticScholar => 0.85,
            Self::Core => 0.7,
        }
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filters every adapter honors, upstream-side when the API can express
/// them and client-side otherwise.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub min_year: Option<i32>,
    pub max_year: Option<i32>,
    pub open_access_only: bool,
    pub has_fulltext: bool,
    pub language: Option<String>,
}

impl SearchFilters {
    /// Client-side pass for constraints the upstream ignored.
    pub fn retain(&self, articles: &mut Vec<Article>) {
        articles.retain(|a| {
            if let (Some(min), Some(year)) = (self.min_year, a.year)
                && year < min
            {
                return false;
            }
            if let (Some(max), Some(year)) = (self.max_year, a.year)
                && year > max
            {
                return false;
            }
            if self.open_access_only && !a.has_open_access() {
                return false;
            }
            if let Some(lang) = self.language.as_deref()
                && let Some(article_lang) = a.language.as_deref()
            {
                // Upstreams disagree on codes ("eng" vs "en" vs
                // "english"); accept a prefix match either way.
                let wanted = lang.to_ascii_lowercase();
                let got = article_lang.to_ascii_lowercase();
                if !(got.starts_with(&wanted) || wanted.starts_with(&got)) {
                    return false;
                }
            }
            true
        });
    }
}

/// What an adapter can do. The executor consults this before dispatching
/// citation-graph actions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub search: bool,
    pub details: bool,
    pub citations: bool,
}

/// One upstream service, normalized to `Article` output.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> SourceId;

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            search: true,
            details: true,
            citations: false,
        }
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<Article>, LitGateError>;

    async fn fetch_by_id(&self, ids: &[String]) -> Result<Vec<Article>, LitGateError>;

    /// Similar articles. Only citation-capable sources implement this.
    async fn related(&self, _id: &str, _limit: usize) -> Result<Vec<Article>, LitGateError> {
        Ok(Vec::new())
    }

    /// Articles citing the given one.
    async fn citing(&self, _id: &str, _limit: usize) -> Result<Vec<Article>, LitGateError> {
        Ok(Vec::new())
    }

    /// Articles the given one cites.
    async fn references(&self, _id: &str, _limit: usize) -> Result<Vec<Article>, LitGateError> {
        Ok(Vec::new())
    }
}

/// Holds the adapters available to this process. An absent adapter is a
/// recoverable condition, not a configuration error.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    adapters: HashMap<SourceId, Arc<dyn SourceAdapter>>,
    metrics: Option<Arc<icite::IciteClient>>,
}

impl SourceRegistry {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, LitGateError> {
        let mut registry = Self::default();
        registry.insert(Arc::new(pubmed::PubmedAdapter::new(config)?));
        registry.insert(Arc::new(crossref::CrossrefAdapter::new(config)?));
        registry.insert(Arc::new(openalex::OpenalexAdapter::new(config)?));
        registry.insert(Arc::new(semantic_scholar::SemanticScholarAdapter::new(config)?));
        registry.insert(Arc::new(core::CoreAdapter::new(config)?));
        registry.metrics = Some(Arc::new(icite::IciteClient::new(config)?));
        Ok(registry)
    }

    pub fn insert(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.id(), adapter);
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.insert(adapter);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<icite::IciteClient>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn get(&self, id: SourceId) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&id).cloned()
    }

    pub fn metrics(&self) -> Option<Arc<icite::IciteClient>> {
        self.metrics.clone()
    }

    pub fn available(&self) -> Vec<SourceId> {
        let mut ids: Vec<SourceId> = self.adapters.keys().copied().collect();
        ids.sort();
        ids
    }
}

// ---------------------------------------------------------------------
// Shared HTTP plumbing
// ---------------------------------------------------------------------

const USER_AGENT: &str = concat!("litgate/", env!("CARGO_PKG_VERSION"));
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;
const EXCERPT_CHARS: usize = 200;

static CACHE_DISABLED: AtomicBool = AtomicBool::new(false);

/// Disable the HTTP response cache for this process (CLI --no-cache).
pub fn disable_cache() {
    CACHE_DISABLED.store(true, Ordering::Relaxed);
}

pub fn cache_mode() -> CacheMode {
    if CACHE_DISABLED.load(Ordering::Relaxed) {
        CacheMode::NoStore
    } else {
        CacheMode::Default
    }
}

pub fn apply_cache_mode(req: RequestBuilder) -> RequestBuilder {
    req.with_extension(cache_mode())
}

/// HTTP client shared by adapter constructors: rustls, gzip, 30s timeout,
/// transparent response cache.
pub fn shared_client(config: &GatewayConfig) -> Result<ClientWithMiddleware, LitGateError> {
    let inner = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(config.request_timeout)
        .build()
        .map_err(|err| LitGateError::Invariant(format!("HTTP client construction failed: {err}")))?;

    Ok(ClientBuilder::new(inner)
        .with(Cache(HttpCache {
            mode: cache_mode(),
            manager: CACacheManager::default(),
            options: HttpCacheOptions::default(),
        }))
        .build())
}

/// Base URL for an upstream, overridable via environment for tests.
pub fn env_base(default: &'static str, env_var: &str) -> Cow<'static, str> {
    match std::env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => Cow::Owned(value.trim().to_string()),
        _ => Cow::Borrowed(default),
    }
}

/// Read a response body with a hard size cap.
pub async fn read_limited_body(
    mut resp: reqwest::Response,
    api: &str,
) -> Result<Vec<u8>, LitGateError> {
    let mut body = Vec::new();
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|err| LitGateError::from_reqwest(api, err))?
    {
        if body.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(LitGateError::UpstreamParse {
                api: api.to_string(),
                snippet: format!("response body exceeds {MAX_BODY_BYTES} bytes"),
            });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Bounded, whitespace-collapsed excerpt of an upstream payload for error
/// messages and logs.
pub fn body_excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= EXCERPT_CHARS {
        collapsed
    } else {
        let mut out: String = collapsed.chars().take(EXCERPT_CHARS).collect();
        out.push('…');
        out
    }
}

fn status_is_retryable(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

/// Send a request with the adapter's retry policy.
///
/// Transport errors classified transient and HTTP 5xx/429 are retried with
/// exponential backoff; everything else is handed back to the caller as-is.
/// After exhaustion the transient error is demoted to UpstreamUnavailable.
pub async fn retry_send<F, Fut>(
    api: &str,
    policy: RetryPolicy,
    send: F,
) -> Result<reqwest::Response, LitGateError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest_middleware::Error>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_err: Option<LitGateError> = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::time::sleep(policy.delay_for(attempt - 1)).await;
        }

        match send().await {
            Ok(resp) => {
                let status = resp.status();
                if !status_is_retryable(status) {
                    return Ok(resp);
                }
                let err = LitGateError::UpstreamTransient {
                    api: api.to_string(),
                    message: format!("HTTP {status}"),
                };
                warn!(api, %status, attempt, "retryable upstream status");
                last_err = Some(err);
            }
            Err(err) => {
                let err = LitGateError::from_middleware(api, err);
                if !err.is_retryable() {
                    return Err(err);
                }
                warn!(api, attempt, error = %err, "retryable transport failure");
                last_err = Some(err);
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| LitGateError::Invariant("retry loop ran zero attempts".into()))
        .into_unavailable())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(5),
        }
    }

    fn plain_client() -> reqwest::Client {
        reqwest::Client::new()
    }

    #[test]
    fn source_ids_round_trip_through_flags() {
        for id in ALL_SOURCES {
            assert_eq!(SourceId::from_flag(id.as_str()).unwrap(), *id);
        }
        assert_eq!(
            SourceId::from_flag("S2").unwrap(),
            SourceId::SemanticScholar
        );
        assert!(SourceId::from_flag("scopus").is_err());
    }

    #[test]
    fn trust_priors_follow_source_roles() {
        assert_eq!(SourceId::Pubmed.trust_prior(), 1.0);
        assert!(SourceId::Crossref.trust_prior() > SourceId::Core.trust_prior());
    }

    #[test]
    fn body_excerpt_is_bounded_and_collapsed() {
        let long = "word ".repeat(200);
        let excerpt = body_excerpt(long.as_bytes());
        assert!(excerpt.chars().count() <= EXCERPT_CHARS + 1);
        assert!(!excerpt.contains('\n'));
    }

    #[test]
    fn filters_retain_drops_out_of_range_years() {
        let filters = SearchFilters {
            min_year: Some(2020),
            max_year: Some(2023),
            ..SearchFilters::default()
        };
        let mut a = Article::new("kept because in range ok", SourceId::Pubmed);
        a.year = Some(2021);
        let mut b = Article::new("dropped because too old", SourceId::Pubmed);
        b.year = Some(2010);
        let mut c = Article::new("kept because year unknown", SourceId::Pubmed);
        c.year = None;

        let mut articles = vec![a, b, c];
        filters.retain(&mut articles);
        assert_eq!(articles.len(), 2);
    }

    #[tokio::test]
    async fn a_429_triggers_exactly_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hit"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let client = plain_client();
        let url = format!("{}/hit", server.uri());
        let result = retry_send("test-api", fast_policy(), || {
            let client = client.clone();
            let url = url.clone();
            async move { client.get(&url).send().await.map_err(Into::into) }
        })
        .await;

        assert!(matches!(
            result,
            Err(LitGateError::UpstreamUnavailable { .. })
        ));
        server.verify().await;
    }

    #[tokio::test]
    async fn transient_failure_recovers_on_later_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = plain_client();
        let url = format!("{}/flaky", server.uri());
        let resp = retry_send("test-api", fast_policy(), || {
            let client = client.clone();
            let url = url.clone();
            async move { client.get(&url).send().await.map_err(Into::into) }
        })
        .await
        .unwrap();

        assert!(resp.status().is_success());
        server.verify().await;
    }

    #[tokio::test]
    async fn non_retryable_status_passes_through_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = plain_client();
        let url = format!("{}/bad", server.uri());
        let resp = retry_send("test-api", fast_policy(), || {
            let client = client.clone();
            let url = url.clone();
            async move { client.get(&url).send().await.map_err(Into::into) }
        })
        .await
        .unwrap();

        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
        server.verify().await;
    }
}
