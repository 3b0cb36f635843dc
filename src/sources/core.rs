use std::borrow::Cow;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::{GatewayConfig, RetryPolicy};
use crate::entities::Article;
use crate::error::LitGateError;
use crate::sources::{RateLimiter, SearchFilters, SourceAdapter, SourceId};
use crate::transform;

const CORE_BASE: &str = "https://api.core.ac.uk/v3";
const CORE_API: &str = "core";
const CORE_BASE_ENV: &str = "LITGATE_CORE_BASE";

/// CORE v3 client: open-access aggregation with optional full-text search.
/// Year and full-text constraints are folded into the query expression,
/// which is CORE's own filter syntax.
pub struct CoreAdapter {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CoreSearchResponse {
    #[serde(default)]
    results: Vec<CoreWork>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreWork {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "abstract", default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub year_published: Option<i32>,
    #[serde(default)]
    pub authors: Vec<CoreAuthor>,
    #[serde(default)]
    pub journals: Vec<CoreJournal>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub pubmed_id: Option<String>,
    #[serde(default)]
    pub arxiv_id: Option<String>,
    #[serde(default)]
    pub identifiers: Vec<CoreIdentifier>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub language: Option<CoreLanguage>,
    #[serde(default)]
    pub citation_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoreAuthor {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoreJournal {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoreIdentifier {
    #[serde(rename = "type", default)]
    pub id_type: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoreLanguage {
    #[serde(default)]
    pub code: Option<String>,
}

impl CoreAdapter {
    pub fn new(config: &GatewayConfig) -> Result<Self, LitGateError> {
        Ok(Self {
            client: crate::sources::shared_client(config)?,
            base: crate::sources::env_base(CORE_BASE, CORE_BASE_ENV),
            limiter: RateLimiter::new(config.min_request_interval(SourceId::Core)),
            retry: config.retry,
            api_key: config.core_api_key.clone(),
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
            api_key: None,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_ref().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn get_json<T, F>(&self, build_request: F) -> Result<T, LitGateError>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest_middleware::RequestBuilder,
    {
        self.limiter.acquire().await;
        let resp = crate::sources::retry_send(CORE_API, self.retry, || async {
            let mut req = build_request();
            if let Some(key) = self.api_key.as_deref() {
                req = req.bearer_auth(key);
            }
            crate::sources::apply_cache_mode(req).send().await
        })
        .await?;

        let status = resp.status();
        let bytes = crate::sources::read_limited_body(resp, CORE_API).await?;
        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            return Err(LitGateError::UpstreamUnavailable {
                api: CORE_API.to_string(),
                message: format!("HTTP {status}: {excerpt}"),
            });
        }
        serde_json::from_slice(&bytes).map_err(|_| LitGateError::UpstreamParse {
            api: CORE_API.to_string(),
            snippet: crate::sources::body_excerpt(&bytes),
        })
    }

    fn full_query(query: &str, filters: &SearchFilters) -> String {
        let mut parts = vec![query.trim().to_string()];
        if let Some(min) = filters.min_year {
            parts.push(format!("yearPublished>={min}"));
        }
        if let Some(max) = filters.max_year {
            parts.push(format!("yearPublished<={max}"));
        }
        if filters.has_fulltext {
            parts.push("_exists_:fullText".to_string());
        }
        parts.join(" AND ")
    }
}

#[async_trait]
impl SourceAdapter for CoreAdapter {
    fn id(&self) -> SourceId {
        SourceId::Core
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<Article>, LitGateError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(LitGateError::InvalidInput("Query is required".into()));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let url = self.endpoint("search/works");
        let q = Self::full_query(query, filters);
        let limit_str = limit.min(100).to_string();

        let resp: CoreSearchResponse = self
            .get_json(|| {
                self.client
                    .get(&url)
                    .query(&[("q", q.as_str()), ("limit", limit_str.as_str())])
            })
            .await?;

        let mut articles: Vec<Article> = resp
            .results
            .iter()
            .map(transform::article::from_core_work)
            .filter(Article::is_viable)
            .collect();
        filters.retain(&mut articles);
        Ok(articles)
    }

    async fn fetch_by_id(&self, ids: &[String]) -> Result<Vec<Article>, LitGateError> {
        // CORE resolves external ids through search, one probe per id.
        let mut articles = Vec::with_capacity(ids.len());
        for id in ids {
            let id = id.trim();
            if id.is_empty() {
                continue;
            }
            let probe = if id.starts_with("10.") {
                format!("doi:\"{id}\"")
            } else if id.chars().all(|c| c.is_ascii_digit()) {
                format!("pubmedId:{id}")
            } else {
                continue;
            };

            let url = self.endpoint("search/works");
            let resp: CoreSearchResponse = self
                .get_json(|| {
                    self.client
                        .get(&url)
                        .query(&[("q", probe.as_str()), ("limit", "1")])
                })
                .await?;
            if let Some(work) = resp.results.first() {
                let article = transform::article::from_core_work(work);
                if article.is_viable() {
                    articles.push(article);
                }
            }
        }
        Ok(articles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn work_json() -> serde_json::Value {
        json!({
            "id": 152480964,
            "title": "Open access repositories and research visibility",
            "abstract": "We measure repository reach.",
            "yearPublished": 2021,
            "authors": [{"name": "Alan Turing"}],
            "journals": [{"title": "Scientometrics"}],
            "publisher": "Springer",
            "doi": "10.1000/core-work",
            "downloadUrl": "https://core.ac.uk/download/152480964.pdf",
            "language": {"code": "en"},
            "citationCount": 18
        })
    }

    #[tokio::test]
    async fn search_folds_filters_into_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/works"))
            .and(query_param(
                "q",
                "repositories AND yearPublished>=2019 AND _exists_:fullText",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "totalHits": 1,
                "results": [work_json()]
            })))
            .mount(&server)
            .await;

        let adapter = CoreAdapter::new_for_test(server.uri());
        let filters = SearchFilters {
            min_year: Some(2019),
            has_fulltext: true,
            ..SearchFilters::default()
        };
        let articles = adapter.search("repositories", 10, &filters).await.unwrap();

        assert_eq!(articles.len(), 1);
        let a = &articles[0];
        assert_eq!(a.primary_source, SourceId::Core);
        assert_eq!(a.doi.as_deref(), Some("10.1000/core-work"));
        assert_eq!(a.year, Some(2021));
        assert!(!a.oa_links.is_empty());
    }

    #[tokio::test]
    async fn fetch_by_id_probes_doi() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/works"))
            .and(query_param("q", "doi:\"10.1000/core-work\""))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [work_json()]
            })))
            .mount(&server)
            .await;

        let adapter = CoreAdapter::new_for_test(server.uri());
        let articles = adapter
            .fetch_by_id(&["10.1000/core-work".to_string()])
            .await
            .unwrap();
        assert_eq!(articles.len(), 1);
    }
}
