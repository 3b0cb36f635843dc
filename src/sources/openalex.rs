use std::borrow::Cow;
use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::{GatewayConfig, RetryPolicy};
use crate::entities::Article;
use crate::entities::article::normalize_doi;
use crate::error::LitGateError;
use crate::sources::{RateLimiter, SearchFilters, SourceAdapter, SourceId};
use crate::transform;

const OPENALEX_BASE: &str = "https://api.openalex.org";
const OPENALEX_API: &str = "openalex";
const OPENALEX_BASE_ENV: &str = "LITGATE_OPENALEX_BASE";

/// OpenAlex works client. Keyless; the mailto query param opts into the
/// polite pool.
pub struct OpenalexAdapter {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    mailto: String,
}

#[derive(Debug, Default, Deserialize)]
struct WorksResponse {
    #[serde(default)]
    results: Vec<OpenalexWork>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenalexWork {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub publication_year: Option<i32>,
    #[serde(default)]
    pub publication_date: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub ids: OpenalexIds,
    #[serde(default)]
    pub authorships: Vec<OpenalexAuthorship>,
    #[serde(default)]
    pub primary_location: Option<OpenalexLocation>,
    #[serde(default)]
    pub open_access: Option<OpenalexOpenAccess>,
    #[serde(default)]
    pub best_oa_location: Option<OpenalexBestOa>,
    #[serde(default)]
    pub cited_by_count: Option<u64>,
    /// OpenAlex ships abstracts as an inverted index to save space.
    #[serde(default)]
    pub abstract_inverted_index: Option<HashMap<String, Vec<u32>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenalexIds {
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub pmid: Option<String>,
    #[serde(default)]
    pub pmcid: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenalexAuthorship {
    #[serde(default)]
    pub author: Option<OpenalexAuthor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenalexAuthor {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub orcid: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenalexLocation {
    #[serde(default)]
    pub source: Option<OpenalexSource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenalexSource {
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenalexOpenAccess {
    #[serde(default)]
    pub is_oa: bool,
    #[serde(default)]
    pub oa_status: Option<String>,
    #[serde(default)]
    pub oa_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenalexBestOa {
    #[serde(default)]
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
}

impl OpenalexAdapter {
    pub fn new(config: &GatewayConfig) -> Result<Self, LitGateError> {
        Ok(Self {
            client: crate::sources::shared_client(config)?,
            base: crate::sources::env_base(OPENALEX_BASE, OPENALEX_BASE_ENV),
            limiter: RateLimiter::new(config.min_request_interval(SourceId::Openalex)),
            retry: config.retry,
            mailto: config.contact_email.clone(),
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
            mailto: config.contact_email,
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
        let resp = crate::sources::retry_send(OPENALEX_API, self.retry, || async {
            crate::sources::apply_cache_mode(build_request()).send().await
        })
        .await?;

        let status = resp.status();
        let bytes = crate::sources::read_limited_body(resp, OPENALEX_API).await?;
        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            return Err(LitGateError::UpstreamUnavailable {
                api: OPENALEX_API.to_string(),
                message: format!("HTTP {status}: {excerpt}"),
            });
        }
        serde_json::from_slice(&bytes).map_err(|_| LitGateError::UpstreamParse {
            api: OPENALEX_API.to_string(),
            snippet: crate::sources::body_excerpt(&bytes),
        })
    }

    fn filter_expr(filters: &SearchFilters) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();
        if let Some(min) = filters.min_year {
            parts.push(format!("from_publication_date:{min}-01-01"));
        }
        if let Some(max) = filters.max_year {
            parts.push(format!("to_publication_date:{max}-12-31"));
        }
        if filters.open_access_only {
            parts.push("is_oa:true".to_string());
        }
        if let Some(lang) = filters.language.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            parts.push(format!("language:{lang}"));
        }
        (!parts.is_empty()).then(|| parts.join(","))
    }

    /// OpenAlex resolves DOIs and PMIDs directly in the works path.
    fn work_path(id: &str) -> Option<String> {
        let id = id.trim();
        if id.is_empty() {
            return None;
        }
        if id.starts_with("10.") {
            return Some(format!("works/doi:{}", normalize_doi(id)));
        }
        if id.chars().all(|c| c.is_ascii_digit()) {
            return Some(format!("works/pmid:{id}"));
        }
        if id.starts_with('W') || id.starts_with("https://openalex.org/") {
            let bare = id.trim_start_matches("https://openalex.org/");
            return Some(format!("works/{bare}"));
        }
        None
    }
}

#[async_trait]
impl SourceAdapter for OpenalexAdapter {
    fn id(&self) -> SourceId {
        SourceId::Openalex
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

        let url = self.endpoint("works");
        let per_page = limit.min(200).to_string();
        let filter_expr = Self::filter_expr(filters);

        let resp: WorksResponse = self
            .get_json(|| {
                let mut req = self.client.get(&url).query(&[
                    ("search", query),
                    ("per-page", per_page.as_str()),
                    ("mailto", self.mailto.as_str()),
                ]);
                if let Some(filter) = filter_expr.as_deref() {
                    req = req.query(&[("filter", filter)]);
                }
                req
            })
            .await?;

        let mut articles: Vec<Article> = resp
            .results
            .iter()
            .map(transform::article::from_openalex_work)
            .filter(Article::is_viable)
            .collect();
        filters.retain(&mut articles);
        Ok(articles)
    }

    async fn fetch_by_id(&self, ids: &[String]) -> Result<Vec<Article>, LitGateError> {
        let mut articles = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(path) = Self::work_path(id) else {
                continue;
            };
            let url = self.endpoint(&path);
            let resp: Result<OpenalexWork, LitGateError> = self
                .get_json(|| {
                    self.client
                        .get(&url)
                        .query(&[("mailto", self.mailto.as_str())])
                })
                .await;
            match resp {
                Ok(work) => {
                    let article = transform::article::from_openalex_work(&work);
                    if article.is_viable() {
                        articles.push(article);
                    }
                }
                Err(LitGateError::UpstreamUnavailable { message, .. })
                    if message.starts_with("HTTP 404") => {}
                Err(err) => return Err(err),
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
            "id": "https://openalex.org/W2741809807",
            "display_name": "CRISPR gene editing in the clinic",
            "publication_year": 2022,
            "publication_date": "2022-06-01",
            "ids": {
                "doi": "https://doi.org/10.1000/crispr",
                "pmid": "https://pubmed.ncbi.nlm.nih.gov/35551234",
                "pmcid": "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC9001234"
            },
            "authorships": [
                {"author": {"display_name": "Ada Lovelace", "orcid": "https://orcid.org/0000-0001"}}
            ],
            "primary_location": {"source": {"display_name": "Nature Medicine"}},
            "open_access": {"is_oa": true, "oa_status": "gold", "oa_url": "https://example.org/oa"},
            "cited_by_count": 250,
            "abstract_inverted_index": {"Gene": [0], "editing": [1], "works": [2]}
        })
    }

    #[tokio::test]
    async fn search_passes_filters_and_parses_works() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .and(query_param("search", "CRISPR"))
            .and(query_param("filter", "from_publication_date:2020-01-01,is_oa:true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [work_json()]
            })))
            .mount(&server)
            .await;

        let adapter = OpenalexAdapter::new_for_test(server.uri());
        let filters = SearchFilters {
            min_year: Some(2020),
            open_access_only: true,
            ..SearchFilters::default()
        };
        let articles = adapter.search("CRISPR", 10, &filters).await.unwrap();

        assert_eq!(articles.len(), 1);
        let a = &articles[0];
        assert_eq!(a.openalex_id.as_deref(), Some("W2741809807"));
        assert_eq!(a.pmid.as_deref(), Some("35551234"));
        assert_eq!(a.pmc.as_deref(), Some("PMC9001234"));
        assert_eq!(a.abstract_text.as_deref(), Some("Gene editing works"));
    }

    #[tokio::test]
    async fn fetch_by_id_routes_dois_and_pmids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works/doi:10.1000/crispr"))
            .respond_with(ResponseTemplate::new(200).set_body_json(work_json()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/works/pmid:35551234"))
            .respond_with(ResponseTemplate::new(200).set_body_json(work_json()))
            .mount(&server)
            .await;

        let adapter = OpenalexAdapter::new_for_test(server.uri());
        let articles = adapter
            .fetch_by_id(&["10.1000/CRISPR".to_string(), "35551234".to_string()])
            .await
            .unwrap();
        assert_eq!(articles.len(), 2);
    }

    #[test]
    fn work_path_rejects_unknown_shapes() {
        assert_eq!(
            OpenalexAdapter::work_path("W123").as_deref(),
            Some("works/W123")
        );
        assert!(OpenalexAdapter::work_path("not an id").is_none());
    }
}
