use std::borrow::Cow;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::{GatewayConfig, RetryPolicy};
use crate::entities::Article;
use crate::entities::article::{normalize_doi, normalize_pmid};
use crate::error::LitGateError;
use crate::sources::{RateLimiter, SearchFilters, SourceAdapter, SourceId};
use crate::transform;

const S2_BASE: &str = "https://api.semanticscholar.org";
const S2_API: &str = "semantic_scholar";
const S2_BASE_ENV: &str = "LITGATE_S2_BASE";

const S2_PAPER_FIELDS: &str = "paperId,externalIds,title,abstract,venue,year,authors,isOpenAccess,openAccessPdf,citationCount,influentialCitationCount,publicationTypes";

/// Semantic Scholar Graph API client.
pub struct SemanticScholarAdapter {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PaperSearchResponse {
    #[serde(default)]
    data: Vec<S2Paper>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S2Paper {
    #[serde(default)]
    pub paper_id: Option<String>,
    #[serde(default)]
    pub external_ids: Option<S2ExternalIds>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "abstract", default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub authors: Vec<S2Author>,
    #[serde(default)]
    pub is_open_access: Option<bool>,
    #[serde(default)]
    pub open_access_pdf: Option<S2OpenAccessPdf>,
    #[serde(default)]
    pub citation_count: Option<u64>,
    #[serde(default)]
    pub influential_citation_count: Option<u64>,
    #[serde(default)]
    pub publication_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct S2ExternalIds {
    #[serde(rename = "DOI", default)]
    pub doi: Option<String>,
    #[serde(rename = "PubMed", default)]
    pub pubmed: Option<String>,
    #[serde(rename = "PubMedCentral", default)]
    pub pubmed_central: Option<String>,
    #[serde(rename = "ArXiv", default)]
    pub arxiv: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct S2Author {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct S2OpenAccessPdf {
    #[serde(default)]
    pub url: Option<String>,
}

impl SemanticScholarAdapter {
    pub fn new(config: &GatewayConfig) -> Result<Self, LitGateError> {
        Ok(Self {
            client: crate::sources::shared_client(config)?,
            base: crate::sources::env_base(S2_BASE, S2_BASE_ENV),
            limiter: RateLimiter::new(config.min_request_interval(SourceId::SemanticScholar)),
            retry: config.retry,
            api_key: config.s2_api_key.clone(),
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
        let resp = crate::sources::retry_send(S2_API, self.retry, || async {
            let mut req = build_request();
            if let Some(key) = self.api_key.as_deref() {
                req = req.header("x-api-key", key);
            }
            crate::sources::apply_cache_mode(req).send().await
        })
        .await?;

        let status = resp.status();
        let bytes = crate::sources::read_limited_body(resp, S2_API).await?;
        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            return Err(LitGateError::UpstreamUnavailable {
                api: S2_API.to_string(),
                message: format!("HTTP {status}: {excerpt}"),
            });
        }
        serde_json::from_slice(&bytes).map_err(|_| LitGateError::UpstreamParse {
            api: S2_API.to_string(),
            snippet: crate::sources::body_excerpt(&bytes),
        })
    }

    /// S2 accepts prefixed external ids in the paper path.
    fn paper_path(id: &str) -> Option<String> {
        let id = id.trim();
        if id.is_empty() {
            return None;
        }
        if id.starts_with("10.") {
            return Some(format!("graph/v1/paper/DOI:{}", normalize_doi(id)));
        }
        if let Some(pmid) = normalize_pmid(id) {
            return Some(format!("graph/v1/paper/PMID:{pmid}"));
        }
        // 40-char hex S2 paper id
        if id.len() == 40 && id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Some(format!("graph/v1/paper/{id}"));
        }
        None
    }
}

#[async_trait]
impl SourceAdapter for SemanticScholarAdapter {
    fn id(&self) -> SourceId {
        SourceId::SemanticScholar
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

        let url = self.endpoint("graph/v1/paper/search");
        let limit_str = limit.min(100).to_string();
        let year_expr = match (filters.min_year, filters.max_year) {
            (Some(min), Some(max)) => Some(format!("{min}-{max}")),
            (Some(min), None) => Some(format!("{min}-")),
            (None, Some(max)) => Some(format!("-{max}")),
            (None, None) => None,
        };

        let resp: PaperSearchResponse = self
            .get_json(|| {
                let mut req = self.client.get(&url).query(&[
                    ("query", query),
                    ("limit", limit_str.as_str()),
                    ("fields", S2_PAPER_FIELDS),
                ]);
                if let Some(year) = year_expr.as_deref() {
                    req = req.query(&[("year", year)]);
                }
                if filters.open_access_only {
                    req = req.query(&[("openAccessPdf", "")]);
                }
                req
            })
            .await?;

        let mut articles: Vec<Article> = resp
            .data
            .iter()
            .map(transform::article::from_semantic_scholar_paper)
            .filter(Article::is_viable)
            .collect();
        filters.retain(&mut articles);
        Ok(articles)
    }

    async fn fetch_by_id(&self, ids: &[String]) -> Result<Vec<Article>, LitGateError> {
        let mut articles = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(path) = Self::paper_path(id) else {
                continue;
            };
            let url = self.endpoint(&path);
            let resp: Result<S2Paper, LitGateError> = self
                .get_json(|| self.client.get(&url).query(&[("fields", S2_PAPER_FIELDS)]))
                .await;
            match resp {
                Ok(paper) => {
                    let article = transform::article::from_semantic_scholar_paper(&paper);
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

    fn paper_json() -> serde_json::Value {
        json!({
            "paperId": "649def34f8be52c8b66281af98ae884c09aef38b",
            "externalIds": {
                "DOI": "10.1000/s2paper",
                "PubMed": "31511234",
                "PubMedCentral": "7012345",
                "ArXiv": "1905.00001"
            },
            "title": "Attention mechanisms for clinical prediction",
            "abstract": "We study attention models.",
            "venue": "NeurIPS",
            "year": 2019,
            "authors": [{"name": "Grace Hopper"}],
            "isOpenAccess": true,
            "openAccessPdf": {"url": "https://example.org/paper.pdf"},
            "citationCount": 321,
            "influentialCitationCount": 45,
            "publicationTypes": ["JournalArticle"]
        })
    }

    #[tokio::test]
    async fn search_requests_expected_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/graph/v1/paper/search"))
            .and(query_param("query", "attention"))
            .and(query_param("fields", S2_PAPER_FIELDS))
            .and(query_param("year", "2018-2020"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 1,
                "data": [paper_json()]
            })))
            .mount(&server)
            .await;

        let adapter = SemanticScholarAdapter::new_for_test(server.uri());
        let filters = SearchFilters {
            min_year: Some(2018),
            max_year: Some(2020),
            ..SearchFilters::default()
        };
        let articles = adapter.search("attention", 10, &filters).await.unwrap();

        assert_eq!(articles.len(), 1);
        let a = &articles[0];
        assert_eq!(a.primary_source, SourceId::SemanticScholar);
        assert_eq!(a.pmid.as_deref(), Some("31511234"));
        assert_eq!(a.pmc.as_deref(), Some("PMC7012345"));
        assert_eq!(a.arxiv_id.as_deref(), Some("1905.00001"));
        let metrics = a.citation_metrics.as_ref().unwrap();
        assert_eq!(metrics.citation_count, Some(321));
        assert_eq!(metrics.influential_count, Some(45));
    }

    #[tokio::test]
    async fn fetch_by_id_uses_prefixed_paths() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/graph/v1/paper/PMID:31511234"))
            .respond_with(ResponseTemplate::new(200).set_body_json(paper_json()))
            .mount(&server)
            .await;

        let adapter = SemanticScholarAdapter::new_for_test(server.uri());
        let articles = adapter
            .fetch_by_id(&["PMID:31511234".to_string()])
            .await
            .unwrap();
        assert_eq!(articles.len(), 1);
    }

    #[test]
    fn paper_path_accepts_hex_ids_only_at_full_length() {
        assert!(
            SemanticScholarAdapter::paper_path("649def34f8be52c8b66281af98ae884c09aef38b")
                .is_some()
        );
        assert!(SemanticScholarAdapter::paper_path("649def34").is_none());
    }
}
