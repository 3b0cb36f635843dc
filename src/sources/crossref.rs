use std::borrow::Cow;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::{GatewayConfig, RetryPolicy};
use crate::entities::Article;
use crate::entities::article::normalize_doi;
use crate::error::LitGateError;
use crate::sources::{Capabilities, RateLimiter, SearchFilters, SourceAdapter, SourceId};
use crate::transform;

const CROSSREF_BASE: &str = "https://api.crossref.org";
const CROSSREF_API: &str = "crossref";
const CROSSREF_BASE_ENV: &str = "LITGATE_CROSSREF_BASE";

/// Crossref REST client. The polite pool asks for a mailto on every call.
pub struct CrossrefAdapter {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    mailto: String,
}

#[derive(Debug, Deserialize)]
struct WorksResponse {
    message: Option<WorksMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct WorksMessage {
    #[serde(default)]
    items: Vec<CrossrefWork>,
}

#[derive(Debug, Deserialize)]
struct WorkResponse {
    message: Option<CrossrefWork>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossrefWork {
    #[serde(rename = "DOI", default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(rename = "container-title", default)]
    pub container_title: Vec<String>,
    #[serde(rename = "short-container-title", default)]
    pub short_container_title: Vec<String>,
    #[serde(default)]
    pub author: Vec<CrossrefAuthor>,
    #[serde(default)]
    pub volume: Option<String>,
    #[serde(default)]
    pub issue: Option<String>,
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(rename = "type", default)]
    pub work_type: Option<String>,
    #[serde(default)]
    pub issued: Option<CrossrefDate>,
    #[serde(rename = "is-referenced-by-count", default)]
    pub is_referenced_by_count: Option<u64>,
    #[serde(default)]
    pub link: Vec<CrossrefLink>,
    #[serde(rename = "alternative-id", default)]
    pub alternative_id: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(rename = "abstract", default)]
    pub abstract_text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossrefAuthor {
    #[serde(default)]
    pub given: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(rename = "ORCID", default)]
    pub orcid: Option<String>,
    #[serde(default)]
    pub affiliation: Vec<CrossrefAffiliation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossrefAffiliation {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossrefDate {
    #[serde(rename = "date-parts", default)]
    pub date_parts: Vec<Vec<Option<i32>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossrefLink {
    #[serde(rename = "URL", default)]
    pub url: Option<String>,
    #[serde(rename = "content-type", default)]
    pub content_type: Option<String>,
}

impl CrossrefAdapter {
    pub fn new(config: &GatewayConfig) -> Result<Self, LitGateError> {
        Ok(Self {
            client: crate::sources::shared_client(config)?,
            base: crate::sources::env_base(CROSSREF_BASE, CROSSREF_BASE_ENV),
            limiter: RateLimiter::new(config.min_request_interval(SourceId::Crossref)),
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
        let resp = crate::sources::retry_send(CROSSREF_API, self.retry, || async {
            crate::sources::apply_cache_mode(build_request()).send().await
        })
        .await?;

        let status = resp.status();
        let bytes = crate::sources::read_limited_body(resp, CROSSREF_API).await?;
        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            return Err(LitGateError::UpstreamUnavailable {
                api: CROSSREF_API.to_string(),
                message: format!("HTTP {status}: {excerpt}"),
            });
        }
        serde_json::from_slice(&bytes).map_err(|_| LitGateError::UpstreamParse {
            api: CROSSREF_API.to_string(),
            snippet: crate::sources::body_excerpt(&bytes),
        })
    }

    fn filter_expr(filters: &SearchFilters) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();
        if let Some(min) = filters.min_year {
            parts.push(format!("from-pub-date:{min}-01-01"));
        }
        if let Some(max) = filters.max_year {
            parts.push(format!("until-pub-date:{max}-12-31"));
        }
        if filters.has_fulltext {
            parts.push("has-full-text:true".to_string());
        }
        (!parts.is_empty()).then(|| parts.join(","))
    }
}

#[async_trait]
impl SourceAdapter for CrossrefAdapter {
    fn id(&self) -> SourceId {
        SourceId::Crossref
    }

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
    ) -> Result<Vec<Article>, LitGateError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(LitGateError::InvalidInput("Query is required".into()));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let url = self.endpoint("works");
        let rows = limit.min(100).to_string();
        let filter_expr = Self::filter_expr(filters);

        let resp: WorksResponse = self
            .get_json(|| {
                let mut req = self.client.get(&url).query(&[
                    ("query", query),
                    ("rows", rows.as_str()),
                    ("mailto", self.mailto.as_str()),
                ]);
                if let Some(filter) = filter_expr.as_deref() {
                    req = req.query(&[("filter", filter)]);
                }
                req
            })
            .await?;

        let mut articles: Vec<Article> = resp
            .message
            .unwrap_or_default()
            .items
            .iter()
            .map(transform::article::from_crossref_work)
            .filter(Article::is_viable)
            .collect();
        filters.retain(&mut articles);
        Ok(articles)
    }

    async fn fetch_by_id(&self, ids: &[String]) -> Result<Vec<Article>, LitGateError> {
        let mut articles = Vec::with_capacity(ids.len());
        for id in ids {
            let doi = normalize_doi(id);
            if doi.is_empty() {
                continue;
            }
            let url = self.endpoint(&format!("works/{doi}"));
            let resp: Result<WorkResponse, LitGateError> = self
                .get_json(|| {
                    self.client
                        .get(&url)
                        .query(&[("mailto", self.mailto.as_str())])
                })
                .await;
            match resp {
                Ok(resp) => {
                    if let Some(work) = resp.message {
                        let article = transform::article::from_crossref_work(&work);
                        if article.is_viable() {
                            articles.push(article);
                        }
                    }
                }
                // A missing DOI is not fatal to the batch.
                Err(LitGateError::UpstreamUnavailable { message, .. })
                    if message.starts_with("HTTP 404") => {}
                Err(err) => return Err(err),
            }
        }
        Ok(articles)
    }
}
