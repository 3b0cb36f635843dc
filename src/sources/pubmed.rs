use std::borrow::Cow;
use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::{GatewayConfig, RetryPolicy};
use crate::entities::Article;
use crate::entities::article::normalize_pmid;
use crate::error::LitGateError;
use crate::sources::{Capabilities, RateLimiter, SearchFilters, SourceAdapter, SourceId};
use crate::transform;

const PUBMED_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const PUBMED_API: &str = "pubmed";
const PUBMED_BASE_ENV: &str = "LITGATE_PUBMED_BASE";

/// NCBI E-utilities client: esearch for queries, esummary for records,
/// elink for the citation graph.
pub struct PubmedAdapter {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EsearchResponse {
    esearchresult: Option<EsearchResult>,
}

#[derive(Debug, Default, Deserialize)]
struct EsearchResult {
    #[serde(default)]
    count: Option<String>,
    #[serde(default)]
    idlist: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EsummaryResponse {
    result: Option<EsummaryResult>,
}

/// esummary keys records by their uid, so the record map is flattened.
#[derive(Debug, Default, Deserialize)]
struct EsummaryResult {
    #[serde(default)]
    uids: Vec<String>,
    #[serde(flatten)]
    records: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PubmedSummary {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<PubmedAuthor>,
    /// Journal abbreviation (e.g. "N Engl J Med").
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub fulljournalname: Option<String>,
    /// Loose date like "2024 Jan 15".
    #[serde(default)]
    pub pubdate: Option<String>,
    #[serde(default)]
    pub volume: Option<String>,
    #[serde(default)]
    pub issue: Option<String>,
    #[serde(default)]
    pub pages: Option<String>,
    #[serde(default)]
    pub lang: Vec<String>,
    #[serde(default)]
    pub pubtype: Vec<String>,
    #[serde(default)]
    pub articleids: Vec<PubmedArticleId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PubmedAuthor {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PubmedArticleId {
    #[serde(default)]
    pub idtype: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Deserialize)]
struct ElinkResponse {
    #[serde(default)]
    linksets: Vec<ElinkLinkset>,
}

#[derive(Debug, Deserialize)]
struct ElinkLinkset {
    #[serde(default)]
    linksetdbs: Vec<ElinkLinksetDb>,
}

#[derive(Debug, Deserialize)]
struct ElinkLinksetDb {
    #[serde(default)]
    linkname: String,
    #[serde(default)]
    links: Vec<Value>,
}

impl PubmedAdapter {
    pub fn new(config: &GatewayConfig) -> Result<Self, LitGateError> {
        Ok(Self {
            client: crate::sources::shared_client(config)?,
            base: crate::sources::env_base(PUBMED_BASE, PUBMED_BASE_ENV),
            limiter: RateLimiter::new(config.min_request_interval(SourceId::Pubmed)),
            retry: config.retry,
            api_key: config.ncbi_api_key.clone(),
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
        let resp = crate::sources::retry_send(PUBMED_API, self.retry, || async {
            crate::sources::apply_cache_mode(build_request()).send().await
        })
        .await?;

        let status = resp.status();
        let bytes = crate::sources::read_limited_body(resp, PUBMED_API).await?;
        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            return Err(LitGateError::UpstreamUnavailable {
                api: PUBMED_API.to_string(),
                message: format!("HTTP {status}: {excerpt}"),
            });
        }
        serde_json::from_slice(&bytes).map_err(|_| LitGateError::UpstreamParse {
            api: PUBMED_API.to_string(),
            snippet: crate::sources::body_excerpt(&bytes),
        })
    }

    fn search_term(query: &str, filters: &SearchFilters) -> String {
        let mut term = query.trim().to_string();
        if filters.open_access_only {
            term.push_str(" AND free full text[sb]");
        }
        if let Some(lang) = filters.language.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            term.push_str(&format!(" AND {lang}[la]"));
        }
        term
    }

    async fn esearch(
        &self,
        term: &str,
        retmax: usize,
        filters: &SearchFilters,
    ) -> Result<EsearchResult, LitGateError> {
        let url = self.endpoint("esearch.fcgi");
        let retmax = retmax.to_string();
        let min_year = filters.min_year.map(|y| y.to_string());
        let max_year = filters.max_year.map(|y| y.to_string());

        let resp: EsearchResponse = self
            .get_json(|| {
                let mut req = self.client.get(&url).query(&[
                    ("db", "pubmed"),
                    ("term", term),
                    ("retmode", "json"),
                    ("retmax", retmax.as_str()),
                    ("sort", "relevance"),
                ]);
                if let Some(min) = min_year.as_deref() {
                    req = req.query(&[("mindate", min), ("datetype", "pdat")]);
                    let max = max_year.as_deref().unwrap_or("3000");
                    req = req.query(&[("maxdate", max)]);
                } else if let Some(max) = max_year.as_deref() {
                    req = req.query(&[("mindate", "1800"), ("maxdate", max), ("datetype", "pdat")]);
                }
                if let Some(key) = self.api_key.as_deref() {
                    req = req.query(&[("api_key", key)]);
                }
                req
            })
            .await?;

        Ok(resp.esearchresult.unwrap_or_default())
    }

    async fn esummary(&self, pmids: &[String]) -> Result<Vec<Article>, LitGateError> {
        if pmids.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.endpoint("esummary.fcgi");
        let ids = pmids.join(",");

        let resp: EsummaryResponse = self
            .get_json(|| {
                let mut req = self.client.get(&url).query(&[
                    ("db", "pubmed"),
                    ("id", ids.as_str()),
                    ("retmode", "json"),
                ]);
                if let Some(key) = self.api_key.as_deref() {
                    req = req.query(&[("api_key", key)]);
                }
                req
            })
            .await?;

        let result = resp.result.unwrap_or_default();
        let mut articles = Vec::with_capacity(result.uids.len());
        for uid in &result.uids {
            let Some(record) = result.records.get(uid) else {
                continue;
            };
            let Ok(summary) = serde_json::from_value::<PubmedSummary>(record.clone()) else {
                continue;
            };
            let article = transform::article::from_pubmed_summary(&summary);
            if article.is_viable() {
                articles.push(article);
            }
        }
        Ok(articles)
    }

    async fn elink(&self, pmid: &str, linkname: &str, limit: usize) -> Result<Vec<Article>, LitGateError> {
        let pmid = normalize_pmid(pmid).ok_or_else(|| {
            LitGateError::InvalidInput(format!("PMID must be a digit string, got \"{pmid}\""))
        })?;
        let url = self.endpoint("elink.fcgi");

        let resp: ElinkResponse = self
            .get_json(|| {
                let mut req = self.client.get(&url).query(&[
                    ("dbfrom", "pubmed"),
                    ("db", "pubmed"),
                    ("id", pmid.as_str()),
                    ("linkname", linkname),
                    ("retmode", "json"),
                ]);
                if let Some(key) = self.api_key.as_deref() {
                    req = req.query(&[("api_key", key)]);
                }
                req
            })
            .await?;

        let mut linked: Vec<String> = Vec::new();
        for linkset in resp.linksets {
            for db in linkset.linksetdbs {
                if db.linkname != linkname {
                    continue;
                }
                for link in db.links {
                    let id = match link {
                        Value::String(v) => v,
                        Value::Number(v) => v.to_string(),
                        _ => continue,
                    };
                    // elink echoes the seed article back.
                    if id != pmid && !linked.contains(&id) {
                        linked.push(id);
                    }
                }
            }
        }
        linked.truncate(limit);
        self.esummary(&linked).await
    }

    /// Result count for a query, without fetching records. Used by the
    /// strategy generator to estimate per-variant yield.
    pub async fn count(&self, query: &str) -> Result<u64, LitGateError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(LitGateError::InvalidInput("Query is required".into()));
        }
        let result = self.esearch(query, 0, &SearchFilters::default()).await?;
        Ok(result
            .count
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }
}

#[async_trait]
impl SourceAdapter for PubmedAdapter {
    fn id(&self) -> SourceId {
        SourceId::Pubmed
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            search: true,
            details: true,
            citations: true,
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

        let term = Self::search_term(query, filters);
        let result = self.esearch(&term, limit, filters).await?;
        let mut articles = self.esummary(&result.idlist).await?;
        filters.retain(&mut articles);
        Ok(articles)
    }

    async fn fetch_by_id(&self, ids: &[String]) -> Result<Vec<Article>, LitGateError> {
        let mut pmids: Vec<String> = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(pmid) = normalize_pmid(id)
                && !pmids.contains(&pmid)
            {
                pmids.push(pmid);
            }
        }
        self.esummary(&pmids).await
    }

    async fn related(&self, id: &str, limit: usize) -> Result<Vec<Article>, LitGateError> {
        self.elink(id, "pubmed_pubmed", limit).await
    }

    async fn citing(&self, id: &str, limit: usize) -> Result<Vec<Article>, LitGateError> {
        self.elink(id, "pubmed_pubmed_citedin", limit).await
    }

    async fn references(&self, id: &str, limit: usize) -> Result<Vec<Article>, LitGateError> {
        self.elink(id, "pubmed_pubmed_refs", limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn summary_json(uid: &str, title: &str) -> Value {
        json!({
            "uid": uid,
            "title": title,
            "authors": [{"name": "Doe J"}],
            "source": "N Engl J Med",
            "fulljournalname": "The New England Journal of Medicine",
            "pubdate": "2023 Mar 2",
            "volume": "388",
            "issue": "9",
            "pages": "123-130",
            "lang": ["eng"],
            "pubtype": ["Randomized Controlled Trial", "Journal Article"],
            "articleids": [
                {"idtype": "pubmed", "value": uid},
                {"idtype": "doi", "value": "10.1056/NEJMoa0000001"},
                {"idtype": "pmc", "value": "PMC9000001"}
            ]
        })
    }

    async fn mount_esummary(server: &MockServer, uids: &[&str]) {
        let mut result = serde_json::Map::new();
        result.insert("uids".into(), json!(uids));
        for uid in uids {
            result.insert((*uid).into(), summary_json(uid, "Sample article title"));
        }
        Mock::given(method("GET"))
            .and(path("/esummary.fcgi"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": result})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn search_queries_esearch_then_esummary() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/esearch.fcgi"))
            .and(query_param("db", "pubmed"))
            .and(query_param("term", "covid vaccines"))
            .and(query_param("retmax", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "esearchresult": {"count": "2", "idlist": ["111", "222"]}
            })))
            .mount(&server)
            .await;
        mount_esummary(&server, &["111", "222"]).await;

        let adapter = PubmedAdapter::new_for_test(server.uri());
        let articles = adapter
            .search("covid vaccines", 2, &SearchFilters::default())
            .await
            .unwrap();

        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].pmid.as_deref(), Some("111"));
        assert_eq!(articles[0].primary_source, SourceId::Pubmed);
        assert_eq!(articles[0].doi.as_deref(), Some("10.1056/nejmoa0000001"));
        assert_eq!(articles[0].year, Some(2023));
    }

    #[tokio::test]
    async fn search_appends_year_range() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/esearch.fcgi"))
            .and(query_param("mindate", "2020"))
            .and(query_param("maxdate", "2024"))
            .and(query_param("datetype", "pdat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "esearchresult": {"count": "0", "idlist": []}
            })))
            .mount(&server)
            .await;

        let adapter = PubmedAdapter::new_for_test(server.uri());
        let filters = SearchFilters {
            min_year: Some(2020),
            max_year: Some(2024),
            ..SearchFilters::default()
        };
        let articles = adapter.search("sepsis", 5, &filters).await.unwrap();
        assert!(articles.is_empty());
    }

    #[tokio::test]
    async fn open_access_filter_lands_in_the_term() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/esearch.fcgi"))
            .and(query_param("term", "sepsis AND free full text[sb]"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "esearchresult": {"count": "0", "idlist": []}
            })))
            .mount(&server)
            .await;

        let adapter = PubmedAdapter::new_for_test(server.uri());
        let filters = SearchFilters {
            open_access_only: true,
            ..SearchFilters::default()
        };
        adapter.search("sepsis", 5, &filters).await.unwrap();
    }

    #[tokio::test]
    async fn fetch_by_id_normalizes_and_dedups() {
        let server = MockServer::start().await;
        mount_esummary(&server, &["12345678"]).await;

        let adapter = PubmedAdapter::new_for_test(server.uri());
        let ids = vec![
            "PMID:12345678".to_string(),
            "12345678".to_string(),
            "not-a-pmid".to_string(),
        ];
        let articles = adapter.fetch_by_id(&ids).await.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].pmid.as_deref(), Some("12345678"));
    }

    #[tokio::test]
    async fn citing_follows_the_citedin_linkset() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/elink.fcgi"))
            .and(query_param("linkname", "pubmed_pubmed_citedin"))
            .and(query_param("id", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "linksets": [{
                    "linksetdbs": [{
                        "linkname": "pubmed_pubmed_citedin",
                        "links": ["100", "201", "202", "203"]
                    }]
                }]
            })))
            .mount(&server)
            .await;
        mount_esummary(&server, &["201", "202"]).await;

        let adapter = PubmedAdapter::new_for_test(server.uri());
        let articles = adapter.citing("100", 2).await.unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].pmid.as_deref(), Some("201"));
    }

    #[tokio::test]
    async fn count_uses_zero_retmax() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/esearch.fcgi"))
            .and(query_param("retmax", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "esearchresult": {"count": "4821", "idlist": []}
            })))
            .mount(&server)
            .await;

        let adapter = PubmedAdapter::new_for_test(server.uri());
        assert_eq!(adapter.count("aspirin").await.unwrap(), 4821);
    }

    #[tokio::test]
    async fn malformed_payload_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/esearch.fcgi"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&server)
            .await;

        let adapter = PubmedAdapter::new_for_test(server.uri());
        let err = adapter
            .search("covid", 5, &SearchFilters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LitGateError::UpstreamParse { .. }));
    }

    #[tokio::test]
    async fn empty_query_is_invalid_input() {
        let server = MockServer::start().await;
        let adapter = PubmedAdapter::new_for_test(server.uri());
        let err = adapter
            .search("  ", 5, &SearchFilters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LitGateError::InvalidInput(_)));
    }
}
