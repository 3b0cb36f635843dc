use std::borrow::Cow;
use std::collections::HashMap;

use serde::Deserialize;

use crate::config::{GatewayConfig, RetryPolicy};
use crate::entities::CitationMetrics;
use crate::error::LitGateError;
use crate::sources::{RateLimiter, SourceId};

const ICITE_BASE: &str = "https://icite.od.nih.gov/api";
const ICITE_API: &str = "icite";
const ICITE_BASE_ENV: &str = "LITGATE_ICITE_BASE";

/// iCite caps the pmids parameter at 200 ids per request.
const MAX_PMIDS_PER_REQUEST: usize = 200;

const ICITE_FIELDS: &str =
    "pmid,citation_count,citations_per_year,relative_citation_ratio,nih_percentile,apt";

/// NIH iCite client for field-normalized citation metrics.
pub struct IciteClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

#[derive(Debug, Default, Deserialize)]
struct IciteResponse {
    #[serde(default)]
    data: Vec<IciteRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct IciteRecord {
    #[serde(default)]
    pmid: Option<serde_json::Value>,
    #[serde(default)]
    citation_count: Option<u64>,
    #[serde(default)]
    citations_per_year: Option<f64>,
    #[serde(default)]
    relative_citation_ratio: Option<f64>,
    #[serde(default)]
    nih_percentile: Option<f64>,
    #[serde(default)]
    apt: Option<f64>,
}

impl IciteClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, LitGateError> {
        Ok(Self {
            client: crate::sources::shared_client(config)?,
            base: crate::sources::env_base(ICITE_BASE, ICITE_BASE_ENV),
            // iCite shares NCBI's pacing expectations.
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

    /// Metrics for a PMID set, keyed by PMID. Unknown PMIDs are simply
    /// absent from the map; missing metrics are not an error.
    pub async fn metrics_for(
        &self,
        pmids: &[String],
    ) -> Result<HashMap<String, CitationMetrics>, LitGateError> {
        let mut out = HashMap::with_capacity(pmids.len());
        for batch in pmids.chunks(MAX_PMIDS_PER_REQUEST) {
            let ids = batch.join(",");
            let url = self.endpoint("pubs");

            self.limiter.acquire().await;
            let resp = crate::sources::retry_send(ICITE_API, self.retry, || async {
                let req = self
                    .client
                    .get(&url)
                    .query(&[("pmids", ids.as_str()), ("fl", ICITE_FIELDS)]);
                crate::sources::apply_cache_mode(req).send().await
            })
            .await?;

            let status = resp.status();
            let bytes = crate::sources::read_limited_body(resp, ICITE_API).await?;
            if !status.is_success() {
                let excerpt = crate::sources::body_excerpt(&bytes);
                return Err(LitGateError::UpstreamUnavailable {
                    api: ICITE_API.to_string(),
                    message: format!("HTTP {status}: {excerpt}"),
                });
            }
            let parsed: IciteResponse =
                serde_json::from_slice(&bytes).map_err(|_| LitGateError::UpstreamParse {
                    api: ICITE_API.to_string(),
                    snippet: crate::sources::body_excerpt(&bytes),
                })?;

            for record in parsed.data {
                let Some(pmid) = record
                    .pmid
                    .as_ref()
                    .map(value_to_pmid)
                    .filter(|p| !p.is_empty())
                else {
                    continue;
                };
                out.insert(
                    pmid,
                    CitationMetrics {
                        citation_count: record.citation_count,
                        citations_per_year: record.citations_per_year,
                        relative_citation_ratio: record.relative_citation_ratio,
                        percentile: record.nih_percentile,
                        translation_potential: record.apt,
                        influential_count: None,
                    },
                );
            }
        }
        Ok(out)
    }
}

fn value_to_pmid(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(v) => v.clone(),
        serde_json::Value::Number(v) => v.to_string(),
        _ => String::new(),
    }
}
