//! The batteries-included search path: analyze, fan out, aggregate.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{ArticleCache, article_cache_key};
use crate::entities::article::Article;
use crate::entities::pipeline::RankingPreset;
use crate::entities::query::{AnalyzedQuery, IdentifierKind};
use crate::error::LitGateError;
use crate::search::aggregator::{self, AggregationStats, RankingConfig};
use crate::search::enhancer::SemanticEnhancer;
use crate::search::{analyzer, validator};
use crate::sources::{ALL_SOURCES, SearchFilters, SourceId, SourceRegistry};

const MAX_LIMIT: usize = 200;

/// Primary sources returning fewer than this triggers the cross-search
/// fallback when the caller opted in.
const CROSS_SEARCH_THRESHOLD: usize = 5;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Explicit source set; None defers to the analyzer's recommendation.
    pub sources: Option<Vec<SourceId>>,
    pub limit: usize,
    pub min_year: Option<i32>,
    pub max_year: Option<i32>,
    pub open_access_only: bool,
    pub ranking: RankingPreset,
    pub enhance: bool,
    pub cross_search_fallback: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            sources: None,
            limit: 20,
            min_year: None,
            max_year: None,
            open_access_only: false,
            ranking: RankingPreset::Balanced,
            enhance: false,
            cross_search_fallback: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceCount {
    pub source: SourceId,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub source: SourceId,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchStats {
    /// Per-source raw return counts, in request order.
    pub source_api_counts: Vec<SourceCount>,
    /// Which sources failed and why. Non-fatal by design.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<SourceFailure>,
    pub aggregation: AggregationStats,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub articles: Vec<Article>,
    pub analysis: AnalyzedQuery,
    pub stats: SearchStats,
}

pub struct UnifiedSearcher {
    registry: SourceRegistry,
    enhancer: Option<Arc<SemanticEnhancer>>,
    article_cache: Arc<ArticleCache>,
}

impl UnifiedSearcher {
    pub fn new(registry: SourceRegistry, article_cache: Arc<ArticleCache>) -> Self {
        Self {
            registry,
            enhancer: None,
            article_cache,
        }
    }

    pub fn with_enhancer(mut self, enhancer: Arc<SemanticEnhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    /// One query in, ranked deduplicated articles out.
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse, LitGateError> {
        let started = Instant::now();

        if options.limit > MAX_LIMIT {
            return Err(LitGateError::InvalidInput(format!(
                "limit must be at most {MAX_LIMIT}, got {}",
                options.limit
            )));
        }

        // Auto-fix what is safely fixable; reject the rest.
        let report = validator::validate(query);
        let effective_query: String = if report.is_valid {
            query.to_string()
        } else if let Some(corrected) = report.corrected_query.clone() {
            warn!(original = query, corrected, "query auto-corrected");
            corrected
        } else {
            return Err(LitGateError::InvalidInput(report.errors.join("; ")));
        };

        let analysis = analyzer::analyze(&effective_query);
        let mut stats = SearchStats::default();

        if options.limit == 0 {
            stats.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(SearchResponse {
                articles: Vec::new(),
                analysis,
                stats,
            });
        }

        let mut article_lists: Vec<Vec<Article>> = Vec::new();
        let mut tried: Vec<SourceId> = Vec::new();

        if analysis.identifiers.is_empty() {
            let sources = options
                .sources
                .clone()
                .unwrap_or_else(|| analysis.recommended_sources.clone());
            let lists = self
                .fan_out(&analysis, options, &sources, &mut stats)
                .await;
            tried.extend(sources);
            article_lists.extend(lists);

            let found: usize = article_lists.iter().map(Vec::len).sum();
            if options.cross_search_fallback && found < CROSS_SEARCH_THRESHOLD {
                let remaining: Vec<SourceId> = ALL_SOURCES
                    .iter()
                    .copied()
                    .filter(|s| !tried.contains(s))
                    .collect();
                if !remaining.is_empty() {
                    debug!(found, "cross-search fallback engaged");
                    let lists = self
                        .fan_out(&analysis, options, &remaining, &mut stats)
                        .await;
                    article_lists.extend(lists);
                }
            }
        } else {
            article_lists.push(self.lookup_identifiers(&analysis, &mut stats).await);
        }

        let config = RankingConfig {
            max_results: Some(options.limit),
            ..RankingConfig::for_preset(options.ranking)
        };
        let (articles, agg_stats) =
            aggregator::aggregate_and_rank(article_lists, &config, Some(&analysis.normalized));

        for article in &articles {
            if let Some(key) = article_cache_key(article) {
                self.article_cache.insert(key, article.clone()).await;
            }
        }

        stats.aggregation = agg_stats;
        stats.duration_ms = started.elapsed().as_millis() as u64;
        Ok(SearchResponse {
            articles,
            analysis,
            stats,
        })
    }

    fn filters_for(analysis: &AnalyzedQuery, options: &SearchOptions) -> SearchFilters {
        SearchFilters {
            min_year: options.min_year.or(analysis.year_from),
            max_year: options.max_year.or(analysis.year_to),
            open_access_only: options.open_access_only,
            has_fulltext: false,
            language: None,
        }
    }

    async fn fan_out(
        &self,
        analysis: &AnalyzedQuery,
        options: &SearchOptions,
        sources: &[SourceId],
        stats: &mut SearchStats,
    ) -> Vec<Vec<Article>> {
        let filters = Self::filters_for(analysis, options);

        // Field-qualified expansion only makes sense for the biomedical
        // source; the others get the plain query.
        let mut pubmed_query = analysis.normalized.clone();
        if options.enhance
            && let Some(enhancer) = self.enhancer.as_ref()
        {
            pubmed_query = enhancer.enhance(&analysis.normalized).await.expanded_query;
        }

        let tasks = sources.iter().map(|&source| {
            let adapter = self.registry.get(source);
            let query = if source == SourceId::Pubmed {
                pubmed_query.clone()
            } else {
                analysis.normalized.clone()
            };
            let filters = filters.clone();
            let limit = options.limit;
            async move {
                match adapter {
                    Some(adapter) => (source, adapter.search(&query, limit, &filters).await),
                    None => (
                        source,
                        Err(LitGateError::UpstreamUnavailable {
                            api: source.to_string(),
                            message: "adapter not configured".into(),
                        }),
                    ),
                }
            }
        });

        let mut lists = Vec::with_capacity(sources.len());
        for (source, outcome) in join_all(tasks).await {
            match outcome {
                Ok(articles) => {
                    stats.source_api_counts.push(SourceCount {
                        source,
                        count: articles.len(),
                    });
                    lists.push(articles);
                }
                Err(err) => {
                    warn!(source = %source, error = %err, "source search failed");
                    stats.source_api_counts.push(SourceCount { source, count: 0 });
                    stats.failures.push(SourceFailure {
                        source,
                        message: err.to_string(),
                    });
                }
            }
        }
        lists
    }

    /// Direct identifier resolution: PMIDs through the biomedical source,
    /// DOIs through the registry. Cache first.
    async fn lookup_identifiers(
        &self,
        analysis: &AnalyzedQuery,
        stats: &mut SearchStats,
    ) -> Vec<Article> {
        let mut articles: Vec<Article> = Vec::new();

        let mut pmids: Vec<String> = Vec::new();
        let mut dois: Vec<String> = Vec::new();
        for identifier in &analysis.identifiers {
            match identifier.kind {
                IdentifierKind::Pmid => pmids.push(identifier.value.clone()),
                IdentifierKind::Doi => dois.push(identifier.value.clone()),
                _ => {}
            }
        }

        let mut uncached_pmids = Vec::new();
        for pmid in &pmids {
            match self.article_cache.get(&format!("pmid:{pmid}")).await {
                Some(hit) => articles.push(hit),
                None => uncached_pmids.push(pmid.clone()),
            }
        }
        if !uncached_pmids.is_empty() {
            match self.registry.get(SourceId::Pubmed) {
                Some(adapter) => match adapter.fetch_by_id(&uncached_pmids).await {
                    Ok(fetched) => {
                        stats.source_api_counts.push(SourceCount {
                            source: SourceId::Pubmed,
                            count: fetched.len(),
                        });
                        articles.extend(fetched);
                    }
                    Err(err) => {
                        stats.source_api_counts.push(SourceCount {
                            source: SourceId::Pubmed,
                            count: 0,
                        });
                        stats.failures.push(SourceFailure {
                            source: SourceId::Pubmed,
                            message: err.to_string(),
                        });
                    }
                },
                None => stats.failures.push(SourceFailure {
                    source: SourceId::Pubmed,
                    message: "adapter not configured".into(),
                }),
            }
        }

        let mut uncached_dois = Vec::new();
        for doi in &dois {
            let key = format!("doi:{}", doi.to_lowercase());
            match self.article_cache.get(&key).await {
                Some(hit) => articles.push(hit),
                None => uncached_dois.push(doi.clone()),
            }
        }
        if !uncached_dois.is_empty() {
            match self.registry.get(SourceId::Crossref) {
                Some(adapter) => match adapter.fetch_by_id(&uncached_dois).await {
                    Ok(fetched) => {
                        stats.source_api_counts.push(SourceCount {
                            source: SourceId::Crossref,
                            count: fetched.len(),
                        });
                        articles.extend(fetched);
                    }
                    Err(err) => {
                        stats.source_api_counts.push(SourceCount {
                            source: SourceId::Crossref,
                            count: 0,
                        });
                        stats.failures.push(SourceFailure {
                            source: SourceId::Crossref,
                            message: err.to_string(),
                        });
                    }
                },
                None => stats.failures.push(SourceFailure {
                    source: SourceId::Crossref,
                    message: "adapter not configured".into(),
                }),
            }
        }

        articles
    }
}
