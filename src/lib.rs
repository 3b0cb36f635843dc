//! litgate — academic literature gateway.
//!
//! One biomedical query in, a ranked and deduplicated list of articles
//! out, assembled from PubMed, Crossref, OpenAlex, Semantic Scholar, and
//! CORE. Two entry points: [`Gateway::search`] for the batteries-included
//! path and [`Gateway::execute_pipeline`] for user-declared DAGs.

use std::sync::Arc;

pub mod cache;
pub mod cli;
pub mod config;
pub mod entities;
pub mod error;
pub mod pipeline;
pub mod search;
pub mod sources;
pub mod transform;
pub mod utils;

pub use config::GatewayConfig;
pub use entities::{Article, PipelineConfig};
pub use error::LitGateError;
pub use pipeline::{PipelineExecutor, PipelineRunOutcome};
pub use search::{SearchOptions, SearchResponse, UnifiedSearcher};

use cache::ArticleCache;
use search::SemanticEnhancer;
use sources::SourceRegistry;
use sources::pubtator::PubtatorClient;

/// The assembled gateway: adapters, caches, enhancer, searcher, executor.
pub struct Gateway {
    searcher: UnifiedSearcher,
    executor: PipelineExecutor,
}

impl Gateway {
    pub fn from_env() -> Result<Self, LitGateError> {
        Self::new(GatewayConfig::from_env())
    }

    pub fn new(config: GatewayConfig) -> Result<Self, LitGateError> {
        let registry = SourceRegistry::from_config(&config)?;
        let enhancer = Arc::new(SemanticEnhancer::new(
            Arc::new(PubtatorClient::new(&config)?),
            config.entity_cache_ttl,
        ));
        let article_cache = Arc::new(ArticleCache::new(config.article_cache_ttl));

        Ok(Self {
            searcher: UnifiedSearcher::new(registry.clone(), article_cache)
                .with_enhancer(enhancer.clone()),
            executor: PipelineExecutor::new(registry).with_enhancer(enhancer),
        })
    }

    /// Analyze the query, fan out to the chosen sources, aggregate.
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse, LitGateError> {
        self.searcher.search(query, options).await
    }

    /// Run a validated pipeline DAG and return articles, per-step results,
    /// and the run record.
    pub async fn execute_pipeline(
        &self,
        config: &PipelineConfig,
    ) -> Result<PipelineRunOutcome, LitGateError> {
        self.executor.execute_with_record(config).await
    }
}
