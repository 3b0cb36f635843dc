//! Typed records shared by every layer of the gateway.

pub mod article;
pub mod pipeline;
pub mod query;

pub use article::{Article, ArticleType, Author, CitationMetrics, OaLink, OaStatus, SourceRecord};
pub use pipeline::{
    MAX_PIPELINE_STEPS, MergeMethod, OnError, PipelineAction, PipelineConfig, PipelineOutput,
    PipelineStep, RankingPreset, StepResult,
};
pub use query::{
    AnalyzedQuery, ClinicalCategory, ExtractedIdentifier, IdentifierKind, PicoElements,
    QueryComplexity, QueryIntent,
};
