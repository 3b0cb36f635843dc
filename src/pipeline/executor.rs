//! Pipeline executor: validate the DAG, batch it topologically, run each
//! batch concurrently, and pass typed step results downstream.
//!
//! A step handler that fails produces a `StepResult` with `error` set;
//! execution continues unless the step asked for `on_error: abort`, in
//! which case the run stops once the current batch has settled.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::entities::article::Article;
use crate::entities::pipeline::{
    MAX_PIPELINE_STEPS, MergeMethod, OnError, PipelineAction, PipelineConfig, PipelineStep,
    StepResult,
};
use crate::error::LitGateError;
use crate::search::aggregator::{self, RankingConfig};
use crate::search::enhancer::SemanticEnhancer;
use crate::sources::{SearchFilters, SourceId, SourceRegistry};

/// Reciprocal Rank Fusion constant: each list contributes 1/(k + rank).
const RRF_K: f64 = 60.0;

const DEFAULT_SEARCH_LIMIT: usize = 50;
const DEFAULT_RELATED_LIMIT: usize = 20;
const DEFAULT_CITING_LIMIT: usize = 20;
const DEFAULT_REFERENCES_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct StepRunRecord {
    pub step_id: String,
    pub action: PipelineAction,
    pub duration_ms: u64,
    pub article_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineRunRecord {
    pub total_ms: u64,
    pub steps: Vec<StepRunRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineRunOutcome {
    pub articles: Vec<Article>,
    pub step_results: BTreeMap<String, StepResult>,
    pub run_record: PipelineRunRecord,
}

pub struct PipelineExecutor {
    registry: SourceRegistry,
    enhancer: Option<Arc<SemanticEnhancer>>,
}

impl PipelineExecutor {
    pub fn new(registry: SourceRegistry) -> Self {
        Self {
            registry,
            enhancer: None,
        }
    }

    pub fn with_enhancer(mut self, enhancer: Arc<SemanticEnhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    /// Execute the pipeline, returning the finalized articles and every
    /// step's result.
    pub async fn execute(
        &self,
        config: &PipelineConfig,
    ) -> Result<(Vec<Article>, BTreeMap<String, StepResult>), LitGateError> {
        let outcome = self.execute_with_record(config).await?;
        Ok((outcome.articles, outcome.step_results))
    }

    /// Execute with wall-clock telemetry per step.
    pub async fn execute_with_record(
        &self,
        config: &PipelineConfig,
    ) -> Result<PipelineRunOutcome, LitGateError> {
        validate(config)?;
        let batches = topological_batches(&config.steps)?;
        let started = Instant::now();

        let mut results: BTreeMap<String, StepResult> = BTreeMap::new();
        let mut records: Vec<StepRunRecord> = Vec::with_capacity(config.steps.len());

        for batch in batches {
            let tasks = batch.iter().map(|&idx| {
                let step = &config.steps[idx];
                // Failed upstream results are passed through too; handlers
                // see ok() == false and decide for themselves.
                let inputs: BTreeMap<String, StepResult> = step
                    .inputs
                    .iter()
                    .filter_map(|id| results.get(id).map(|r| (id.clone(), r.clone())))
                    .collect();
                async move {
                    let step_started = Instant::now();
                    let result = self.run_step(step, &inputs).await;
                    (idx, step_started.elapsed(), result)
                }
            });

            let mut aborted: Option<String> = None;
            for (idx, elapsed, result) in join_all(tasks).await {
                let step = &config.steps[idx];
                records.push(StepRunRecord {
                    step_id: step.id.clone(),
                    action: step.action,
                    duration_ms: elapsed.as_millis() as u64,
                    article_count: result.articles.len(),
                    error: result.error.clone(),
                });
                if !result.ok() && step.on_error == OnError::Abort && aborted.is_none() {
                    aborted = Some(step.id.clone());
                }
                results.insert(step.id.clone(), result);
            }

            if let Some(step_id) = aborted {
                let message = results
                    .get(&step_id)
                    .and_then(|r| r.error.clone())
                    .unwrap_or_else(|| "step failed".into());
                return Err(LitGateError::PipelineAborted { step_id, message });
            }
        }

        let articles = finalize(config, &results);
        Ok(PipelineRunOutcome {
            articles,
            step_results: results,
            run_record: PipelineRunRecord {
                total_ms: started.elapsed().as_millis() as u64,
                steps: records,
            },
        })
    }

    /// Dispatch on the action enum. A handler error becomes the step's
    /// `error` field, never a panic and never (directly) a request error.
    async fn run_step(
        &self,
        step: &PipelineStep,
        inputs: &BTreeMap<String, StepResult>,
    ) -> StepResult {
        let outcome = match step.action {
            PipelineAction::Search => self.action_search(step, inputs).await,
            PipelineAction::Pico => self.action_pico(step),
            PipelineAction::Expand => self.action_expand(step).await,
            PipelineAction::Details => self.action_details(step, inputs).await,
            PipelineAction::Related => {
                self.action_linked(step, PipelineAction::Related, DEFAULT_RELATED_LIMIT)
                    .await
            }
            PipelineAction::Citing => {
                self.action_linked(step, PipelineAction::Citing, DEFAULT_CITING_LIMIT)
                    .await
            }
            PipelineAction::References => {
                self.action_linked(step, PipelineAction::References, DEFAULT_REFERENCES_LIMIT)
                    .await
            }
            PipelineAction::Metrics => self.action_metrics(step, inputs).await,
            PipelineAction::Merge => self.action_merge(step, inputs),
            PipelineAction::Filter => self.action_filter(step, inputs),
        };

        match outcome {
            Ok(result) => result,
            Err(err) => {
                warn!(step = %step.id, action = %step.action.as_str(), error = %err, "pipeline step failed");
                StepResult::failed(&step.id, step.action, err.to_string())
            }
        }
    }

    // -----------------------------------------------------------------
    // search
    // -----------------------------------------------------------------

    async fn action_search(
        &self,
        step: &PipelineStep,
        inputs: &BTreeMap<String, StepResult>,
    ) -> Result<StepResult, LitGateError> {
        let Some(query) = resolve_query(step, inputs) else {
            return Ok(StepResult::failed(
                &step.id,
                PipelineAction::Search,
                "No query provided or derivable from inputs",
            ));
        };

        let source_names = {
            let names = step.param_str_list("sources");
            if names.is_empty() {
                vec!["pubmed".to_string()]
            } else {
                names
            }
        };
        let mut sources = Vec::with_capacity(source_names.len());
        for name in &source_names {
            sources.push(SourceId::from_flag(name)?);
        }

        let limit = step.param_usize("limit", DEFAULT_SEARCH_LIMIT);
        let filters = SearchFilters {
            min_year: step.param_i32("min_year"),
            max_year: step.param_i32("max_year"),
            open_access_only: step.param_bool("open_access_only"),
            has_fulltext: step.param_bool("has_fulltext"),
            language: step.param_str("language"),
        };

        // Clinical Queries filters are PubMed search syntax; they apply
        // to the biomedical source only.
        let pubmed_query = match step.param_str("clinical_query") {
            Some(category) => match clinical_query_filter(&category) {
                Some(filter) => format!("{query} AND {filter}"),
                None => {
                    return Ok(StepResult::failed(
                        &step.id,
                        PipelineAction::Search,
                        format!(
                            "Unknown clinical_query \"{category}\". Expected therapy, diagnosis, prognosis, or etiology, optionally with /broad or /narrow"
                        ),
                    ));
                }
            },
            None => query.clone(),
        };

        let tasks = sources.iter().map(|&source| {
            let adapter = self.registry.get(source);
            let query = if source == SourceId::Pubmed {
                pubmed_query.clone()
            } else {
                query.clone()
            };
            let filters = filters.clone();
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

        let mut all_articles: Vec<Article> = Vec::new();
        let mut source_api_counts: Vec<Value> = Vec::new();
        let mut source_errors: Vec<Value> = Vec::new();
        for (source, outcome) in join_all(tasks).await {
            match outcome {
                Ok(articles) => {
                    source_api_counts
                        .push(json!({"source": source.as_str(), "count": articles.len()}));
                    all_articles.extend(articles);
                }
                Err(err) => {
                    warn!(source = %source, error = %err, "search source failed inside pipeline");
                    source_api_counts.push(json!({"source": source.as_str(), "count": 0}));
                    source_errors.push(json!({"source": source.as_str(), "error": err.to_string()}));
                }
            }
        }

        // Partial source failures degrade to metadata; a step where every
        // source failed is itself a failed step.
        if !source_errors.is_empty() && source_errors.len() == sources.len() {
            let mut result = StepResult::failed(
                &step.id,
                PipelineAction::Search,
                format!("all {} source(s) failed", sources.len()),
            );
            result.insert_metadata("source_api_counts", Value::Array(source_api_counts));
            result.insert_metadata("source_errors", Value::Array(source_errors));
            return Ok(result);
        }

        if sources.len() > 1 && all_articles.len() > 1 {
            let (deduped, _) = aggregator::aggregate(vec![all_articles]);
            all_articles = deduped;
        }

        let mut result = StepResult::new(&step.id, PipelineAction::Search).with_articles(all_articles);
        result.insert_metadata("source_api_counts", Value::Array(source_api_counts));
        if !source_errors.is_empty() {
            result.insert_metadata("source_errors", Value::Array(source_errors));
        }
        Ok(result)
    }

    // -----------------------------------------------------------------
    // pico / expand
    // -----------------------------------------------------------------

    fn action_pico(&self, step: &PipelineStep) -> Result<StepResult, LitGateError> {
        let mut elements: Vec<(&str, String)> = Vec::new();
        for key in ["P", "I", "C", "O"] {
            if let Some(value) = step.param_str(key) {
                elements.push((key, value));
            }
        }

        let has = |k: &str| elements.iter().any(|(key, _)| *key == k);
        if !has("P") || !has("I") {
            return Ok(StepResult::failed(
                &step.id,
                PipelineAction::Pico,
                "PICO requires at least P and I elements",
            ));
        }

        let precision = elements
            .iter()
            .map(|(_, v)| format!("({v})"))
            .collect::<Vec<_>>()
            .join(" AND ");

        let get = |k: &str| elements.iter().find(|(key, _)| *key == k).map(|(_, v)| v.clone());
        let mut recall_parts = Vec::new();
        if let Some(p) = get("P") {
            recall_parts.push(format!("({p})"));
        }
        let ic: Vec<String> = ["I", "C"].iter().filter_map(|k| get(k)).collect();
        if !ic.is_empty() {
            recall_parts.push(format!("({})", ic.join(" OR ")));
        }
        let recall = recall_parts.join(" AND ");

        let mut element_map = serde_json::Map::new();
        for (key, value) in &elements {
            element_map.insert((*key).to_string(), Value::String(value.clone()));
        }

        let mut result = StepResult::new(&step.id, PipelineAction::Pico);
        result.insert_metadata("elements", Value::Object(element_map));
        result.insert_metadata("combined_precision", Value::String(precision));
        result.insert_metadata("combined_recall", Value::String(recall));
        Ok(result)
    }

    async fn action_expand(&self, step: &PipelineStep) -> Result<StepResult, LitGateError> {
        let Some(topic) = step.param_str("topic") else {
            return Ok(StepResult::failed(
                &step.id,
                PipelineAction::Expand,
                "No 'topic' provided",
            ));
        };

        let mut result = StepResult::new(&step.id, PipelineAction::Expand);
        match self.enhancer.as_ref() {
            Some(enhancer) => {
                let enhanced = enhancer.enhance(&topic).await;
                result.insert_metadata("original_query", Value::String(enhanced.original.clone()));
                result.insert_metadata(
                    "expanded_query",
                    Value::String(enhanced.expanded_query.clone()),
                );
                result.insert_metadata(
                    "strategies",
                    serde_json::to_value(&enhanced.strategies).unwrap_or(Value::Null),
                );
                result.insert_metadata(
                    "expanded_terms",
                    serde_json::to_value(&enhanced.expanded_terms).unwrap_or(Value::Null),
                );
                result.insert_metadata(
                    "entities",
                    serde_json::to_value(&enhanced.entities).unwrap_or(Value::Null),
                );
            }
            None => {
                // No enhancer wired in: pass the topic through unchanged.
                result.insert_metadata("original_query", Value::String(topic.clone()));
                result.insert_metadata("expanded_query", Value::String(topic.clone()));
                result.insert_metadata(
                    "strategies",
                    json!([{"name": "original", "query": topic, "priority": 1}]),
                );
            }
        }
        Ok(result)
    }

    // -----------------------------------------------------------------
    // details / related / citing / references
    // -----------------------------------------------------------------

    async fn action_details(
        &self,
        step: &PipelineStep,
        inputs: &BTreeMap<String, StepResult>,
    ) -> Result<StepResult, LitGateError> {
        let mut pmids: Vec<String> = Vec::new();
        let mut push = |pmid: &str| {
            if !pmid.is_empty() && !pmids.iter().any(|p| p == pmid) {
                pmids.push(pmid.to_string());
            }
        };
        for pmid in step.param_str_list("pmids") {
            push(&pmid);
        }
        for input_id in &step.inputs {
            if let Some(input) = inputs.get(input_id)
                && input.ok()
            {
                for pmid in &input.pmids {
                    push(pmid);
                }
            }
        }

        if pmids.is_empty() {
            return Ok(StepResult::failed(
                &step.id,
                PipelineAction::Details,
                "No PMIDs provided or collected from inputs",
            ));
        }
        let Some(adapter) = self.registry.get(SourceId::Pubmed) else {
            return Ok(StepResult::failed(
                &step.id,
                PipelineAction::Details,
                "biomedical source unavailable",
            ));
        };

        let articles = adapter.fetch_by_id(&pmids).await?;
        Ok(StepResult::new(&step.id, PipelineAction::Details).with_articles(articles))
    }

    async fn action_linked(
        &self,
        step: &PipelineStep,
        action: PipelineAction,
        default_limit: usize,
    ) -> Result<StepResult, LitGateError> {
        let Some(pmid) = step.param_str("pmid") else {
            return Ok(StepResult::failed(&step.id, action, "No 'pmid' provided"));
        };
        let limit = step.param_usize("limit", default_limit);

        let Some(adapter) = self.registry.get(SourceId::Pubmed) else {
            return Ok(StepResult::failed(
                &step.id,
                action,
                "biomedical source unavailable",
            ));
        };

        // A source without citation-graph support answers with an empty
        // result and a note, not an error.
        if !adapter.capabilities().citations {
            let mut result = StepResult::new(&step.id, action);
            result.insert_metadata(
                "note",
                Value::String("source does not expose citation links".into()),
            );
            return Ok(result);
        }

        let articles = match action {
            PipelineAction::Related => adapter.related(&pmid, limit).await?,
            PipelineAction::Citing => adapter.citing(&pmid, limit).await?,
            PipelineAction::References => adapter.references(&pmid, limit).await?,
            _ => unreachable!("action_linked dispatches citation actions only"),
        };
        Ok(StepResult::new(&step.id, action).with_articles(articles))
    }

    // -----------------------------------------------------------------
    // metrics
    // -----------------------------------------------------------------

    async fn action_metrics(
        &self,
        step: &PipelineStep,
        inputs: &BTreeMap<String, StepResult>,
    ) -> Result<StepResult, LitGateError> {
        let mut articles: Vec<Article> = Vec::new();
        for input_id in &step.inputs {
            if let Some(input) = inputs.get(input_id)
                && input.ok()
            {
                articles.extend(input.articles.iter().cloned());
            }
        }

        let pmids: Vec<String> = articles.iter().filter_map(|a| a.pmid.clone()).collect();
        let without_pmid = articles.len() - pmids.len();

        let mut result = StepResult::new(&step.id, PipelineAction::Metrics);
        if without_pmid > 0 {
            result.insert_metadata("articles_without_pmid", json!(without_pmid));
        }

        if !pmids.is_empty()
            && let Some(metrics_client) = self.registry.metrics()
        {
            match metrics_client.metrics_for(&pmids).await {
                Ok(metrics) => {
                    for article in &mut articles {
                        if let Some(fetched) = article.pmid.as_deref().and_then(|p| metrics.get(p))
                        {
                            match article.citation_metrics.as_mut() {
                                Some(existing) => existing.merge_from(fetched),
                                None => article.citation_metrics = Some(fetched.clone()),
                            }
                        }
                    }
                }
                // Missing metrics are not errors; note and move on.
                Err(err) => {
                    warn!(step = %step.id, error = %err, "citation metrics enrichment failed");
                    result.insert_metadata("metrics_error", Value::String(err.to_string()));
                }
            }
        }

        Ok(result.with_articles(articles))
    }

    // -----------------------------------------------------------------
    // merge / filter
    // -----------------------------------------------------------------

    fn action_merge(
        &self,
        step: &PipelineStep,
        inputs: &BTreeMap<String, StepResult>,
    ) -> Result<StepResult, LitGateError> {
        let method = match step.param_str("method") {
            Some(raw) => MergeMethod::from_flag(&raw)?,
            None => MergeMethod::Union,
        };

        // Declared input order, not map order.
        let ordered: Vec<&StepResult> = step
            .inputs
            .iter()
            .filter_map(|id| inputs.get(id))
            .collect();

        let articles = match method {
            MergeMethod::Union => {
                let lists: Vec<Vec<Article>> = ordered
                    .iter()
                    .filter(|r| r.ok() && !r.articles.is_empty())
                    .map(|r| r.articles.clone())
                    .collect();
                let (articles, _) =
                    aggregator::aggregate_and_rank(lists, &RankingConfig::default(), None);
                articles
            }
            MergeMethod::Intersection => intersect(&ordered),
            MergeMethod::Rrf => rrf_merge(&ordered),
        };

        Ok(StepResult::new(&step.id, PipelineAction::Merge).with_articles(articles))
    }

    fn action_filter(
        &self,
        step: &PipelineStep,
        inputs: &BTreeMap<String, StepResult>,
    ) -> Result<StepResult, LitGateError> {
        let mut articles: Vec<Article> = Vec::new();
        for input_id in &step.inputs {
            if let Some(input) = inputs.get(input_id)
                && input.ok()
            {
                articles.extend(input.articles.iter().cloned());
            }
        }

        let min_year = step.param_i32("min_year");
        let max_year = step.param_i32("max_year");
        let article_types = step.param_str_list("article_types");
        let min_citations = step.param_i32("min_citations");
        let require_abstract = step.param_bool("has_abstract");

        articles.retain(|article| {
            if min_year.is_some() || max_year.is_some() {
                // Year bounds are strict: an undated article cannot pass.
                let Some(year) = article.year else {
                    return false;
                };
                if min_year.is_some_and(|min| year < min) {
                    return false;
                }
                if max_year.is_some_and(|max| year > max) {
                    return false;
                }
            }
            if !article_types.is_empty() {
                let type_name = serde_json::to_value(article.article_type)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                if !article_types.iter().any(|t| t == &type_name) {
                    return false;
                }
            }
            if let Some(min) = min_citations {
                let count = article
                    .citation_metrics
                    .as_ref()
                    .and_then(|m| m.citation_count)
                    .unwrap_or(0);
                if (count as i64) < min as i64 {
                    return false;
                }
            }
            if require_abstract
                && article
                    .abstract_text
                    .as_deref()
                    .is_none_or(|text| text.trim().is_empty())
            {
                return false;
            }
            true
        });

        Ok(StepResult::new(&step.id, PipelineAction::Filter).with_articles(articles))
    }
}

// ---------------------------------------------------------------------
// Validation and batching
// ---------------------------------------------------------------------

fn validate(config: &PipelineConfig) -> Result<(), LitGateError> {
    if config.steps.is_empty() {
        return Err(LitGateError::InvalidPipeline(
            "Pipeline must have at least one step".into(),
        ));
    }
    if config.steps.len() > MAX_PIPELINE_STEPS {
        return Err(LitGateError::InvalidPipeline(format!(
            "Pipeline exceeds the maximum of {MAX_PIPELINE_STEPS} steps"
        )));
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for step in &config.steps {
        if step.id.trim().is_empty() {
            return Err(LitGateError::InvalidPipeline(
                "Every step must have a non-empty id".into(),
            ));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(LitGateError::InvalidPipeline(format!(
                "Duplicate step id '{}'",
                step.id
            )));
        }
        for input in &step.inputs {
            if !seen.contains(input.as_str()) || input == &step.id {
                return Err(LitGateError::InvalidPipeline(format!(
                    "Step '{}' references unknown input '{input}'; inputs must name earlier steps",
                    step.id
                )));
            }
        }
    }
    Ok(())
}

/// Kahn's layering: each batch holds every step whose inputs are all
/// satisfied by earlier batches, in declaration order.
fn topological_batches(steps: &[PipelineStep]) -> Result<Vec<Vec<usize>>, LitGateError> {
    let index_of: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut in_degree: Vec<usize> = steps.iter().map(|s| s.inputs.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (i, step) in steps.iter().enumerate() {
        for input in &step.inputs {
            if let Some(&j) = index_of.get(input.as_str()) {
                dependents[j].push(i);
            }
        }
    }

    let mut batches: Vec<Vec<usize>> = Vec::new();
    let mut ready: Vec<usize> = (0..steps.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut executed = 0usize;

    while !ready.is_empty() {
        let batch = std::mem::take(&mut ready);
        executed += batch.len();
        for &i in &batch {
            for &dep in &dependents[i] {
                in_degree[dep] -= 1;
                if in_degree[dep] == 0 {
                    ready.push(dep);
                }
            }
        }
        ready.sort_unstable();
        batches.push(batch);
    }

    if executed != steps.len() {
        // Unreachable through validation (inputs reference earlier steps
        // only), so hitting it means the validator has a hole.
        return Err(LitGateError::Invariant(
            "pipeline contains a dependency cycle".into(),
        ));
    }
    Ok(batches)
}

// ---------------------------------------------------------------------
// Query resolution and merge helpers
// ---------------------------------------------------------------------

/// Map a clinical category to the PubMed Clinical Queries filter tag.
/// Accepts "therapy", "therapy/broad", or "therapy/narrow" forms.
fn clinical_query_filter(value: &str) -> Option<String> {
    let value = value.trim().to_ascii_lowercase();
    let (category, scope) = match value.split_once('/') {
        Some((category, scope)) => (category.trim(), scope.trim()),
        None => (value.as_str(), "broad"),
    };
    let category = match category {
        "therapy" => "Therapy",
        "diagnosis" => "Diagnosis",
        "prognosis" => "Prognosis",
        "etiology" => "Etiology",
        _ => return None,
    };
    let scope = match scope {
        "broad" => "Broad",
        "narrow" => "Narrow",
        _ => return None,
    };
    Some(format!("{category}/{scope}[filter]"))
}

/// Resolve a search query: explicit param first, then upstream pico or
/// expand results, walked in declared input order.
fn resolve_query(step: &PipelineStep, inputs: &BTreeMap<String, StepResult>) -> Option<String> {
    if let Some(query) = step.param_str("query") {
        return Some(query);
    }

    for input_id in &step.inputs {
        let Some(input) = inputs.get(input_id) else {
            continue;
        };
        if !input.ok() {
            continue;
        }

        match input.action {
            Some(PipelineAction::Pico) => {
                if let Some(element) = step.param_str("element")
                    && let Some(value) = input
                        .metadata
                        .get("elements")
                        .and_then(|e| e.get(&element))
                        .and_then(Value::as_str)
                {
                    return Some(value.to_string());
                }
                let key = match step.param_str("use_combined").as_deref() {
                    Some("recall") => "combined_recall",
                    _ => "combined_precision",
                };
                if let Some(query) = input.metadata.get(key).and_then(Value::as_str) {
                    return Some(query.to_string());
                }
            }
            Some(PipelineAction::Expand) => {
                if let Some(strategy) = step.param_str("strategy")
                    && let Some(strategies) =
                        input.metadata.get("strategies").and_then(Value::as_array)
                {
                    for entry in strategies {
                        if entry.get("name").and_then(Value::as_str) == Some(strategy.as_str())
                            && let Some(query) = entry.get("query").and_then(Value::as_str)
                        {
                            return Some(query.to_string());
                        }
                    }
                }
                if let Some(query) = input.metadata.get("expanded_query").and_then(Value::as_str)
                {
                    return Some(query.to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Articles present in every input list, ordered as in the earliest
/// input. Any empty (or failed) input empties the intersection.
fn intersect(inputs: &[&StepResult]) -> Vec<Article> {
    if inputs.is_empty() {
        return Vec::new();
    }
    if inputs.iter().any(|r| !r.ok() || r.articles.is_empty()) {
        return Vec::new();
    }

    let key_sets: Vec<HashSet<String>> = inputs
        .iter()
        .map(|r| r.articles.iter().map(Article::canonical_key).collect())
        .collect();

    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for article in &inputs[0].articles {
        let key = article.canonical_key();
        if !seen.insert(key.clone()) {
            continue;
        }
        if key_sets.iter().all(|set| set.contains(&key)) {
            out.push(article.clone());
        }
    }
    out
}

/// Reciprocal Rank Fusion: score(article) = Σ 1/(k + rank) over the lists
/// it appears in, rank 1-based. Ties keep first-seen order.
fn rrf_merge(inputs: &[&StepResult]) -> Vec<Article> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut by_key: HashMap<String, Article> = HashMap::new();

    for input in inputs {
        if !input.ok() {
            continue;
        }
        for (rank, article) in input.articles.iter().enumerate() {
            let key = article.canonical_key();
            *scores.entry(key.clone()).or_insert(0.0) += 1.0 / (RRF_K + (rank as f64) + 1.0);
            if !by_key.contains_key(&key) {
                order.push(key.clone());
                by_key.insert(key, article.clone());
            }
        }
    }

    order.sort_by(|a, b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.into_iter().filter_map(|key| by_key.remove(&key)).collect()
}

/// Final articles come from the last declared step, then get the output
/// ranking and limit applied.
fn finalize(config: &PipelineConfig, results: &BTreeMap<String, StepResult>) -> Vec<Article> {
    let Some(last) = config.steps.last() else {
        return Vec::new();
    };
    let articles = match results.get(&last.id) {
        Some(result) if result.ok() => result.articles.clone(),
        _ => return Vec::new(),
    };
    if config.output.limit == 0 {
        return Vec::new();
    }

    let ranking = RankingConfig {
        max_results: Some(config.output.limit),
        ..RankingConfig::for_preset(config.output.ranking)
    };
    aggregator::rank(articles, &ranking, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::entities::pipeline::{PipelineOutput, RankingPreset};
    use crate::sources::{Capabilities, SourceAdapter};

    struct StubAdapter {
        id: SourceId,
        articles: Vec<Article>,
        citations: bool,
        fail_search: bool,
        calls: Mutex<Vec<String>>,
    }

    impl StubAdapter {
        fn new(id: SourceId, articles: Vec<Article>) -> Self {
            Self {
                id,
                articles,
                citations: id == SourceId::Pubmed,
                fail_search: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing(id: SourceId) -> Self {
            Self {
                fail_search: true,
                ..Self::new(id, Vec::new())
            }
        }

        fn without_citations(mut self) -> Self {
            self.citations = false;
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SourceAdapter for StubAdapter {
        fn id(&self) -> SourceId {
            self.id
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                search: true,
                details: true,
                citations: self.citations,
            }
        }

        async fn search(
            &self,
            query: &str,
            _limit: usize,
            _filters: &SearchFilters,
        ) -> Result<Vec<Article>, LitGateError> {
            self.calls.lock().unwrap().push(format!("search:{query}"));
            if self.fail_search {
                return Err(LitGateError::UpstreamUnavailable {
                    api: self.id.to_string(),
                    message: "stubbed outage".into(),
                });
            }
            Ok(self.articles.clone())
        }

        async fn fetch_by_id(&self, ids: &[String]) -> Result<Vec<Article>, LitGateError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("fetch:{}", ids.join(",")));
            Ok(self
                .articles
                .iter()
                .filter(|a| a.pmid.as_deref().is_some_and(|p| ids.contains(&p.to_string())))
                .cloned()
                .collect())
        }

        async fn citing(&self, id: &str, _limit: usize) -> Result<Vec<Article>, LitGateError> {
            self.calls.lock().unwrap().push(format!("citing:{id}"));
            Ok(self.articles.clone())
        }
    }

    fn article(title: &str, pmid: &str, year: i32) -> Article {
        let mut a = Article::new(title, SourceId::Pubmed);
        a.pmid = Some(pmid.into());
        a.year = Some(year);
        a
    }

    fn step(id: &str, action: PipelineAction) -> PipelineStep {
        PipelineStep::new(id, action)
    }

    fn executor_with(adapters: Vec<Arc<dyn SourceAdapter>>) -> PipelineExecutor {
        let mut registry = SourceRegistry::default();
        for adapter in adapters {
            registry.insert(adapter);
        }
        PipelineExecutor::new(registry)
    }

    // ---------------- validation ----------------

    #[tokio::test]
    async fn empty_pipeline_is_rejected() {
        let executor = executor_with(vec![]);
        let config = PipelineConfig::new(vec![]);
        assert!(matches!(
            executor.execute(&config).await,
            Err(LitGateError::InvalidPipeline(_))
        ));
    }

    #[tokio::test]
    async fn oversized_pipeline_is_rejected() {
        let steps: Vec<PipelineStep> = (0..=MAX_PIPELINE_STEPS)
            .map(|i| {
                let mut s = step(&format!("s{i}"), PipelineAction::Search);
                s.params.insert("query".into(), json!("x"));
                s
            })
            .collect();
        let executor = executor_with(vec![]);
        assert!(matches!(
            executor.execute(&PipelineConfig::new(steps)).await,
            Err(LitGateError::InvalidPipeline(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let config = PipelineConfig::new(vec![
            step("s1", PipelineAction::Search),
            step("s1", PipelineAction::Filter),
        ]);
        let executor = executor_with(vec![]);
        assert!(matches!(
            executor.execute(&config).await,
            Err(LitGateError::InvalidPipeline(_))
        ));
    }

    #[tokio::test]
    async fn forward_references_are_rejected() {
        let mut s1 = step("s1", PipelineAction::Filter);
        s1.inputs = vec!["s2".into()];
        let config = PipelineConfig::new(vec![s1, step("s2", PipelineAction::Search)]);
        let executor = executor_with(vec![]);
        assert!(matches!(
            executor.execute(&config).await,
            Err(LitGateError::InvalidPipeline(_))
        ));
    }

    #[test]
    fn batches_follow_dependency_layers() {
        let mut s2 = step("s2", PipelineAction::Metrics);
        s2.inputs = vec!["s1".into()];
        let mut s3 = step("s3", PipelineAction::Search);
        s3.params.insert("query".into(), json!("y"));
        let mut s4 = step("s4", PipelineAction::Merge);
        s4.inputs = vec!["s2".into(), "s3".into()];

        let mut s1 = step("s1", PipelineAction::Search);
        s1.params.insert("query".into(), json!("x"));

        let steps = vec![s1, s2, s3, s4];
        let batches = topological_batches(&steps).unwrap();
        assert_eq!(batches, vec![vec![0, 2], vec![1], vec![3]]);
    }

    // ---------------- end-to-end DAG ----------------

    #[tokio::test]
    async fn search_metrics_filter_dag_runs_in_order() {
        let pubmed = Arc::new(StubAdapter::new(
            SourceId::Pubmed,
            vec![
                article("Covid study from twenty twenty-three", "1", 2023),
                article("Covid study from twenty nineteen", "2", 2019),
            ],
        ));
        let executor = executor_with(vec![pubmed.clone()]);

        let mut s1 = step("s1", PipelineAction::Search);
        s1.params.insert("query".into(), json!("covid"));
        let mut s2 = step("s2", PipelineAction::Metrics);
        s2.inputs = vec!["s1".into()];
        let mut s3 = step("s3", PipelineAction::Filter);
        s3.params.insert("min_year".into(), json!(2022));
        s3.inputs = vec!["s2".into()];

        let config = PipelineConfig::new(vec![s1, s2, s3]);
        let (articles, results) = executor.execute(&config).await.unwrap();

        assert_eq!(results.len(), 3);
        assert!(results["s1"].ok() && results["s2"].ok() && results["s3"].ok());
        // Metrics passes articles through untouched when no metrics
        // service is configured.
        assert_eq!(results["s2"].articles.len(), results["s1"].articles.len());
        assert_eq!(results["s3"].articles.len(), 1);
        assert!(results["s3"].articles.iter().all(|a| a.year >= Some(2022)));
        assert_eq!(articles.len(), 1);
        assert!(articles[0].ranking_score.is_some());
    }

    #[tokio::test]
    async fn search_records_per_source_counts_in_request_order() {
        let pubmed = Arc::new(StubAdapter::new(
            SourceId::Pubmed,
            vec![article("Shared title of the same work", "1", 2023)],
        ));
        let openalex = Arc::new(StubAdapter::failing(SourceId::Openalex));
        let executor = executor_with(vec![pubmed, openalex]);

        let mut s1 = step("s1", PipelineAction::Search);
        s1.params.insert("query".into(), json!("covid"));
        s1.params.insert("sources".into(), json!("pubmed,openalex"));

        let config = PipelineConfig::new(vec![s1]);
        let (_, results) = executor.execute(&config).await.unwrap();

        let counts = results["s1"].metadata["source_api_counts"]
            .as_array()
            .unwrap()
            .clone();
        assert_eq!(counts[0]["source"], "pubmed");
        assert_eq!(counts[0]["count"], 1);
        assert_eq!(counts[1]["source"], "openalex");
        assert_eq!(counts[1]["count"], 0);
        assert!(results["s1"].metadata.contains_key("source_errors"));
    }

    #[tokio::test]
    async fn abort_stops_before_downstream_batches() {
        let pubmed = Arc::new(StubAdapter::failing(SourceId::Pubmed));
        let executor = executor_with(vec![pubmed.clone()]);

        let mut s1 = step("s1", PipelineAction::Search);
        s1.params.insert("query".into(), json!("covid"));
        s1.on_error = OnError::Abort;
        let mut s2 = step("s2", PipelineAction::Details);
        s2.inputs = vec!["s1".into()];

        let config = PipelineConfig::new(vec![s1, s2]);
        let err = executor.execute(&config).await.unwrap_err();

        match err {
            LitGateError::PipelineAborted { step_id, .. } => assert_eq!(step_id, "s1"),
            other => panic!("expected PipelineAborted, got {other:?}"),
        }
        // s2 never ran: the only recorded calls belong to s1.
        assert_eq!(pubmed.calls().len(), 1);
    }

    #[tokio::test]
    async fn failed_inputs_flow_downstream_without_raising() {
        let pubmed = Arc::new(StubAdapter::failing(SourceId::Pubmed));
        let executor = executor_with(vec![pubmed]);

        let mut s1 = step("s1", PipelineAction::Search);
        s1.params.insert("query".into(), json!("covid"));
        let mut s2 = step("s2", PipelineAction::Filter);
        s2.inputs = vec!["s1".into()];

        let config = PipelineConfig::new(vec![s1, s2]);
        let (articles, results) = executor.execute(&config).await.unwrap();

        assert!(!results["s1"].ok());
        assert!(results["s2"].ok());
        assert!(results["s2"].articles.is_empty());
        assert!(articles.is_empty());
    }

    // ---------------- pico / expand / query resolution ----------------

    #[tokio::test]
    async fn pico_builds_precision_and_recall_queries() {
        let executor = executor_with(vec![]);
        let mut s1 = step("s1", PipelineAction::Pico);
        s1.params.insert("P".into(), json!("ICU patients"));
        s1.params.insert("I".into(), json!("remimazolam"));
        s1.params.insert("C".into(), json!("propofol"));
        s1.params.insert("O".into(), json!("sedation depth"));

        let config = PipelineConfig::new(vec![s1]);
        let (_, results) = executor.execute(&config).await.unwrap();
        let meta = &results["s1"].metadata;

        assert_eq!(
            meta["combined_precision"],
            "(ICU patients) AND (remimazolam) AND (propofol) AND (sedation depth)"
        );
        assert_eq!(
            meta["combined_recall"],
            "(ICU patients) AND (remimazolam OR propofol)"
        );
        assert_eq!(meta["elements"]["I"], "remimazolam");
    }

    #[tokio::test]
    async fn pico_requires_population_and_intervention() {
        let executor = executor_with(vec![]);
        let mut s1 = step("s1", PipelineAction::Pico);
        s1.params.insert("I".into(), json!("remimazolam"));

        let config = PipelineConfig::new(vec![s1]);
        let (_, results) = executor.execute(&config).await.unwrap();
        assert!(!results["s1"].ok());
    }

    #[tokio::test]
    async fn search_derives_query_from_pico_recall() {
        let pubmed = Arc::new(StubAdapter::new(SourceId::Pubmed, Vec::new()));
        let executor = executor_with(vec![pubmed.clone()]);

        let mut s1 = step("s1", PipelineAction::Pico);
        s1.params.insert("P".into(), json!("ICU patients"));
        s1.params.insert("I".into(), json!("remimazolam"));
        s1.params.insert("C".into(), json!("propofol"));
        let mut s2 = step("s2", PipelineAction::Search);
        s2.inputs = vec!["s1".into()];
        s2.params.insert("use_combined".into(), json!("recall"));

        let config = PipelineConfig::new(vec![s1, s2]);
        executor.execute(&config).await.unwrap();

        assert_eq!(
            pubmed.calls(),
            vec!["search:(ICU patients) AND (remimazolam OR propofol)"]
        );
    }

    #[tokio::test]
    async fn search_derives_query_from_pico_element() {
        let pubmed = Arc::new(StubAdapter::new(SourceId::Pubmed, Vec::new()));
        let executor = executor_with(vec![pubmed.clone()]);

        let mut s1 = step("s1", PipelineAction::Pico);
        s1.params.insert("P".into(), json!("ICU patients"));
        s1.params.insert("I".into(), json!("remimazolam"));
        let mut s2 = step("s2", PipelineAction::Search);
        s2.inputs = vec!["s1".into()];
        s2.params.insert("element".into(), json!("I"));

        let config = PipelineConfig::new(vec![s1, s2]);
        executor.execute(&config).await.unwrap();
        assert_eq!(pubmed.calls(), vec!["search:remimazolam"]);
    }

    #[test]
    fn clinical_query_filters_map_to_pubmed_syntax() {
        assert_eq!(
            clinical_query_filter("therapy").as_deref(),
            Some("Therapy/Broad[filter]")
        );
        assert_eq!(
            clinical_query_filter("Diagnosis/narrow").as_deref(),
            Some("Diagnosis/Narrow[filter]")
        );
        assert!(clinical_query_filter("astrology").is_none());
    }

    #[tokio::test]
    async fn clinical_query_applies_to_the_biomedical_source_only() {
        let pubmed = Arc::new(StubAdapter::new(SourceId::Pubmed, Vec::new()));
        let openalex = Arc::new(StubAdapter::new(SourceId::Openalex, Vec::new()));
        let executor = executor_with(vec![pubmed.clone(), openalex.clone()]);

        let mut s1 = step("s1", PipelineAction::Search);
        s1.params.insert("query".into(), json!("sepsis"));
        s1.params.insert("sources".into(), json!("pubmed,openalex"));
        s1.params.insert("clinical_query".into(), json!("therapy"));

        let config = PipelineConfig::new(vec![s1]);
        executor.execute(&config).await.unwrap();

        assert_eq!(
            pubmed.calls(),
            vec!["search:sepsis AND Therapy/Broad[filter]"]
        );
        assert_eq!(openalex.calls(), vec!["search:sepsis"]);
    }

    #[tokio::test]
    async fn expand_without_enhancer_passes_topic_through() {
        let pubmed = Arc::new(StubAdapter::new(SourceId::Pubmed, Vec::new()));
        let executor = executor_with(vec![pubmed.clone()]);

        let mut s1 = step("s1", PipelineAction::Expand);
        s1.params.insert("topic".into(), json!("sepsis"));
        let mut s2 = step("s2", PipelineAction::Search);
        s2.inputs = vec!["s1".into()];

        let config = PipelineConfig::new(vec![s1, s2]);
        let (_, results) = executor.execute(&config).await.unwrap();

        assert_eq!(results["s1"].metadata["expanded_query"], "sepsis");
        assert_eq!(pubmed.calls(), vec!["search:sepsis"]);
    }

    #[tokio::test]
    async fn search_without_any_query_reports_step_error() {
        let executor = executor_with(vec![]);
        let config = PipelineConfig::new(vec![step("s1", PipelineAction::Search)]);
        let (_, results) = executor.execute(&config).await.unwrap();
        assert!(!results["s1"].ok());
    }

    // ---------------- details / citing ----------------

    #[tokio::test]
    async fn details_accumulates_pmids_in_order() {
        let pubmed = Arc::new(StubAdapter::new(
            SourceId::Pubmed,
            vec![
                article("First looked-up article title", "11", 2020),
                article("Second looked-up article title", "22", 2021),
            ],
        ));
        let executor = executor_with(vec![pubmed.clone()]);

        let mut s1 = step("s1", PipelineAction::Search);
        s1.params.insert("query".into(), json!("covid"));
        let mut s2 = step("s2", PipelineAction::Details);
        s2.inputs = vec!["s1".into()];
        s2.params.insert("pmids".into(), json!(["22", "11", "22"]));

        let config = PipelineConfig::new(vec![s1, s2]);
        let (_, results) = executor.execute(&config).await.unwrap();

        assert!(results["s2"].ok());
        let calls = pubmed.calls();
        // Explicit pmids first, upstream pmids appended, dupes dropped.
        assert!(calls.contains(&"fetch:22,11".to_string()));
    }

    #[tokio::test]
    async fn citing_without_capability_yields_note_not_error() {
        let pubmed =
            Arc::new(StubAdapter::new(SourceId::Pubmed, Vec::new()).without_citations());
        let executor = executor_with(vec![pubmed.clone()]);

        let mut s1 = step("s1", PipelineAction::Citing);
        s1.params.insert("pmid".into(), json!("12345678"));

        let config = PipelineConfig::new(vec![s1]);
        let (_, results) = executor.execute(&config).await.unwrap();

        assert!(results["s1"].ok());
        assert!(results["s1"].articles.is_empty());
        assert!(results["s1"].metadata.contains_key("note"));
        assert!(pubmed.calls().is_empty());
    }

    #[tokio::test]
    async fn citing_calls_the_adapter_when_capable() {
        let pubmed = Arc::new(StubAdapter::new(
            SourceId::Pubmed,
            vec![article("A citing article title here", "7", 2024)],
        ));
        let executor = executor_with(vec![pubmed.clone()]);

        let mut s1 = step("s1", PipelineAction::Citing);
        s1.params.insert("pmid".into(), json!("100"));

        let config = PipelineConfig::new(vec![s1]);
        let (_, results) = executor.execute(&config).await.unwrap();
        assert_eq!(results["s1"].articles.len(), 1);
        assert_eq!(pubmed.calls(), vec!["citing:100"]);
    }

    // ---------------- merge ----------------

    fn result_with(step_id: &str, articles: Vec<Article>) -> StepResult {
        StepResult::new(step_id, PipelineAction::Search).with_articles(articles)
    }

    #[tokio::test]
    async fn merge_union_deduplicates_across_inputs() {
        let executor = executor_with(vec![]);

        let mut shared_a = article("The shared work appearing twice", "1", 2022);
        shared_a.doi = Some("10.1/shared".into());
        let mut shared_b = Article::new("The shared work appearing twice", SourceId::Crossref);
        shared_b.doi = Some("10.1/SHARED".into());

        let mut s3 = step("s3", PipelineAction::Merge);
        s3.inputs = vec!["s1".into(), "s2".into()];
        let inputs: BTreeMap<String, StepResult> = [
            ("s1".to_string(), result_with("s1", vec![shared_a])),
            ("s2".to_string(), result_with("s2", vec![shared_b])),
        ]
        .into();

        let result = executor.action_merge(&s3, &inputs).unwrap();
        assert_eq!(result.articles.len(), 1);
        assert_eq!(result.articles[0].sources.len(), 2);
    }

    #[tokio::test]
    async fn merge_intersection_keeps_common_keys_in_first_input_order() {
        let executor = executor_with(vec![]);

        let a1 = article("Alpha study with a long title", "1", 2020);
        let a2 = article("Beta study with a long title", "2", 2021);
        let a3 = article("Gamma study with a long title", "3", 2022);

        let mut s3 = step("s3", PipelineAction::Merge);
        s3.params.insert("method".into(), json!("intersection"));
        s3.inputs = vec!["s1".into(), "s2".into()];
        let inputs: BTreeMap<String, StepResult> = [
            (
                "s1".to_string(),
                result_with("s1", vec![a1.clone(), a2.clone(), a3.clone()]),
            ),
            ("s2".to_string(), result_with("s2", vec![a3.clone(), a1.clone()])),
        ]
        .into();

        let result = executor.action_merge(&s3, &inputs).unwrap();
        let pmids: Vec<&str> = result
            .articles
            .iter()
            .map(|a| a.pmid.as_deref().unwrap())
            .collect();
        assert_eq!(pmids, vec!["1", "3"]);
    }

    #[tokio::test]
    async fn merge_intersection_with_an_empty_input_is_empty() {
        let executor = executor_with(vec![]);
        let a1 = article("Alpha study with a long title", "1", 2020);

        let mut s3 = step("s3", PipelineAction::Merge);
        s3.params.insert("method".into(), json!("intersection"));
        s3.inputs = vec!["s1".into(), "s2".into()];
        let inputs: BTreeMap<String, StepResult> = [
            ("s1".to_string(), result_with("s1", vec![a1])),
            ("s2".to_string(), result_with("s2", Vec::new())),
        ]
        .into();

        let result = executor.action_merge(&s3, &inputs).unwrap();
        assert!(result.articles.is_empty());
    }

    #[tokio::test]
    async fn merge_rrf_scores_by_reciprocal_rank() {
        let executor = executor_with(vec![]);

        let a = article("Article a with its long title", "1", 2020);
        let b = article("Article b with its long title", "2", 2020);
        let c = article("Article c with its long title", "3", 2020);

        // List one: a, b, c. List two: b, c, a.
        // a: 1/61 + 1/63; b: 1/62 + 1/61; c: 1/63 + 1/62.
        let mut s3 = step("s3", PipelineAction::Merge);
        s3.params.insert("method".into(), json!("rrf"));
        s3.inputs = vec!["s1".into(), "s2".into()];
        let inputs: BTreeMap<String, StepResult> = [
            (
                "s1".to_string(),
                result_with("s1", vec![a.clone(), b.clone(), c.clone()]),
            ),
            (
                "s2".to_string(),
                result_with("s2", vec![b.clone(), c.clone(), a.clone()]),
            ),
        ]
        .into();

        let result = executor.action_merge(&s3, &inputs).unwrap();
        let pmids: Vec<&str> = result
            .articles
            .iter()
            .map(|a| a.pmid.as_deref().unwrap())
            .collect();

        let score_a = 1.0 / 61.0 + 1.0 / 63.0;
        let score_b = 1.0 / 62.0 + 1.0 / 61.0;
        let score_c = 1.0 / 63.0 + 1.0 / 62.0;
        assert!(score_b > score_a && score_a > score_c);
        assert_eq!(pmids, vec!["2", "1", "3"]);
    }

    // ---------------- filter ----------------

    #[tokio::test]
    async fn filter_applies_all_active_criteria() {
        let executor = executor_with(vec![]);

        let mut keep = article("Reviewed and cited and recent", "1", 2023);
        keep.article_type = crate::entities::ArticleType::Review;
        keep.abstract_text = Some("has one".into());
        keep.citation_metrics = Some(crate::entities::CitationMetrics {
            citation_count: Some(50),
            ..Default::default()
        });

        let mut too_old = keep.clone();
        too_old.pmid = Some("2".into());
        too_old.year = Some(2010);

        let mut wrong_type = keep.clone();
        wrong_type.pmid = Some("3".into());
        wrong_type.article_type = crate::entities::ArticleType::Letter;

        let mut uncited = keep.clone();
        uncited.pmid = Some("4".into());
        uncited.citation_metrics = None;

        let mut undated = keep.clone();
        undated.pmid = Some("5".into());
        undated.year = None;

        let mut s2 = step("s2", PipelineAction::Filter);
        s2.params.insert("min_year".into(), json!(2020));
        s2.params.insert("article_types".into(), json!(["review"]));
        s2.params.insert("min_citations".into(), json!(10));
        s2.params.insert("has_abstract".into(), json!(true));
        s2.inputs = vec!["s1".into()];

        let inputs: BTreeMap<String, StepResult> = [(
            "s1".to_string(),
            result_with("s1", vec![keep, too_old, wrong_type, uncited, undated]),
        )]
        .into();

        let result = executor.action_filter(&s2, &inputs).unwrap();
        let pmids: Vec<&str> = result
            .articles
            .iter()
            .map(|a| a.pmid.as_deref().unwrap())
            .collect();
        assert_eq!(pmids, vec!["1"]);
    }

    // ---------------- output finalization ----------------

    #[tokio::test]
    async fn output_limit_and_ranking_apply_to_last_step() {
        let articles: Vec<Article> = (0..5)
            .map(|i| article(&format!("Study number {i} long title"), &i.to_string(), 2020 + i))
            .collect();
        let pubmed = Arc::new(StubAdapter::new(SourceId::Pubmed, articles));
        let executor = executor_with(vec![pubmed]);

        let mut s1 = step("s1", PipelineAction::Search);
        s1.params.insert("query".into(), json!("study"));
        let mut config = PipelineConfig::new(vec![s1]);
        config.output = PipelineOutput {
            format: "summary".into(),
            limit: 2,
            ranking: RankingPreset::Recency,
        };

        let (articles, _) = executor.execute(&config).await.unwrap();
        assert_eq!(articles.len(), 2);
        // Recency preset puts the newest first.
        assert_eq!(articles[0].year, Some(2024));
    }

    #[tokio::test]
    async fn run_record_captures_per_step_timings_and_counts() {
        let pubmed = Arc::new(StubAdapter::new(
            SourceId::Pubmed,
            vec![article("Recorded article title here", "1", 2023)],
        ));
        let executor = executor_with(vec![pubmed]);

        let mut s1 = step("s1", PipelineAction::Search);
        s1.params.insert("query".into(), json!("covid"));
        let config = PipelineConfig::new(vec![s1]);

        let outcome = executor.execute_with_record(&config).await.unwrap();
        assert_eq!(outcome.run_record.steps.len(), 1);
        let record = &outcome.run_record.steps[0];
        assert_eq!(record.step_id, "s1");
        assert_eq!(record.article_count, 1);
        assert!(record.error.is_none());
    }
}
