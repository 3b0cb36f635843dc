use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::article::Article;
use crate::error::LitGateError;

/// Hard cap on pipeline size; anything larger is rejected before running.
pub const MAX_PIPELINE_STEPS: usize = 32;

/// Typed pipeline actions. The executor dispatches on this enum directly,
/// never on action names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineAction {
    Search,
    Pico,
    Expand,
    Details,
    Related,
    Citing,
    References,
    Metrics,
    Merge,
    Filter,
}

impl PipelineAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Pico => "pico",
            Self::Expand => "expand",
            Self::Details => "details",
            Self::Related => "related",
            Self::Citing => "citing",
            Self::References => "references",
            Self::Metrics => "metrics",
            Self::Merge => "merge",
            Self::Filter => "filter",
        }
    }
}

/// What to do when a step reports an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    #[default]
    Skip,
    Abort,
}

/// How a `merge` step combines its inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergeMethod {
    #[default]
    Union,
    Intersection,
    Rrf,
}

impl MergeMethod {
    pub fn from_flag(value: &str) -> Result<Self, LitGateError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "union" | "" => Ok(Self::Union),
            "intersection" => Ok(Self::Intersection),
            "rrf" => Ok(Self::Rrf),
            other => Err(LitGateError::InvalidInput(format!(
                "Invalid merge method \"{other}\". Expected one of: union, intersection, rrf"
            ))),
        }
    }
}

/// Ranking preset applied to pipeline output and ad-hoc searches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingPreset {
    #[default]
    Balanced,
    Impact,
    Recency,
    Quality,
}

impl RankingPreset {
    pub fn from_flag(value: &str) -> Result<Self, LitGateError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "balanced" | "default" => Ok(Self::Balanced),
            "impact" => Ok(Self::Impact),
            "recency" => Ok(Self::Recency),
            "quality" => Ok(Self::Quality),
            other => Err(LitGateError::InvalidInput(format!(
                "Invalid ranking preset \"{other}\". Expected one of: balanced, impact, recency, quality"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Balanced => "balanced",
            Self::Impact => "impact",
            Self::Recency => "recency",
            Self::Quality => "quality",
        }
    }
}

/// One node of the pipeline DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    pub id: String,
    pub action: PipelineAction,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "is_default_on_error")]
    pub on_error: OnError,
}

fn is_default_on_error(v: &OnError) -> bool {
    *v == OnError::Skip
}

impl PipelineStep {
    pub fn new(id: impl Into<String>, action: PipelineAction) -> Self {
        Self {
            id: id.into(),
            action,
            params: BTreeMap::new(),
            inputs: Vec::new(),
            on_error: OnError::Skip,
        }
    }

    /// String param; numbers are accepted and rendered as text.
    pub fn param_str(&self, key: &str) -> Option<String> {
        match self.params.get(key)? {
            Value::String(v) => {
                let v = v.trim();
                (!v.is_empty()).then(|| v.to_string())
            }
            Value::Number(v) => Some(v.to_string()),
            _ => None,
        }
    }

    pub fn param_usize(&self, key: &str, default: usize) -> usize {
        match self.params.get(key) {
            Some(Value::Number(v)) => v.as_u64().map(|v| v as usize).unwrap_or(default),
            Some(Value::String(v)) => v.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn param_i32(&self, key: &str) -> Option<i32> {
        match self.params.get(key)? {
            Value::Number(v) => v.as_i64().map(|v| v as i32),
            Value::String(v) => v.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn param_bool(&self, key: &str) -> bool {
        match self.params.get(key) {
            Some(Value::Bool(v)) => *v,
            Some(Value::String(v)) => matches!(v.trim(), "true" | "yes" | "1"),
            _ => false,
        }
    }

    /// List param; a scalar string is treated as a comma-separated list.
    pub fn param_str_list(&self, key: &str) -> Vec<String> {
        match self.params.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => {
                        let s = s.trim();
                        (!s.is_empty()).then(|| s.to_string())
                    }
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            Some(Value::String(csv)) => csv
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Output shaping for a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOutput {
    pub format: String,
    pub limit: usize,
    pub ranking: RankingPreset,
}

impl Default for PipelineOutput {
    fn default() -> Self {
        Self {
            format: "summary".to_string(),
            limit: 20,
            ranking: RankingPreset::Balanced,
        }
    }
}

/// A user-declared pipeline DAG.
///
/// The file form (§ pipeline files) is YAML with exactly these keys;
/// unknown top-level keys are rejected at parse time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub steps: Vec<PipelineStep>,
    #[serde(default)]
    pub output: PipelineOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_params: Option<BTreeMap<String, Value>>,
}

impl PipelineConfig {
    pub fn new(steps: Vec<PipelineStep>) -> Self {
        Self {
            name: None,
            steps,
            output: PipelineOutput::default(),
            template: None,
            template_params: None,
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self, LitGateError> {
        let mut config: Self = serde_yaml::from_str(text)
            .map_err(|err| LitGateError::InvalidPipeline(format!("Malformed pipeline file: {err}")))?;
        if let Some(name) = config.name.take() {
            config.name = Some(sanitize_name(&name));
        }
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, LitGateError> {
        serde_yaml::to_string(self)
            .map_err(|err| LitGateError::Invariant(format!("Pipeline serialization failed: {err}")))
    }
}

/// Lowercased, filesystem-safe pipeline name.
fn sanitize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

/// The typed record of one step's outputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub action: Option<PipelineAction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub articles: Vec<Article>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pmids: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    pub fn new(step_id: impl Into<String>, action: PipelineAction) -> Self {
        Self {
            step_id: step_id.into(),
            action: Some(action),
            ..Self::default()
        }
    }

    pub fn failed(step_id: impl Into<String>, action: PipelineAction, error: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            action: Some(action),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn with_articles(mut self, articles: Vec<Article>) -> Self {
        self.pmids = articles.iter().filter_map(|a| a.pmid.clone()).collect();
        self.articles = articles;
        self
    }

    pub fn insert_metadata(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }
}
