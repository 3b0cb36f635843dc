use serde::{Deserialize, Serialize};

use crate::sources::SourceId;

/// Query complexity, which drives source fan-out width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryComplexity {
    Simple,
    Moderate,
    Complex,
    Ambiguous,
}

/// What the caller is trying to do with the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Lookup,
    Exploration,
    Comparison,
    Systematic,
    CitationTracking,
    AuthorSearch,
}

/// Clinical question category (PubMed Clinical Queries axes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClinicalCategory {
    Therapy,
    Diagnosis,
    Prognosis,
    Etiology,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    Pmid,
    Doi,
    Pmc,
    Arxiv,
}

/// An identifier pulled out of the raw query text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedIdentifier {
    pub kind: IdentifierKind,
    pub value: String,
    pub confidence: f64,
}

impl ExtractedIdentifier {
    pub fn certain(kind: IdentifierKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            confidence: 1.0,
        }
    }
}

/// PICO structure for clinical questions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PicoElements {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub population: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intervention: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

impl PicoElements {
    /// Core elements present: population, intervention, and outcome.
    pub fn is_complete(&self) -> bool {
        self.population.is_some() && self.intervention.is_some() && self.outcome.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.population.is_none()
            && self.intervention.is_none()
            && self.comparison.is_none()
            && self.outcome.is_none()
    }
}

/// Result of local query analysis. Pure data; the analyzer does no I/O.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedQuery {
    pub original: String,
    pub normalized: String,
    pub complexity: QueryComplexity,
    pub intent: QueryIntent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifiers: Vec<ExtractedIdentifier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinical_category: Option<ClinicalCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year_from: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year_to: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pico: Option<PicoElements>,
    pub recommended_sources: Vec<SourceId>,
    pub recommended_strategies: Vec<String>,
    /// Confidence in the analysis, clipped to [0, 1].
    pub confidence: f64,
}

impl AnalyzedQuery {
    pub fn first_identifier(&self, kind: IdentifierKind) -> Option<&str> {
        self.identifiers
            .iter()
            .find(|id| id.kind == kind)
            .map(|id| id.value.as_str())
    }
}
