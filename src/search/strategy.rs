//! Candidate query generation with optional hit-count estimation.

use serde::Serialize;
use tracing::debug;

use crate::error::LitGateError;
use crate::sources::pubmed::PubmedAdapter;
use crate::utils::date;

/// How wide a net the generated variants should cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyProfile {
    Comprehensive,
    Focused,
    Exploratory,
}

impl StrategyProfile {
    pub fn from_flag(value: &str) -> Result<Self, LitGateError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "comprehensive" => Ok(Self::Comprehensive),
            "focused" => Ok(Self::Focused),
            "exploratory" => Ok(Self::Exploratory),
            other => Err(LitGateError::InvalidInput(format!(
                "Invalid strategy profile \"{other}\". Expected one of: comprehensive, focused, exploratory"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryVariant {
    pub name: String,
    pub query: String,
    /// Result count reported by the count endpoint; None when estimation
    /// was skipped or failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_hits: Option<u64>,
}

fn variant(name: &str, query: String) -> QueryVariant {
    QueryVariant {
        name: name.to_string(),
        query,
        estimated_hits: None,
    }
}

/// Build named query variants for a topic.
pub fn generate(topic: &str, profile: StrategyProfile) -> Result<Vec<QueryVariant>, LitGateError> {
    let topic = topic.trim();
    if topic.is_empty() {
        return Err(LitGateError::InvalidInput("Topic is required".into()));
    }

    let recent_from = date::current_year() - 5;
    let title_only = variant("title_only", format!("{topic}[ti]"));
    let title_abstract = variant("title_abstract", format!("{topic}[tiab]"));
    let all_fields = variant("all_fields", topic.to_string());
    let mesh = variant("mesh", format!("\"{topic}\"[MeSH Terms]"));
    let rct = variant(
        "rct_filtered",
        format!("{topic}[tiab] AND randomized controlled trial[pt]"),
    );
    let recent = variant(
        "recent_years",
        format!("{topic}[tiab] AND {recent_from}:3000[dp]"),
    );

    Ok(match profile {
        StrategyProfile::Comprehensive => {
            vec![title_only, title_abstract, all_fields, mesh, rct, recent]
        }
        StrategyProfile::Focused => vec![title_only, title_abstract, mesh, rct],
        StrategyProfile::Exploratory => vec![all_fields, title_abstract, recent],
    })
}

/// Fill `estimated_hits` by querying the PubMed count endpoint.
/// Estimation failures leave the variant unannotated rather than failing
/// the whole batch.
pub async fn estimate_hits(adapter: &PubmedAdapter, variants: &mut [QueryVariant]) {
    for variant in variants.iter_mut() {
        match adapter.count(&variant.query).await {
            Ok(count) => variant.estimated_hits = Some(count),
            Err(err) => {
                debug!(query = %variant.query, error = %err, "hit-count estimation failed");
            }
        }
    }
}
