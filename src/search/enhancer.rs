//! Semantic query expansion through entity lookup.
//!
//! Sits between the analyzer and the searcher: resolves the topic to
//! canonical entities and synonyms, then emits field-qualified query
//! strategies. Failures are soft; the caller always gets at least the
//! original topic back as a usable strategy.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::cache::EntityCache;
use crate::sources::pubtator::{EntityMatch, PubtatorClient};

const MAX_ENTITIES: usize = 5;
const MAX_SYNONYMS: usize = 4;

/// One named query formulation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryStrategy {
    pub name: String,
    pub query: String,
    pub priority: u8,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnhancedQuery {
    pub original: String,
    /// The preferred expansion; equals `original` when lookup failed.
    pub expanded_query: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expanded_terms: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<EnhancedEntity>,
    pub strategies: Vec<QueryStrategy>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnhancedEntity {
    pub text: String,
    pub entity_type: String,
}

pub struct SemanticEnhancer {
    lookup: Arc<PubtatorClient>,
    cache: EntityCache,
}

impl SemanticEnhancer {
    pub fn new(lookup: Arc<PubtatorClient>, cache_ttl: Duration) -> Self {
        Self {
            lookup,
            cache: EntityCache::new(cache_ttl),
        }
    }

    /// Expand a topic. Never fails: lookup errors degrade to a single
    /// strategy carrying the original topic.
    pub async fn enhance(&self, topic: &str) -> EnhancedQuery {
        let topic = topic.trim();
        let matches = match self.resolve_cached(topic).await {
            Ok(matches) => matches,
            Err(err) => {
                debug!(topic, error = %err, "entity lookup failed, passing topic through");
                return Self::passthrough(topic);
            }
        };
        if matches.is_empty() {
            return Self::passthrough(topic);
        }

        let canonical = matches[0].name.clone();
        let synonyms: Vec<String> = matches
            .iter()
            .skip(1)
            .map(|m| m.name.clone())
            .filter(|name| !name.eq_ignore_ascii_case(&canonical))
            .take(MAX_SYNONYMS)
            .collect();

        let mut strategies = Vec::new();

        let mut tiab_terms = vec![format!("\"{canonical}\"[tiab]")];
        if !canonical.eq_ignore_ascii_case(topic) {
            tiab_terms.push(format!("\"{topic}\"[tiab]"));
        }
        for synonym in &synonyms {
            tiab_terms.push(format!("\"{synonym}\"[tiab]"));
        }

        let expanded = if tiab_terms.len() > 1 {
            format!("({})", tiab_terms.join(" OR "))
        } else {
            tiab_terms[0].clone()
        };
        strategies.push(QueryStrategy {
            name: "expanded".into(),
            query: expanded.clone(),
            priority: 1,
        });
        strategies.push(QueryStrategy {
            name: "canonical_tiab".into(),
            query: format!("\"{canonical}\"[tiab]"),
            priority: 2,
        });
        strategies.push(QueryStrategy {
            name: "mesh".into(),
            query: format!("\"{canonical}\"[MeSH Terms]"),
            priority: 3,
        });
        strategies.push(QueryStrategy {
            name: "original".into(),
            query: topic.to_string(),
            priority: 4,
        });

        let mut expanded_terms = vec![canonical.clone()];
        expanded_terms.extend(synonyms);

        EnhancedQuery {
            original: topic.to_string(),
            expanded_query: expanded,
            expanded_terms,
            entities: matches
                .into_iter()
                .map(|m| EnhancedEntity {
                    text: m.name,
                    entity_type: m.biotype.unwrap_or_else(|| "unknown".into()),
                })
                .collect(),
            strategies,
        }
    }

    fn passthrough(topic: &str) -> EnhancedQuery {
        EnhancedQuery {
            original: topic.to_string(),
            expanded_query: topic.to_string(),
            expanded_terms: Vec::new(),
            entities: Vec::new(),
            strategies: vec![QueryStrategy {
                name: "original".into(),
                query: topic.to_string(),
                priority: 1,
            }],
        }
    }

    async fn resolve_cached(
        &self,
        topic: &str,
    ) -> Result<Vec<EntityMatch>, crate::error::LitGateError> {
        let key = topic.to_lowercase();
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }
        let matches = self.lookup.resolve(topic, MAX_ENTITIES).await?;
        self.cache.insert(key, matches.clone()).await;
        Ok(matches)
    }
}
