//! Multi-source result aggregation: dedup, merge, rank.
//!
//! Deduplication is a union-find over identifier keys, so two records
//! reached through different identifiers still land in one group as long
//! as any key is shared. Ranking is a weighted sum over five dimensions.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::entities::article::Article;
use crate::entities::pipeline::RankingPreset;
use crate::utils::date;

/// Weights for the five ranking dimensions plus recency decay settings.
/// Weights are normalized before use, so they need not sum to 1.
#[derive(Debug, Clone)]
pub struct RankingConfig {
    pub relevance_weight: f64,
    pub quality_weight: f64,
    pub recency_weight: f64,
    pub impact_weight: f64,
    pub source_trust_weight: f64,
    /// Recency score halves every this many years.
    pub recency_half_life_years: f64,
    pub min_score: f64,
    pub max_results: Option<usize>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            relevance_weight: 0.30,
            quality_weight: 0.20,
            recency_weight: 0.20,
            impact_weight: 0.20,
            source_trust_weight: 0.10,
            recency_half_life_years: 5.0,
            min_score: 0.0,
            max_results: None,
        }
    }
}

impl RankingConfig {
    pub fn impact_focused() -> Self {
        Self {
            relevance_weight: 0.20,
            quality_weight: 0.15,
            recency_weight: 0.15,
            impact_weight: 0.40,
            ..Self::default()
        }
    }

    pub fn recency_focused() -> Self {
        Self {
            relevance_weight: 0.25,
            quality_weight: 0.15,
            recency_weight: 0.40,
            impact_weight: 0.10,
            recency_half_life_years: 3.0,
            ..Self::default()
        }
    }

    pub fn quality_focused() -> Self {
        Self {
            relevance_weight: 0.20,
            quality_weight: 0.40,
            recency_weight: 0.15,
            impact_weight: 0.15,
            ..Self::default()
        }
    }

    pub fn for_preset(preset: RankingPreset) -> Self {
        match preset {
            RankingPreset::Balanced => Self::default(),
            RankingPreset::Impact => Self::impact_focused(),
            RankingPreset::Recency => Self::recency_focused(),
            RankingPreset::Quality => Self::quality_focused(),
        }
    }

    fn normalized_weights(&self) -> [f64; 5] {
        let mut total = self.relevance_weight
            + self.quality_weight
            + self.recency_weight
            + self.impact_weight
            + self.source_trust_weight;
        if total == 0.0 {
            total = 1.0;
        }
        [
            self.relevance_weight / total,
            self.quality_weight / total,
            self.recency_weight / total,
            self.impact_weight / total,
            self.source_trust_weight / total,
        ]
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregationStats {
    pub total_input: usize,
    pub unique_articles: usize,
    pub duplicates_removed: usize,
    pub merged_records: usize,
    pub by_source: BTreeMap<String, usize>,
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            let root = self.find(self.parent[i]);
            self.parent[i] = root;
        }
        self.parent[i]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // Attach the later root under the earlier one so group roots
            // stay stable in input order.
            let (keep, drop) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[drop] = keep;
        }
    }
}

/// Deduplicate and merge articles from several lists.
///
/// Returns unique articles in order of first appearance, with all
/// constituent records merged into each group's primary.
pub fn aggregate(article_lists: Vec<Vec<Article>>) -> (Vec<Article>, AggregationStats) {
    let mut stats = AggregationStats::default();

    let mut all: Vec<Article> = Vec::new();
    for list in article_lists {
        for article in list {
            *stats
                .by_source
                .entry(article.primary_source.to_string())
                .or_insert(0) += 1;
            all.push(article);
        }
    }
    stats.total_input = all.len();
    if all.is_empty() {
        return (Vec::new(), stats);
    }

    // Union any two articles sharing a normalized key.
    let mut uf = UnionFind::new(all.len());
    let mut key_owner: HashMap<String, usize> = HashMap::new();
    for (i, article) in all.iter().enumerate() {
        for key in article.dedup_keys() {
            match key_owner.get(&key) {
                Some(&owner) => uf.union(owner, i),
                None => {
                    key_owner.insert(key, i);
                }
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..all.len() {
        let root = uf.find(i);
        groups.entry(root).or_default().push(i);
    }

    // Drain into per-group slots so members can be moved out in order.
    let mut slots: Vec<Option<Article>> = all.into_iter().map(Some).collect();
    let mut unique: Vec<Article> = Vec::with_capacity(groups.len());

    for (_, members) in groups {
        let primary_idx = members
            .iter()
            .copied()
            .max_by(|&a, &b| {
                let sa = slots[a].as_ref().expect("unconsumed member");
                let sb = slots[b].as_ref().expect("unconsumed member");
                primary_rank(sa)
                    .partial_cmp(&primary_rank(sb))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    // On full ties, prefer the earlier record.
                    .then(b.cmp(&a))
            })
            .expect("group is non-empty");

        let mut primary = slots[primary_idx].take().expect("primary present");
        for idx in members {
            if idx == primary_idx {
                continue;
            }
            let other = slots[idx].take().expect("member present");
            primary.merge_from(other);
            stats.merged_records += 1;
        }
        unique.push(primary);
    }

    stats.unique_articles = unique.len();
    stats.duplicates_removed = stats.total_input - stats.unique_articles;
    (unique, stats)
}

/// Primary selection key: identifier count, then bibliographic
/// completeness, then source trust.
fn primary_rank(article: &Article) -> (usize, usize, f64) {
    (
        article.identifier_count(),
        article.completeness_count(),
        article.primary_source.trust_prior(),
    )
}

/// Score and sort articles, best first. The sort is stable, so equal
/// scores preserve input order.
pub fn rank(mut articles: Vec<Article>, config: &RankingConfig, query: Option<&str>) -> Vec<Article> {
    let weights = config.normalized_weights();
    let current_year = date::current_year();

    for article in &mut articles {
        let relevance = relevance_score(article, query);
        let quality = quality_score(article);
        let recency = recency_score(article, config, current_year);
        let impact = impact_score(article);
        let trust = source_trust_score(article);

        let total = relevance * weights[0]
            + quality * weights[1]
            + recency * weights[2]
            + impact * weights[3]
            + trust * weights[4];

        article.relevance_score = Some(relevance);
        article.quality_score = Some(quality);
        article.ranking_score = Some(total);
    }

    articles.sort_by(|a, b| {
        let sa = a.ranking_score.unwrap_or(0.0);
        let sb = b.ranking_score.unwrap_or(0.0);
        sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
    });

    if config.min_score > 0.0 {
        articles.retain(|a| a.ranking_score.unwrap_or(0.0) >= config.min_score);
    }
    if let Some(max) = config.max_results {
        articles.truncate(max);
    }
    articles
}

pub fn aggregate_and_rank(
    article_lists: Vec<Vec<Article>>,
    config: &RankingConfig,
    query: Option<&str>,
) -> (Vec<Article>, AggregationStats) {
    let (unique, stats) = aggregate(article_lists);
    (rank(unique, config, query), stats)
}

fn term_set(text: &str) -> HashSet<String> {
    static WORD: OnceLock<Regex> = OnceLock::new();
    let word = WORD.get_or_init(|| Regex::new(r"\b\w{3,}\b").expect("static regex"));
    word.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

fn overlap(query_terms: &HashSet<String>, text_terms: &HashSet<String>) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    query_terms.intersection(text_terms).count() as f64 / query_terms.len() as f64
}

/// Fraction of query terms found in title/abstract/keywords, weighted
/// 0.5/0.3/0.2. Neutral 0.5 without a query.
fn relevance_score(article: &Article, query: Option<&str>) -> f64 {
    let Some(query) = query.map(str::trim).filter(|q| !q.is_empty()) else {
        return 0.5;
    };
    let query_terms = term_set(query);
    if query_terms.is_empty() {
        return 0.5;
    }

    let title_overlap = overlap(&query_terms, &term_set(&article.title));
    let abstract_overlap = article
        .abstract_text
        .as_deref()
        .map(|text| overlap(&query_terms, &term_set(text)))
        .unwrap_or(0.0);
    let mut keyword_text = article.keywords.join(" ");
    keyword_text.push(' ');
    keyword_text.push_str(&article.mesh_terms.join(" "));
    let keyword_overlap = overlap(&query_terms, &term_set(&keyword_text));

    (title_overlap * 0.5 + abstract_overlap * 0.3 + keyword_overlap * 0.2).min(1.0)
}

/// 0.5 base + study-design bonus + completeness bonus + OA bonus, capped.
fn quality_score(article: &Article) -> f64 {
    let mut score = 0.5;
    score += article.article_type.quality_bonus();
    score += article.completeness() * 0.1;
    if article.has_open_access() {
        score += 0.05;
    }
    score.min(1.0)
}

/// Exponential decay by age; unknown year scores a flat 0.3.
fn recency_score(article: &Article, config: &RankingConfig, current_year: i32) -> f64 {
    let Some(year) = article.year else {
        return 0.3;
    };
    let age = (current_year - year).max(0) as f64;
    0.5_f64.powf(age / config.recency_half_life_years)
}

/// Percentile when present, else RCR through a saturating transform, else
/// log-scaled raw counts. No metrics at all scores 0.3.
fn impact_score(article: &Article) -> f64 {
    let Some(metrics) = article.citation_metrics.as_ref() else {
        return 0.3;
    };

    if let Some(percentile) = metrics.percentile {
        return (percentile / 100.0).clamp(0.0, 1.0);
    }
    if let Some(rcr) = metrics.relative_citation_ratio {
        return (rcr / (rcr + 2.0)).clamp(0.0, 1.0);
    }
    if let Some(count) = metrics.citation_count {
        if count == 0 {
            return 0.1;
        }
        return (((count as f64) + 1.0).log10() / 3.0).clamp(0.0, 1.0);
    }
    0.3
}

/// Source trust prior, boosted when several sources corroborate.
fn source_trust_score(article: &Article) -> f64 {
    let base = article.primary_source.trust_prior();
    let corroborating = article.sources.len().saturating_sub(1);
    let boost = (0.1 * corroborating as f64).min(0.2);
    (base + boost).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::article::CitationMetrics;
    use crate::entities::ArticleType;
    use crate::sources::SourceId;

    fn article(title: &str, source: SourceId) -> Article {
        Article::new(title, source)
    }

    #[test]
    fn doi_case_and_whitespace_differences_still_merge() {
        let mut a = article("Example article with a long title", SourceId::Pubmed);
        a.doi = Some("10.1000/example".into());
        a.pmid = Some("111".into());

        let mut b = article("Example Article With A Long Title", SourceId::Crossref);
        b.doi = Some(" 10.1000/EXAMPLE ".into());

        let (unique, stats) = aggregate(vec![vec![a], vec![b]]);
        assert_eq!(unique.len(), 1);
        assert_eq!(stats.total_input, 2);
        assert_eq!(stats.duplicates_removed, 1);

        let sources: Vec<SourceId> = unique[0].sources.iter().map(|s| s.source).collect();
        assert!(sources.contains(&SourceId::Pubmed));
        assert!(sources.contains(&SourceId::Crossref));
    }

    #[test]
    fn transitive_key_sharing_forms_one_group() {
        // a: doi only; b: doi + pmid; c: pmid only. All one work.
        let mut a = article("Transitive grouping example title", SourceId::Crossref);
        a.doi = Some("10.1/x".into());
        let mut b = article("Transitive grouping example title b", SourceId::Pubmed);
        b.doi = Some("10.1/x".into());
        b.pmid = Some("42".into());
        let mut c = article("Transitive grouping example title c", SourceId::Openalex);
        c.pmid = Some("42".into());

        let (unique, _) = aggregate(vec![vec![a, b, c]]);
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].sources.len(), 3);
    }

    #[test]
    fn distinct_articles_share_no_keys_and_stay_apart() {
        let mut a = article("First unique study on topic alpha", SourceId::Pubmed);
        a.pmid = Some("1".into());
        let mut b = article("Second unique study on topic beta", SourceId::Pubmed);
        b.pmid = Some("2".into());

        let (unique, stats) = aggregate(vec![vec![a, b]]);
        assert_eq!(unique.len(), 2);
        assert_eq!(stats.duplicates_removed, 0);

        let keys_a: std::collections::HashSet<String> =
            unique[0].dedup_keys().into_iter().collect();
        let keys_b: std::collections::HashSet<String> =
            unique[1].dedup_keys().into_iter().collect();
        assert!(keys_a.is_disjoint(&keys_b));
    }

    #[test]
    fn primary_is_the_record_with_more_identifiers() {
        let mut sparse = article("Primary selection example title here", SourceId::Pubmed);
        sparse.pmid = Some("77".into());
        sparse.journal = Some("Sparse Journal".into());

        let mut rich = article("Primary selection example title here", SourceId::Crossref);
        rich.pmid = Some("77".into());
        rich.doi = Some("10.1/rich".into());
        rich.pmc = Some("PMC1".into());
        rich.journal = Some("Rich Journal".into());

        let (unique, _) = aggregate(vec![vec![sparse, rich]]);
        assert_eq!(unique.len(), 1);
        // The richer record won, left-biased merge kept its journal.
        assert_eq!(unique[0].journal.as_deref(), Some("Rich Journal"));
        assert_eq!(unique[0].primary_source, SourceId::Crossref);
    }

    #[test]
    fn relevance_defaults_to_half_without_query() {
        let articles = vec![article("Anything at all goes here", SourceId::Pubmed)];
        let ranked = rank(articles, &RankingConfig::default(), None);
        assert_eq!(ranked[0].relevance_score, Some(0.5));
    }

    #[test]
    fn relevance_rewards_title_matches_most() {
        let mut title_hit = article("remimazolam sedation outcomes", SourceId::Pubmed);
        title_hit.pmid = Some("1".into());
        let mut abstract_hit = article("an unrelated heading entirely", SourceId::Pubmed);
        abstract_hit.pmid = Some("2".into());
        abstract_hit.abstract_text = Some("remimazolam sedation outcomes studied".into());

        let ranked = rank(
            vec![abstract_hit, title_hit],
            &RankingConfig::default(),
            Some("remimazolam sedation outcomes"),
        );
        assert_eq!(ranked[0].pmid.as_deref(), Some("1"));
        assert!(ranked[0].relevance_score > ranked[1].relevance_score);
    }

    #[test]
    fn quality_rewards_study_design() {
        let mut meta = article("A meta analysis of things", SourceId::Pubmed);
        meta.article_type = ArticleType::MetaAnalysis;
        let mut letter = article("A letter to the editor", SourceId::Pubmed);
        letter.article_type = ArticleType::Letter;

        let ranked = rank(vec![letter, meta], &RankingConfig::quality_focused(), None);
        assert_eq!(ranked[0].article_type, ArticleType::MetaAnalysis);
    }

    #[test]
    fn recency_decays_with_half_life() {
        let config = RankingConfig::default();
        let now = date::current_year();

        let mut fresh = article("Fresh study", SourceId::Pubmed);
        fresh.year = Some(now);
        let mut old = article("Old study", SourceId::Pubmed);
        old.year = Some(now - 5);
        let mut unknown = article("Undated study", SourceId::Pubmed);
        unknown.year = None;

        assert!((recency_score(&fresh, &config, now) - 1.0).abs() < 1e-9);
        assert!((recency_score(&old, &config, now) - 0.5).abs() < 1e-9);
        assert!((recency_score(&unknown, &config, now) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn impact_prefers_percentile_over_raw_counts() {
        let mut by_percentile = article("a", SourceId::Pubmed);
        by_percentile.citation_metrics = Some(CitationMetrics {
            percentile: Some(95.0),
            citation_count: Some(1),
            ..CitationMetrics::default()
        });
        assert!((impact_score(&by_percentile) - 0.95).abs() < 1e-9);

        let mut by_rcr = article("b", SourceId::Pubmed);
        by_rcr.citation_metrics = Some(CitationMetrics {
            relative_citation_ratio: Some(2.0),
            ..CitationMetrics::default()
        });
        assert!((impact_score(&by_rcr) - 0.5).abs() < 1e-9);

        let mut by_count = article("c", SourceId::Pubmed);
        by_count.citation_metrics = Some(CitationMetrics {
            citation_count: Some(999),
            ..CitationMetrics::default()
        });
        assert!((impact_score(&by_count) - 1.0).abs() < 1e-3);

        let no_metrics = article("d", SourceId::Pubmed);
        assert!((impact_score(&no_metrics) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn multi_source_articles_get_a_trust_boost() {
        let mut single = article("single source", SourceId::Core);
        single.record_source(SourceId::Core);
        let mut multi = article("multi source", SourceId::Core);
        multi.record_source(SourceId::Openalex);
        multi.record_source(SourceId::Pubmed);

        assert!(source_trust_score(&multi) > source_trust_score(&single));
        // Boost caps at 0.2.
        let mut many = article("many sources", SourceId::Core);
        many.record_source(SourceId::Openalex);
        many.record_source(SourceId::Pubmed);
        many.record_source(SourceId::Crossref);
        many.record_source(SourceId::SemanticScholar);
        assert!((source_trust_score(&many) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn equal_scores_preserve_input_order() {
        let mut first = article("identical twin alpha", SourceId::Pubmed);
        first.pmid = Some("1".into());
        first.year = Some(2020);
        let mut second = article("identical twin alpha", SourceId::Pubmed);
        second.pmid = Some("2".into());
        second.year = Some(2020);

        let ranked = rank(vec![first, second], &RankingConfig::default(), None);
        assert_eq!(ranked[0].pmid.as_deref(), Some("1"));
        assert_eq!(ranked[1].pmid.as_deref(), Some("2"));
    }

    #[test]
    fn max_results_truncates_after_sorting() {
        let config = RankingConfig {
            max_results: Some(1),
            ..RankingConfig::default()
        };
        let mut low = article("low scorer", SourceId::Core);
        low.year = Some(1990);
        let mut high = article("high scorer", SourceId::Pubmed);
        high.year = Some(date::current_year());

        let ranked = rank(vec![low, high], &config, None);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].title, "high scorer");
    }

    #[test]
    fn preset_weights_sum_to_one_after_normalization() {
        for preset in [
            RankingPreset::Balanced,
            RankingPreset::Impact,
            RankingPreset::Recency,
            RankingPreset::Quality,
        ] {
            let weights = RankingConfig::for_preset(preset).normalized_weights();
            let total: f64 = weights.iter().sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
    }
}
