//! Local query classification. No I/O: regexes and keyword tables only.

use std::sync::OnceLock;

use regex::Regex;

use crate::entities::query::{
    AnalyzedQuery, ClinicalCategory, ExtractedIdentifier, IdentifierKind, PicoElements,
    QueryComplexity, QueryIntent,
};
use crate::sources::SourceId;
use crate::utils::date;

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static regex")
}

fn pmid_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    P.get_or_init(|| regex(r"(?i)(?:PMID[:\s]?)?(\d{7,8})\b"))
}

fn doi_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    P.get_or_init(|| regex(r"(?i)(?:doi[:\s]?)?(10\.\d{4,}/\S+)"))
}

fn pmc_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    P.get_or_init(|| regex(r"(?i)PMC\s?(\d{6,8})\b"))
}

fn arxiv_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    P.get_or_init(|| regex(r"(?i)arxiv[:\s]?(\d{4}\.\d{4,5}(?:v\d+)?)"))
}

fn year_range_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    P.get_or_init(|| regex(r"(?i)\b(19\d{2}|20[0-3]\d)\s*(?:[-–]|to)\s*(19\d{2}|20[0-3]\d)\b"))
}

fn year_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    P.get_or_init(|| regex(r"\b(19\d{2}|20[0-3]\d)\b"))
}

fn recent_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    P.get_or_init(|| regex(r"(?i)\b(recent|last\s+\d+\s+years?|past\s+\d+\s+years?)\b"))
}

fn comparison_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    P.get_or_init(|| regex(r"(?i)\b([\w-]{3,})\s+(?:vs\.?|versus|compared\s+(?:to|with))\s+([\w-]{3,})\b"))
}

fn population_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    P.get_or_init(|| regex(r"(?i)\b(?:in|among)\s+(.{3,80})$"))
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "in", "on", "at", "for", "to",
    "of", "and", "or", "with", "by", "from", "as", "that", "which", "this", "these", "what",
    "how", "why", "when", "where", "who", "can", "could", "would", "should", "may", "might",
    "have", "has", "had", "do", "does", "did", "not", "between",
];

const COMPARISON_MARKERS: &[&str] = &[
    "vs", "vs.", "versus", "compared", "comparison", "comparing", "better", "worse",
    "superior", "inferior", "equivalent",
];

const THERAPY_KEYWORDS: &[&str] = &[
    "treatment", "therapy", "intervention", "effect", "efficacy", "effective",
];
const DIAGNOSIS_KEYWORDS: &[&str] = &[
    "diagnosis", "diagnostic", "sensitivity", "specificity", "accuracy",
];
const PROGNOSIS_KEYWORDS: &[&str] = &[
    "prognosis", "outcome", "survival", "mortality", "prediction",
];
const ETIOLOGY_KEYWORDS: &[&str] = &[
    "cause", "etiology", "aetiology", "pathogenesis", "mechanism", "association",
    "risk factor",
];

/// Single broad terms that need disambiguation before a focused search.
const AMBIGUOUS_TERMS: &[&str] = &[
    "cancer", "diabetes", "heart", "brain", "treatment", "stroke", "pain", "infection",
];

const RECENT_WINDOW_YEARS: i32 = 5;

/// Analyze a raw query string: identifiers, intent, complexity, PICO,
/// year constraints, and source/strategy recommendations.
pub fn analyze(query: &str) -> AnalyzedQuery {
    let normalized = normalize(query);
    let identifiers = extract_identifiers(query);
    let (year_from, year_to) = extract_year_constraints(query);
    let keywords = extract_keywords(&normalized);
    let pico = detect_pico(&normalized);
    let intent = detect_intent(&normalized, &identifiers);
    let mut clinical_category = detect_clinical_category(&normalized);
    // A drug-versus-drug question is a therapy question even when no
    // therapy keyword is spelled out.
    if clinical_category.is_none()
        && let Some(pico) = pico.as_ref()
        && pico.intervention.is_some()
        && pico.comparison.is_some()
    {
        clinical_category = Some(ClinicalCategory::Therapy);
    }
    let complexity = determine_complexity(&normalized, &identifiers, pico.as_ref(), &keywords);
    let recommended_sources = recommend_sources(complexity, intent);
    let recommended_strategies = recommend_strategies(complexity, intent, pico.as_ref());
    let confidence = calculate_confidence(&identifiers, pico.as_ref(), clinical_category, &keywords);

    AnalyzedQuery {
        original: query.to_string(),
        normalized,
        complexity,
        intent,
        identifiers,
        keywords,
        clinical_category,
        year_from,
        year_to,
        pico,
        recommended_sources,
        recommended_strategies,
        confidence,
    }
}

fn normalize(query: &str) -> String {
    // Collapse whitespace; keep case, identifiers are case-sensitive.
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_identifiers(query: &str) -> Vec<ExtractedIdentifier> {
    let mut identifiers = Vec::new();

    for caps in doi_pattern().captures_iter(query) {
        identifiers.push(ExtractedIdentifier::certain(
            IdentifierKind::Doi,
            caps[1].trim_end_matches(['.', ',', ';']),
        ));
    }
    // Digit runs inside a DOI or PMC id are not PMIDs.
    let mut claimed: Vec<(usize, usize)> = doi_pattern()
        .find_iter(query)
        .map(|m| (m.start(), m.end()))
        .collect();
    claimed.extend(pmc_pattern().find_iter(query).map(|m| (m.start(), m.end())));

    for caps in pmid_pattern().captures_iter(query) {
        let m = caps.get(1).expect("group 1");
        if claimed.iter().any(|(s, e)| m.start() >= *s && m.end() <= *e) {
            continue;
        }
        identifiers.push(ExtractedIdentifier::certain(IdentifierKind::Pmid, &caps[1]));
    }
    for caps in pmc_pattern().captures_iter(query) {
        identifiers.push(ExtractedIdentifier::certain(
            IdentifierKind::Pmc,
            format!("PMC{}", &caps[1]),
        ));
    }
    for caps in arxiv_pattern().captures_iter(query) {
        identifiers.push(ExtractedIdentifier::certain(IdentifierKind::Arxiv, &caps[1]));
    }

    identifiers
}

fn extract_year_constraints(query: &str) -> (Option<i32>, Option<i32>) {
    if let Some(caps) = year_range_pattern().captures(query) {
        let from = caps[1].parse().ok();
        let to = caps[2].parse().ok();
        return (from, to);
    }

    if recent_pattern().is_match(query) {
        let now = date::current_year();
        return (Some(now - RECENT_WINDOW_YEARS), Some(now));
    }

    let years: Vec<i32> = year_pattern()
        .captures_iter(query)
        .filter_map(|caps| caps[1].parse().ok())
        .collect();
    match years.as_slice() {
        [] => (None, None),
        // A bare year is a lower bound.
        [single] => (Some(*single), None),
        many => (many.iter().min().copied(), many.iter().max().copied()),
    }
}

fn detect_intent(query: &str, identifiers: &[ExtractedIdentifier]) -> QueryIntent {
    if !identifiers.is_empty() {
        return QueryIntent::Lookup;
    }
    let lower = query.to_lowercase();

    if ["citing", "cited by", "related to"].iter().any(|kw| lower.contains(kw)) {
        return QueryIntent::CitationTracking;
    }
    if ["author", "publications by", "papers by"].iter().any(|kw| lower.contains(kw)) {
        return QueryIntent::AuthorSearch;
    }
    if COMPARISON_MARKERS
        .iter()
        .any(|kw| lower.split_whitespace().any(|word| word == *kw))
    {
        return QueryIntent::Comparison;
    }
    if ["systematic", "meta-analysis", "pico"].iter().any(|kw| lower.contains(kw)) {
        return QueryIntent::Systematic;
    }
    QueryIntent::Exploration
}

fn extract_keywords(query: &str) -> Vec<String> {
    static WORD: OnceLock<Regex> = OnceLock::new();
    let word = WORD.get_or_init(|| regex(r"[A-Za-z][A-Za-z-]{2,}"));

    let mut keywords = Vec::new();
    for m in word.find_iter(query) {
        let token = m.as_str();
        let lower = token.to_lowercase();
        if STOP_WORDS.contains(&lower.as_str()) || COMPARISON_MARKERS.contains(&lower.as_str()) {
            continue;
        }
        if !keywords.iter().any(|k: &String| k.eq_ignore_ascii_case(token)) {
            keywords.push(token.to_string());
        }
        if keywords.len() == 10 {
            break;
        }
    }
    keywords
}

fn detect_pico(query: &str) -> Option<PicoElements> {
    let caps = comparison_pattern().captures(query)?;

    let stop = |word: &str| STOP_WORDS.contains(&word.to_lowercase().as_str());
    let left = caps[1].to_string();
    let right = caps[2].to_string();
    if stop(&left) || stop(&right) {
        return None;
    }

    let mut pico = PicoElements {
        intervention: Some(left),
        comparison: Some(right),
        ..PicoElements::default()
    };

    let tail = &query[caps.get(0).expect("whole match").end()..];
    if let Some(pop) = population_pattern().captures(tail) {
        pico.population = Some(pop[1].trim().to_string());
    }

    Some(pico)
}

fn detect_clinical_category(query: &str) -> Option<ClinicalCategory> {
    let lower = query.to_lowercase();
    let hit = |set: &[&str]| set.iter().any(|kw| lower.contains(kw));

    if hit(THERAPY_KEYWORDS) {
        return Some(ClinicalCategory::Therapy);
    }
    if hit(DIAGNOSIS_KEYWORDS) {
        return Some(ClinicalCategory::Diagnosis);
    }
    if hit(PROGNOSIS_KEYWORDS) {
        return Some(ClinicalCategory::Prognosis);
    }
    if hit(ETIOLOGY_KEYWORDS) {
        return Some(ClinicalCategory::Etiology);
    }
    None
}

fn determine_complexity(
    query: &str,
    identifiers: &[ExtractedIdentifier],
    pico: Option<&PicoElements>,
    keywords: &[String],
) -> QueryComplexity {
    if !identifiers.is_empty() && keywords.len() < 3 {
        return QueryComplexity::Simple;
    }

    let has_real_comparison = comparison_pattern().is_match(query);

    if keywords.len() <= 2 && pico.is_none() && !has_real_comparison {
        if keywords.len() == 1 && AMBIGUOUS_TERMS.contains(&keywords[0].to_lowercase().as_str()) {
            return QueryComplexity::Ambiguous;
        }
        return QueryComplexity::Simple;
    }

    if let Some(pico) = pico
        && pico.intervention.is_some()
        && (pico.comparison.is_some() || pico.outcome.is_some())
    {
        return QueryComplexity::Complex;
    }
    if has_real_comparison {
        return QueryComplexity::Complex;
    }

    if keywords.len() == 1 && AMBIGUOUS_TERMS.contains(&keywords[0].to_lowercase().as_str()) {
        return QueryComplexity::Ambiguous;
    }
    if keywords.len() >= 3 {
        return QueryComplexity::Moderate;
    }
    QueryComplexity::Simple
}

fn recommend_sources(complexity: QueryComplexity, intent: QueryIntent) -> Vec<SourceId> {
    if intent == QueryIntent::Lookup {
        return vec![SourceId::Pubmed, SourceId::Crossref];
    }
    match complexity {
        QueryComplexity::Simple => vec![SourceId::Pubmed],
        QueryComplexity::Complex | QueryComplexity::Ambiguous => vec![
            SourceId::Pubmed,
            SourceId::Crossref,
            SourceId::Openalex,
            SourceId::SemanticScholar,
        ],
        QueryComplexity::Moderate => vec![SourceId::Pubmed, SourceId::Crossref],
    }
}

fn recommend_strategies(
    complexity: QueryComplexity,
    intent: QueryIntent,
    pico: Option<&PicoElements>,
) -> Vec<String> {
    let strategies: Vec<&str> = match intent {
        QueryIntent::Lookup => vec!["direct_lookup"],
        QueryIntent::Comparison => {
            let mut s = vec!["pico_search", "comparison_filter"];
            if pico.is_some() {
                s.push("mesh_expansion");
            }
            s
        }
        QueryIntent::Systematic => {
            vec!["pico_search", "mesh_expansion", "title_abstract", "clinical_queries"]
        }
        _ => match complexity {
            QueryComplexity::Complex => vec!["mesh_expansion", "title_abstract", "clinical_queries"],
            QueryComplexity::Ambiguous => vec!["broad_search", "faceted_search"],
            _ => vec!["relevance_search"],
        },
    };
    strategies.into_iter().map(str::to_string).collect()
}

fn calculate_confidence(
    identifiers: &[ExtractedIdentifier],
    pico: Option<&PicoElements>,
    clinical_category: Option<ClinicalCategory>,
    keywords: &[String],
) -> f64 {
    let mut confidence: f64 = 0.5;
    if !identifiers.is_empty() {
        confidence += 0.3;
    }
    if let Some(pico) = pico {
        confidence += if pico.is_complete() { 0.2 } else { 0.1 };
    }
    if clinical_category.is_some() {
        confidence += 0.1;
    }
    if keywords.len() >= 3 {
        confidence += 0.1;
    }
    confidence.min(1.0)
}
