use serde::{Deserialize, Serialize};

use crate::sources::SourceId;

/// Article types normalized across upstreams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleType {
    JournalArticle,
    Review,
    MetaAnalysis,
    SystematicReview,
    ClinicalTrial,
    Rct,
    CaseReport,
    Letter,
    Editorial,
    Comment,
    Preprint,
    BookChapter,
    ConferencePaper,
    Thesis,
    Dataset,
    Other,
    #[default]
    Unknown,
}

impl ArticleType {
    /// Study-design bonus used by the quality scorer.
    pub fn quality_bonus(self) -> f64 {
        match self {
            Self::MetaAnalysis => 0.30,
            Self::SystematicReview => 0.25,
            Self::Rct => 0.20,
            Self::ClinicalTrial => 0.15,
            Self::Review => 0.10,
            Self::JournalArticle => 0.05,
            _ => 0.0,
        }
    }
}

/// Open access status (Unpaywall taxonomy).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OaStatus {
    Gold,
    Green,
    Hybrid,
    Bronze,
    Closed,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orcid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
    #[serde(default)]
    pub is_corresponding: bool,
}

impl Author {
    pub fn from_full_name(name: impl Into<String>) -> Self {
        Self {
            full_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Best available display form: full name, else "Given Family".
    pub fn display_name(&self) -> String {
        if let Some(full) = self
            .full_name
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return full.to_string();
        }
        let mut parts: Vec<&str> = Vec::new();
        if let Some(given) = self
            .given_name
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            parts.push(given);
        }
        if let Some(family) = self
            .family_name
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            parts.push(family);
        }
        if parts.is_empty() {
            "Unknown".to_string()
        } else {
            parts.join(" ")
        }
    }

    /// Dedup key for merging author lists across sources.
    pub fn merge_key(&self) -> String {
        self.display_name().to_ascii_lowercase()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OaLink {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default)]
    pub is_best: bool,
}

/// Citation metrics combined from iCite, Semantic Scholar, and raw counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitationMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation_count: Option<u64>,
    /// Field-normalized RCR; 1.0 is the field average.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_citation_ratio: Option<f64>,
    /// NIH percentile, 0-100.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentile: Option<f64>,
    /// Approximate Potential to Translate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation_potential: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub influential_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citations_per_year: Option<f64>,
}

impl CitationMetrics {
    pub fn is_empty(&self) -> bool {
        self.citation_count.is_none()
            && self.relative_citation_ratio.is_none()
            && self.percentile.is_none()
            && self.translation_potential.is_none()
            && self.influential_count.is_none()
            && self.citations_per_year.is_none()
    }

    /// Fill missing metrics from another record; keeps the larger citation
    /// count (a bigger count is simply fresher data).
    pub fn merge_from(&mut self, other: &CitationMetrics) {
        match (self.citation_count, other.citation_count) {
            (Some(mine), Some(theirs)) if theirs > mine => {
                self.citation_count = Some(theirs);
            }
            (None, Some(theirs)) => self.citation_count = Some(theirs),
            _ => {}
        }
        if self.relative_citation_ratio.is_none() {
            self.relative_citation_ratio = other.relative_citation_ratio;
        }
        if self.percentile.is_none() {
            self.percentile = other.percentile;
        }
        if self.translation_potential.is_none() {
            self.translation_potential = other.translation_potential;
        }
        if self.influential_count.is_none() {
            self.influential_count = other.influential_count;
        }
        if self.citations_per_year.is_none() {
            self.citations_per_year = other.citations_per_year;
        }
    }
}

/// Provenance entry: which upstream contributed to this record and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source: SourceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<String>,
}

impl SourceRecord {
    pub fn new(source: SourceId) -> Self {
        Self {
            source,
            fetched_at: None,
        }
    }
}

/// One scholarly work, reachable by any of its identifiers.
///
/// Adapters construct Articles from upstream payloads; the aggregator may
/// merge several into one. Once emitted they are values — callers never
/// observe later mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub primary_source: SourceId,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openalex_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_scholar_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arxiv_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<Author>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_abbrev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    /// ISO calendar date when the upstream provided one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default)]
    pub article_type: ArticleType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mesh_terms: Vec<String>,

    #[serde(default)]
    pub oa_status: OaStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub oa_links: Vec<OaLink>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation_metrics: Option<CitationMetrics>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceRecord>,

    // Transient scoring fields, populated by the aggregator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranking_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

/// Strip resolver prefixes and lowercase. Idempotent.
pub fn normalize_doi(doi: &str) -> String {
    let mut doi = doi.trim().to_ascii_lowercase();
    for prefix in ["https://doi.org/", "http://doi.org/", "doi:"] {
        if let Some(rest) = doi.strip_prefix(prefix) {
            doi = rest.trim().to_string();
        }
    }
    doi
}

/// PMIDs are ASCII digit strings; anything else is rejected.
pub fn normalize_pmid(pmid: &str) -> Option<String> {
    let pmid = pmid.trim();
    let pmid = pmid.strip_prefix("PMID:").unwrap_or(pmid).trim();
    if pmid.is_empty() || !pmid.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(pmid.to_string())
}

/// Uppercase and ensure the PMC prefix. Idempotent.
pub fn normalize_pmc(pmc: &str) -> Option<String> {
    let pmc = pmc.trim();
    if pmc.is_empty() {
        return None;
    }
    let digits = if pmc.len() > 3 && pmc[..3].eq_ignore_ascii_case("PMC") {
        &pmc[3..]
    } else {
        pmc
    };
    let digits = digits.trim();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("PMC{digits}"))
}

/// Lowercased alphanumerics of the title, first 80 chars. Used as the
/// weakest dedup key when no identifier is shared.
pub fn normalize_title_key(title: &str) -> String {
    let normalized: String = title
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect();
    normalized.chars().take(80).collect()
}

const BIBLIO_FIELD_COUNT: usize = 7;

impl Article {
    pub fn new(title: impl Into<String>, primary_source: SourceId) -> Self {
        Self {
            title: title.into(),
            primary_source,
            pmid: None,
            doi: None,
            pmc: None,
            openalex_id: None,
            semantic_scholar_id: None,
            arxiv_id: None,
            authors: Vec::new(),
            abstract_text: None,
            journal: None,
            journal_abbrev: None,
            volume: None,
            issue: None,
            pages: None,
            publisher: None,
            publication_date: None,
            year: None,
            article_type: ArticleType::Unknown,
            language: None,
            keywords: Vec::new(),
            mesh_terms: Vec::new(),
            oa_status: OaStatus::Unknown,
            oa_links: Vec::new(),
            citation_metrics: None,
            sources: vec![SourceRecord::new(primary_source)],
            ranking_score: None,
            relevance_score: None,
            quality_score: None,
        }
    }

    /// Adapters discard records that fail this check: at least one
    /// identifier, or a non-empty title.
    pub fn is_viable(&self) -> bool {
        self.pmid.is_some()
            || self.doi.is_some()
            || self.pmc.is_some()
            || self.openalex_id.is_some()
            || self.semantic_scholar_id.is_some()
            || self.arxiv_id.is_some()
            || !self.title.trim().is_empty()
    }

    /// Canonical key for set operations across lists: DOI, else PMID,
    /// else lowercased title prefix.
    pub fn canonical_key(&self) -> String {
        if let Some(doi) = self.doi.as_deref().filter(|v| !v.is_empty()) {
            return format!("doi:{}", doi.to_ascii_lowercase());
        }
        if let Some(pmid) = self.pmid.as_deref().filter(|v| !v.is_empty()) {
            return format!("pmid:{pmid}");
        }
        let title: String = self.title.to_lowercase().trim().chars().take(80).collect();
        format!("title:{title}")
    }

    /// All keys under which this article can collide with another.
    pub fn dedup_keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(3);
        if let Some(doi) = self.doi.as_deref().filter(|v| !v.is_empty()) {
            keys.push(format!("doi:{}", normalize_doi(doi)));
        }
        if let Some(pmid) = self.pmid.as_deref().filter(|v| !v.is_empty()) {
            keys.push(format!("pmid:{pmid}"));
        }
        let title_key = normalize_title_key(&self.title);
        // Very short titles collide by accident, not identity.
        if title_key.len() > 20 {
            keys.push(format!("title:{title_key}"));
        }
        keys
    }

    pub fn identifier_count(&self) -> usize {
        [
            self.pmid.as_deref(),
            self.doi.as_deref(),
            self.pmc.as_deref(),
            self.openalex_id.as_deref(),
            self.semantic_scholar_id.as_deref(),
            self.arxiv_id.as_deref(),
        ]
        .iter()
        .filter(|v| v.is_some_and(|s| !s.is_empty()))
        .count()
    }

    /// Fraction of the 7 bibliographic fields populated. Used both by
    /// primary selection and the quality scorer.
    pub fn completeness(&self) -> f64 {
        self.completeness_count() as f64 / BIBLIO_FIELD_COUNT as f64
    }

    pub fn completeness_count(&self) -> usize {
        let mut filled = 0usize;
        for field in [
            self.abstract_text.as_deref(),
            self.doi.as_deref(),
            self.journal.as_deref(),
            self.volume.as_deref(),
            self.issue.as_deref(),
            self.pages.as_deref(),
        ] {
            if field.is_some_and(|v| !v.is_empty()) {
                filled += 1;
            }
        }
        if self.year.is_some() {
            filled += 1;
        }
        filled
    }

    pub fn has_open_access(&self) -> bool {
        matches!(
            self.oa_status,
            OaStatus::Gold | OaStatus::Green | OaStatus::Hybrid | OaStatus::Bronze
        ) || !self.oa_links.is_empty()
    }

    /// Best identifier for display, in preference order.
    pub fn best_identifier(&self) -> String {
        if let Some(pmid) = self.pmid.as_deref() {
            return format!("PMID:{pmid}");
        }
        if let Some(doi) = self.doi.as_deref() {
            return format!("DOI:{doi}");
        }
        if let Some(pmc) = self.pmc.as_deref() {
            return pmc.to_string();
        }
        if let Some(id) = self.openalex_id.as_deref() {
            return format!("OpenAlex:{id}");
        }
        if let Some(id) = self.semantic_scholar_id.as_deref() {
            return format!("S2:{id}");
        }
        let title: String = self.title.chars().take(40).collect();
        format!("Title:{title}")
    }

    pub fn record_source(&mut self, source: SourceId) {
        if !self.sources.iter().any(|s| s.source == source) {
            self.sources.push(SourceRecord::new(source));
        }
    }

    /// Merge another record for the same work into this one.
    ///
    /// Left-biased on scalars (existing non-empty values win), additive on
    /// collections (dedup by URL / name / term), max-preferring on citation
    /// counts. Provenance is the union of both records' sources.
    pub fn merge_from(&mut self, other: Article) {
        fn fill(slot: &mut Option<String>, value: Option<String>) {
            if slot.as_deref().is_none_or(str::is_empty)
                && let Some(v) = value.filter(|v| !v.is_empty())
            {
                *slot = Some(v);
            }
        }

        fill(&mut self.pmid, other.pmid);
        fill(&mut self.doi, other.doi);
        fill(&mut self.pmc, other.pmc);
        fill(&mut self.openalex_id, other.openalex_id);
        fill(&mut self.semantic_scholar_id, other.semantic_scholar_id);
        fill(&mut self.arxiv_id, other.arxiv_id);

        fill(&mut self.abstract_text, other.abstract_text);
        fill(&mut self.journal, other.journal);
        fill(&mut self.journal_abbrev, other.journal_abbrev);
        fill(&mut self.volume, other.volume);
        fill(&mut self.issue, other.issue);
        fill(&mut self.pages, other.pages);
        fill(&mut self.publisher, other.publisher);
        fill(&mut self.publication_date, other.publication_date);
        fill(&mut self.language, other.language);
        if self.year.is_none() {
            self.year = other.year;
        }
        if self.article_type == ArticleType::Unknown {
            self.article_type = other.article_type;
        }

        if self.authors.is_empty() {
            self.authors = other.authors;
        } else {
            let known: std::collections::HashSet<String> =
                self.authors.iter().map(Author::merge_key).collect();
            for author in other.authors {
                if !known.contains(&author.merge_key()) {
                    self.authors.push(author);
                }
            }
        }

        for keyword in other.keywords {
            if !self
                .keywords
                .iter()
                .any(|k| k.eq_ignore_ascii_case(&keyword))
            {
                self.keywords.push(keyword);
            }
        }
        for term in other.mesh_terms {
            if !self.mesh_terms.iter().any(|t| t.eq_ignore_ascii_case(&term)) {
                self.mesh_terms.push(term);
            }
        }

        if self.oa_status == OaStatus::Unknown {
            self.oa_status = other.oa_status;
        }
        let known_urls: std::collections::HashSet<String> =
            self.oa_links.iter().map(|l| l.url.clone()).collect();
        for link in other.oa_links {
            if !known_urls.contains(&link.url) {
                self.oa_links.push(link);
            }
        }

        match (&mut self.citation_metrics, other.citation_metrics) {
            (Some(mine), Some(theirs)) => mine.merge_from(&theirs),
            (slot @ None, Some(theirs)) => *slot = Some(theirs),
            _ => {}
        }

        for record in other.sources {
            if !self.sources.iter().any(|s| s.source == record.source) {
                self.sources.push(record);
            }
        }
    }
}
