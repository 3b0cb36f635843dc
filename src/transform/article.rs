use crate::entities::article::{
    Article, ArticleType, Author, OaLink, OaStatus, normalize_doi, normalize_pmc,
};
use crate::entities::CitationMetrics;
use crate::sources::SourceId;
use crate::sources::core::CoreWork;
use crate::sources::crossref::CrossrefWork;
use crate::sources::openalex::OpenalexWork;
use crate::sources::pubmed::PubmedSummary;
use crate::sources::semantic_scholar::S2Paper;
use crate::utils::date;

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// PubMed publication types, most specific design first.
const PUBMED_TYPE_PRIORITY: &[(&str, ArticleType)] = &[
    ("Randomized Controlled Trial", ArticleType::Rct),
    ("Meta-Analysis", ArticleType::MetaAnalysis),
    ("Systematic Review", ArticleType::SystematicReview),
    ("Clinical Trial", ArticleType::ClinicalTrial),
    ("Review", ArticleType::Review),
    ("Case Reports", ArticleType::CaseReport),
    ("Letter", ArticleType::Letter),
    ("Editorial", ArticleType::Editorial),
    ("Comment", ArticleType::Comment),
    ("Preprint", ArticleType::Preprint),
    ("Journal Article", ArticleType::JournalArticle),
];

fn pubmed_article_type(pubtypes: &[String]) -> ArticleType {
    for (label, mapped) in PUBMED_TYPE_PRIORITY {
        if pubtypes.iter().any(|t| t == label) {
            return *mapped;
        }
    }
    ArticleType::Unknown
}

pub fn from_pubmed_summary(summary: &PubmedSummary) -> Article {
    let mut article = Article::new(summary.title.trim(), SourceId::Pubmed);

    if !summary.uid.trim().is_empty() {
        article.pmid = Some(summary.uid.trim().to_string());
    }
    for id in &summary.articleids {
        match id.idtype.as_str() {
            "doi" => {
                let doi = normalize_doi(&id.value);
                if !doi.is_empty() {
                    article.doi = Some(doi);
                }
            }
            "pmc" | "pmcid" => {
                if let Some(pmc) = normalize_pmc(&id.value) {
                    article.pmc = Some(pmc);
                }
            }
            _ => {}
        }
    }

    article.authors = summary
        .authors
        .iter()
        .filter(|a| !a.name.trim().is_empty())
        .map(|a| Author::from_full_name(a.name.trim()))
        .collect();
    article.journal = non_empty(summary.fulljournalname.as_deref())
        .or_else(|| non_empty(summary.source.as_deref()));
    article.journal_abbrev = non_empty(summary.source.as_deref());
    article.volume = non_empty(summary.volume.as_deref());
    article.issue = non_empty(summary.issue.as_deref());
    article.pages = non_empty(summary.pages.as_deref());
    article.language = summary.lang.first().map(|l| l.trim().to_string());
    article.article_type = pubmed_article_type(&summary.pubtype);

    if let Some(pubdate) = summary.pubdate.as_deref() {
        article.year = date::year_from_text(pubdate);
        article.publication_date = date::iso_date_prefix(pubdate);
    }

    // PMC presence means a green OA copy exists.
    if let Some(pmc) = article.pmc.as_deref() {
        let digits = pmc.trim_start_matches("PMC");
        article.oa_status = OaStatus::Green;
        article.oa_links.push(OaLink {
            url: format!("https://www.ncbi.nlm.nih.gov/pmc/articles/PMC{digits}/"),
            version: Some("publishedVersion".into()),
            host_type: Some("repository".into()),
            license: None,
            is_best: true,
        });
    }

    article
}

fn crossref_article_type(work_type: Option<&str>) -> ArticleType {
    match work_type.unwrap_or_default() {
        "journal-article" => ArticleType::JournalArticle,
        "posted-content" => ArticleType::Preprint,
        "book-chapter" => ArticleType::BookChapter,
        "proceedings-article" => ArticleType::ConferencePaper,
        "dissertation" => ArticleType::Thesis,
        "dataset" => ArticleType::Dataset,
        "" => ArticleType::Unknown,
        _ => ArticleType::Other,
    }
}

pub fn from_crossref_work(work: &CrossrefWork) -> Article {
    let title = work
        .title
        .first()
        .map(|t| t.trim().to_string())
        .unwrap_or_default();
    let mut article = Article::new(title, SourceId::Crossref);

    if let Some(doi) = work.doi.as_deref() {
        let doi = normalize_doi(doi);
        if !doi.is_empty() {
            article.doi = Some(doi);
        }
    }
    for alt in &work.alternative_id {
        if alt.to_ascii_uppercase().starts_with("PMC")
            && let Some(pmc) = normalize_pmc(alt)
        {
            article.pmc = Some(pmc);
            break;
        }
    }

    article.authors = work
        .author
        .iter()
        .map(|a| {
            let affiliation = a
                .affiliation
                .iter()
                .filter_map(|aff| non_empty(aff.name.as_deref()))
                .collect::<Vec<_>>()
                .join("; ");
            Author {
                family_name: non_empty(a.family.as_deref()),
                given_name: non_empty(a.given.as_deref()),
                full_name: None,
                orcid: non_empty(a.orcid.as_deref()),
                affiliation: (!affiliation.is_empty()).then_some(affiliation),
                is_corresponding: false,
            }
        })
        .collect();

    article.journal = work.container_title.first().and_then(|v| non_empty(Some(v)));
    article.journal_abbrev = work
        .short_container_title
        .first()
        .and_then(|v| non_empty(Some(v)));
    article.volume = non_empty(work.volume.as_deref());
    article.issue = non_empty(work.issue.as_deref());
    article.pages = non_empty(work.page.as_deref());
    article.publisher = non_empty(work.publisher.as_deref());
    article.language = non_empty(work.language.as_deref());
    article.abstract_text = non_empty(work.abstract_text.as_deref());
    article.article_type = crossref_article_type(work.work_type.as_deref());

    if let Some(issued) = work.issued.as_ref()
        && let Some(parts) = issued.date_parts.first()
    {
        if let Some(Some(year)) = parts.first() {
            article.year = Some(*year);
        }
        if let (Some(Some(y)), Some(Some(m)), Some(Some(d))) =
            (parts.first(), parts.get(1), parts.get(2))
        {
            article.publication_date = Some(format!("{y:04}-{m:02}-{d:02}"));
        }
    }

    for link in &work.link {
        if link.content_type.as_deref() == Some("application/pdf")
            && let Some(url) = non_empty(link.url.as_deref())
        {
            article.oa_links.push(OaLink {
                url,
                version: None,
                host_type: Some("publisher".into()),
                license: None,
                is_best: false,
            });
        }
    }

    if let Some(count) = work.is_referenced_by_count {
        article.citation_metrics = Some(CitationMetrics {
            citation_count: Some(count),
            ..CitationMetrics::default()
        });
    }

    article
}

/// Rebuild an abstract from OpenAlex's inverted index.
fn openalex_abstract(work: &OpenalexWork) -> Option<String> {
    let index = work.abstract_inverted_index.as_ref()?;
    let mut positions: Vec<(u32, &str)> = Vec::new();
    for (word, offsets) in index {
        for offset in offsets {
            positions.push((*offset, word.as_str()));
        }
    }
    if positions.is_empty() {
        return None;
    }
    positions.sort_unstable_by_key(|(offset, _)| *offset);
    Some(
        positions
            .iter()
            .map(|(_, word)| *word)
            .collect::<Vec<_>>()
            .join(" "),
    )
}

fn openalex_oa_status(status: Option<&str>) -> OaStatus {
    match status.unwrap_or_default() {
        "gold" => OaStatus::Gold,
        "green" => OaStatus::Green,
        "hybrid" => OaStatus::Hybrid,
        "bronze" => OaStatus::Bronze,
        "closed" => OaStatus::Closed,
        _ => OaStatus::Unknown,
    }
}

pub fn from_openalex_work(work: &OpenalexWork) -> Article {
    let title = non_empty(work.display_name.as_deref())
        .or_else(|| non_empty(work.title.as_deref()))
        .unwrap_or_default();
    let mut article = Article::new(title, SourceId::Openalex);

    if let Some(id) = work.id.as_deref() {
        let bare = id.trim_start_matches("https://openalex.org/");
        if !bare.is_empty() {
            article.openalex_id = Some(bare.to_string());
        }
    }
    if let Some(doi) = work.ids.doi.as_deref() {
        let doi = normalize_doi(doi);
        if !doi.is_empty() {
            article.doi = Some(doi);
        }
    }
    if let Some(pmid) = work.ids.pmid.as_deref() {
        let bare = pmid
            .trim_start_matches("https://pubmed.ncbi.nlm.nih.gov/")
            .trim_end_matches('/');
        if !bare.is_empty() && bare.chars().all(|c| c.is_ascii_digit()) {
            article.pmid = Some(bare.to_string());
        }
    }
    if let Some(pmcid) = work.ids.pmcid.as_deref() {
        let bare = pmcid
            .trim_start_matches("https://www.ncbi.nlm.nih.gov/pmc/articles/")
            .trim_end_matches('/');
        if let Some(pmc) = normalize_pmc(bare) {
            article.pmc = Some(pmc);
        }
    }

    article.authors = work
        .authorships
        .iter()
        .filter_map(|authorship| authorship.author.as_ref())
        .filter_map(|author| {
            non_empty(author.display_name.as_deref()).map(|name| Author {
                full_name: Some(name),
                orcid: non_empty(author.orcid.as_deref()),
                ..Author::default()
            })
        })
        .collect();

    article.journal = work
        .primary_location
        .as_ref()
        .and_then(|loc| loc.source.as_ref())
        .and_then(|src| non_empty(src.display_name.as_deref()));
    article.abstract_text = openalex_abstract(work);
    article.language = non_empty(work.language.as_deref());
    article.year = work.publication_year.or_else(|| {
        work.publication_date
            .as_deref()
            .and_then(date::year_from_text)
    });
    article.publication_date = work
        .publication_date
        .as_deref()
        .and_then(date::iso_date_prefix);

    if let Some(oa) = work.open_access.as_ref() {
        article.oa_status = if oa.is_oa {
            openalex_oa_status(oa.oa_status.as_deref())
        } else {
            OaStatus::Closed
        };
        if let Some(url) = non_empty(oa.oa_url.as_deref()) {
            article.oa_links.push(OaLink {
                url,
                version: None,
                host_type: None,
                license: None,
                is_best: true,
            });
        }
    }
    if let Some(best) = work.best_oa_location.as_ref()
        && let Some(url) = non_empty(best.pdf_url.as_deref())
        && !article.oa_links.iter().any(|l| l.url == url)
    {
        article.oa_links.push(OaLink {
            url,
            version: None,
            host_type: None,
            license: non_empty(best.license.as_deref()),
            is_best: false,
        });
    }

    if let Some(count) = work.cited_by_count {
        article.citation_metrics = Some(CitationMetrics {
            citation_count: Some(count),
            ..CitationMetrics::default()
        });
    }

    article
}

fn s2_article_type(types: Option<&Vec<String>>) -> ArticleType {
    let Some(types) = types else {
        return ArticleType::Unknown;
    };
    for t in types {
        let mapped = match t.as_str() {
            "MetaAnalysis" => ArticleType::MetaAnalysis,
            "ClinicalTrial" => ArticleType::ClinicalTrial,
            "Review" => ArticleType::Review,
            "CaseReport" => ArticleType::CaseReport,
            "Editorial" => ArticleType::Editorial,
            "LettersAndComments" => ArticleType::Letter,
            "Conference" => ArticleType::ConferencePaper,
            "Dataset" => ArticleType::Dataset,
            "JournalArticle" => ArticleType::JournalArticle,
            _ => continue,
        };
        if mapped != ArticleType::JournalArticle {
            return mapped;
        }
        // Keep scanning for something more specific than JournalArticle.
        if types.len() == 1 {
            return mapped;
        }
    }
    if types.iter().any(|t| t == "JournalArticle") {
        ArticleType::JournalArticle
    } else {
        ArticleType::Unknown
    }
}

pub fn from_semantic_scholar_paper(paper: &S2Paper) -> Article {
    let title = non_empty(paper.title.as_deref()).unwrap_or_default();
    let mut article = Article::new(title, SourceId::SemanticScholar);

    article.semantic_scholar_id = non_empty(paper.paper_id.as_deref());
    if let Some(ids) = paper.external_ids.as_ref() {
        if let Some(doi) = ids.doi.as_deref() {
            let doi = normalize_doi(doi);
            if !doi.is_empty() {
                article.doi = Some(doi);
            }
        }
        if let Some(pmid) = non_empty(ids.pubmed.as_deref())
            && pmid.chars().all(|c| c.is_ascii_digit())
        {
            article.pmid = Some(pmid);
        }
        if let Some(pmc) = ids.pubmed_central.as_deref().and_then(normalize_pmc) {
            article.pmc = Some(pmc);
        }
        article.arxiv_id = non_empty(ids.arxiv.as_deref());
    }

    article.abstract_text = non_empty(paper.abstract_text.as_deref());
    article.journal = non_empty(paper.venue.as_deref());
    article.year = paper.year;
    article.article_type = s2_article_type(paper.publication_types.as_ref());
    article.authors = paper
        .authors
        .iter()
        .filter_map(|a| non_empty(a.name.as_deref()))
        .map(Author::from_full_name)
        .collect();

    if let Some(url) = paper
        .open_access_pdf
        .as_ref()
        .and_then(|pdf| non_empty(pdf.url.as_deref()))
    {
        article.oa_links.push(OaLink {
            url,
            version: None,
            host_type: None,
            license: None,
            is_best: true,
        });
    }

    if paper.citation_count.is_some() || paper.influential_citation_count.is_some() {
        article.citation_metrics = Some(CitationMetrics {
            citation_count: paper.citation_count,
            influential_count: paper.influential_citation_count,
            ..CitationMetrics::default()
        });
    }

    article
}

pub fn from_core_work(work: &CoreWork) -> Article {
    let title = non_empty(work.title.as_deref()).unwrap_or_default();
    let mut article = Article::new(title, SourceId::Core);

    if let Some(doi) = work.doi.as_deref() {
        let doi = normalize_doi(doi);
        if !doi.is_empty() {
            article.doi = Some(doi);
        }
    }
    if let Some(pmid) = non_empty(work.pubmed_id.as_deref())
        && pmid.chars().all(|c| c.is_ascii_digit())
    {
        article.pmid = Some(pmid);
    }
    article.arxiv_id = non_empty(work.arxiv_id.as_deref());

    // The identifiers list backfills anything the direct fields lack.
    for ident in &work.identifiers {
        let Some(value) = non_empty(ident.identifier.as_deref()) else {
            continue;
        };
        match ident.id_type.as_deref().unwrap_or_default().to_ascii_uppercase().as_str() {
            "DOI" if article.doi.is_none() => {
                let doi = normalize_doi(&value);
                if !doi.is_empty() {
                    article.doi = Some(doi);
                }
            }
            "PMID" if article.pmid.is_none() => {
                if value.chars().all(|c| c.is_ascii_digit()) {
                    article.pmid = Some(value);
                }
            }
            "ARXIV" if article.arxiv_id.is_none() => article.arxiv_id = Some(value),
            _ => {}
        }
    }

    article.abstract_text = non_empty(work.abstract_text.as_deref());
    article.year = work.year_published;
    article.journal = work.journals.first().and_then(|j| non_empty(j.title.as_deref()));
    article.publisher = non_empty(work.publisher.as_deref());
    article.language = work
        .language
        .as_ref()
        .and_then(|l| non_empty(l.code.as_deref()));
    article.authors = work
        .authors
        .iter()
        .filter_map(|a| non_empty(a.name.as_deref()))
        .map(Author::from_full_name)
        .collect();

    if let Some(url) = non_empty(work.download_url.as_deref()) {
        article.oa_status = OaStatus::Green;
        article.oa_links.push(OaLink {
            url,
            version: None,
            host_type: Some("repository".into()),
            license: None,
            is_best: true,
        });
    }

    if let Some(count) = work.citation_count {
        article.citation_metrics = Some(CitationMetrics {
            citation_count: Some(count),
            ..CitationMetrics::default()
        });
    }

    article
}
