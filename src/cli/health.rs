use std::time::Instant;

use futures::future::join_all;

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthRow {
    pub api: String,
    pub status: String,
    pub latency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affects: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub healthy: usize,
    pub total: usize,
    pub rows: Vec<HealthRow>,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.healthy == self.total
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# litgate Health Check\n\n");
        out.push_str("| API | Status | Latency | Affects |\n");
        out.push_str("|-----|--------|---------|---------|\n");
        for row in &self.rows {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                row.api,
                row.status,
                row.latency,
                row.affects.as_deref().unwrap_or("-")
            ));
        }
        out.push_str(&format!(
            "\nStatus: {}/{} APIs healthy\n",
            self.healthy, self.total
        ));
        out
    }
}

fn affects_for_api(api: &str) -> Option<&'static str> {
    match api {
        "PubMed" => Some("primary search, details, citation graph, counts"),
        "Crossref" => Some("DOI lookup and registry search"),
        "OpenAlex" => Some("open-scholarly coverage and OA links"),
        "Semantic Scholar" => Some("influential-citation metrics and preprint coverage"),
        "CORE" => Some("full-text aggregation"),
        "iCite" => Some("metrics pipeline step"),
        "PubTator3" => Some("semantic query expansion"),
        _ => None,
    }
}

async fn check_one(client: reqwest::Client, api: &'static str, url: &str) -> HealthRow {
    let start = Instant::now();
    let resp = client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await;

    match resp {
        Ok(resp) => {
            let status = resp.status();
            let elapsed = start.elapsed().as_millis();
            if status.is_success() {
                HealthRow {
                    api: api.to_string(),
                    status: "ok".into(),
                    latency: format!("{elapsed}ms"),
                    affects: None,
                }
            } else {
                HealthRow {
                    api: api.to_string(),
                    status: "error".into(),
                    latency: format!("{elapsed}ms (HTTP {})", status.as_u16()),
                    affects: affects_for_api(api).map(str::to_string),
                }
            }
        }
        Err(err) => {
            let reason = if err.is_timeout() {
                "timeout"
            } else if err.is_connect() {
                "connect"
            } else {
                "error"
            };
            HealthRow {
                api: api.to_string(),
                status: "error".into(),
                latency: reason.into(),
                affects: affects_for_api(api).map(str::to_string),
            }
        }
    }
}

pub async fn check() -> HealthReport {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .user_agent(concat!("litgate/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default();

    let checks: Vec<(&'static str, &'static str)> = vec![
        (
            "PubMed",
            "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/einfo.fcgi?retmode=json",
        ),
        ("Crossref", "https://api.crossref.org/works?rows=0"),
        ("OpenAlex", "https://api.openalex.org/works?per-page=1"),
        (
            "Semantic Scholar",
            "https://api.semanticscholar.org/graph/v1/paper/search?query=test&limit=1",
        ),
        ("CORE", "https://api.core.ac.uk/v3/search/works?q=test&limit=1"),
        ("iCite", "https://icite.od.nih.gov/api/pubs?pmids=23456789"),
        (
            "PubTator3",
            "https://www.ncbi.nlm.nih.gov/research/pubtator3-api/entity/autocomplete/?query=braf&limit=1",
        ),
    ];

    let rows = join_all(
        checks
            .into_iter()
            .map(|(api, url)| check_one(client.clone(), api, url)),
    )
    .await;

    let healthy = rows.iter().filter(|row| row.status == "ok").count();
    HealthReport {
        healthy,
        total: rows.len(),
        rows,
    }
}
