//! Top-level CLI parsing and command execution.

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::Gateway;
use crate::entities::pipeline::{PipelineConfig, RankingPreset};
use crate::search::strategy::{self, StrategyProfile};
use crate::search::{SearchOptions, analyzer};
use crate::sources::SourceId;

pub mod health;

#[derive(Parser, Debug)]
#[command(
    name = "litgate",
    about = "Search the biomedical literature across PubMed, Crossref, OpenAlex, Semantic Scholar, and CORE",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON instead of Markdown
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Disable HTTP caching (always fetch fresh data)
    #[arg(long, global = true)]
    pub no_cache: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze a query and search the recommended sources
    #[command(after_help = "\
EXAMPLES:
  litgate search \"remimazolam vs propofol in ICU sedation\"
  litgate search \"PMID:12345678\"
  litgate search \"covid vaccines\" --sources pubmed,openalex --limit 10 --ranking recency")]
    Search {
        /// Query text, PMID, or DOI
        query: String,
        /// Comma-separated sources (default: analyzer recommendation)
        #[arg(short, long)]
        sources: Option<String>,
        /// Maximum results (default: 20, max: 200)
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Minimum publication year
        #[arg(long)]
        min_year: Option<i32>,
        /// Maximum publication year
        #[arg(long)]
        max_year: Option<i32>,
        /// Only open access articles
        #[arg(long)]
        open_access: bool,
        /// Ranking preset: balanced, impact, recency, quality
        #[arg(long, default_value = "balanced")]
        ranking: String,
        /// Expand the query through entity lookup before searching
        #[arg(long)]
        enhance: bool,
        /// Query additional sources when the primary set returns little
        #[arg(long)]
        cross_search: bool,
    },
    /// Show the analyzer's reading of a query without searching
    Analyze {
        /// Query text
        query: String,
    },
    /// Execute a pipeline DAG from a YAML file
    #[command(after_help = "\
EXAMPLES:
  litgate pipeline review-sweep.yaml
  litgate pipeline review-sweep.yaml --json")]
    Pipeline {
        /// Path to the pipeline file
        file: String,
    },
    /// Generate candidate query variants for a topic
    Strategies {
        /// Research topic
        topic: String,
        /// Profile: comprehensive, focused, exploratory
        #[arg(long, default_value = "comprehensive")]
        profile: String,
        /// Estimate per-variant hit counts against PubMed
        #[arg(long)]
        estimate: bool,
    },
    /// Check external API connectivity
    Health,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    if cli.no_cache {
        crate::sources::disable_cache();
    }

    match cli.command {
        Commands::Search {
            query,
            sources,
            limit,
            min_year,
            max_year,
            open_access,
            ranking,
            enhance,
            cross_search,
        } => {
            let sources = sources
                .as_deref()
                .map(|csv| {
                    csv.split(',')
                        .filter(|s| !s.trim().is_empty())
                        .map(SourceId::from_flag)
                        .collect::<Result<Vec<_>, _>>()
                })
                .transpose()?;
            let options = SearchOptions {
                sources,
                limit,
                min_year,
                max_year,
                open_access_only: open_access,
                ranking: RankingPreset::from_flag(&ranking)?,
                enhance,
                cross_search_fallback: cross_search,
            };

            let gateway = Gateway::from_env()?;
            let response = gateway.search(&query, &options).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print!("{}", render_search(&response));
            }
        }
        Commands::Analyze { query } => {
            let analysis = analyzer::analyze(&query);
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        Commands::Pipeline { file } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading pipeline file {file}"))?;
            let config = PipelineConfig::from_yaml(&text)?;

            let gateway = Gateway::from_env()?;
            let outcome = gateway.execute_pipeline(&config).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print!("{}", render_pipeline(&outcome));
            }
        }
        Commands::Strategies {
            topic,
            profile,
            estimate,
        } => {
            let profile = StrategyProfile::from_flag(&profile)?;
            let mut variants = strategy::generate(&topic, profile)?;
            if estimate {
                let config = crate::GatewayConfig::from_env();
                let adapter = crate::sources::pubmed::PubmedAdapter::new(&config)?;
                strategy::estimate_hits(&adapter, &mut variants).await;
            }
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&variants)?);
            } else {
                for variant in &variants {
                    match variant.estimated_hits {
                        Some(hits) => println!("{}: {} ({hits} hits)", variant.name, variant.query),
                        None => println!("{}: {}", variant.name, variant.query),
                    }
                }
            }
        }
        Commands::Health => {
            let report = health::check().await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.to_markdown());
            }
            if !report.all_healthy() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn render_search(response: &crate::SearchResponse) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# Results ({} articles, {} ms)\n\n",
        response.articles.len(),
        response.stats.duration_ms
    ));

    for (i, article) in response.articles.iter().enumerate() {
        let year = article
            .year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "n.d.".into());
        let journal = article.journal.as_deref().unwrap_or("-");
        let score = article
            .ranking_score
            .map(|s| format!("{s:.3}"))
            .unwrap_or_else(|| "-".into());
        out.push_str(&format!(
            "{}. {} ({year}) — {journal} [{}] score {score}\n",
            i + 1,
            article.title,
            article.best_identifier()
        ));
    }

    if !response.stats.failures.is_empty() {
        out.push_str("\n## Source failures\n");
        for failure in &response.stats.failures {
            out.push_str(&format!("- {}: {}\n", failure.source, failure.message));
        }
    }
    out
}

fn render_pipeline(outcome: &crate::PipelineRunOutcome) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# Pipeline run ({} ms)\n\n| Step | Action | Articles | Time | Error |\n|------|--------|----------|------|-------|\n",
        outcome.run_record.total_ms
    ));
    for step in &outcome.run_record.steps {
        out.push_str(&format!(
            "| {} | {} | {} | {}ms | {} |\n",
            step.step_id,
            step.action.as_str(),
            step.article_count,
            step.duration_ms,
            step.error.as_deref().unwrap_or("-")
        ));
    }
    out.push_str(&format!("\n{} final articles\n", outcome.articles.len()));
    for article in &outcome.articles {
        out.push_str(&format!("- {} [{}]\n", article.title, article.best_identifier()));
    }
    out
}
