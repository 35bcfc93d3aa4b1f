mod classify;
mod crawler;
mod db;
mod error;
mod export;
mod loader;
mod model;
mod ocr;
mod parser;
mod search;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use classify::{FundingClassifier, Vocabulary};
use crawler::{Crawler, Target};
use loader::HttpLoader;
use ocr::NoopRecognizer;
use parser::specs::{Catalog, Mode};
use settings::Settings;

#[derive(Parser)]
#[command(name = "rmap_scraper", about = "researchmap researcher and funding-project scraper")]
struct Cli {
    /// Settings file (default: ./rmap.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape researchers, classify their projects, write JSON + SQLite
    Run {
        /// Researcher identifier or profile URL (repeatable)
        #[arg(long = "id")]
        ids: Vec<String>,
        /// Search result URL to collect identifiers from (used when no --id is given)
        #[arg(long)]
        search_url: Option<String>,
        /// Extraction mode (repeatable, default: basic and enhanced)
        #[arg(long = "mode", value_enum)]
        modes: Vec<Mode>,
        /// Max researchers to process
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Prefix of the JSON result file
        #[arg(long)]
        output_prefix: Option<String>,
        /// SQLite database path
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// List researchers found by a search URL
    Search {
        #[arg(long)]
        search_url: Option<String>,
        /// Max researchers to list
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Classify a funding description
    Classify {
        funding: String,
        /// Project title
        #[arg(short, long, default_value = "")]
        title: String,
    },
    /// Show stored run statistics
    Stats {
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Researchers overview table
    Overview {
        /// Only researchers with competitive projects
        #[arg(short, long)]
        competitive: bool,
        /// Filter by keyword
        #[arg(short, long)]
        keyword: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Run {
            ids,
            search_url,
            modes,
            limit,
            output_prefix,
            db,
        } => {
            let classifier = Arc::new(load_classifier(&settings)?);

            let modes = if modes.is_empty() {
                vec![Mode::Basic, Mode::Enhanced]
            } else {
                let mut unique = Vec::new();
                for m in modes {
                    if !unique.contains(&m) {
                        unique.push(m);
                    }
                }
                unique
            };
            let catalog = Arc::new(
                Catalog::compile(&modes, &settings.base_url).context("invalid field specification")?,
            );
            let loader = Arc::new(HttpLoader::new(&settings)?);

            let (mut targets, source) = if ids.is_empty() {
                let url = search_url.unwrap_or_else(|| settings.search_url.clone());
                let cards = search::collect(&*loader, &url, &settings.base_url, limit).await?;
                let targets: Vec<Target> = cards
                    .iter()
                    .map(|c| Target {
                        identifier: c.identifier.clone(),
                        seed: Some(c.seed()),
                    })
                    .collect();
                (targets, url)
            } else {
                let mut targets: Vec<Target> = Vec::new();
                for input in &ids {
                    match Target::parse(input) {
                        Some(t) if !targets.iter().any(|x| x.identifier == t.identifier) => targets.push(t),
                        Some(_) => {}
                        None => warn!("Ignoring invalid identifier {:?}", input),
                    }
                }
                (targets, "ids".to_string())
            };
            if let Some(n) = limit {
                targets.truncate(n);
            }
            if targets.is_empty() {
                bail!("no researcher identifiers to process");
            }

            let cancel = CancellationToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Interrupted: finishing in-flight fetches, skipping the rest");
                        cancel.cancel();
                    }
                });
            }
            if let Some(max) = settings.max_duration() {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(max).await;
                    warn!("Max duration of {} reached, skipping remaining researchers", format_duration(max));
                    cancel.cancel();
                });
            }

            info!(
                "Crawling {} researchers [{}] with concurrency {}",
                targets.len(),
                modes.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", "),
                settings.concurrency
            );
            let crawler = Crawler::new(
                loader,
                catalog,
                classifier,
                Arc::new(NoopRecognizer),
                &settings.base_url,
                settings.concurrency,
                cancel,
            );
            let aggregate = crawler.run(targets, &source).await;

            let prefix = output_prefix.unwrap_or_else(|| settings.output_prefix.clone());
            let path = export::output_path(&prefix, limit);
            export::write_json(&path, &aggregate)?;

            // The JSON file already holds the results; a database error is not fatal
            let db_path = db.as_deref().unwrap_or(settings.db_path.as_path());
            let run_label = match db::store_run(db_path, &aggregate) {
                Ok(id) => format!("#{}", id),
                Err(e) => {
                    warn!("Not saved to {}: {:#}", db_path.display(), e);
                    "(JSON only)".to_string()
                }
            };

            println!(
                "Run {}: {} of {} researchers ({} failed, {} skipped)",
                run_label,
                aggregate.processed,
                aggregate.total_identifiers,
                aggregate.failures.len(),
                aggregate.skipped
            );
            println!(
                "Projects: {} total, {} competitive",
                aggregate.total_projects, aggregate.total_competitive_projects
            );
            for f in &aggregate.failures {
                println!("  {} [{}]: {}", f.identifier, f.stage.as_str(), truncate(&f.reason, 80));
            }
            println!("Results: {}", path.display());
            Ok(())
        }
        Commands::Search { search_url, limit } => {
            let loader = HttpLoader::new(&settings)?;
            let url = search_url.unwrap_or_else(|| settings.search_url.clone());
            let cards = search::collect(&loader, &url, &settings.base_url, limit).await?;
            if cards.is_empty() {
                println!("No researchers found.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<20} | {:<16} | {:<30} | {:<12}",
                "#", "Identifier", "Name", "Affiliation", "Position"
            );
            println!("{}", "-".repeat(92));
            for (i, c) in cards.iter().enumerate() {
                println!(
                    "{:>3} | {:<20} | {:<16} | {:<30} | {:<12}",
                    i + 1,
                    truncate(&c.identifier, 20),
                    truncate(&c.name, 16),
                    truncate(&c.affiliation, 30),
                    truncate(&c.position, 12)
                );
            }
            println!("\n{} researchers | profile: {}/<identifier>", cards.len(), settings.base_url);
            Ok(())
        }
        Commands::Classify { funding, title } => {
            let classifier = load_classifier(&settings)?;
            let analysis = classifier.analyze(&funding);
            println!("Competitive: {}", classifier.classify(&funding, &title));
            println!("Institution: {}", or_dash(&analysis.institution));
            println!("Program:     {}", or_dash(&analysis.program));
            println!("Category:    {}", or_dash(&analysis.category));
            Ok(())
        }
        Commands::Stats { db } => {
            let conn = db::connect(db.as_deref().unwrap_or(settings.db_path.as_path()))?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Runs:        {}", s.runs);
            println!("Researchers: {}", s.researchers);
            println!("Projects:    {}", s.projects);
            println!("Competitive: {}", s.competitive);
            println!("Failures:    {}", s.failures);
            println!("Last run:    {}", s.last_run.as_deref().unwrap_or("-"));
            Ok(())
        }
        Commands::Overview {
            competitive,
            keyword,
            limit,
            db,
        } => {
            let conn = db::connect(db.as_deref().unwrap_or(settings.db_path.as_path()))?;
            db::init_schema(&conn)?;
            let rows = db::fetch_overview(&conn, competitive, keyword.as_deref(), limit)?;
            if rows.is_empty() {
                println!("No researchers found.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<20} | {:<16} | {:<30} | {:<12} | {:>3} | {:>4} | {:>4}",
                "#", "Identifier", "Name", "Affiliation", "Position", "Kw", "Proj", "Comp"
            );
            println!("{}", "-".repeat(114));

            for (i, r) in rows.iter().enumerate() {
                println!(
                    "{:>3} | {:<20} | {:<16} | {:<30} | {:<12} | {:>3} | {:>4} | {:>4}",
                    i + 1,
                    truncate(&r.identifier, 20),
                    truncate(&r.name, 16),
                    truncate(&r.affiliation, 30),
                    truncate(&r.position, 12),
                    r.keywords,
                    r.projects,
                    r.competitive
                );
            }

            println!("\n{} researchers", rows.len());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn load_classifier(settings: &Settings) -> anyhow::Result<FundingClassifier> {
    let vocabulary = match &settings.vocabulary_path {
        Some(path) => Vocabulary::from_json_file(path)?,
        None => Vocabulary::default(),
    };
    info!("Funding vocabulary: {} terms", vocabulary.term_count());
    Ok(FundingClassifier::new(vocabulary))
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
