use std::sync::Arc;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::FundingClassifier;
use crate::error::{FetchError, ParseError};
use crate::loader::DocumentLoader;
use crate::model::ResearcherRecord;
use crate::ocr::Recognizer;
use crate::parser::specs::{Catalog, Mode};
use crate::parser::text::last_segment;
use crate::parser::{process_researcher, PageSet};

const CHUNK: usize = 500;

/// Per-identifier progress through a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlState {
    Pending,
    Fetching,
    Extracting,
    Assembled,
    Failed,
}

impl CrawlState {
    pub fn as_str(self) -> &'static str {
        match self {
            CrawlState::Pending => "pending",
            CrawlState::Fetching => "fetching",
            CrawlState::Extracting => "extracting",
            CrawlState::Assembled => "assembled",
            CrawlState::Failed => "failed",
        }
    }
}

/// A researcher to crawl, optionally with a partial record from search results.
#[derive(Debug, Clone)]
pub struct Target {
    pub identifier: String,
    pub seed: Option<ResearcherRecord>,
}

impl Target {
    /// Accepts a bare identifier or a profile URL.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let identifier = if input.contains("://") {
            last_segment(input)?
        } else {
            input.trim_matches('/').to_string()
        };
        if identifier.is_empty() {
            return None;
        }
        Some(Self {
            identifier,
            seed: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub identifier: String,
    pub stage: CrawlState,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateResult {
    pub total_identifiers: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failures: Vec<Failure>,
    pub total_projects: usize,
    pub total_competitive_projects: usize,
    pub modes: Vec<Mode>,
    pub source: String,
    pub scraped_at: String,
    pub researchers: Vec<ResearcherRecord>,
}

enum Fetched {
    Pages(PageSet),
    Failed(String),
    Skipped,
}

pub fn profile_url(base: &str, identifier: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), identifier)
}

pub struct Crawler {
    loader: Arc<dyn DocumentLoader>,
    catalog: Arc<Catalog>,
    classifier: Arc<FundingClassifier>,
    ocr: Arc<dyn Recognizer>,
    base_url: String,
    concurrency: usize,
    cancel: CancellationToken,
}

impl Crawler {
    pub fn new(
        loader: Arc<dyn DocumentLoader>,
        catalog: Arc<Catalog>,
        classifier: Arc<FundingClassifier>,
        ocr: Arc<dyn Recognizer>,
        base_url: &str,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            loader,
            catalog,
            classifier,
            ocr,
            base_url: base_url.to_string(),
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    /// Fetch every target concurrently, extract on the rayon pool, and
    /// aggregate in input order. Per-identifier failures never abort the run.
    pub async fn run(&self, targets: Vec<Target>, source: &str) -> AggregateResult {
        let requested = targets.len();
        let targets = collapse(targets, &self.classifier);
        let total = targets.len();
        if total < requested {
            debug!("Collapsed {} duplicate identifier(s)", requested - total);
        }
        let mut states = vec![CrawlState::Pending; total];
        let mut failures: Vec<(usize, Failure)> = Vec::new();

        // Phase 1: fetch
        let t_fetch = Instant::now();
        let pages = self.fetch_all(&targets, &mut states, &mut failures).await;
        info!(
            "Fetched {} of {} researchers in {:.1}s",
            pages.iter().flatten().count(),
            total,
            t_fetch.elapsed().as_secs_f64()
        );

        // Phase 2: extract
        let t_extract = Instant::now();
        let mut parsed = self.extract_all(pages, total);
        info!("Extracted in {:.1}s", t_extract.elapsed().as_secs_f64());

        let mut researchers = Vec::new();
        for (index, target) in targets.into_iter().enumerate() {
            match parsed[index].take() {
                Some(Ok(mut record)) => {
                    if let Some(seed) = target.seed {
                        record.merge(seed, &self.classifier);
                    }
                    states[index] = CrawlState::Assembled;
                    researchers.push(record);
                }
                Some(Err(e)) => {
                    warn!("{}: {}", target.identifier, e);
                    states[index] = CrawlState::Failed;
                    failures.push((
                        index,
                        Failure {
                            identifier: target.identifier,
                            stage: CrawlState::Extracting,
                            reason: e.to_string(),
                        },
                    ));
                }
                None => {}
            }
        }

        failures.sort_by_key(|(i, _)| *i);
        let skipped = states.iter().filter(|s| **s == CrawlState::Pending).count();
        let total_projects = researchers.iter().map(|r| r.projects.len()).sum();
        let total_competitive_projects = researchers.iter().map(|r| r.competitive_projects()).sum();

        info!(
            "Processed {} of {} researchers ({} failed, {} skipped), {} competitive of {} projects",
            researchers.len(),
            total,
            failures.len(),
            skipped,
            total_competitive_projects,
            total_projects
        );

        AggregateResult {
            total_identifiers: total,
            processed: researchers.len(),
            skipped,
            failures: failures.into_iter().map(|(_, f)| f).collect(),
            total_projects,
            total_competitive_projects,
            modes: self.catalog.modes.iter().map(|m| m.mode).collect(),
            source: source.to_string(),
            scraped_at: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            researchers,
        }
    }

    async fn fetch_all(
        &self,
        targets: &[Target],
        states: &mut [CrawlState],
        failures: &mut Vec<(usize, Failure)>,
    ) -> Vec<Option<PageSet>> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let pb = progress_bar(targets.len(), "[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})", "=> ");

        // Workers send pages back; the receiver is the only writer of run state
        let (tx, mut rx) = mpsc::channel::<(usize, Fetched)>(self.concurrency * 2);

        for (index, target) in targets.iter().enumerate() {
            let loader = Arc::clone(&self.loader);
            let sem = Arc::clone(&semaphore);
            let tx = tx.clone();
            let cancel = self.cancel.clone();
            let base = self.base_url.clone();
            let identifier = target.identifier.clone();

            tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return;
                };
                let outcome = if cancel.is_cancelled() {
                    Fetched::Skipped
                } else {
                    fetch_pages(loader.as_ref(), &base, &identifier).await
                };
                let _ = tx.send((index, outcome)).await;
            });
        }

        drop(tx);

        let mut pages: Vec<Option<PageSet>> = vec![None; targets.len()];
        while let Some((index, outcome)) = rx.recv().await {
            match outcome {
                Fetched::Pages(set) => {
                    states[index] = CrawlState::Extracting;
                    pages[index] = Some(set);
                }
                Fetched::Failed(reason) => {
                    warn!("{}: {}", targets[index].identifier, reason);
                    states[index] = CrawlState::Failed;
                    failures.push((
                        index,
                        Failure {
                            identifier: targets[index].identifier.clone(),
                            stage: CrawlState::Fetching,
                            reason,
                        },
                    ));
                }
                Fetched::Skipped => debug!("{}: skipped", targets[index].identifier),
            }
            pb.inc(1);
        }

        pb.finish_and_clear();
        pages
    }

    fn extract_all(
        &self,
        pages: Vec<Option<PageSet>>,
        total: usize,
    ) -> Vec<Option<Result<ResearcherRecord, ParseError>>> {
        let work: Vec<(usize, PageSet)> = pages
            .into_iter()
            .enumerate()
            .filter_map(|(i, p)| p.map(|p| (i, p)))
            .collect();

        let pb = progress_bar(
            work.len(),
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})",
            "#>-",
        );

        let mut parsed: Vec<Option<Result<ResearcherRecord, ParseError>>> = vec![None; total];
        for chunk in work.chunks(CHUNK) {
            let results: Vec<_> = chunk
                .par_iter()
                .map(|(i, set)| {
                    (
                        *i,
                        process_researcher(set, &self.catalog, &self.classifier, self.ocr.as_ref()),
                    )
                })
                .collect();
            for (i, result) in results {
                parsed[i] = Some(result);
            }
            pb.inc(chunk.len() as u64);
        }

        pb.finish_and_clear();
        parsed
    }
}

/// One target per identifier, in first-seen order; seeds of repeats are merged.
fn collapse(targets: Vec<Target>, classifier: &FundingClassifier) -> Vec<Target> {
    let mut out: Vec<Target> = Vec::with_capacity(targets.len());
    for target in targets {
        let Some(existing) = out.iter_mut().find(|t| t.identifier == target.identifier) else {
            out.push(target);
            continue;
        };
        if let Some(seed) = target.seed {
            existing.seed = Some(match existing.seed.take() {
                Some(mut merged) => {
                    merged.merge(seed, classifier);
                    merged
                }
                None => seed,
            });
        }
    }
    out
}

async fn fetch_pages(loader: &dyn DocumentLoader, base: &str, identifier: &str) -> Fetched {
    let url = profile_url(base, identifier);
    debug!("{}: fetching {}", identifier, url);

    let profile = match loader.fetch(&url).await {
        Ok(page) => {
            debug!("{}: {} ({}ms)", identifier, page.url, page.latency_ms);
            page.body
        }
        Err(e) => return Fetched::Failed(e.to_string()),
    };
    // 404: the researcher has no projects. Anything else fails the identifier.
    let projects = match loader.fetch(&format!("{}/research_projects", url)).await {
        Ok(page) => Some(page.body),
        Err(FetchError::HttpStatus { status: 404, .. }) => {
            debug!("{}: no project listing", identifier);
            None
        }
        Err(e) => return Fetched::Failed(format!("project listing: {}", e)),
    };

    Fetched::Pages(PageSet {
        identifier: identifier.to_string(),
        url,
        profile,
        projects,
    })
}

fn progress_bar(len: usize, template: &str, chars: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar().template(template) {
        pb.set_style(style.progress_chars(chars));
    }
    pb
}
