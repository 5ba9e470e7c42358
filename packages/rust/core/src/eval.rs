//! Retrieval evaluation against golden datasets.
//!
//! A golden dataset is `{golden_dir}/{company}.json` plus a fixed corpus in
//! `{golden_dir}/{company}/raw/`. A run re-ingests the corpus, searches each
//! query and scores substring recall of the reference contexts.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, error, info, info_span, warn};

use companyintel_index::{Embedder, VectorStore};
use companyintel_shared::{
    CompanyIntelError, EvalConfig, IngestionResult, Result, normalize_company,
};
use companyintel_storage::RawStore;

use crate::ingest::Ingestor;
use crate::jobs::{Completion, InFlight, TriggerOutcome};

// ---------------------------------------------------------------------------
// Dataset and report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct GoldenQuery {
    pub id: String,
    pub query: String,
    /// Passages a good retrieval should surface. Queries without any are
    /// not scored.
    #[serde(default)]
    pub reference_contexts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoldenSet {
    pub queries: Vec<GoldenQuery>,
}

impl GoldenSet {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| CompanyIntelError::io(path, e))?;
        serde_json::from_str(&raw)
            .map_err(|e| CompanyIntelError::parse(format!("invalid golden set {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRecord {
    pub id: String,
    pub query: String,
    pub retrieved_urls: Vec<String>,
    pub retrieved_texts: Vec<String>,
    pub context_recall: f64,
    pub hit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvalMetrics {
    pub hit_rate: f64,
    pub context_recall: f64,
    pub queries_evaluated: usize,
}

impl EvalMetrics {
    /// Aggregate per-query records; an empty run scores zero.
    pub fn from_records(records: &[QueryRecord]) -> Self {
        let n = records.len().max(1) as f64;
        let hits = records.iter().filter(|r| r.hit).count() as f64;
        let recall: f64 = records.iter().map(|r| r.context_recall).sum();
        Self {
            hit_rate: hits / n,
            context_recall: recall / n,
            queries_evaluated: records.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub run_id: String,
    pub company: String,
    pub timestamp: DateTime<Utc>,
    pub ingestion: IngestionResult,
    pub metrics: EvalMetrics,
    pub per_query: Vec<QueryRecord>,
}

/// Fraction of `references` found (case-insensitively) anywhere in the
/// retrieved texts joined with spaces.
pub fn context_recall(references: &[String], retrieved: &[String]) -> f64 {
    if references.is_empty() {
        return 0.0;
    }
    let haystack = retrieved.join(" ").to_lowercase();
    let found = references
        .iter()
        .filter(|r| haystack.contains(&r.to_lowercase()))
        .count();
    found as f64 / references.len() as f64
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalPhase {
    Starting,
    Ingesting,
    Searching,
    Evaluating,
    Done,
    Error,
}

impl std::fmt::Display for EvalPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Starting => "starting",
            Self::Ingesting => "ingesting",
            Self::Searching => "searching",
            Self::Evaluating => "evaluating",
            Self::Done => "done",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalSnapshot {
    pub run_id: String,
    pub company: String,
    pub status: EvalStatus,
    pub phase: EvalPhase,
    /// `"{done}/{total}"` while searching.
    pub progress: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Set on both completion and failure.
    pub finished_at: Option<DateTime<Utc>>,
    /// Golden corpus ingestion counts, once ingestion has finished.
    pub ingestion: Option<IngestionResult>,
    pub metrics: Option<EvalMetrics>,
    pub per_query: Vec<QueryRecord>,
    pub report_path: Option<PathBuf>,
    pub error: Option<String>,
}

/// Runs evaluations in the background; one running run per company.
pub struct EvalRunner {
    inner: Arc<EvalContext>,
    runs: Arc<DashMap<String, EvalSnapshot>>,
    running: Arc<DashMap<String, String>>,
    in_flight: InFlight,
}

struct EvalContext {
    ingestor: Arc<Ingestor>,
    embedder: Arc<Embedder>,
    index: Arc<VectorStore>,
    config: EvalConfig,
}

impl EvalRunner {
    pub fn new(
        ingestor: Arc<Ingestor>,
        embedder: Arc<Embedder>,
        index: Arc<VectorStore>,
        config: EvalConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EvalContext {
                ingestor,
                embedder,
                index,
                config,
            }),
            runs: Arc::new(DashMap::new()),
            running: Arc::new(DashMap::new()),
            in_flight: InFlight::default(),
        }
    }

    /// Start an evaluation for `company`. Run ids are
    /// `{company}-{YYYYMMDD-HHMMSS}`. Must be called from within a Tokio
    /// runtime.
    pub fn trigger(&self, company: &str) -> Result<TriggerOutcome<String>> {
        let company = normalize_company(company);
        if company.is_empty() {
            return Err(CompanyIntelError::validation("company name is empty"));
        }

        let run_id = format!("{company}-{}", Utc::now().format("%Y%m%d-%H%M%S"));
        match self.running.entry(company.clone()) {
            Entry::Occupied(entry) => {
                info!(%company, run_id = %entry.get(), "evaluation already running");
                return Ok(TriggerOutcome::AlreadyRunning(entry.get().clone()));
            }
            Entry::Vacant(entry) => {
                entry.insert(run_id.clone());
            }
        }

        self.runs.insert(
            run_id.clone(),
            EvalSnapshot {
                run_id: run_id.clone(),
                company: company.clone(),
                status: EvalStatus::Running,
                phase: EvalPhase::Starting,
                progress: None,
                started_at: Utc::now(),
                finished_at: None,
                ingestion: None,
                metrics: None,
                per_query: Vec::new(),
                report_path: None,
                error: None,
            },
        );

        let run = EvalRun {
            ctx: Arc::clone(&self.inner),
            runs: Arc::clone(&self.runs),
            running: Arc::clone(&self.running),
            run_id: run_id.clone(),
            company,
        };
        let span = info_span!("eval", run_id = %run_id);
        self.in_flight
            .spawn(run_id.clone(), move |completion| run.execute(completion).instrument(span));

        info!(%run_id, "evaluation started");
        Ok(TriggerOutcome::Started(run_id))
    }

    pub fn status(&self, run_id: &str) -> Option<EvalSnapshot> {
        self.runs.get(run_id).map(|run| run.clone())
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// One background evaluation.
struct EvalRun {
    ctx: Arc<EvalContext>,
    runs: Arc<DashMap<String, EvalSnapshot>>,
    running: Arc<DashMap<String, String>>,
    run_id: String,
    company: String,
}

impl EvalRun {
    fn update(&self, f: impl FnOnce(&mut EvalSnapshot)) {
        if let Some(mut run) = self.runs.get_mut(&self.run_id) {
            f(&mut run);
        }
    }

    /// Run to completion, then publish the terminal state. The in-flight
    /// handle is released last so a drained runner never shows a running
    /// snapshot.
    async fn execute(self, completion: Completion) {
        let outcome = self.evaluate().await;

        match outcome {
            Ok((report, report_path)) => {
                let metrics = report.metrics;
                info!(
                    hit_rate = metrics.hit_rate,
                    context_recall = metrics.context_recall,
                    queries = metrics.queries_evaluated,
                    "evaluation complete"
                );
                self.update(|run| {
                    run.status = EvalStatus::Completed;
                    run.phase = EvalPhase::Done;
                    run.progress = None;
                    run.finished_at = Some(Utc::now());
                    run.metrics = Some(metrics);
                    run.per_query = report.per_query;
                    run.report_path = Some(report_path);
                });
            }
            Err(e) => {
                error!(error = %e, "evaluation failed");
                self.update(|run| {
                    run.status = EvalStatus::Failed;
                    run.phase = EvalPhase::Error;
                    run.progress = None;
                    run.finished_at = Some(Utc::now());
                    run.error = Some(e.to_string());
                });
            }
        }
        self.running.remove(&self.company);
        completion.release();
    }

    async fn evaluate(&self) -> Result<(EvalReport, PathBuf)> {
        let config = &self.ctx.config;
        let golden_dir = PathBuf::from(&config.golden_dir);
        let golden = GoldenSet::load(&golden_dir.join(format!("{}.json", self.company)))?;

        self.update(|run| run.phase = EvalPhase::Ingesting);
        let ingestion = self
            .ctx
            .ingestor
            .ingest_company(&self.company, &RawStore::new(&golden_dir))
            .await?;
        if ingestion.vectors_stored == 0 {
            warn!("golden corpus produced no vectors");
        }
        self.update(|run| run.ingestion = Some(ingestion.clone()));

        let scorable: Vec<&GoldenQuery> = golden
            .queries
            .iter()
            .filter(|q| !q.reference_contexts.is_empty())
            .collect();
        self.update(|run| run.phase = EvalPhase::Searching);

        let mut records = Vec::with_capacity(scorable.len());
        for (i, q) in scorable.iter().enumerate() {
            self.update(|run| run.progress = Some(format!("{}/{}", i, scorable.len())));
            let (dense, sparse) = self.ctx.embedder.embed_query(&q.query).await?;
            let hits = self
                .ctx
                .index
                .search(&dense, &sparse, Some(&self.company), config.search_limit)
                .await?;

            let retrieved_urls = hits.iter().map(|h| h.url.clone()).collect();
            let retrieved_texts: Vec<String> = hits.into_iter().map(|h| h.text).collect();
            let recall = context_recall(&q.reference_contexts, &retrieved_texts);
            records.push(QueryRecord {
                id: q.id.clone(),
                query: q.query.clone(),
                retrieved_urls,
                retrieved_texts,
                context_recall: recall,
                hit: recall > 0.0,
            });
        }

        self.update(|run| {
            run.phase = EvalPhase::Evaluating;
            run.progress = None;
        });
        let metrics = EvalMetrics::from_records(&records);
        let report = EvalReport {
            run_id: self.run_id.clone(),
            company: self.company.clone(),
            timestamp: Utc::now(),
            ingestion,
            metrics,
            per_query: records,
        };
        let path = write_report(Path::new(&config.report_dir), &report)?;
        Ok((report, path))
    }
}

fn write_report(dir: &Path, report: &EvalReport) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| CompanyIntelError::io(dir, e))?;
    let path = dir.join(format!("{}_report.json", report.run_id));
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| CompanyIntelError::Storage(format!("failed to serialize report: {e}")))?;
    fs::write(&path, json).map_err(|e| CompanyIntelError::io(&path, e))?;
    info!(path = %path.display(), "wrote evaluation report");
    Ok(path)
}
