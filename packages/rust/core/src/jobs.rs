//! Background scrape-and-ingest jobs, one per company.
//!
//! [`JobRegistry::trigger`] returns immediately; the work runs on a spawned
//! task that owns its job record and is the only writer to it. Callers poll
//! [`JobRegistry::status`].

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use companyintel_shared::{
    CompanyIntelError, IngestionResult, Result, ScrapeResult, normalize_company,
};
use companyintel_storage::RawStore;

use crate::ingest::Ingestor;
use crate::pipeline::{Orchestrator, ProgressReporter};

// ---------------------------------------------------------------------------
// Workflow seam
// ---------------------------------------------------------------------------

/// The work a job performs.
#[async_trait]
pub trait IngestionWorkflow: Send + Sync + 'static {
    async fn scrape(&self, company: &str, progress: &dyn ProgressReporter) -> Result<ScrapeResult>;
    async fn ingest(&self, company: &str) -> Result<IngestionResult>;
}

/// Production workflow: the orchestrator followed by the ingestor over the
/// orchestrator's raw store.
pub struct CompanyPipeline {
    orchestrator: Arc<Orchestrator>,
    ingestor: Arc<Ingestor>,
}

impl CompanyPipeline {
    pub fn new(orchestrator: Arc<Orchestrator>, ingestor: Arc<Ingestor>) -> Self {
        Self {
            orchestrator,
            ingestor,
        }
    }

    fn store(&self) -> &RawStore {
        self.orchestrator.store()
    }
}

#[async_trait]
impl IngestionWorkflow for CompanyPipeline {
    async fn scrape(&self, company: &str, progress: &dyn ProgressReporter) -> Result<ScrapeResult> {
        self.orchestrator.scrape_company(company, progress).await
    }

    async fn ingest(&self, company: &str) -> Result<IngestionResult> {
        self.ingestor.ingest_company(company, self.store()).await
    }
}

// ---------------------------------------------------------------------------
// Job records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Done,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}

/// Point-in-time copy of a job record.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub company: String,
    pub status: JobStatus,
    /// Current pipeline phase while running.
    pub phase: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Scrape counts and non-fatal errors, once the scrape has finished.
    pub scrape: Option<ScrapeResult>,
    pub ingestion: Option<IngestionResult>,
    /// Why the job failed.
    pub error: Option<String>,
}

impl JobSnapshot {
    fn running(job_id: Uuid, company: &str) -> Self {
        Self {
            job_id,
            company: company.to_string(),
            status: JobStatus::Running,
            phase: None,
            started_at: Utc::now(),
            finished_at: None,
            scrape: None,
            ingestion: None,
            error: None,
        }
    }
}

/// Result of a trigger call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome<Id = Uuid> {
    /// A new job was started.
    Started(Id),
    /// A job for the same key was already running; nothing was started.
    AlreadyRunning(Id),
}

impl<Id> TriggerOutcome<Id> {
    pub fn id(&self) -> &Id {
        match self {
            Self::Started(id) | Self::AlreadyRunning(id) => id,
        }
    }
}

// ---------------------------------------------------------------------------
// In-flight task handles
// ---------------------------------------------------------------------------

type HandleMap = HashMap<String, JoinHandle<()>>;

/// Handles of running background tasks, keyed by job id. Each task removes
/// its own entry when it finishes.
#[derive(Clone, Default)]
pub(crate) struct InFlight {
    handles: Arc<Mutex<HandleMap>>,
}

impl InFlight {
    /// Spawn the future built by `task`. The map stays locked until the
    /// handle is stored, so the task cannot remove its entry before it
    /// exists.
    pub(crate) fn spawn<F>(&self, key: String, task: impl FnOnce(Completion) -> F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut handles = lock(&self.handles);
        let completion = Completion {
            key: key.clone(),
            handles: Arc::clone(&self.handles),
        };
        handles.insert(key, tokio::spawn(task(completion)));
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.handles).len()
    }
}

/// Removes a task's handle when released or dropped.
pub(crate) struct Completion {
    key: String,
    handles: Arc<Mutex<HandleMap>>,
}

impl Completion {
    pub(crate) fn release(self) {}
}

impl Drop for Completion {
    fn drop(&mut self) {
        lock(&self.handles).remove(&self.key);
    }
}

fn lock(handles: &Mutex<HandleMap>) -> MutexGuard<'_, HandleMap> {
    handles.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// JobRegistry
// ---------------------------------------------------------------------------

/// Per-company background jobs. At most one job per company is running.
pub struct JobRegistry {
    workflow: Arc<dyn IngestionWorkflow>,
    jobs: Arc<DashMap<String, JobSnapshot>>,
    in_flight: InFlight,
}

impl JobRegistry {
    pub fn new(workflow: Arc<dyn IngestionWorkflow>) -> Self {
        Self {
            workflow,
            jobs: Arc::new(DashMap::new()),
            in_flight: InFlight::default(),
        }
    }

    /// Start a scrape-then-ingest job unless one is already running for
    /// the company. Must be called from within a Tokio runtime.
    pub fn trigger(&self, company: &str) -> Result<TriggerOutcome> {
        self.launch(company, true)
    }

    /// Like [`trigger`](Self::trigger) but stops after the scrape.
    pub fn trigger_scrape_only(&self, company: &str) -> Result<TriggerOutcome> {
        self.launch(company, false)
    }

    fn launch(&self, company: &str, ingest: bool) -> Result<TriggerOutcome> {
        let company = normalize_company(company);
        if company.is_empty() {
            return Err(CompanyIntelError::validation("company name is empty"));
        }

        let job_id = Uuid::now_v7();
        match self.jobs.entry(company.clone()) {
            Entry::Occupied(entry) if entry.get().status == JobStatus::Running => {
                let existing = entry.get().job_id;
                info!(%company, job_id = %existing, "job already running");
                return Ok(TriggerOutcome::AlreadyRunning(existing));
            }
            Entry::Occupied(mut entry) => {
                entry.insert(JobSnapshot::running(job_id, &company));
            }
            Entry::Vacant(entry) => {
                entry.insert(JobSnapshot::running(job_id, &company));
            }
        }

        let workflow = Arc::clone(&self.workflow);
        let jobs = Arc::clone(&self.jobs);
        let span = info_span!("job", %company, %job_id);
        self.in_flight.spawn(job_id.to_string(), move |completion| {
            run_job(workflow, jobs, company, job_id, ingest, completion).instrument(span)
        });

        info!(%job_id, ingest, "job started");
        Ok(TriggerOutcome::Started(job_id))
    }

    /// Snapshot of the company's latest job. `None` when there is none.
    pub fn status(&self, company: &str) -> Option<JobSnapshot> {
        self.jobs
            .get(&normalize_company(company))
            .map(|job| job.clone())
    }

    pub fn is_running(&self, company: &str) -> bool {
        self.status(company)
            .is_some_and(|job| job.status == JobStatus::Running)
    }

    /// Forget a company's finished job. A running job is kept and `None`
    /// returned.
    pub fn remove(&self, company: &str) -> Option<JobSnapshot> {
        self.jobs
            .remove_if(&normalize_company(company), |_, job| {
                job.status != JobStatus::Running
            })
            .map(|(_, job)| job)
    }

    /// Number of background tasks still running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Writes the phase of the owning job.
struct JobProgress {
    jobs: Arc<DashMap<String, JobSnapshot>>,
    company: String,
    job_id: Uuid,
}

impl JobProgress {
    fn update(&self, f: impl FnOnce(&mut JobSnapshot)) {
        if let Some(mut job) = self.jobs.get_mut(&self.company) {
            if job.job_id == self.job_id {
                f(&mut job);
            }
        }
    }
}

impl ProgressReporter for JobProgress {
    fn phase(&self, name: &str) {
        self.update(|job| job.phase = Some(name.to_string()));
    }

    fn done(&self, result: &ScrapeResult) {
        self.update(|job| job.scrape = Some(result.clone()));
    }
}

async fn run_job(
    workflow: Arc<dyn IngestionWorkflow>,
    jobs: Arc<DashMap<String, JobSnapshot>>,
    company: String,
    job_id: Uuid,
    ingest: bool,
    completion: Completion,
) {
    let progress = JobProgress {
        jobs,
        company,
        job_id,
    };

    let work = async {
        let scrape = workflow.scrape(&progress.company, &progress).await?;
        info!(
            total_documents = scrape.total_documents,
            website_pages = scrape.website_pages,
            search_pages = scrape.search_pages,
            wikipedia_scraped = scrape.wikipedia_scraped,
            errors = scrape.errors.len(),
            "scrape finished"
        );
        progress.update(|job| job.scrape = Some(scrape));

        if ingest {
            progress.phase("Ingesting");
            let ingestion = workflow.ingest(&progress.company).await?;
            progress.update(|job| job.ingestion = Some(ingestion));
        }
        Ok::<(), CompanyIntelError>(())
    };

    let outcome = match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err("job panicked".to_string()),
    };

    progress.update(|job| {
        job.finished_at = Some(Utc::now());
        job.phase = None;
        match outcome {
            Ok(()) => job.status = JobStatus::Done,
            Err(message) => {
                job.status = JobStatus::Failed;
                job.error = Some(message);
            }
        }
    });

    match progress.jobs.get(&progress.company).map(|j| j.status) {
        Some(JobStatus::Failed) => error!("job failed"),
        _ => info!("job finished"),
    }
    // Released only after the terminal status is visible.
    completion.release();
}
