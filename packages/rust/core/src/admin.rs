//! Company listing and deletion.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use companyintel_index::VectorStore;
use companyintel_shared::{CompanyIntelError, Result, normalize_company};
use companyintel_storage::{CompanyEntry, RawStore};

use crate::jobs::JobRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub company: String,
    pub vectors_deleted: u64,
    /// Whether a raw-document directory existed and was removed.
    pub raw_removed: bool,
}

impl DeleteOutcome {
    pub fn message(&self) -> String {
        match (self.vectors_deleted, self.raw_removed) {
            (0, false) => format!("Nothing stored for '{}'", self.company),
            (n, false) => format!("Deleted {n} vectors for '{}'", self.company),
            (n, true) => format!(
                "Deleted {n} vectors and raw documents for '{}'",
                self.company
            ),
        }
    }
}

pub struct Admin {
    store: RawStore,
    index: Arc<VectorStore>,
    jobs: Arc<JobRegistry>,
}

impl Admin {
    pub fn new(store: RawStore, index: Arc<VectorStore>, jobs: Arc<JobRegistry>) -> Self {
        Self { store, index, jobs }
    }

    /// Companies with raw documents, sorted by name.
    pub fn list_companies(&self) -> Result<Vec<CompanyEntry>> {
        self.store.list_companies()
    }

    /// Remove a company's vectors, raw documents and job record. Rejected
    /// while a job for the company is running.
    #[instrument(skip_all, fields(company = %company))]
    pub async fn delete_company(&self, company: &str) -> Result<DeleteOutcome> {
        let company = normalize_company(company);
        if company.is_empty() {
            return Err(CompanyIntelError::validation("company name is empty"));
        }
        if self.jobs.is_running(&company) {
            return Err(CompanyIntelError::validation(format!(
                "a job for '{company}' is still running"
            )));
        }

        self.index.ensure_collection().await?;
        let vectors_deleted = self.index.delete_company(&company).await?;

        let raw_dir = self.store.raw_dir(&company)?;
        let raw_removed = raw_dir.is_dir();
        if raw_removed {
            self.store.wipe(&company)?;
        }
        self.jobs.remove(&company);

        info!(vectors_deleted, raw_removed, "company deleted");
        Ok(DeleteOutcome {
            company,
            vectors_deleted,
            raw_removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use tokio::sync::Notify;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use companyintel_shared::{
        BackendSettings, IndexConfig, IngestionResult, RawDocument, ScrapeResult, SourceType,
    };

    use crate::jobs::{IngestionWorkflow, JobStatus};
    use crate::pipeline::ProgressReporter;

    use super::*;

    #[derive(Default)]
    struct GatedWorkflow {
        gate: Notify,
    }

    #[async_trait]
    impl IngestionWorkflow for GatedWorkflow {
        async fn scrape(&self, company: &str, _progress: &dyn ProgressReporter) -> Result<ScrapeResult> {
            self.gate.notified().await;
            Ok(ScrapeResult {
                company: company.to_string(),
                ..ScrapeResult::default()
            })
        }

        async fn ingest(&self, company: &str) -> Result<IngestionResult> {
            Ok(IngestionResult {
                company: company.to_string(),
                ..IngestionResult::default()
            })
        }
    }

    fn qdrant_ok(result: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "result": result, "status": "ok" }))
    }

    fn admin(server: &MockServer, workflow: Arc<GatedWorkflow>) -> (Admin, Arc<JobRegistry>) {
        let settings = BackendSettings {
            llm_endpoint: "http://llm.invalid".into(),
            llm_model: "llm".into(),
            embed_endpoint: server.uri(),
            embed_model: "m".into(),
            qdrant_url: server.uri(),
            qdrant_api_key: None,
            data_dir: PathBuf::from("unused"),
        };
        let store = RawStore::new(std::env::temp_dir().join(format!("companyintel-admin-{}", Uuid::now_v7())));
        let index = Arc::new(VectorStore::new(&settings, &IndexConfig::default(), 2).unwrap());
        let jobs = Arc::new(JobRegistry::new(workflow));
        (Admin::new(store, index, Arc::clone(&jobs)), jobs)
    }

    async fn mount_index(server: &MockServer, count: u64, deletes: u64) {
        Mock::given(path("/collections/company_intel/exists"))
            .respond_with(qdrant_ok(json!({ "exists": true })))
            .mount(server)
            .await;
        Mock::given(path("/collections/company_intel/points/count"))
            .respond_with(qdrant_ok(json!({ "count": count })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/collections/company_intel/points/delete"))
            .respond_with(qdrant_ok(json!({ "status": "completed" })))
            .expect(deletes)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn deletes_vectors_raw_documents_and_job() {
        let server = MockServer::start().await;
        mount_index(&server, 7, 1).await;
        let workflow = Arc::new(GatedWorkflow::default());
        let (admin, jobs) = admin(&server, Arc::clone(&workflow));

        admin
            .store
            .save(
                "acme",
                &[RawDocument {
                    url: "https://acme.com".into(),
                    title: "Acme".into(),
                    content: "Anvils.".into(),
                    source_type: SourceType::Website,
                    company: "acme".into(),
                    scraped_at: Utc::now(),
                }],
            )
            .unwrap();
        assert_eq!(admin.list_companies().unwrap().len(), 1);

        jobs.trigger("acme").unwrap();
        workflow.gate.notify_one();
        for _ in 0..100 {
            if jobs.status("acme").is_some_and(|j| j.status != JobStatus::Running) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let outcome = admin.delete_company(" ACME ").await.unwrap();
        assert_eq!(
            outcome,
            DeleteOutcome {
                company: "acme".into(),
                vectors_deleted: 7,
                raw_removed: true,
            }
        );
        assert!(admin.list_companies().unwrap().is_empty());
        assert!(jobs.status("acme").is_none());

        let _ = std::fs::remove_dir_all(admin.store.root());
    }

    #[tokio::test]
    async fn unknown_company_deletes_nothing() {
        let server = MockServer::start().await;
        mount_index(&server, 0, 0).await;
        let (admin, _) = admin(&server, Arc::new(GatedWorkflow::default()));

        let outcome = admin.delete_company("ghost").await.unwrap();
        assert_eq!(outcome.vectors_deleted, 0);
        assert!(!outcome.raw_removed);
        assert_eq!(outcome.message(), "Nothing stored for 'ghost'");
    }

    #[tokio::test]
    async fn running_job_blocks_delete() {
        let server = MockServer::start().await;
        mount_index(&server, 3, 0).await;
        let workflow = Arc::new(GatedWorkflow::default());
        let (admin, jobs) = admin(&server, Arc::clone(&workflow));

        jobs.trigger("acme").unwrap();
        let err = admin.delete_company("acme").await.unwrap_err();
        assert!(matches!(err, CompanyIntelError::Validation { .. }));

        workflow.gate.notify_one();
    }
}
