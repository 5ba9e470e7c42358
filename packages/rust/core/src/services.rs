//! Wiring of the long-lived components shared by every surface.

use std::sync::Arc;

use tracing::info;

use companyintel_chunker::{Chunker, Tokenizer};
use companyintel_index::{Embedder, VectorStore};
use companyintel_shared::{AppConfig, BackendSettings, Result};
use companyintel_storage::RawStore;

use crate::admin::Admin;
use crate::eval::EvalRunner;
use crate::ingest::Ingestor;
use crate::jobs::{CompanyPipeline, JobRegistry};
use crate::pipeline::Orchestrator;
use crate::retrieval::Retriever;

/// Every component, built once per process and shared behind `Arc`s.
pub struct Services {
    pub config: AppConfig,
    pub settings: BackendSettings,
    pub orchestrator: Arc<Orchestrator>,
    pub ingestor: Arc<Ingestor>,
    pub index: Arc<VectorStore>,
    pub jobs: Arc<JobRegistry>,
    pub retriever: Retriever,
    pub eval: EvalRunner,
    pub admin: Admin,
}

impl Services {
    /// Build all components. No backend is contacted until first use.
    pub fn new(config: AppConfig, settings: BackendSettings) -> Result<Self> {
        let store = RawStore::new(&settings.data_dir);
        let tokenizer = Arc::new(Tokenizer::new()?);
        let chunker = Arc::new(Chunker::new(Arc::clone(&tokenizer), config.chunking.clone()));
        let embedder = Arc::new(Embedder::new(&settings, &config.embedding)?);
        let index = Arc::new(VectorStore::new(
            &settings,
            &config.index,
            embedder.dimension(),
        )?);

        let orchestrator = Arc::new(Orchestrator::new(config.clone(), store.clone())?);
        let ingestor = Arc::new(Ingestor::new(
            chunker,
            Arc::clone(&embedder),
            Arc::clone(&index),
        ));
        let jobs = Arc::new(JobRegistry::new(Arc::new(CompanyPipeline::new(
            Arc::clone(&orchestrator),
            Arc::clone(&ingestor),
        ))));
        let retriever = Retriever::new(
            Arc::clone(&embedder),
            Arc::clone(&index),
            tokenizer,
            config.retrieval.clone(),
        );
        let eval = EvalRunner::new(
            Arc::clone(&ingestor),
            embedder,
            Arc::clone(&index),
            config.eval.clone(),
        );
        let admin = Admin::new(store, Arc::clone(&index), Arc::clone(&jobs));

        info!(
            data_dir = %settings.data_dir.display(),
            qdrant = %settings.qdrant_url,
            collection = index.collection(),
            "services ready"
        );

        Ok(Self {
            config,
            settings,
            orchestrator,
            ingestor,
            index,
            jobs,
            retriever,
            eval,
            admin,
        })
    }
}
