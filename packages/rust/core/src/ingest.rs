//! Ingestion: raw documents → chunks → vectors → index.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use companyintel_chunker::Chunker;
use companyintel_index::{Embedder, VectorStore};
use companyintel_shared::{IngestionResult, Result, normalize_company};
use companyintel_storage::RawStore;

/// Rebuilds a company's slice of the index from its raw documents.
pub struct Ingestor {
    chunker: Arc<Chunker>,
    embedder: Arc<Embedder>,
    index: Arc<VectorStore>,
}

impl Ingestor {
    pub fn new(chunker: Arc<Chunker>, embedder: Arc<Embedder>, index: Arc<VectorStore>) -> Self {
        Self {
            chunker,
            embedder,
            index,
        }
    }

    /// Replace the company's vectors with freshly embedded chunks of the
    /// documents in `store`.
    ///
    /// Existing vectors are deleted first, so a company with no documents
    /// ends up with none indexed. Embedding and index failures propagate.
    #[instrument(skip_all, fields(company = %company))]
    pub async fn ingest_company(&self, company: &str, store: &RawStore) -> Result<IngestionResult> {
        let company = normalize_company(company);

        self.index.ensure_collection().await?;
        self.index.delete_company(&company).await?;

        let docs = store.load(&company)?;
        if docs.is_empty() {
            warn!("no raw documents to ingest");
            return Ok(IngestionResult {
                company,
                ..IngestionResult::default()
            });
        }

        let chunks = self.chunker.chunk_all(&docs);
        if chunks.is_empty() {
            warn!(documents = docs.len(), "no chunks produced");
            return Ok(IngestionResult {
                company,
                documents_loaded: docs.len(),
                ..IngestionResult::default()
            });
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let (dense, sparse) = self.embedder.embed_texts(&texts).await?;
        let vectors_stored = self.index.upsert(&chunks, &dense, &sparse).await?;

        info!(
            documents = docs.len(),
            chunks = chunks.len(),
            vectors_stored,
            "ingestion complete"
        );

        Ok(IngestionResult {
            company,
            documents_loaded: docs.len(),
            chunks_produced: chunks.len(),
            vectors_stored,
        })
    }
}
