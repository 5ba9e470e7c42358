//! Shared types, error model, and configuration for Company Intel.
//!
//! This crate is the foundation depended on by all other Company Intel crates.
//! It provides:
//! - [`CompanyIntelError`], the unified error type
//! - Domain types ([`RawDocument`], [`Chunk`], [`ScrapeResult`], ...)
//! - Configuration ([`AppConfig`], [`CrawlConfig`], [`BackendSettings`])

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BackendSettings, ChunkingConfig, CrawlConfig, CrawlSection, EmbeddingConfig,
    EvalConfig, IndexConfig, RetrievalConfig, SearchConfig, WikipediaConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{CompanyIntelError, Result};
pub use types::{
    Chunk, ChunkMetadata, IngestionResult, PhaseMetrics, RawDocument, ScrapeResult, SearchHit,
    SearchResults, SourceType, SparseVector, WikipediaResult, normalize_company,
};
