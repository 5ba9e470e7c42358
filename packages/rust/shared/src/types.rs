//! Core domain types shared by the ingestion and retrieval halves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Normalize a company name into its storage/index key (trimmed, lowercase).
pub fn normalize_company(name: &str) -> String {
    name.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// SourceType
// ---------------------------------------------------------------------------

/// Where a raw document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// The company's own site (homepage crawl, subdomains, company pages).
    Website,
    /// An encyclopedia article.
    Wikipedia,
    /// A third-party page found through web search.
    Search,
}

impl SourceType {
    /// All variants, in filename/reporting order.
    pub const ALL: [SourceType; 3] = [Self::Website, Self::Wikipedia, Self::Search];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Website => "website",
            Self::Wikipedia => "wikipedia",
            Self::Search => "search",
        }
    }

    /// Parse a stored value, falling back to [`SourceType::Website`] for
    /// anything unrecognized.
    pub fn parse_lenient(s: &str) -> Self {
        s.parse().unwrap_or(Self::Website)
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceType {
    type Err = crate::CompanyIntelError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "website" => Ok(Self::Website),
            "wikipedia" => Ok(Self::Wikipedia),
            "search" => Ok(Self::Search),
            other => Err(crate::CompanyIntelError::parse(format!(
                "unknown source type '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// RawDocument
// ---------------------------------------------------------------------------

/// One scraped and cleaned page, the unit of ingestion input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub url: String,
    pub title: String,
    /// Cleaned markdown body.
    pub content: String,
    pub source_type: SourceType,
    /// Normalized company key.
    pub company: String,
    pub scraped_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Discovery artifacts
// ---------------------------------------------------------------------------

/// URLs found by the web-search lookup, split by ownership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults {
    /// Resolved homepage, if any.
    pub homepage_url: Option<String>,
    /// Same-domain candidates, about-like pages first.
    pub company_urls: Vec<String>,
    /// Third-party candidates.
    pub extra_urls: Vec<String>,
}

/// Outcome of the encyclopedia lookup.
#[derive(Debug, Clone, Default)]
pub struct WikipediaResult {
    pub document: Option<RawDocument>,
    /// Official website from the article's infobox.
    pub official_website: Option<String>,
    pub related_documents: Vec<RawDocument>,
}

// ---------------------------------------------------------------------------
// ScrapeResult / IngestionResult
// ---------------------------------------------------------------------------

/// Aggregate outcome of one company scrape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub company: String,
    pub website_pages: usize,
    pub search_pages: usize,
    pub wikipedia_scraped: bool,
    pub wikipedia_pages: usize,
    pub total_documents: usize,
    /// Non-fatal page- and phase-level errors, in the order they occurred.
    pub errors: Vec<String>,
    /// Timing and page counters, one entry per phase in run order.
    #[serde(default)]
    pub phases: Vec<PhaseMetrics>,
}

/// Counters for one scrape phase.
///
/// `pages_fetched` counts pages that came back as HTML; each of those is
/// either kept as a document or dropped by the content checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub phase: String,
    pub duration_ms: u64,
    pub pages_fetched: usize,
    pub pages_kept: usize,
    pub pages_dropped: usize,
    pub errors: usize,
}

/// Summary of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionResult {
    pub company: String,
    pub documents_loaded: usize,
    pub chunks_produced: usize,
    pub vectors_stored: usize,
}

// ---------------------------------------------------------------------------
// Chunks and vectors
// ---------------------------------------------------------------------------

/// Provenance attached to every chunk and stored as the index payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub url: String,
    pub title: String,
    pub company: String,
    pub source_type: SourceType,
    pub chunk_index: usize,
    pub scraped_at: DateTime<Utc>,
}

/// A retrieval-sized passage with a deterministic identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Term-id/weight pairs for lexical matching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// One fused search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub company: String,
    pub source_type: String,
    pub text: String,
}
