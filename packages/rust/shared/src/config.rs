//! Application configuration for Company Intel.
//!
//! Tunables live at `~/.companyintel/companyintel.toml` and fall back to
//! defaults key by key. Backend wiring (LLM, embedding, vector index, data
//! directory) comes from the environment, see [`BackendSettings`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CompanyIntelError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "companyintel.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".companyintel";

pub const ENV_LLM_ENDPOINT: &str = "COMPANYINTEL_LLM_ENDPOINT";
pub const ENV_LLM_MODEL: &str = "COMPANYINTEL_LLM_MODEL";
pub const ENV_EMBED_ENDPOINT: &str = "COMPANYINTEL_EMBED_ENDPOINT";
pub const ENV_EMBED_MODEL: &str = "COMPANYINTEL_EMBED_MODEL";
pub const ENV_QDRANT_URL: &str = "COMPANYINTEL_QDRANT_URL";
pub const ENV_QDRANT_API_KEY: &str = "COMPANYINTEL_QDRANT_API_KEY";
pub const ENV_DATA_DIR: &str = "COMPANYINTEL_DATA_DIR";

// ---------------------------------------------------------------------------
// Config structs (matching companyintel.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub crawl: CrawlSection,

    #[serde(default)]
    pub wikipedia: WikipediaConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub eval: EvalConfig,
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSection {
    /// BFS depth for the homepage crawl.
    #[serde(default = "default_website_max_depth")]
    pub website_max_depth: u32,

    /// Page cap for the homepage crawl.
    #[serde(default = "default_website_max_pages")]
    pub website_max_pages: usize,

    /// BFS depth for each company-page seed.
    #[serde(default = "default_company_pages_max_depth")]
    pub company_pages_max_depth: u32,

    /// Page cap for each company-page seed.
    #[serde(default = "default_company_pages_max_pages")]
    pub company_pages_max_pages: usize,

    /// Number of company-page seeds crawled.
    #[serde(default = "default_company_pages_max_seeds")]
    pub company_pages_max_seeds: usize,

    /// Number of third-party search result pages scraped.
    #[serde(default = "default_search_max_urls")]
    pub search_max_urls: usize,

    #[serde(default = "default_search_per_url_timeout_secs")]
    pub search_per_url_timeout_secs: u64,

    #[serde(default = "default_search_batch_timeout_secs")]
    pub search_batch_timeout_secs: u64,

    /// Per-request timeout for page fetches.
    #[serde(default = "default_page_timeout_ms")]
    pub page_timeout_ms: u64,

    /// Mean politeness delay between requests.
    #[serde(default = "default_mean_delay_ms")]
    pub mean_delay_ms: u64,

    /// Maximum deviation from the mean delay, either direction.
    #[serde(default = "default_delay_jitter_ms")]
    pub delay_jitter_ms: u64,

    #[serde(default = "default_true")]
    pub respect_robots_txt: bool,

    /// Permit loopback/private targets (mock servers in tests).
    #[serde(default)]
    pub allow_private_hosts: bool,

    /// Tags removed before markdown conversion.
    #[serde(default = "default_excluded_tags")]
    pub excluded_tags: Vec<String>,

    /// Subdomains probed under the homepage's registrable domain.
    #[serde(default = "default_probe_subdomains")]
    pub probe_subdomains: Vec<String>,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Search-result hosts equal to or under any of these domains are skipped.
    #[serde(default = "default_skip_domains")]
    pub skip_domains: Vec<String>,

    /// Company URLs containing any of these sort first.
    #[serde(default = "default_about_keywords")]
    pub about_keywords: Vec<String>,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            website_max_depth: default_website_max_depth(),
            website_max_pages: default_website_max_pages(),
            company_pages_max_depth: default_company_pages_max_depth(),
            company_pages_max_pages: default_company_pages_max_pages(),
            company_pages_max_seeds: default_company_pages_max_seeds(),
            search_max_urls: default_search_max_urls(),
            search_per_url_timeout_secs: default_search_per_url_timeout_secs(),
            search_batch_timeout_secs: default_search_batch_timeout_secs(),
            page_timeout_ms: default_page_timeout_ms(),
            mean_delay_ms: default_mean_delay_ms(),
            delay_jitter_ms: default_delay_jitter_ms(),
            respect_robots_txt: true,
            allow_private_hosts: false,
            excluded_tags: default_excluded_tags(),
            probe_subdomains: default_probe_subdomains(),
            probe_timeout_secs: default_probe_timeout_secs(),
            skip_domains: default_skip_domains(),
            about_keywords: default_about_keywords(),
        }
    }
}

fn default_website_max_depth() -> u32 {
    2
}
fn default_website_max_pages() -> usize {
    20
}
fn default_company_pages_max_depth() -> u32 {
    1
}
fn default_company_pages_max_pages() -> usize {
    10
}
fn default_company_pages_max_seeds() -> usize {
    5
}
fn default_search_max_urls() -> usize {
    10
}
fn default_search_per_url_timeout_secs() -> u64 {
    45
}
fn default_search_batch_timeout_secs() -> u64 {
    300
}
fn default_page_timeout_ms() -> u64 {
    30_000
}
fn default_mean_delay_ms() -> u64 {
    1_000
}
fn default_delay_jitter_ms() -> u64 {
    500
}
fn default_true() -> bool {
    true
}
fn default_excluded_tags() -> Vec<String> {
    to_strings(&["nav", "footer", "header", "aside", "form"])
}
fn default_probe_subdomains() -> Vec<String> {
    to_strings(&[
        "newsroom",
        "about",
        "blog",
        "press",
        "investors",
        "engineering",
        "news",
    ])
}
fn default_probe_timeout_secs() -> u64 {
    5
}
fn default_skip_domains() -> Vec<String> {
    to_strings(&[
        "wikipedia.org",
        "youtube.com",
        "facebook.com",
        "twitter.com",
        "x.com",
        "instagram.com",
        "linkedin.com",
        "tiktok.com",
        "reddit.com",
        "msn.com",
    ])
}
fn default_about_keywords() -> Vec<String> {
    to_strings(&[
        "about",
        "company",
        "newsroom",
        "press",
        "investors",
        "who-we-are",
    ])
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// `[wikipedia]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikipediaConfig {
    /// MediaWiki action API endpoint.
    #[serde(default = "default_wikipedia_api_url")]
    pub api_url: String,

    /// Base URL article paths (`/wiki/...`) are resolved against.
    #[serde(default = "default_wikipedia_site_url")]
    pub site_url: String,

    /// Attempts for the article fetch.
    #[serde(default = "default_wikipedia_max_retries")]
    pub max_retries: u32,

    /// First retry delay; doubles on each attempt.
    #[serde(default = "default_wikipedia_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Extra articles fetched alongside the main one.
    #[serde(default = "default_wikipedia_related_limit")]
    pub related_limit: usize,
}

impl Default for WikipediaConfig {
    fn default() -> Self {
        Self {
            api_url: default_wikipedia_api_url(),
            site_url: default_wikipedia_site_url(),
            max_retries: default_wikipedia_max_retries(),
            retry_backoff_ms: default_wikipedia_backoff_ms(),
            related_limit: default_wikipedia_related_limit(),
        }
    }
}

fn default_wikipedia_api_url() -> String {
    "https://en.wikipedia.org/w/api.php".into()
}
fn default_wikipedia_site_url() -> String {
    "https://en.wikipedia.org".into()
}
fn default_wikipedia_max_retries() -> u32 {
    3
}
fn default_wikipedia_backoff_ms() -> u64 {
    1_000
}
fn default_wikipedia_related_limit() -> usize {
    4
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// DuckDuckGo HTML endpoint.
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    /// Results kept per query.
    #[serde(default = "default_search_max_results")]
    pub max_results: usize,

    /// Web query templates; `{company}` is substituted.
    #[serde(default = "default_search_queries")]
    pub queries: Vec<String>,

    /// News-vertical query template.
    #[serde(default = "default_news_query")]
    pub news_query: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            max_results: default_search_max_results(),
            queries: default_search_queries(),
            news_query: default_news_query(),
        }
    }
}

fn default_search_endpoint() -> String {
    "https://html.duckduckgo.com/html/".into()
}
fn default_search_max_results() -> usize {
    10
}
fn default_search_queries() -> Vec<String> {
    to_strings(&[
        "{company} company",
        "{company} about company overview",
        "{company} company news products",
    ])
}
fn default_news_query() -> String {
    "{company} company".into()
}

/// `[chunking]` section. All sizes are in tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_hard_max_tokens")]
    pub hard_max_tokens: usize,

    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,

    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,

    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            hard_max_tokens: default_hard_max_tokens(),
            target_tokens: default_target_tokens(),
            min_tokens: default_min_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

fn default_hard_max_tokens() -> usize {
    1024
}
fn default_target_tokens() -> usize {
    512
}
fn default_min_tokens() -> usize {
    50
}
fn default_overlap_tokens() -> usize {
    64
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Expected dense vector dimensionality.
    #[serde(default = "default_dense_dim")]
    pub dimension: usize,

    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,

    /// Retries on 429/5xx before giving up on a batch.
    #[serde(default = "default_embed_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: default_dense_dim(),
            batch_size: default_embed_batch_size(),
            max_retries: default_embed_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_dense_dim() -> usize {
    768
}
fn default_embed_batch_size() -> usize {
    32
}
fn default_embed_max_retries() -> u32 {
    3
}
fn default_embed_timeout_secs() -> u64 {
    120
}

/// `[index]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Minimum cosine similarity for dense prefetch candidates.
    #[serde(default = "default_dense_score_threshold")]
    pub dense_score_threshold: f64,

    #[serde(default = "default_prefetch_limit")]
    pub dense_limit: usize,

    #[serde(default = "default_prefetch_limit")]
    pub sparse_limit: usize,

    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,

    #[serde(default = "default_index_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            dense_score_threshold: default_dense_score_threshold(),
            dense_limit: default_prefetch_limit(),
            sparse_limit: default_prefetch_limit(),
            upsert_batch_size: default_upsert_batch_size(),
            timeout_secs: default_index_timeout_secs(),
        }
    }
}

fn default_collection() -> String {
    "company_intel".into()
}
fn default_dense_score_threshold() -> f64 {
    0.3
}
fn default_prefetch_limit() -> usize {
    20
}
fn default_upsert_batch_size() -> usize {
    100
}
fn default_index_timeout_secs() -> u64 {
    30
}

/// `[retrieval]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Token budget for passages handed to the conversational surface.
    #[serde(default = "default_context_budget")]
    pub context_budget_tokens: usize,

    /// Results returned after fusion, before budgeting.
    #[serde(default = "default_fusion_limit")]
    pub fusion_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            context_budget_tokens: default_context_budget(),
            fusion_limit: default_fusion_limit(),
        }
    }
}

fn default_context_budget() -> usize {
    3000
}
fn default_fusion_limit() -> usize {
    10
}

/// `[eval]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Holds `{company}.json` datasets and `{company}/raw/` documents.
    #[serde(default = "default_golden_dir")]
    pub golden_dir: String,

    #[serde(default = "default_report_dir")]
    pub report_dir: String,

    /// Results retrieved per evaluation query.
    #[serde(default = "default_eval_limit")]
    pub search_limit: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            golden_dir: default_golden_dir(),
            report_dir: default_report_dir(),
            search_limit: default_eval_limit(),
        }
    }
}

fn default_golden_dir() -> String {
    "tests/golden".into()
}
fn default_report_dir() -> String {
    "artifacts/eval".into()
}
fn default_eval_limit() -> usize {
    5
}

// ---------------------------------------------------------------------------
// Crawl config (runtime, derived from [crawl])
// ---------------------------------------------------------------------------

/// Runtime crawl configuration with durations resolved.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub page_timeout: Duration,
    pub mean_delay: Duration,
    pub delay_jitter: Duration,
    pub respect_robots_txt: bool,
    pub allow_private_hosts: bool,
    pub excluded_tags: Vec<String>,
}

impl CrawlConfig {
    /// No delays, no robots.txt, private hosts allowed. For mock-server tests.
    pub fn for_tests() -> Self {
        Self {
            page_timeout: Duration::from_secs(5),
            mean_delay: Duration::ZERO,
            delay_jitter: Duration::ZERO,
            respect_robots_txt: false,
            allow_private_hosts: true,
            excluded_tags: default_excluded_tags(),
        }
    }
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        let crawl = &config.crawl;
        Self {
            page_timeout: Duration::from_millis(crawl.page_timeout_ms),
            mean_delay: Duration::from_millis(crawl.mean_delay_ms),
            delay_jitter: Duration::from_millis(crawl.delay_jitter_ms),
            respect_robots_txt: crawl.respect_robots_txt,
            allow_private_hosts: crawl.allow_private_hosts,
            excluded_tags: crawl.excluded_tags.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Backend settings (environment)
// ---------------------------------------------------------------------------

/// Addresses of the external backends the core depends on.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub llm_endpoint: String,
    pub llm_model: String,
    pub embed_endpoint: String,
    pub embed_model: String,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub data_dir: PathBuf,
}

impl BackendSettings {
    /// Read backend wiring from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read backend wiring through `lookup`, failing if any required key is
    /// unset or blank. All missing keys are reported at once.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let required = [
            ENV_LLM_ENDPOINT,
            ENV_LLM_MODEL,
            ENV_EMBED_ENDPOINT,
            ENV_EMBED_MODEL,
            ENV_QDRANT_URL,
        ];
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|key| get(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(CompanyIntelError::config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let value = |key: &str| get(key).unwrap_or_default();

        Ok(Self {
            llm_endpoint: value(ENV_LLM_ENDPOINT).trim_end_matches('/').to_string(),
            llm_model: value(ENV_LLM_MODEL),
            embed_endpoint: value(ENV_EMBED_ENDPOINT).trim_end_matches('/').to_string(),
            embed_model: value(ENV_EMBED_MODEL),
            qdrant_url: value(ENV_QDRANT_URL).trim_end_matches('/').to_string(),
            qdrant_api_key: get(ENV_QDRANT_API_KEY),
            data_dir: get(ENV_DATA_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("artifacts").join("data")),
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.companyintel/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CompanyIntelError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.companyintel/companyintel.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CompanyIntelError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        CompanyIntelError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CompanyIntelError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CompanyIntelError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CompanyIntelError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn full_env() -> HashMap<&'static str, String> {
        HashMap::from([
            (ENV_LLM_ENDPOINT, "http://localhost:11434/".to_string()),
            (ENV_LLM_MODEL, "qwen3".to_string()),
            (ENV_EMBED_ENDPOINT, "http://localhost:11434".to_string()),
            (ENV_EMBED_MODEL, "nomic-embed-text".to_string()),
            (ENV_QDRANT_URL, "http://localhost:6333".to_string()),
        ])
    }

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("website_max_depth"));
        assert!(toml_str.contains("company_intel"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.crawl.website_max_pages, 20);
        assert_eq!(parsed.chunking.target_tokens, 512);
        assert_eq!(parsed.crawl.probe_subdomains.len(), 7);
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let toml_str = r#"
[crawl]
website_max_depth = 3

[index]
collection = "acme_test"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.crawl.website_max_depth, 3);
        assert_eq!(config.crawl.website_max_pages, 20);
        assert_eq!(config.index.collection, "acme_test");
        assert_eq!(config.index.upsert_batch_size, 100);
        assert_eq!(config.retrieval.context_budget_tokens, 3000);
    }

    #[test]
    fn crawl_config_from_app_config() {
        let app = AppConfig::default();
        let crawl = CrawlConfig::from(&app);
        assert_eq!(crawl.page_timeout, Duration::from_secs(30));
        assert_eq!(crawl.mean_delay, Duration::from_secs(1));
        assert_eq!(crawl.delay_jitter, Duration::from_millis(500));
        assert!(crawl.respect_robots_txt);
        assert!(!crawl.allow_private_hosts);
    }

    #[test]
    fn backend_settings_from_complete_env() {
        let env = full_env();
        let settings = BackendSettings::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(settings.llm_endpoint, "http://localhost:11434");
        assert_eq!(settings.qdrant_url, "http://localhost:6333");
        assert!(settings.qdrant_api_key.is_none());
        assert_eq!(settings.data_dir, PathBuf::from("artifacts").join("data"));
    }

    #[test]
    fn backend_settings_fail_fast_listing_missing_keys() {
        let mut env = full_env();
        env.remove(ENV_QDRANT_URL);
        env.insert(ENV_EMBED_MODEL, "   ".to_string());

        let err = BackendSettings::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains(ENV_QDRANT_URL));
        assert!(msg.contains(ENV_EMBED_MODEL));
        assert!(!msg.contains(ENV_LLM_MODEL));
    }
}
