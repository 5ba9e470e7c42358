//! Polite, scope-aware web crawler engine.
//!
//! The crawler performs a breadth-first traversal from a start URL, one
//! request at a time with a randomized delay between requests, staying on the
//! start site, fetching HTML only and honouring robots.txt. Page failures are
//! collected, never raised.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

use companyintel_markdown::ConvertOptions;
use companyintel_shared::{CompanyIntelError, CrawlConfig, Result};

use crate::page::ScrapedPage;
use crate::robots::RobotsRules;

/// User-Agent string for crawl requests.
pub const USER_AGENT: &str = concat!("CompanyIntelBot/", env!("CARGO_PKG_VERSION"));

/// Token matched against robots.txt `User-agent` lines.
const ROBOTS_AGENT: &str = "CompanyIntelBot";

/// Link targets with these extensions are never queued.
const NON_HTML_EXTENSIONS: &[&str] = &[
    "pdf", "jpg", "jpeg", "png", "gif", "svg", "webp", "ico", "css", "js", "json", "xml", "zip",
    "gz", "tar", "mp3", "mp4", "mov", "avi", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "dmg",
    "exe", "csv", "rss",
];

// ---------------------------------------------------------------------------
// CrawlLimits / CrawlOutcome
// ---------------------------------------------------------------------------

/// Bounds for one breadth-first crawl.
#[derive(Debug, Clone, Copy)]
pub struct CrawlLimits {
    /// Maximum link depth from the start URL (start page is depth 0).
    pub max_depth: u32,
    /// Maximum number of page fetches attempted.
    pub max_pages: usize,
}

/// Pages and failures from one crawl.
#[derive(Debug, Clone, Default)]
pub struct CrawlOutcome {
    /// Successfully fetched pages, in fetch order.
    pub pages: Vec<ScrapedPage>,
    /// Failures as (url, reason).
    pub errors: Vec<(String, String)>,
}

/// A fetched page plus the in-page links found on it.
struct FetchedDocument {
    page: ScrapedPage,
    links: Vec<Url>,
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// Sequential BFS crawler and single-page scraper.
pub struct Crawler {
    config: CrawlConfig,
    client: Client,
    page_options: ConvertOptions,
    /// robots.txt rules per origin, fetched on first use.
    robots: Mutex<HashMap<String, Arc<RobotsRules>>>,
}

impl Crawler {
    /// Create a new crawler with the given configuration.
    pub fn new(config: CrawlConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.page_timeout)
            .build()
            .map_err(|e| CompanyIntelError::Network(format!("failed to build HTTP client: {e}")))?;

        let page_options = ConvertOptions {
            content_selector: None,
            excluded_tags: config.excluded_tags.clone(),
            excluded_selectors: Vec::new(),
        };

        Ok(Self {
            config,
            client,
            page_options,
            robots: Mutex::new(HashMap::new()),
        })
    }

    /// Breadth-first crawl from `start_url` within `limits`.
    #[instrument(skip_all, fields(start_url = %start_url, max_depth = limits.max_depth, max_pages = limits.max_pages))]
    pub async fn crawl(&self, start_url: &Url, limits: CrawlLimits) -> CrawlOutcome {
        let mut scope = SiteScope::new(start_url);
        let mut queue: VecDeque<(Url, u32)> = VecDeque::from([(start_url.clone(), 0)]);
        let mut visited: HashSet<String> = HashSet::new();
        let mut outcome = CrawlOutcome::default();
        let mut attempted: usize = 0;

        info!("starting crawl");

        while let Some((url, depth)) = queue.pop_front() {
            if attempted >= limits.max_pages {
                debug!(queued = queue.len() + 1, "page limit reached");
                break;
            }

            if !visited.insert(normalize_url(&url)) {
                continue;
            }

            if !scope.in_scope(&url) {
                debug!(%url, "out of scope, skipping");
                continue;
            }

            if let Err(reason) = self.check_allowed(&url).await {
                outcome.errors.push((url.to_string(), reason));
                continue;
            }

            if attempted > 0 {
                self.pause().await;
            }
            attempted += 1;

            match self.fetch_document(&url, &self.page_options).await {
                Ok(fetched) => {
                    // Follow the site across a redirect of the start page
                    // (e.g. acme.com -> www.acme.com).
                    if depth == 0 {
                        if let Ok(final_url) = Url::parse(&fetched.page.url) {
                            scope.admit(&final_url);
                        }
                    }
                    if let Ok(final_url) = Url::parse(&fetched.page.url) {
                        visited.insert(normalize_url(&final_url));
                    }

                    if depth < limits.max_depth {
                        for link in fetched.links {
                            if scope.in_scope(&link) && !visited.contains(&normalize_url(&link)) {
                                queue.push_back((link, depth + 1));
                            }
                        }
                    }

                    outcome.pages.push(fetched.page);
                }
                Err(e) => {
                    warn!(%url, error = %e, "page fetch failed");
                    outcome.errors.push((url.to_string(), e.to_string()));
                }
            }
        }

        info!(
            pages = outcome.pages.len(),
            errors = outcome.errors.len(),
            "crawl completed"
        );

        outcome
    }

    /// Fetch one page without following links.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn scrape_page(&self, url: &Url) -> Result<ScrapedPage> {
        self.scrape_page_with(url, &self.page_options).await
    }

    /// Fetch one page, extracting content with custom conversion options.
    pub async fn scrape_page_with(&self, url: &Url, options: &ConvertOptions) -> Result<ScrapedPage> {
        self.check_allowed(url)
            .await
            .map_err(|reason| CompanyIntelError::validation(format!("{url}: {reason}")))?;
        Ok(self.fetch_document(url, options).await?.page)
    }

    /// Sleep for the politeness delay: the configured mean plus or minus a
    /// uniformly random jitter.
    pub async fn pause(&self) {
        let delay = politeness_delay(self.config.mean_delay, self.config.delay_jitter);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// The underlying HTTP client, for lightweight requests (probes, APIs).
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// SSRF and robots.txt gate. Returns the refusal reason.
    async fn check_allowed(&self, url: &Url) -> std::result::Result<(), String> {
        if !self.config.allow_private_hosts && is_ssrf_target(url) {
            warn!(%url, "SSRF protection: blocked");
            return Err("blocked: private or local address".into());
        }

        if self.config.respect_robots_txt {
            let rules = self.robots_for(url).await;
            let mut path = url.path().to_string();
            if let Some(query) = url.query() {
                path.push('?');
                path.push_str(query);
            }
            if !rules.is_allowed(&path) {
                debug!(%url, "disallowed by robots.txt");
                return Err("disallowed by robots.txt".into());
            }
        }

        Ok(())
    }

    /// robots.txt rules for the URL's origin. Missing or unreadable files
    /// allow everything.
    async fn robots_for(&self, url: &Url) -> Arc<RobotsRules> {
        let origin = url.origin().ascii_serialization();

        if let Some(rules) = self.lock_robots().get(&origin) {
            return Arc::clone(rules);
        }

        let robots_url = format!("{origin}/robots.txt");
        let rules = match self.client.get(&robots_url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => RobotsRules::parse(&body, ROBOTS_AGENT),
                Err(_) => RobotsRules::allow_all(),
            },
            Ok(resp) => {
                debug!(%robots_url, status = %resp.status(), "no robots.txt");
                RobotsRules::allow_all()
            }
            Err(e) => {
                debug!(%robots_url, error = %e, "robots.txt fetch failed");
                RobotsRules::allow_all()
            }
        };

        let rules = Arc::new(rules);
        self.lock_robots().insert(origin, Arc::clone(&rules));
        rules
    }

    fn lock_robots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<RobotsRules>>> {
        // A poisoned cache only ever holds complete entries.
        self.robots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// GET a page, require HTML, convert it and collect its links.
    async fn fetch_document(&self, url: &Url, options: &ConvertOptions) -> Result<FetchedDocument> {
        debug!(%url, "fetching page");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| CompanyIntelError::Network(describe_request_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompanyIntelError::Network(format!("HTTP {status}")));
        }

        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !is_html_content_type(content_type) {
                return Err(CompanyIntelError::validation(format!(
                    "unsupported content type '{content_type}'"
                )));
            }
        }

        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| CompanyIntelError::Network(format!("body read failed: {e}")))?;

        let links = {
            let doc = Html::parse_document(&body);
            extract_links(&doc, &final_url)
        };

        let converted = companyintel_markdown::convert(&body, options)?;
        let markdown = Some(converted.markdown).filter(|md| !md.trim().is_empty());

        Ok(FetchedDocument {
            page: ScrapedPage {
                url: final_url.to_string(),
                title: converted.title,
                markdown,
            },
            links,
        })
    }
}

fn describe_request_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "timed out".to_string()
    } else {
        e.to_string()
    }
}

/// Uniform sample from `[mean - jitter, mean + jitter]`, floored at zero.
fn politeness_delay(mean: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return mean;
    }
    let mean_ms = mean.as_millis() as i64;
    let jitter_ms = jitter.as_millis() as i64;
    let sampled = rand::rng().random_range(mean_ms - jitter_ms..=mean_ms + jitter_ms);
    Duration::from_millis(sampled.max(0) as u64)
}

fn is_html_content_type(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.contains("text/html") || ct.contains("application/xhtml")
}

// ---------------------------------------------------------------------------
// Scope checking
// ---------------------------------------------------------------------------

/// The set of sites a crawl may visit: the start site, plus wherever the
/// start page redirected to.
struct SiteScope {
    sites: HashSet<String>,
}

impl SiteScope {
    fn new(start_url: &Url) -> Self {
        let mut scope = Self {
            sites: HashSet::new(),
        };
        scope.admit(start_url);
        scope
    }

    fn admit(&mut self, url: &Url) {
        if let Some(key) = site_key(url) {
            self.sites.insert(key);
        }
    }

    fn in_scope(&self, url: &Url) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }
        if has_non_html_extension(url) {
            return false;
        }
        site_key(url).is_some_and(|key| self.sites.contains(&key))
    }
}

/// Host (without a leading `www.`) and effective port.
fn site_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    let port = url.port_or_known_default().unwrap_or(0);
    Some(format!("{host}:{port}"))
}

fn has_non_html_extension(url: &Url) -> bool {
    let last_segment = url.path().rsplit('/').next().unwrap_or("");
    match last_segment.rsplit_once('.') {
        Some((_, ext)) => NON_HTML_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
pub fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    if let Some(host) = url.host_str() {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return is_private_ip(&ip);
        }
        if host == "localhost" || host.ends_with(".local") || host.ends_with(".internal") {
            return true;
        }
    }

    false
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// Extract all links from a document, resolved against the base URL.
fn extract_links(doc: &Html, base_url: &Url) -> Vec<Url> {
    let Ok(link_sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let mut links = Vec::new();

    for el in doc.select(&link_sel) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }

        if let Ok(mut resolved) = base_url.join(href) {
            resolved.set_fragment(None);
            links.push(resolved);
        }
    }

    links
}

/// Normalize a URL for deduplication (strip fragment and non-root trailing slash).
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let mut s = normalized.to_string();
    if s.ends_with('/') && normalized.path() != "/" {
        s.pop();
    }
    s
}
