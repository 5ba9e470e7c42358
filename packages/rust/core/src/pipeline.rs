//! Company scrape pipeline: discovery → website crawl → secondary crawl → persist.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinError;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, instrument, warn};
use url::Url;

use companyintel_crawler::{CrawlLimits, CrawlOutcome, Crawler, ScrapedPage, normalize_url};
use companyintel_discovery::{
    WebSearchClient, WikipediaClient, classify_results, probe_subdomains,
};
use companyintel_shared::{
    AppConfig, CompanyIntelError, CrawlConfig, PhaseMetrics, RawDocument, Result, ScrapeResult,
    SearchResults, SourceType, normalize_company,
};
use companyintel_storage::RawStore;

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when the scrape completes.
    fn done(&self, result: &ScrapeResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _result: &ScrapeResult) {}
}

// ---------------------------------------------------------------------------
// Phase output
// ---------------------------------------------------------------------------

/// Documents, failures and fetched URLs from one phase.
#[derive(Debug, Default)]
struct PhaseOutput {
    documents: Vec<RawDocument>,
    errors: Vec<String>,
    /// Every page URL fetched, whether or not it produced a document.
    visited: Vec<String>,
}

impl PhaseOutput {
    fn from_crawl(outcome: CrawlOutcome, company: &str) -> Self {
        let scraped_at = Utc::now();
        let mut output = Self::default();
        for page in outcome.pages {
            output.visited.push(page.url.clone());
            if let Some(doc) = page.into_document(SourceType::Website, company, scraped_at) {
                output.documents.push(doc);
            }
        }
        output.errors = outcome
            .errors
            .into_iter()
            .map(|(url, reason)| format!("{url}: {reason}"))
            .collect();
        output
    }

    fn failed(message: String) -> Self {
        Self {
            errors: vec![message],
            ..Self::default()
        }
    }

    /// Counters for this output, logged as one `phase complete` event.
    fn metrics(&self, phase: &str, elapsed: Duration) -> PhaseMetrics {
        let metrics = PhaseMetrics {
            phase: phase.to_string(),
            duration_ms: elapsed.as_millis() as u64,
            pages_fetched: self.visited.len(),
            pages_kept: self.documents.len(),
            pages_dropped: self.visited.len().saturating_sub(self.documents.len()),
            errors: self.errors.len(),
        };
        log_phase(&metrics);
        metrics
    }
}

fn log_phase(metrics: &PhaseMetrics) {
    info!(
        phase = %metrics.phase,
        duration_ms = metrics.duration_ms,
        pages_fetched = metrics.pages_fetched,
        pages_kept = metrics.pages_kept,
        pages_dropped = metrics.pages_dropped,
        errors = metrics.errors,
        "phase complete"
    );
}

/// Await `fut` and report how long it took.
async fn timed<F: Future>(fut: F) -> (F::Output, Duration) {
    let started = Instant::now();
    let output = fut.await;
    (output, started.elapsed())
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs the phased scrape for one company and persists what it finds.
pub struct Orchestrator {
    config: AppConfig,
    crawler: Arc<Crawler>,
    wikipedia: WikipediaClient,
    search: WebSearchClient,
    store: RawStore,
}

impl Orchestrator {
    pub fn new(config: AppConfig, store: RawStore) -> Result<Self> {
        let crawler = Arc::new(Crawler::new(CrawlConfig::from(&config))?);
        let wikipedia = WikipediaClient::new(Arc::clone(&crawler), config.wikipedia.clone());
        let search = WebSearchClient::new(crawler.client().clone(), &config);

        Ok(Self {
            config,
            crawler,
            wikipedia,
            search,
            store,
        })
    }

    pub fn store(&self) -> &RawStore {
        &self.store
    }

    /// Scrape a company from scratch.
    ///
    /// 1. Discovery: encyclopedia and web search, concurrently
    /// 2. Website: BFS from the homepage, then subdomain probing
    /// 3. Company pages and third-party pages, concurrently
    /// 4. Persist every document, replacing the previous scrape
    ///
    /// Page- and phase-level failures are collected in
    /// [`ScrapeResult::errors`]; only storage failures are returned as `Err`.
    #[instrument(skip_all, fields(company = %company))]
    pub async fn scrape_company(
        &self,
        company: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<ScrapeResult> {
        let start = Instant::now();
        let company = normalize_company(company);
        if company.is_empty() {
            return Err(CompanyIntelError::validation("company name is empty"));
        }

        self.store.wipe(&company)?;
        info!(%company, "starting scrape");

        let crawl = &self.config.crawl;
        let mut documents: Vec<RawDocument> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut phases: Vec<PhaseMetrics> = Vec::new();

        // --- Phase 1: Discovery ---
        progress.phase("Discovering sources");
        let ((wiki, search), elapsed) = timed(async {
            tokio::join!(
                self.wikipedia.lookup(&company),
                self.search.search_company(&company, None),
            )
        })
        .await;

        let wikipedia_scraped = wiki.document.is_some();
        let (homepage, mut search) = match wiki.official_website {
            Some(official) => {
                let search = self.reclassify(search, &official);
                (Some(official), search)
            }
            None => (search.homepage_url.clone(), search),
        };
        for doc in wiki.document.into_iter().chain(wiki.related_documents) {
            seen.insert(seen_key(&doc.url));
            documents.push(doc);
        }
        let wikipedia_pages = documents.len();
        let discovery = PhaseMetrics {
            phase: "discovery".into(),
            duration_ms: elapsed.as_millis() as u64,
            pages_fetched: wikipedia_pages,
            pages_kept: wikipedia_pages,
            ..PhaseMetrics::default()
        };
        log_phase(&discovery);
        phases.push(discovery);

        // --- Phase 2: Website crawl + subdomain probing ---
        let mut website_pages = 0;
        match homepage.as_deref() {
            Some(homepage) => {
                progress.phase("Crawling website");
                let (output, elapsed) = timed(self.crawl_website(homepage, &company)).await;
                phases.push(output.metrics("website", elapsed));
                website_pages = output.documents.len();
                seen.extend(output.visited.iter().map(|u| seen_key(u)));
                seen.extend(output.documents.iter().map(|d| seen_key(&d.url)));
                documents.extend(output.documents);
                errors.extend(output.errors);

                progress.phase("Probing subdomains");
                let probed = probe_subdomains(
                    self.crawler.client(),
                    homepage,
                    &crawl.probe_subdomains,
                    Duration::from_secs(crawl.probe_timeout_secs),
                )
                .await;
                for url in probed {
                    if !seen.contains(&seen_key(&url)) && !search.company_urls.contains(&url) {
                        search.company_urls.push(url);
                    }
                }
            }
            None => warn!(%company, "no homepage found, skipping website crawl"),
        }

        // --- Phase 3: Company pages + search results ---
        let unseen = |urls: &[String], limit: usize| -> Vec<String> {
            urls.iter()
                .filter(|u| !seen.contains(&seen_key(u)))
                .take(limit)
                .cloned()
                .collect()
        };
        let seeds = unseen(&search.company_urls, crawl.company_pages_max_seeds);
        let extras = unseen(&search.extra_urls, crawl.search_max_urls);

        progress.phase("Crawling company pages and search results");
        let search_task = tokio::spawn(scrape_search_batch(
            Arc::clone(&self.crawler),
            extras,
            company.clone(),
            Duration::from_secs(crawl.search_per_url_timeout_secs),
            Duration::from_secs(crawl.search_batch_timeout_secs),
        ));
        let ((company_output, company_elapsed), (search_output, search_elapsed)) = tokio::join!(
            timed(self.crawl_company_pages(&seeds, &company, &mut seen)),
            timed(search_task),
        );
        let search_output = search_output.unwrap_or_else(|e| {
            warn!(error = %e, "search results task ended abnormally");
            PhaseOutput::failed(format!("Search results scrape failed for {company}"))
        });

        phases.push(company_output.metrics("company_pages", company_elapsed));
        phases.push(search_output.metrics("search_results", search_elapsed));
        let search_pages = search_output.documents.len();
        documents.extend(company_output.documents);
        errors.extend(company_output.errors);
        documents.extend(search_output.documents);
        errors.extend(search_output.errors);

        // --- Phase 4: Persist ---
        progress.phase("Saving documents");
        let started = Instant::now();
        let total_documents = self.store.save(&company, &documents)?;
        let persist = PhaseMetrics {
            phase: "persist".into(),
            duration_ms: started.elapsed().as_millis() as u64,
            pages_kept: total_documents,
            ..PhaseMetrics::default()
        };
        log_phase(&persist);
        phases.push(persist);

        let result = ScrapeResult {
            company,
            website_pages,
            search_pages,
            wikipedia_scraped,
            wikipedia_pages,
            total_documents,
            errors,
            phases,
        };

        info!(
            total_documents,
            website_pages,
            search_pages,
            wikipedia_pages,
            errors = result.errors.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "scrape complete"
        );

        progress.done(&result);
        Ok(result)
    }

    /// Classify search URLs against the resolved homepage instead of the
    /// search's own first hit.
    fn reclassify(&self, search: SearchResults, homepage: &str) -> SearchResults {
        let mut unique = HashSet::new();
        let urls: Vec<String> = search
            .homepage_url
            .into_iter()
            .chain(search.company_urls)
            .chain(search.extra_urls)
            .filter(|u| u != homepage && unique.insert(u.clone()))
            .collect();

        let search = classify_results(&urls, Some(homepage), &self.config.crawl.about_keywords);
        debug!(
            %homepage,
            company_urls = search.company_urls.len(),
            extra_urls = search.extra_urls.len(),
            "search results reclassified"
        );
        search
    }

    /// BFS from the homepage in its own task.
    async fn crawl_website(&self, homepage: &str, company: &str) -> PhaseOutput {
        let url = match Url::parse(homepage) {
            Ok(url) => url,
            Err(e) => return PhaseOutput::failed(format!("{homepage}: invalid URL: {e}")),
        };

        let crawler = Arc::clone(&self.crawler);
        let limits = CrawlLimits {
            max_depth: self.config.crawl.website_max_depth,
            max_pages: self.config.crawl.website_max_pages,
        };

        match tokio::spawn(async move { crawler.crawl(&url, limits).await }).await {
            Ok(outcome) => PhaseOutput::from_crawl(outcome, company),
            Err(e) => {
                warn!(%homepage, error = %e, "website crawl task ended abnormally");
                PhaseOutput::failed(join_failure("Website scrape", homepage, &e))
            }
        }
    }

    /// Shallow BFS from each seed in turn. Pages already in `seen` are
    /// dropped, and every fetched page is added to it.
    async fn crawl_company_pages(
        &self,
        seeds: &[String],
        company: &str,
        seen: &mut HashSet<String>,
    ) -> PhaseOutput {
        let limits = CrawlLimits {
            max_depth: self.config.crawl.company_pages_max_depth,
            max_pages: self.config.crawl.company_pages_max_pages,
        };
        let mut output = PhaseOutput::default();

        for (i, seed) in seeds.iter().enumerate() {
            if seen.contains(&seen_key(seed)) {
                debug!(%seed, "seed already crawled");
                continue;
            }
            let url = match Url::parse(seed) {
                Ok(url) => url,
                Err(e) => {
                    output.errors.push(format!("{seed}: invalid URL: {e}"));
                    continue;
                }
            };
            if i > 0 {
                self.crawler.pause().await;
            }

            let crawler = Arc::clone(&self.crawler);
            let crawl = match tokio::spawn(async move { crawler.crawl(&url, limits).await }).await {
                Ok(outcome) => PhaseOutput::from_crawl(outcome, company),
                Err(e) => {
                    warn!(%seed, error = %e, "company page crawl task ended abnormally");
                    output.errors.push(join_failure("Company page crawl", seed, &e));
                    continue;
                }
            };

            for doc in crawl.documents {
                if seen.insert(seen_key(&doc.url)) {
                    output.documents.push(doc);
                }
            }
            seen.extend(crawl.visited.iter().map(|u| seen_key(u)));
            output.visited.extend(crawl.visited);
            output.errors.extend(crawl.errors);
        }

        info!(
            seeds = seeds.len(),
            documents = output.documents.len(),
            "company pages crawled"
        );
        output
    }
}

// ---------------------------------------------------------------------------
// Search results batch
// ---------------------------------------------------------------------------

/// Scrape third-party pages one at a time with the politeness delay, each
/// under `per_url` and all under `batch`. Pages scraped before the batch
/// deadline are kept.
async fn scrape_search_batch(
    crawler: Arc<Crawler>,
    urls: Vec<String>,
    company: String,
    per_url: Duration,
    batch: Duration,
) -> PhaseOutput {
    let deadline = Instant::now() + batch;
    let scraped_at = Utc::now();
    let mut output = PhaseOutput::default();

    for (i, raw) in urls.iter().enumerate() {
        let step = async {
            if i > 0 {
                crawler.pause().await;
            }
            scrape_one(&crawler, raw, per_url).await
        };

        match timeout_at(deadline, step).await {
            Ok(Ok(page)) => {
                output.visited.push(page.url.clone());
                match page.into_document(SourceType::Search, &company, scraped_at) {
                    Some(doc) => output.documents.push(doc),
                    None => debug!(url = %raw, "search result dropped by content checks"),
                }
            }
            Ok(Err(reason)) => output.errors.push(format!("{raw}: {reason}")),
            Err(_) => {
                warn!(%company, scraped = output.documents.len(), "search results batch timed out");
                output
                    .errors
                    .push(format!("Search results scrape timed out for {company}"));
                break;
            }
        }
    }

    info!(
        urls = urls.len(),
        documents = output.documents.len(),
        "search results scraped"
    );
    output
}

async fn scrape_one(
    crawler: &Crawler,
    raw: &str,
    per_url: Duration,
) -> std::result::Result<ScrapedPage, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid URL: {e}"))?;
    match timeout(per_url, crawler.scrape_page(&url)).await {
        Ok(Ok(page)) => Ok(page),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {per_url:?}")),
    }
}

/// Dedup key for the cross-phase seen-set.
fn seen_key(url: &str) -> String {
    Url::parse(url)
        .map(|u| normalize_url(&u))
        .unwrap_or_else(|_| url.to_string())
}

fn join_failure(what: &str, target: &str, err: &JoinError) -> String {
    if err.is_cancelled() {
        format!("{what} cancelled for {target}")
    } else {
        format!("{what} failed for {target}")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use uuid::Uuid;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const HOME: &str = "Acme Corporation builds anvils, rocket skates and giant magnets for \
                        customers across the American southwest.";
    const ABOUT: &str = "Acme was founded in Phoenix in 1949 and has been run by the same family \
                         for three generations of careful engineers.";
    const PRODUCTS: &str = "Our catalogue lists portable holes, jet-propelled pogo sticks and \
                            the famous earthquake pills that sell out every spring.";
    const CAREERS: &str = "We are hiring welders, rocket engineers and product testers who \
                           are not afraid of heights or falling anvils.";
    const STORY: &str = "Industry analysts report that Acme Corporation posted record anvil \
                         sales this quarter despite rising steel prices.";

    #[derive(Default)]
    struct RecordingProgress {
        phases: Mutex<Vec<String>>,
        finished: Mutex<Option<ScrapeResult>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, name: &str) {
            self.phases.lock().unwrap().push(name.to_string());
        }
        fn done(&self, result: &ScrapeResult) {
            *self.finished.lock().unwrap() = Some(result.clone());
        }
    }

    fn html_page(title: &str, body: &str) -> ResponseTemplate {
        let html = format!(
            "<html><head><title>{title}</title></head><body><main>{body}</main></body></html>"
        );
        ResponseTemplate::new(200).set_body_raw(html, "text/html; charset=utf-8")
    }

    fn results_page(hrefs: &[String]) -> ResponseTemplate {
        let items: String = hrefs
            .iter()
            .map(|h| format!(r#"<div class="result"><a class="result__a" href="{h}">Result</a></div>"#))
            .collect();
        ResponseTemplate::new(200)
            .set_body_raw(format!("<html><body>{items}</body></html>"), "text/html; charset=utf-8")
    }

    fn test_config(site: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.crawl.mean_delay_ms = 0;
        config.crawl.delay_jitter_ms = 0;
        config.crawl.page_timeout_ms = 5_000;
        config.crawl.respect_robots_txt = false;
        config.crawl.allow_private_hosts = true;
        config.wikipedia.api_url = format!("{site}/w/api.php");
        config.wikipedia.site_url = site.to_string();
        config.wikipedia.retry_backoff_ms = 1;
        config.search.endpoint = format!("{site}/html/");
        config
    }

    fn temp_store() -> RawStore {
        RawStore::new(std::env::temp_dir().join(format!("companyintel-pipeline-{}", Uuid::now_v7())))
    }

    async fn mount_no_encyclopedia_hits(server: &MockServer) {
        Mock::given(path("/w/api.php"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "query": { "search": [] } })),
            )
            .mount(server)
            .await;
    }

    /// The same mock server under a different host name, so it has its own
    /// registrable domain.
    fn as_localhost(server: &MockServer) -> String {
        server.uri().replace("127.0.0.1", "localhost")
    }

    #[tokio::test]
    async fn scrape_runs_all_phases_and_persists() {
        let site = MockServer::start().await;
        let news = MockServer::start().await;
        let site_uri = site.uri();
        let news_uri = as_localhost(&news);

        mount_no_encyclopedia_hits(&site).await;
        Mock::given(method("GET"))
            .and(path("/html/"))
            .respond_with(results_page(&[
                format!("{site_uri}/"),
                format!("{site_uri}/about"),
                format!("{site_uri}/careers"),
                format!("{news_uri}/story"),
                format!("{news_uri}/gone"),
            ]))
            .mount(&site)
            .await;

        Mock::given(path("/"))
            .respond_with(html_page(
                "Acme Corporation",
                &format!(r#"<p>{HOME}</p><a href="/about">About</a> <a href="/products">Products</a>"#),
            ))
            .mount(&site)
            .await;
        Mock::given(path("/about"))
            .respond_with(html_page("About Acme", &format!("<p>{ABOUT}</p>")))
            .expect(1)
            .mount(&site)
            .await;
        Mock::given(path("/products"))
            .respond_with(html_page("Products", &format!("<p>{PRODUCTS}</p>")))
            .mount(&site)
            .await;
        Mock::given(path("/careers"))
            .respond_with(html_page("Careers", &format!("<p>{CAREERS}</p>")))
            .mount(&site)
            .await;
        Mock::given(path("/story"))
            .respond_with(html_page("Acme posts record sales", &format!("<p>{STORY}</p>")))
            .mount(&news)
            .await;
        Mock::given(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&news)
            .await;

        let store = temp_store();
        let orchestrator = Orchestrator::new(test_config(&site_uri), store.clone()).unwrap();
        let progress = RecordingProgress::default();
        let result = orchestrator
            .scrape_company("  ACME ", &progress)
            .await
            .unwrap();

        assert_eq!(result.company, "acme");
        assert!(!result.wikipedia_scraped);
        assert_eq!(result.wikipedia_pages, 0);
        assert_eq!(result.website_pages, 3);
        assert_eq!(result.search_pages, 1);
        assert_eq!(result.total_documents, 5);
        assert_eq!(result.errors.len(), 1, "{:?}", result.errors);
        assert!(result.errors[0].starts_with(&format!("{news_uri}/gone: ")));

        let docs = store.load("acme").unwrap();
        assert_eq!(docs.len(), 5);
        let search_docs: Vec<_> = docs
            .iter()
            .filter(|d| d.source_type == SourceType::Search)
            .collect();
        assert_eq!(search_docs.len(), 1);
        assert_eq!(search_docs[0].title, "Acme posts record sales");
        assert!(docs.iter().all(|d| d.company == "acme"));

        let names: Vec<_> = result.phases.iter().map(|p| p.phase.as_str()).collect();
        assert_eq!(
            names,
            ["discovery", "website", "company_pages", "search_results", "persist"]
        );
        let counts = |i: usize| {
            let p = &result.phases[i];
            (p.pages_fetched, p.pages_kept, p.pages_dropped, p.errors)
        };
        assert_eq!(counts(1), (3, 3, 0, 0));
        assert_eq!(counts(2), (1, 1, 0, 0));
        assert_eq!(counts(3), (1, 1, 0, 1));
        assert_eq!(result.phases[4].pages_kept, 5);

        let phases = progress.phases.lock().unwrap().clone();
        assert_eq!(phases.first().map(String::as_str), Some("Discovering sources"));
        assert_eq!(phases.last().map(String::as_str), Some("Saving documents"));
        assert_eq!(progress.finished.lock().unwrap().as_ref(), Some(&result));

        let _ = std::fs::remove_dir_all(store.root());
    }

    #[tokio::test]
    async fn search_results_are_classified_against_encyclopedia_homepage() {
        let site = MockServer::start().await;
        let news = MockServer::start().await;
        let site_uri = site.uri();
        let news_uri = as_localhost(&news);

        Mock::given(path("/w/api.php"))
            .and(query_param("action", "query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "query": { "search": [{ "ns": 0, "title": "Acme Corporation" }] }
            })))
            .mount(&site)
            .await;
        let infobox = format!(r#"<span class="url"><a href="{site_uri}/">acme</a></span>"#);
        Mock::given(path("/w/api.php"))
            .and(query_param("action", "parse"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "parse": { "title": "Acme Corporation", "text": { "*": infobox } }
            })))
            .mount(&site)
            .await;

        // The first search hit is a third-party story, not the company site.
        Mock::given(path("/html/"))
            .respond_with(results_page(&[
                format!("{news_uri}/story"),
                format!("{site_uri}/careers"),
            ]))
            .mount(&site)
            .await;
        Mock::given(path("/"))
            .respond_with(html_page("Acme Corporation", &format!("<p>{HOME}</p>")))
            .mount(&site)
            .await;
        Mock::given(path("/careers"))
            .respond_with(html_page("Careers", &format!("<p>{CAREERS}</p>")))
            .mount(&site)
            .await;
        Mock::given(path("/story"))
            .respond_with(html_page("Acme posts record sales", &format!("<p>{STORY}</p>")))
            .mount(&news)
            .await;

        let store = temp_store();
        let orchestrator = Orchestrator::new(test_config(&site_uri), store.clone()).unwrap();
        let result = orchestrator
            .scrape_company("acme", &SilentProgress)
            .await
            .unwrap();

        assert_eq!(result.website_pages, 1);
        assert_eq!(result.search_pages, 1);

        let docs = store.load("acme").unwrap();
        let source_of = |suffix: &str| {
            docs.iter()
                .find(|d| d.url.ends_with(suffix))
                .map(|d| d.source_type)
        };
        assert_eq!(source_of("/careers"), Some(SourceType::Website));
        assert_eq!(source_of("/story"), Some(SourceType::Search));

        let _ = std::fs::remove_dir_all(store.root());
    }

    #[tokio::test]
    async fn scrape_without_homepage_wipes_previous_data() {
        let site = MockServer::start().await;
        mount_no_encyclopedia_hits(&site).await;
        Mock::given(path("/html/"))
            .respond_with(results_page(&[]))
            .mount(&site)
            .await;

        let store = temp_store();
        let stale_dir = store.raw_dir("acme").unwrap();
        std::fs::create_dir_all(&stale_dir).unwrap();
        std::fs::write(stale_dir.join("website_001.md"), "stale").unwrap();

        let orchestrator = Orchestrator::new(test_config(&site.uri()), store.clone()).unwrap();
        let result = orchestrator
            .scrape_company("acme", &SilentProgress)
            .await
            .unwrap();

        assert_eq!(result.total_documents, 0);
        assert!(result.errors.is_empty());
        assert!(!stale_dir.join("website_001.md").exists());

        let _ = std::fs::remove_dir_all(store.root());
    }

    #[tokio::test]
    async fn empty_company_is_rejected() {
        let site = MockServer::start().await;
        let orchestrator = Orchestrator::new(test_config(&site.uri()), temp_store()).unwrap();
        let err = orchestrator
            .scrape_company("   ", &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, CompanyIntelError::Validation { .. }));
    }

    fn test_crawler() -> Arc<Crawler> {
        Arc::new(Crawler::new(CrawlConfig::for_tests()).unwrap())
    }

    #[tokio::test]
    async fn search_batch_records_per_url_timeouts_and_continues() {
        let news = MockServer::start().await;
        Mock::given(path("/slow"))
            .respond_with(html_page("Slow", &format!("<p>{STORY}</p>")).set_delay(Duration::from_secs(2)))
            .mount(&news)
            .await;
        Mock::given(path("/story"))
            .respond_with(html_page("Story", &format!("<p>{STORY}</p>")))
            .mount(&news)
            .await;

        let urls = vec![format!("{}/slow", news.uri()), format!("{}/story", news.uri())];
        let output = scrape_search_batch(
            test_crawler(),
            urls,
            "acme".into(),
            Duration::from_millis(200),
            Duration::from_secs(10),
        )
        .await;

        assert_eq!(output.documents.len(), 1);
        assert_eq!(output.documents[0].source_type, SourceType::Search);
        assert_eq!(output.errors.len(), 1);
        assert!(output.errors[0].contains("/slow: timed out after"));
    }

    #[tokio::test]
    async fn search_batch_timeout_keeps_pages_scraped_so_far() {
        let news = MockServer::start().await;
        Mock::given(path("/story"))
            .respond_with(html_page("Story", &format!("<p>{STORY}</p>")))
            .mount(&news)
            .await;
        Mock::given(path("/slow"))
            .respond_with(html_page("Slow", &format!("<p>{STORY}</p>")).set_delay(Duration::from_secs(3)))
            .mount(&news)
            .await;

        let urls = vec![
            format!("{}/story", news.uri()),
            format!("{}/slow", news.uri()),
            format!("{}/never", news.uri()),
        ];
        let output = scrape_search_batch(
            test_crawler(),
            urls,
            "acme".into(),
            Duration::from_secs(10),
            Duration::from_millis(500),
        )
        .await;

        assert_eq!(output.documents.len(), 1);
        assert_eq!(
            output.errors,
            vec!["Search results scrape timed out for acme".to_string()]
        );
    }

    #[test]
    fn join_failures_name_the_phase() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let err = rt.block_on(async {
            let handle = tokio::spawn(std::future::pending::<()>());
            handle.abort();
            handle.await.unwrap_err()
        });
        assert_eq!(
            join_failure("Website scrape", "https://acme.com", &err),
            "Website scrape cancelled for https://acme.com"
        );

        let err = rt.block_on(async {
            tokio::spawn(async {
                if true {
                    panic!("boom");
                }
            })
            .await
            .unwrap_err()
        });
        assert_eq!(
            join_failure("Company page crawl", "https://acme.com/about", &err),
            "Company page crawl failed for https://acme.com/about"
        );
    }

    #[test]
    fn seen_keys_ignore_fragments_and_trailing_slashes() {
        assert_eq!(seen_key("https://acme.com/about/"), seen_key("https://acme.com/about#team"));
        assert_ne!(seen_key("https://acme.com/about"), seen_key("https://acme.com/press"));
        assert_eq!(seen_key("not a url"), "not a url");
    }
}
