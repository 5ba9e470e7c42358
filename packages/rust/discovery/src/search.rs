//! Web-search lookup over the DuckDuckGo HTML endpoint.
//!
//! Several query templates plus one news-vertical query are issued in turn;
//! result links are decoded, deduplicated, filtered against a deny list and
//! classified against the company's registrable domain.

use std::collections::HashSet;
use std::sync::LazyLock;

use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument, warn};

use companyintel_shared::{AppConfig, CompanyIntelError, Result, SearchResults};

use crate::domain::{host_of, is_homepage, registrable_domain_of};

static RESULT_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.result__a").expect("valid selector"));

/// Client for the web-search lookup.
pub struct WebSearchClient {
    client: Client,
    endpoint: String,
    max_results: usize,
    queries: Vec<String>,
    news_query: String,
    skip_domains: Vec<String>,
    about_keywords: Vec<String>,
}

impl WebSearchClient {
    pub fn new(client: Client, config: &AppConfig) -> Self {
        Self {
            client,
            endpoint: config.search.endpoint.clone(),
            max_results: config.search.max_results,
            queries: config.search.queries.clone(),
            news_query: config.search.news_query.clone(),
            skip_domains: config.crawl.skip_domains.clone(),
            about_keywords: config.crawl.about_keywords.clone(),
        }
    }

    /// Search for a company and classify what comes back.
    ///
    /// A failed query is logged and skipped; this never errors.
    #[instrument(skip_all, fields(company = %company))]
    pub async fn search_company(&self, company: &str, known_homepage: Option<&str>) -> SearchResults {
        let mut seen = HashSet::new();
        let mut web_urls = Vec::new();

        for template in &self.queries {
            let query = template.replace("{company}", company);
            match self.run_query(&query, false).await {
                Ok(links) => self.collect(links, &mut seen, &mut web_urls),
                Err(e) => warn!(%query, error = %e, "web search failed"),
            }
        }

        let mut news_urls = Vec::new();
        let news_query = self.news_query.replace("{company}", company);
        match self.run_query(&news_query, true).await {
            Ok(links) => self.collect(links, &mut seen, &mut news_urls),
            Err(e) => warn!(query = %news_query, error = %e, "news search failed"),
        }

        info!(
            web = web_urls.len(),
            news = news_urls.len(),
            "search results collected"
        );

        web_urls.extend(news_urls);
        let results = classify_results(&web_urls, known_homepage, &self.about_keywords);

        info!(
            homepage = results.homepage_url.as_deref().unwrap_or(""),
            company_urls = results.company_urls.len(),
            extra_urls = results.extra_urls.len(),
            "search results classified"
        );

        results
    }

    async fn run_query(&self, query: &str, news: bool) -> Result<Vec<String>> {
        debug!(%query, news, "issuing search query");

        let mut request = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("kl", "us-en")]);
        if news {
            request = request.query(&[("iar", "news"), ("ia", "news")]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CompanyIntelError::Network(format!("search request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompanyIntelError::Network(format!(
                "search endpoint returned HTTP {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CompanyIntelError::Network(format!("search body read failed: {e}")))?;

        Ok(parse_result_links(&body, self.max_results))
    }

    /// Append new, allowed URLs to `out`.
    fn collect(&self, links: Vec<String>, seen: &mut HashSet<String>, out: &mut Vec<String>) {
        for url in links {
            if seen.contains(&url) || self.is_skipped(&url) {
                continue;
            }
            seen.insert(url.clone());
            out.push(url);
        }
    }

    fn is_skipped(&self, url: &str) -> bool {
        match host_of(url) {
            Some(host) => self
                .skip_domains
                .iter()
                .any(|d| host == *d || host.ends_with(&format!(".{d}"))),
            None => true,
        }
    }
}

/// Result links from a DuckDuckGo HTML results page, in page order.
pub fn parse_result_links(html: &str, limit: usize) -> Vec<String> {
    let doc = Html::parse_document(html);
    doc.select(&RESULT_LINK)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(decode_result_link)
        .take(limit)
        .collect()
}

/// Unwrap DuckDuckGo's `/l/?uddg=` redirect links; pass direct links through.
fn decode_result_link(href: &str) -> Option<String> {
    let href = href.trim();
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else if href.starts_with('/') {
        format!("https://duckduckgo.com{href}")
    } else {
        href.to_string()
    };

    let parsed = url::Url::parse(&absolute).ok()?;
    if parsed.path().starts_with("/l/") {
        let target = parsed
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned())?;
        return target.starts_with("http").then_some(target);
    }

    matches!(parsed.scheme(), "http" | "https").then_some(absolute)
}

/// Split search URLs into company and third-party candidates.
///
/// The homepage is `known_homepage` when given, else the first URL. URLs on
/// the homepage's registrable domain are company URLs (about-like ones first)
/// except the bare homepage itself; everything else is extra.
pub fn classify_results(
    urls: &[String],
    known_homepage: Option<&str>,
    about_keywords: &[String],
) -> SearchResults {
    let Some(homepage) = known_homepage
        .map(str::to_string)
        .or_else(|| urls.first().cloned())
    else {
        return SearchResults::default();
    };

    let root = registrable_domain_of(&homepage).unwrap_or_default();
    let mut company_urls = Vec::new();
    let mut extra_urls = Vec::new();

    for url in urls {
        if is_homepage(url, &root) {
            continue;
        }
        if registrable_domain_of(url).is_some_and(|d| d == root) {
            company_urls.push(url.clone());
        } else {
            extra_urls.push(url.clone());
        }
    }

    let is_about = |url: &String| {
        let lower = url.to_lowercase();
        about_keywords.iter().any(|k| lower.contains(k.as_str()))
    };
    company_urls.sort_by_key(|u| !is_about(u));

    SearchResults {
        homepage_url: Some(homepage),
        company_urls,
        extra_urls,
    }
}
