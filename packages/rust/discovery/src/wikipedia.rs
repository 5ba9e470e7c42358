//! Encyclopedia lookup through the MediaWiki API.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use companyintel_crawler::Crawler;
use companyintel_markdown::ConvertOptions;
use companyintel_shared::{
    CompanyIntelError, RawDocument, Result, SourceType, WikipediaConfig, WikipediaResult,
};

/// Article body container.
const ARTICLE_SELECTOR: &str = "div#mw-content-text";

/// Article chrome removed before conversion.
const ARTICLE_EXCLUDED: [&str; 5] = [".reflist", ".navbox", ".hatnote", ".sidebar", ".infobox"];

static INFOBOX_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)class="url"[^>]*><a\s+[^>]*href="([^"]+)""#).expect("valid regex")
});

// ---------------------------------------------------------------------------
// API response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    query: Option<SearchQuery>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchEntry>,
}

#[derive(Debug, Deserialize)]
struct SearchEntry {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    #[serde(default)]
    parse: Option<ParsedPage>,
}

#[derive(Debug, Deserialize)]
struct ParsedPage {
    text: ParsedText,
}

#[derive(Debug, Deserialize)]
struct ParsedText {
    #[serde(rename = "*", default)]
    html: String,
}

// ---------------------------------------------------------------------------
// WikipediaClient
// ---------------------------------------------------------------------------

/// Finds a company's article, its official website and related articles.
pub struct WikipediaClient {
    crawler: Arc<Crawler>,
    config: WikipediaConfig,
    article_options: ConvertOptions,
}

impl WikipediaClient {
    pub fn new(crawler: Arc<Crawler>, config: WikipediaConfig) -> Self {
        let article_options = ConvertOptions {
            content_selector: Some(ARTICLE_SELECTOR.to_string()),
            excluded_tags: Vec::new(),
            excluded_selectors: ARTICLE_EXCLUDED.iter().map(|s| s.to_string()).collect(),
        };
        Self {
            crawler,
            config,
            article_options,
        }
    }

    /// Look the company up. Not finding an article is not an error: the
    /// result is simply empty.
    #[instrument(skip_all, fields(company = %company))]
    pub async fn lookup(&self, company: &str) -> WikipediaResult {
        let titles = match self.search_titles(company).await {
            Ok(titles) => titles,
            Err(e) => {
                warn!(error = %e, "encyclopedia search failed");
                return WikipediaResult::default();
            }
        };

        let Some((title, others)) = titles.split_first() else {
            info!("no encyclopedia article found");
            return WikipediaResult::default();
        };

        let official_website = match self.official_website(title).await {
            Ok(url) => url,
            Err(e) => {
                warn!(%title, error = %e, "infobox lookup failed");
                None
            }
        };

        let now = Utc::now();
        let document = self.fetch_article(title, company, now).await;

        let needle = company.to_lowercase();
        let mut related_documents = Vec::new();
        for related in others
            .iter()
            .filter(|t| t.to_lowercase().contains(&needle))
            .take(self.config.related_limit)
        {
            if let Some(doc) = self.fetch_article(related, company, now).await {
                related_documents.push(doc);
            }
        }

        info!(
            %title,
            found = document.is_some(),
            official_website = official_website.as_deref().unwrap_or(""),
            related = related_documents.len(),
            "encyclopedia lookup complete"
        );

        WikipediaResult {
            document,
            official_website,
            related_documents,
        }
    }

    /// Titles of the top search hits, best first.
    async fn search_titles(&self, company: &str) -> Result<Vec<String>> {
        let srsearch = format!("{company} company");
        let srlimit = (1 + self.config.related_limit).to_string();
        let response: SearchResponse = self
            .api_get(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", srsearch.as_str()),
                ("format", "json"),
                ("srlimit", srlimit.as_str()),
            ])
            .await?;

        Ok(response
            .query
            .map(|q| q.search.into_iter().map(|e| e.title).collect())
            .unwrap_or_default())
    }

    /// Official website from the lead section's infobox.
    async fn official_website(&self, title: &str) -> Result<Option<String>> {
        let response: ParseResponse = self
            .api_get(&[
                ("action", "parse"),
                ("page", title),
                ("prop", "text"),
                ("section", "0"),
                ("format", "json"),
            ])
            .await?;

        Ok(response
            .parse
            .and_then(|p| extract_official_website(&p.text.html)))
    }

    async fn api_get<T: serde::de::DeserializeOwned>(&self, params: &[(&str, &str)]) -> Result<T> {
        let response = self
            .crawler
            .client()
            .get(&self.config.api_url)
            .query(params)
            .send()
            .await
            .map_err(|e| CompanyIntelError::Network(format!("encyclopedia API request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompanyIntelError::Network(format!(
                "encyclopedia API returned HTTP {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| CompanyIntelError::parse(format!("encyclopedia API response: {e}")))
    }

    /// Article page URL for a title.
    fn article_url(&self, title: &str) -> Result<Url> {
        let slug = urlencoding::encode(&title.replace(' ', "_")).into_owned();
        let raw = format!("{}/wiki/{slug}", self.config.site_url.trim_end_matches('/'));
        Url::parse(&raw).map_err(|e| CompanyIntelError::parse(format!("bad article URL {raw}: {e}")))
    }

    /// Fetch and process an article, retrying fetch failures with exponential
    /// backoff. The document is titled by the article title.
    async fn fetch_article(
        &self,
        title: &str,
        company: &str,
        scraped_at: DateTime<Utc>,
    ) -> Option<RawDocument> {
        let url = match self.article_url(title) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "skipping article");
                return None;
            }
        };

        let attempts = self.config.max_retries.max(1);
        for attempt in 0..attempts {
            match self
                .crawler
                .scrape_page_with(&url, &self.article_options)
                .await
            {
                Ok(page) => {
                    let doc = page.into_document(SourceType::Wikipedia, company, scraped_at);
                    if doc.is_none() {
                        debug!(%url, "article dropped by content checks");
                    }
                    return doc.map(|mut d| {
                        d.title = title.to_string();
                        d
                    });
                }
                Err(e) => {
                    warn!(%url, attempt = attempt + 1, error = %e, "article fetch failed");
                    if attempt + 1 < attempts {
                        tokio::time::sleep(retry_backoff(self.config.retry_backoff_ms, attempt))
                            .await;
                    }
                }
            }
        }

        None
    }
}

/// Exponential backoff before retry `attempt + 1`, saturating instead of
/// overflowing for large attempt counts.
fn retry_backoff(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

/// Official website from infobox HTML; protocol-relative links get `https:`.
pub fn extract_official_website(html: &str) -> Option<String> {
    let caps = INFOBOX_URL_RE.captures(html)?;
    let url = caps.get(1)?.as_str();
    if url.starts_with("//") {
        Some(format!("https:{url}"))
    } else {
        Some(url.to_string())
    }
}
