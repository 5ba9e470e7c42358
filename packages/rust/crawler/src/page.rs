//! A fetched page and the per-page processing that turns it into a document.

use chrono::{DateTime, Utc};
use tracing::debug;

use companyintel_markdown::{clean_text, is_target_language};
use companyintel_shared::{RawDocument, SourceType};

/// One fetched HTML page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedPage {
    /// Final URL after redirects.
    pub url: String,
    /// Text of the `<title>` element.
    pub title: Option<String>,
    /// Markdown rendering of the content, `None` when it came out empty.
    pub markdown: Option<String>,
}

impl ScrapedPage {
    /// Clean the page and wrap it as a [`RawDocument`].
    ///
    /// Returns `None` when the page has no markdown, the cleaner rejects it,
    /// or it is not in the target language. The title falls back to the URL.
    pub fn into_document(
        self,
        source_type: SourceType,
        company: &str,
        scraped_at: DateTime<Utc>,
    ) -> Option<RawDocument> {
        let Some(markdown) = self.markdown else {
            debug!(url = %self.url, "no markdown, dropping page");
            return None;
        };

        let Some(content) = clean_text(&markdown) else {
            debug!(url = %self.url, "too little content after cleaning, dropping page");
            return None;
        };

        if !is_target_language(&content) {
            debug!(url = %self.url, "not in target language, dropping page");
            return None;
        }

        let title = self
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.url.clone());
        debug!(url = %self.url, content_chars = content.chars().count(), "page kept");

        Some(RawDocument {
            url: self.url,
            title,
            content,
            source_type,
            company: company.to_string(),
            scraped_at,
        })
    }
}
