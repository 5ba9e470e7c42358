//! HTML-to-Markdown conversion and the Content Cleaner.
//!
//! [`convert`] turns a fetched HTML page into a markdown rendering of its
//! content (chrome removed, links reduced to text) plus the page title.
//! [`clean_text`] and [`is_target_language`] decide whether that rendering is
//! worth keeping.

mod cleaner;
mod cleanup;

use scraper::{Html, Selector};
use tracing::{debug, instrument};

use companyintel_shared::{CompanyIntelError, Result};

pub use cleaner::{MAX_CONTENT_CHARS, MIN_CONTENT_CHARS, clean_text, is_target_language};

/// Tags `htmd` never renders, on top of the caller's excluded tags.
const SKIP_TAGS: [&str; 6] = ["script", "style", "noscript", "iframe", "svg", "template"];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of converting an HTML page to Markdown.
#[derive(Debug, Clone)]
pub struct ConvertResult {
    /// Markdown rendering of the page content.
    pub markdown: String,
    /// Text of the `<title>` element, if present and non-empty.
    pub title: Option<String>,
}

/// Options for the HTML-to-Markdown conversion.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// CSS selector of the content container. Defaults to `<body>`.
    pub content_selector: Option<String>,
    /// Tag names removed before conversion (e.g. `nav`, `footer`).
    pub excluded_tags: Vec<String>,
    /// Additional CSS selectors removed before conversion.
    pub excluded_selectors: Vec<String>,
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Convert an HTML page to Markdown.
///
/// Excluded elements are detached from the DOM first, then the content
/// container is rendered with `htmd` and run through the cleanup passes.
#[instrument(skip_all, fields(html_len = html.len()))]
pub fn convert(html: &str, opts: &ConvertOptions) -> Result<ConvertResult> {
    let mut doc = Html::parse_document(html);
    let title = extract_title(&doc);

    remove_excluded(&mut doc, opts);
    let content_html = select_content(&doc, opts.content_selector.as_deref());

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();

    let raw_markdown = converter
        .convert(&content_html)
        .map_err(|e| CompanyIntelError::Conversion(format!("htmd conversion failed: {e}")))?;

    let markdown = cleanup::run_pipeline(&raw_markdown);

    debug!(
        raw_len = raw_markdown.len(),
        final_len = markdown.len(),
        "conversion complete"
    );

    Ok(ConvertResult { markdown, title })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Detach every element matching an excluded tag or selector.
fn remove_excluded(doc: &mut Html, opts: &ConvertOptions) {
    let mut doomed = Vec::new();

    for sel_str in opts.excluded_tags.iter().chain(&opts.excluded_selectors) {
        match Selector::parse(sel_str) {
            Ok(selector) => doomed.extend(doc.select(&selector).map(|el| el.id())),
            Err(_) => debug!(selector = %sel_str, "ignoring invalid exclusion selector"),
        }
    }

    for id in doomed {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
}

/// Inner HTML of the content container, falling back to `<body>` and then
/// the whole document.
fn select_content(doc: &Html, content_selector: Option<&str>) -> String {
    let candidates = content_selector.into_iter().chain(std::iter::once("body"));

    for sel_str in candidates {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(el) = doc.select(&selector).next() {
                return el.inner_html();
            }
        }
    }

    doc.root_element().inner_html()
}

/// Text of the first `<title>` element.
fn extract_title(doc: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    doc.select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
