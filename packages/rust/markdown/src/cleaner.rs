//! Content Cleaner: normalizes scraped markdown and rejects unusable pages.
//!
//! Each strip pass is a `&str -> String` function applied in sequence by
//! [`clean_text`]. Language filtering is a separate check so callers can log
//! the two rejection reasons apart.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use whatlang::Lang;

/// Cleaned text shorter than this (in characters) is rejected.
pub const MIN_CONTENT_CHARS: usize = 50;

/// Cleaned text is truncated to this many characters.
pub const MAX_CONTENT_CHARS: usize = 50_000;

/// Characters sampled for language detection.
const LANGUAGE_SAMPLE_CHARS: usize = 4_000;

/// Clean raw markdown. Returns `None` when the result is too short to be
/// worth indexing.
pub fn clean_text(raw: &str) -> Option<String> {
    let mut text: String = raw.nfc().collect();

    text = strip_images(&text);
    text = strip_bare_urls(&text);
    text = strip_wiki_markers(&text);
    text = strip_page_chrome(&text);
    text = strip_cookie_blocks(&text);
    text = collapse_whitespace(&text);

    let text = text.trim();
    let char_count = text.chars().count();
    if char_count < MIN_CONTENT_CHARS {
        return None;
    }
    if char_count > MAX_CONTENT_CHARS {
        return Some(text.chars().take(MAX_CONTENT_CHARS).collect());
    }
    Some(text.to_string())
}

/// Whether `text` is in the target language (English).
///
/// Fails open: if detection gives no answer or an unreliable one, the text is
/// accepted.
pub fn is_target_language(text: &str) -> bool {
    let sample: String = text.chars().take(LANGUAGE_SAMPLE_CHARS).collect();
    match whatlang::detect(&sample) {
        Some(info) if info.is_reliable() => info.lang() == Lang::Eng,
        _ => true,
    }
}

// ---------------------------------------------------------------------------
// Pass 1: Markdown images
// ---------------------------------------------------------------------------

fn strip_images(text: &str) -> String {
    static IMAGE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex"));

    IMAGE_RE.replace_all(text, "").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 2: Bare URLs
// ---------------------------------------------------------------------------

/// Remove URLs standing on their own. A URL directly after `(` is link
/// syntax and stays.
fn strip_bare_urls(text: &str) -> String {
    // The leading group stands in for a "not after '(' and at a word
    // boundary" lookbehind; it is written back untouched.
    static BARE_URL_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(^|[^(\w])https?://\S+").expect("valid regex"));

    BARE_URL_RE.replace_all(text, "${1}").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 3: Encyclopedia edit and citation markers
// ---------------------------------------------------------------------------

fn strip_wiki_markers(text: &str) -> String {
    static EDIT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[edit\]").expect("valid regex"));
    static CITE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[\d+\]").expect("valid regex"));

    let text = EDIT_RE.replace_all(text, "");
    CITE_RE.replace_all(&text, "").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 4: Skip links and carousel indicators
// ---------------------------------------------------------------------------

fn strip_page_chrome(text: &str) -> String {
    static SKIP_LINE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^Skip to main content$").expect("valid regex"));
    static SLIDE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"Slide \d+ of \d+").expect("valid regex"));

    let text = SKIP_LINE_RE.replace_all(text, "");
    SLIDE_RE.replace_all(&text, "").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 5: Cookie policy blocks
// ---------------------------------------------------------------------------

/// Drop a cookie policy/settings section: its heading (H1-H3) through to the
/// next heading line or the end of the text.
fn strip_cookie_blocks(text: &str) -> String {
    static COOKIE_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^#{1,3} (?i:cookie (?:policy|settings))").expect("valid regex")
    });

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(m) = COOKIE_HEADING_RE.find(rest) {
        // The newline ending the previous line goes with the block.
        let start = if m.start() > 0 && rest.as_bytes()[m.start() - 1] == b'\n' {
            m.start() - 1
        } else {
            m.start()
        };
        out.push_str(&rest[..start]);

        let after = &rest[m.end()..];
        rest = match after.find("\n#") {
            Some(next_heading) => &after[next_heading..],
            None => "",
        };
    }

    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// Pass 6: Whitespace
// ---------------------------------------------------------------------------

fn collapse_whitespace(text: &str) -> String {
    static MULTI_NEWLINE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));
    static MULTI_SPACE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[ \t]{2,}").expect("valid regex"));

    let text = MULTI_NEWLINE_RE.replace_all(text, "\n\n");
    MULTI_SPACE_RE.replace_all(&text, " ").into_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
