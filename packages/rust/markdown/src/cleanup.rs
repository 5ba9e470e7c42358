//! Post-conversion passes over `htmd` output.
//!
//! Each pass is a function `&str -> String` applied in sequence. These only
//! undo conversion artifacts; content boilerplate is the Content Cleaner's job.

use std::sync::LazyLock;

use regex::Regex;

/// Run the post-conversion passes on raw Markdown text.
pub(crate) fn run_pipeline(md: &str) -> String {
    let mut result = strip_links(md);
    result = strip_leftover_html(&result);
    result = trim_line_ends(&result);
    result
}

// ---------------------------------------------------------------------------
// Pass 1: Reduce links to their text
// ---------------------------------------------------------------------------

/// Replace `[text](url)` with `text`. Images (`![alt](src)`) are left alone.
fn strip_links(md: &str) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\(([^)]*)\)").expect("valid regex"));

    LINK_RE
        .replace_all(md, |caps: &regex::Captures| {
            let start = caps.get(0).map_or(0, |m| m.start());
            if start > 0 && md.as_bytes()[start - 1] == b'!' {
                return caps[0].to_string();
            }
            caps[1].to_string()
        })
        .into_owned()
}

// ---------------------------------------------------------------------------
// Pass 2: Strip leftover HTML tags
// ---------------------------------------------------------------------------

/// Remove layout tags that survived the conversion, keeping their text.
/// Fenced code blocks are left untouched.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|details|summary|button|label)(?:\s[^>]*)?>",
        )
        .expect("valid regex")
    });

    let mut lines = Vec::new();
    let mut in_code_block = false;

    for line in md.lines() {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
            lines.push(line.to_string());
        } else if in_code_block {
            lines.push(line.to_string());
        } else {
            lines.push(HTML_TAG_RE.replace_all(line, "").into_owned());
        }
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 3: Trailing whitespace
// ---------------------------------------------------------------------------

fn trim_line_ends(md: &str) -> String {
    md.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_links_keeps_text() {
        let input = "Read [our story](/about) and [press](https://acme.com/press).";
        assert_eq!(strip_links(input), "Read our story and press.");
    }

    #[test]
    fn strip_links_leaves_images() {
        let input = "![logo](/logo.png) [home](/)";
        assert_eq!(strip_links(input), "![logo](/logo.png) home");
    }

    #[test]
    fn strip_leftover_html_removes_layout_tags() {
        let input = "# Title\n\n<div class=\"note\">Important info</div>";
        let result = strip_leftover_html(input);
        assert_eq!(result, "# Title\n\nImportant info");
    }

    #[test]
    fn strip_leftover_html_preserves_code_blocks() {
        let input = "```html\n<div>Preserved</div>\n```";
        assert_eq!(strip_leftover_html(input), input);
    }

    #[test]
    fn trim_line_ends_strips_trailing_whitespace() {
        assert_eq!(trim_line_ends("a   \nb\t\nc"), "a\nb\nc");
    }
}
