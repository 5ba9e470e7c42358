//! Heading-aware, token-bounded document chunking.
//!
//! [`Chunker::chunk`] splits a document on H1-H3 headings, shrinks any piece
//! above the hard ceiling (paragraphs, then sentences, then a raw token
//! slice), greedily merges pieces up to the target size, drops chunks under
//! the floor and finally prefixes each chunk with the tail of its
//! predecessor. The output is a pure function of the document text and URL.

mod tokenizer;

use std::sync::{Arc, LazyLock};

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use companyintel_shared::{Chunk, ChunkMetadata, ChunkingConfig, RawDocument};

pub use tokenizer::Tokenizer;

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,3}\s+").expect("valid regex"));

static SENTENCE_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s+").expect("valid regex"));

/// Splits documents into overlapping, token-bounded chunks.
pub struct Chunker {
    tokenizer: Arc<Tokenizer>,
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(tokenizer: Arc<Tokenizer>, config: ChunkingConfig) -> Self {
        Self { tokenizer, config }
    }

    /// Chunk one document.
    pub fn chunk(&self, doc: &RawDocument) -> Vec<Chunk> {
        let mut sections = split_by_headings(&doc.content);
        if sections.is_empty() {
            sections.push(doc.content.clone());
        }

        let mut pieces = Vec::new();
        for section in &sections {
            self.split_piece(section, &mut pieces);
        }

        let merged = self.merge(pieces);
        let kept: Vec<String> = merged
            .into_iter()
            .filter(|c| self.tokenizer.count(c) >= self.config.min_tokens)
            .collect();
        let texts = self.add_overlap(kept);

        debug!(url = %doc.url, sections = sections.len(), chunks = texts.len(), "chunked document");

        texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                id: chunk_id(&doc.url, i),
                text,
                metadata: ChunkMetadata {
                    url: doc.url.clone(),
                    title: doc.title.clone(),
                    company: doc.company.clone(),
                    source_type: doc.source_type,
                    chunk_index: i,
                    scraped_at: doc.scraped_at,
                },
            })
            .collect()
    }

    /// Chunk several documents, concatenating their chunks in order.
    pub fn chunk_all(&self, docs: &[RawDocument]) -> Vec<Chunk> {
        docs.iter().flat_map(|d| self.chunk(d)).collect()
    }

    pub fn tokenizer(&self) -> &Arc<Tokenizer> {
        &self.tokenizer
    }

    /// Push `text` onto `out`, recursively split until every piece fits
    /// under the hard ceiling.
    fn split_piece(&self, text: &str, out: &mut Vec<String>) {
        let hard_max = self.config.hard_max_tokens;
        if self.tokenizer.count(text) <= hard_max {
            out.push(text.to_string());
            return;
        }

        let paragraphs = split_by_paragraphs(text);
        if paragraphs.len() > 1 {
            for p in &paragraphs {
                self.split_piece(p, out);
            }
            return;
        }

        let sentences = split_by_sentences(text);
        if sentences.len() > 1 {
            for s in &sentences {
                self.split_piece(s, out);
            }
            return;
        }

        out.extend(self.tokenizer.split_hard(text, hard_max));
    }

    /// Greedy merge: keep appending pieces (joined by a blank line) while the
    /// result stays within the target size.
    fn merge(&self, pieces: Vec<String>) -> Vec<String> {
        let mut pieces = pieces.into_iter();
        let Some(mut current) = pieces.next() else {
            return Vec::new();
        };

        let mut merged = Vec::new();
        for piece in pieces {
            let combined = format!("{current}\n\n{piece}");
            if self.tokenizer.count(&combined) <= self.config.target_tokens {
                current = combined;
            } else {
                merged.push(std::mem::replace(&mut current, piece));
            }
        }
        merged.push(current);
        merged
    }

    /// Prefix every chunk after the first with the last `overlap_tokens`
    /// tokens of the chunk before it.
    fn add_overlap(&self, chunks: Vec<String>) -> Vec<String> {
        if chunks.len() <= 1 || self.config.overlap_tokens == 0 {
            return chunks;
        }

        let mut result = Vec::with_capacity(chunks.len());
        result.push(chunks[0].clone());
        for pair in chunks.windows(2) {
            let overlap = self.tokenizer.tail(&pair[0], self.config.overlap_tokens);
            result.push(format!("{overlap}\n{}", pair[1]));
        }
        result
    }
}

/// Deterministic chunk id: the first 16 bytes of `sha256("{url}::{index}")`.
pub fn chunk_id(url: &str, index: usize) -> Uuid {
    let digest = Sha256::digest(format!("{url}::{index}").as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

fn non_empty_trimmed<'a>(parts: impl Iterator<Item = &'a str>) -> Vec<String> {
    parts
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Sections between H1-H3 heading markers. The marker is removed; the
/// heading text starts its section.
fn split_by_headings(text: &str) -> Vec<String> {
    non_empty_trimmed(HEADING_RE.split(text))
}

fn split_by_paragraphs(text: &str) -> Vec<String> {
    non_empty_trimmed(text.split("\n\n"))
}

/// Split after `.`, `!` or `?` followed by whitespace; the punctuation stays
/// with its sentence.
fn split_by_sentences(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END_RE.find_iter(text) {
        parts.push(&text[start..m.start() + 1]);
        start = m.end();
    }
    parts.push(&text[start..]);
    non_empty_trimmed(parts.into_iter())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use companyintel_shared::SourceType;

    use super::*;

    fn small_config() -> ChunkingConfig {
        ChunkingConfig {
            hard_max_tokens: 40,
            target_tokens: 30,
            min_tokens: 5,
            overlap_tokens: 8,
        }
    }

    fn chunker(config: ChunkingConfig) -> Chunker {
        Chunker::new(Arc::new(Tokenizer::new().unwrap()), config)
    }

    fn doc(content: &str) -> RawDocument {
        RawDocument {
            url: "https://acme.com/about".into(),
            title: "About Acme".into(),
            content: content.into(),
            source_type: SourceType::Website,
            company: "acme".into(),
            scraped_at: Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
        }
    }

    const THREE_SECTIONS: &str = "# History\n\n\
        Acme was founded in 1949 in Phoenix. It started as a small forge making anvils for local ranchers.\n\n\
        ## Products\n\n\
        Today Acme sells anvils, rocket skates, giant magnets and portable holes to customers worldwide.\n\n\
        ## Leadership\n\n\
        The company is led by its chief executive, who previously ran the rocket skate division for a decade.";

    #[test]
    fn chunk_id_is_sha256_prefix() {
        let id = chunk_id("https://acme.com", 0);
        let digest = Sha256::digest(b"https://acme.com::0");
        assert_eq!(id.as_bytes(), &digest[..16]);
        assert_ne!(id, chunk_id("https://acme.com", 1));
    }

    #[test]
    fn chunking_is_deterministic() {
        let c = chunker(small_config());
        let a = c.chunk(&doc(THREE_SECTIONS));
        let b = c.chunk(&doc(THREE_SECTIONS));
        assert_eq!(a, b);
        assert!(a.iter().enumerate().all(|(i, ch)| ch.id == chunk_id(&ch.metadata.url, i)));
    }

    #[test]
    fn three_sections_produce_overlapping_chunks() {
        let c = chunker(small_config());
        let chunks = c.chunk(&doc(THREE_SECTIONS));
        assert!(chunks.len() >= 2);

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.metadata.chunk_index, i);
            assert_eq!(chunk.metadata.title, "About Acme");
            assert_eq!(chunk.metadata.company, "acme");
        }
        assert!(!chunks[0].text.starts_with('#'));
        assert!(chunks[0].text.starts_with("History"));
    }

    #[test]
    fn overlap_prefix_is_tail_of_previous_chunk() {
        let c = chunker(small_config());
        let mut pieces = Vec::new();
        for section in split_by_headings(THREE_SECTIONS) {
            c.split_piece(&section, &mut pieces);
        }
        let merged: Vec<String> = c
            .merge(pieces)
            .into_iter()
            .filter(|m| c.tokenizer.count(m) >= 5)
            .collect();
        let with_overlap = c.add_overlap(merged.clone());

        assert_eq!(with_overlap[0], merged[0]);
        for i in 1..merged.len() {
            let expected = format!("{}\n{}", c.tokenizer.tail(&merged[i - 1], 8), merged[i]);
            assert_eq!(with_overlap[i], expected);
        }

        let chunks = c.chunk(&doc(THREE_SECTIONS));
        let texts: Vec<String> = chunks.into_iter().map(|ch| ch.text).collect();
        assert_eq!(texts, with_overlap);
    }

    #[test]
    fn pieces_respect_hard_ceiling() {
        let c = chunker(small_config());
        let long_paragraph = "Acme makes anvils. ".repeat(30);
        let no_punctuation = "anvil ".repeat(200);
        for text in [long_paragraph.as_str(), no_punctuation.as_str()] {
            let mut pieces = Vec::new();
            c.split_piece(text, &mut pieces);
            assert!(pieces.len() > 1);
            for p in &pieces {
                assert!(c.tokenizer.count(p) <= 40, "piece too large: {p}");
            }
        }
    }

    #[test]
    fn merged_chunks_respect_floor_and_target() {
        let c = chunker(ChunkingConfig {
            overlap_tokens: 0,
            ..small_config()
        });
        let content = "Short.\n\n".to_string() + &"Acme ships anvils by rail. ".repeat(20);
        for chunk in c.chunk(&doc(&content)) {
            let n = c.tokenizer.count(&chunk.text);
            assert!(n >= 5);
            assert!(n <= 40);
        }
    }

    #[test]
    fn tiny_document_yields_no_chunks() {
        let c = chunker(small_config());
        assert!(c.chunk(&doc("Hi.")).is_empty());
        assert!(c.chunk(&doc("")).is_empty());
    }

    #[test]
    fn document_without_headings_is_one_section() {
        let c = chunker(ChunkingConfig::default());
        let chunks = c.chunk(&doc(
            "Acme Corporation is a manufacturer of anvils and rocket skates. It was founded in \
             1949 and is headquartered in Phoenix, Arizona, where it employs several thousand people.",
        ));
        assert_eq!(chunks.len(), 0, "below the default floor of 50 tokens");

        let text = "Acme Corporation is a manufacturer of anvils and rocket skates. ".repeat(10);
        let chunks = c.chunk(&doc(&text));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text.trim());
    }

    #[test]
    fn sentence_split_keeps_punctuation() {
        assert_eq!(
            split_by_sentences("One. Two!  Three?\nFour"),
            vec!["One.", "Two!", "Three?", "Four"]
        );
        assert_eq!(split_by_sentences("v1.2 release"), vec!["v1.2 release"]);
    }

    #[test]
    fn heading_split_ignores_deep_headings() {
        assert_eq!(
            split_by_headings("Intro\n# A\nBody A\n#### Deep\nstill A\n### B\nBody B"),
            vec!["Intro", "A\nBody A\n#### Deep\nstill A", "B\nBody B"]
        );
    }
}
