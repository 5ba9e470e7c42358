//! Local BM25-style sparse encoder.
//!
//! Produces saturated term frequencies keyed by hashed ids of Snowball
//! English stems, so inflections share a term. Inverse document frequency is
//! applied index-side by the collection's `idf` modifier, so the encoder
//! needs no corpus statistics.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use rust_stemmers::{Algorithm, Stemmer};
use xxhash_rust::xxh3::xxh3_64;

use companyintel_shared::SparseVector;

/// Common English words that carry no retrieval signal.
const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "herself",
    "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just",
    "me", "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off", "on", "once",
    "only", "or", "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she",
    "should", "so", "some", "such", "than", "that", "the", "their", "theirs", "them",
    "themselves", "then", "there", "these", "they", "this", "those", "through", "to", "too",
    "under", "until", "up", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "would", "you", "your", "yours", "yourself",
    "yourselves",
];

static STEMMER: LazyLock<Stemmer> = LazyLock::new(|| Stemmer::create(Algorithm::English));

/// BM25 term-frequency encoder.
#[derive(Debug, Clone)]
pub struct SparseEncoder {
    k1: f32,
    b: f32,
    avg_len: f32,
}

impl Default for SparseEncoder {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            avg_len: 256.0,
        }
    }
}

impl SparseEncoder {
    /// Encode one text. Indices come out strictly ascending; terms whose
    /// hashes collide share one entry.
    pub fn encode(&self, text: &str) -> SparseVector {
        let terms: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .filter(|t| !STOPWORDS.contains(&t.as_str()))
            .map(|t| STEMMER.stem(&t).into_owned())
            .collect();

        if terms.is_empty() {
            return SparseVector::default();
        }

        let doc_len = terms.len() as f32;
        let mut tf: BTreeMap<u32, f32> = BTreeMap::new();
        for term in &terms {
            *tf.entry(term_index(term)).or_insert(0.0) += 1.0;
        }

        let norm = self.k1 * (1.0 - self.b + self.b * doc_len / self.avg_len);
        let (indices, values) = tf
            .into_iter()
            .map(|(idx, f)| (idx, f * (self.k1 + 1.0) / (f + norm)))
            .unzip();

        SparseVector { indices, values }
    }
}

/// Stable 32-bit id for a stemmed term.
pub fn term_index(term: &str) -> u32 {
    xxh3_64(term.as_bytes()) as u32
}
