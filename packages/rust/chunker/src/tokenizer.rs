//! The `cl100k_base` tokenizer shared by chunking and context budgeting.

use tiktoken_rs::CoreBPE;

use companyintel_shared::{CompanyIntelError, Result};

/// Longest run of edge tokens dropped when a slice decodes to invalid UTF-8.
const MAX_EDGE_TRIM: usize = 3;

/// Token counting and slicing over one loaded BPE.
pub struct Tokenizer {
    bpe: CoreBPE,
}

impl Tokenizer {
    /// Load `cl100k_base`.
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| CompanyIntelError::Conversion(format!("failed to load tokenizer: {e}")))?;
        Ok(Self { bpe })
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// The text of the last `n` tokens of `text`.
    pub fn tail(&self, text: &str, n: usize) -> String {
        if n == 0 {
            return String::new();
        }
        let tokens = self.bpe.encode_ordinary(text);
        let start = tokens.len().saturating_sub(n);
        self.decode(&tokens[start..])
    }

    /// Cut `text` into consecutive slices of at most `max_tokens` tokens.
    pub fn split_hard(&self, text: &str, max_tokens: usize) -> Vec<String> {
        let tokens = self.bpe.encode_ordinary(text);
        tokens
            .chunks(max_tokens.max(1))
            .map(|slice| self.decode(slice))
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Decode a token slice. A slice cut through a multi-byte character is
    /// retried without its partial edge tokens.
    fn decode(&self, tokens: &[u32]) -> String {
        if let Ok(text) = self.bpe.decode(tokens.to_vec()) {
            return text;
        }

        for trim_start in 0..=MAX_EDGE_TRIM {
            for trim_end in 0..=MAX_EDGE_TRIM {
                if trim_start + trim_end >= tokens.len() {
                    break;
                }
                let inner = &tokens[trim_start..tokens.len() - trim_end];
                if let Ok(text) = self.bpe.decode(inner.to_vec()) {
                    return text;
                }
            }
        }

        tokens
            .iter()
            .filter_map(|t| self.bpe.decode(vec![*t]).ok())
            .collect()
    }
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer").field("encoding", &"cl100k_base").finish()
    }
}
