//! Embedding and vector indexing.
//!
//! - [`Embedder`]: dense vectors from an Ollama-compatible backend plus local
//!   sparse vectors from [`SparseEncoder`]
//! - [`VectorStore`]: Qdrant collection holding both, queried with
//!   reciprocal rank fusion

mod embedder;
mod qdrant;
mod sparse;

pub use embedder::Embedder;
pub use qdrant::{DENSE_VECTOR, SPARSE_VECTOR, VectorStore};
pub use sparse::{SparseEncoder, term_index};
