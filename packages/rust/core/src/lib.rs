//! Pipeline orchestration and domain services for Company Intel.
//!
//! This crate ties discovery, crawling, storage, chunking and the vector
//! index together: the phased scrape ([`pipeline`]), ingestion
//! ([`ingest`]), background jobs ([`jobs`]), budgeted retrieval
//! ([`retrieval`]), evaluation runs ([`eval`]) and administration
//! ([`admin`]). [`services::Services`] wires them for a process.

pub mod admin;
pub mod eval;
pub mod ingest;
pub mod jobs;
pub mod pipeline;
pub mod retrieval;
pub mod services;
