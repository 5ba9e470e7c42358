//! Page fetching and crawling.
//!
//! This crate provides:
//! - [`Crawler`]: polite, robots-aware breadth-first crawler and single-page scraper
//! - [`ScrapedPage`]: a fetched page and its conversion into a [`RawDocument`](companyintel_shared::RawDocument)

mod engine;
mod page;
mod robots;

pub use engine::{CrawlLimits, CrawlOutcome, Crawler, USER_AGENT, is_ssrf_target, normalize_url};
pub use page::ScrapedPage;
