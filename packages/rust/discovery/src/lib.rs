//! Source discovery for a company.
//!
//! Two lookups find where a company's content lives:
//! - [`WikipediaClient`]: encyclopedia article, official website, related articles
//! - [`WebSearchClient`]: web and news search, split into company and third-party URLs
//!
//! [`probe_subdomains`] then checks well-known subdomains of the homepage.

pub mod domain;
mod probe;
mod search;
mod wikipedia;

pub use domain::{is_homepage, registrable_domain, registrable_domain_of};
pub use probe::{candidate_urls, probe_candidates, probe_subdomains};
pub use search::{WebSearchClient, classify_results, parse_result_links};
pub use wikipedia::{WikipediaClient, extract_official_website};
