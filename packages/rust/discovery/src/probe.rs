//! Subdomain probing: cheap HEAD checks for well-known company subdomains
//! (newsroom, blog, investors, ...) that search results tend to miss.

use std::time::Duration;

use futures::future::join_all;
use reqwest::Client;
use tracing::{debug, info, instrument};

use crate::domain::{host_of, is_ip_host, registrable_domain, registrable_domain_of};

/// Candidate URLs for a homepage, with the registrable domain they must stay
/// on. `None` for IP-literal or host-less homepages.
pub fn candidate_urls(homepage: &str, subdomains: &[String]) -> Option<(String, Vec<String>)> {
    let host = host_of(homepage)?;
    if is_ip_host(&host) {
        return None;
    }
    let root = registrable_domain(&host);
    let candidates = subdomains
        .iter()
        .map(|sub| format!("https://{sub}.{root}"))
        .collect();
    Some((root, candidates))
}

/// Probe the well-known subdomains of `homepage` and return the resolved URLs
/// of those that answer.
#[instrument(skip_all, fields(homepage = %homepage))]
pub async fn probe_subdomains(
    client: &Client,
    homepage: &str,
    subdomains: &[String],
    timeout: Duration,
) -> Vec<String> {
    let Some((root, candidates)) = candidate_urls(homepage, subdomains) else {
        debug!("homepage has no DNS host, skipping subdomain probe");
        return Vec::new();
    };

    let found = probe_candidates(client, &candidates, &root, timeout).await;
    if !found.is_empty() {
        info!(%root, found = ?found, "subdomain probe found pages");
    }
    found
}

/// HEAD every candidate concurrently. A candidate is kept when it answers
/// below 400 and its final URL (after redirects) is still on `root`.
/// Failures are dropped silently.
pub async fn probe_candidates(
    client: &Client,
    candidates: &[String],
    root: &str,
    timeout: Duration,
) -> Vec<String> {
    let probes = candidates.iter().map(|url| async move {
        let response = match client.head(url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(%url, error = %e, "probe failed");
                return None;
            }
        };
        if response.status().as_u16() >= 400 {
            debug!(%url, status = %response.status(), "probe rejected");
            return None;
        }
        let resolved = response.url().to_string();
        registrable_domain_of(&resolved)
            .is_some_and(|d| d == root)
            .then_some(resolved)
    });

    join_all(probes).await.into_iter().flatten().collect()
}
