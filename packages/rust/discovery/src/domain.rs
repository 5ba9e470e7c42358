//! Registrable-domain rules used to tell company pages from third-party ones.

use std::net::IpAddr;

use url::Url;

/// Second-level public suffixes under which registrations happen one label
/// deeper (`acme.co.uk`, not `co.uk`).
const SECOND_LEVEL_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "me.uk", "com.au", "net.au", "org.au", "co.jp",
    "ne.jp", "or.jp", "co.nz", "co.in", "co.kr", "co.za", "com.br", "com.cn", "com.mx",
    "com.sg", "com.tr", "com.hk", "com.tw",
];

/// Lowercased host of a URL, without port.
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .host_str()
        .map(|h| h.to_ascii_lowercase())
}

/// Whether a host is an IP literal (v4 or bracketed v6).
pub fn is_ip_host(host: &str) -> bool {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    bare.parse::<IpAddr>().is_ok()
}

/// The registrable domain of a host: the last two labels, or the last three
/// under a known second-level suffix. IP hosts are their own domain.
pub fn registrable_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if is_ip_host(&host) {
        return host;
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }

    let last_two = labels[labels.len() - 2..].join(".");
    if SECOND_LEVEL_SUFFIXES.contains(&last_two.as_str()) {
        labels[labels.len() - 3..].join(".")
    } else {
        last_two
    }
}

/// Registrable domain of a URL's host.
pub fn registrable_domain_of(url: &str) -> Option<String> {
    host_of(url).map(|h| registrable_domain(&h))
}

/// A URL on `root` whose path is empty or `/`.
pub fn is_homepage(url: &str, root: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let same = parsed
        .host_str()
        .is_some_and(|h| registrable_domain(h) == root);
    same && parsed.path().trim_matches('/').is_empty()
}
