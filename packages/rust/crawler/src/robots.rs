//! Minimal robots.txt support: `User-agent` groups with `Allow`/`Disallow`
//! rules, `*` wildcards and `$` anchors. Longest match wins, `Allow` wins ties.

/// Rules that apply to one user agent.
#[derive(Debug, Clone, Default)]
pub(crate) struct RobotsRules {
    /// `(allow, pattern)` pairs.
    rules: Vec<(bool, String)>,
}

impl RobotsRules {
    /// Rules permitting everything (missing or unreadable robots.txt).
    pub(crate) fn allow_all() -> Self {
        Self::default()
    }

    /// Parse robots.txt for `agent`. A group naming the agent takes precedence
    /// over the `*` group.
    pub(crate) fn parse(content: &str, agent: &str) -> Self {
        let agent = agent.to_lowercase();
        let mut specific: Vec<(bool, String)> = Vec::new();
        let mut wildcard: Vec<(bool, String)> = Vec::new();
        let mut found_specific = false;

        // Agents named by the group currently being read.
        let mut group_agents: Vec<String> = Vec::new();
        let mut in_rules = false;

        for raw_line in content.lines() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if in_rules {
                        group_agents.clear();
                        in_rules = false;
                    }
                    group_agents.push(value.to_lowercase());
                }
                "allow" | "disallow" => {
                    in_rules = true;
                    // An empty Disallow permits everything; nothing to record.
                    if value.is_empty() {
                        continue;
                    }
                    let rule = (key == "allow", value.to_string());
                    let names_us = |a: &String| {
                        !a.is_empty() && a != "*" && agent.contains(a.as_str())
                    };
                    if group_agents.iter().any(names_us) {
                        found_specific = true;
                        specific.push(rule);
                    } else if group_agents.iter().any(|a| a == "*") {
                        wildcard.push(rule);
                    }
                }
                _ => {}
            }
        }

        Self {
            rules: if found_specific { specific } else { wildcard },
        }
    }

    /// Whether `path` (including any query string) may be fetched.
    pub(crate) fn is_allowed(&self, path: &str) -> bool {
        let mut best: Option<(usize, bool)> = None;

        for (allow, pattern) in &self.rules {
            if !pattern_matches(pattern, path) {
                continue;
            }
            let len = pattern.len();
            best = match best {
                Some((best_len, best_allow))
                    if best_len > len || (best_len == len && best_allow) =>
                {
                    Some((best_len, best_allow))
                }
                _ => Some((len, *allow)),
            };
        }

        best.is_none_or(|(_, allow)| allow)
    }
}

/// Match a robots pattern against a path. `*` matches any run of
/// characters, a trailing `$` anchors the end, otherwise it is a prefix match.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or("");
    let Some(mut rest) = path.strip_prefix(first) else {
        return false;
    };

    let remaining: Vec<&str> = parts.collect();
    for (i, part) in remaining.iter().enumerate() {
        let is_last = i == remaining.len() - 1;
        if is_last && anchored {
            return rest.ends_with(part);
        }
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }

    !anchored || rest.is_empty()
}
