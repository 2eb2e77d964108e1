//! Trusted-application capability check.
//!
//! Password-reset operations are initiated without a personal access token,
//! so they are gated on the calling application instead: the caller sends an
//! `appId`, and its `Origin` (or `Referer`) header is matched together with
//! that id against configured `appId@origin` patterns. `*` is a wildcard in
//! either part, so `*@https://*.example.com` trusts every app served from a
//! subdomain of `example.com`.

/// Configured set of trusted application patterns.
#[derive(Debug, Clone)]
pub struct TrustedApps {
    /// (app id pattern, origin pattern) pairs
    patterns: Vec<(String, String)>,
}

impl TrustedApps {
    /// Parse `appId@origin` pattern strings. Entries without an `@` separator
    /// are ignored with a warning.
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|entry| {
                let entry = entry.trim();
                match entry.split_once('@') {
                    Some((app, origin)) if !app.is_empty() && !origin.is_empty() => {
                        Some((app.to_string(), origin.to_string()))
                    }
                    _ => {
                        tracing::warn!("Ignoring malformed trusted app pattern {entry:?} (expected appId@origin)");
                        None
                    }
                }
            })
            .collect();

        Self { patterns }
    }

    /// Check whether the given app id and request origin are trusted.
    ///
    /// A missing app id is never trusted. A missing origin only matches
    /// patterns whose origin part is `*`.
    pub fn is_trusted(&self, app_id: &str, origin: Option<&str>) -> bool {
        if app_id.is_empty() {
            return false;
        }
        let origin = origin.unwrap_or("");

        self.patterns.iter().any(|(app_pattern, origin_pattern)| {
            wildcard_match(app_pattern, app_id)
                && (origin_pattern == "*" || wildcard_match(origin_pattern, origin))
        })
    }
}

/// Glob-style match where `*` matches any run of characters.
fn wildcard_match(pattern: &str, value: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == value;
    }

    let mut remainder = value;
    let mut parts = pattern.split('*');

    // Leading literal anchors at the start
    if let Some(first) = parts.next() {
        match remainder.strip_prefix(first) {
            Some(rest) => remainder = rest,
            None => return false,
        }
    }

    let mut middle: Vec<&str> = parts.collect();
    // Trailing literal anchors at the end; split() yields at least one more
    // element because the pattern contains '*'
    let last = middle.pop().unwrap_or("");

    for part in middle {
        if part.is_empty() {
            continue;
        }
        match remainder.find(part) {
            Some(idx) => remainder = &remainder[idx + part.len()..],
            None => return false,
        }
    }

    remainder.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apps(patterns: &[&str]) -> TrustedApps {
        TrustedApps::new(&patterns.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn exact_pattern_matches_exact_caller() {
        let apps = apps(&["my-app@https://app.example.com"]);

        assert!(apps.is_trusted("my-app", Some("https://app.example.com")));
        assert!(!apps.is_trusted("other-app", Some("https://app.example.com")));
        assert!(!apps.is_trusted("my-app", Some("https://evil.example.com")));
    }

    #[test]
    fn wildcard_app_id() {
        let apps = apps(&["*@https://app.example.com"]);

        assert!(apps.is_trusted("anything", Some("https://app.example.com")));
        assert!(!apps.is_trusted("anything", Some("https://other.example.com")));
    }

    #[test]
    fn wildcard_origin_subdomains() {
        let apps = apps(&["web@https://*.example.com"]);

        assert!(apps.is_trusted("web", Some("https://a.example.com")));
        assert!(apps.is_trusted("web", Some("https://deep.nested.example.com")));
        // The wildcard requires a subdomain separator
        assert!(!apps.is_trusted("web", Some("https://example.com")));
        assert!(!apps.is_trusted("web", Some("https://example.com.evil.net")));
    }

    #[test]
    fn fully_open_pattern() {
        let apps = apps(&["*@*"]);

        assert!(apps.is_trusted("any", Some("https://anywhere")));
        // No origin header still passes under a '*' origin
        assert!(apps.is_trusted("any", None));
        // But an empty app id never does
        assert!(!apps.is_trusted("", None));
    }

    #[test]
    fn missing_origin_only_matches_star_origin() {
        let apps = apps(&["cli@*", "web@https://app.example.com"]);

        assert!(apps.is_trusted("cli", None));
        assert!(!apps.is_trusted("web", None));
    }

    #[test]
    fn malformed_patterns_are_ignored() {
        let apps = apps(&["no-separator", "@https://x.com", "app@"]);

        assert!(!apps.is_trusted("no-separator", None));
        assert!(!apps.is_trusted("app", Some("https://x.com")));
    }

    #[test]
    fn multiple_patterns_any_match_wins() {
        let apps = apps(&["a@https://a.com", "b@https://b.com"]);

        assert!(apps.is_trusted("a", Some("https://a.com")));
        assert!(apps.is_trusted("b", Some("https://b.com")));
        assert!(!apps.is_trusted("a", Some("https://b.com")));
    }

    #[test]
    fn wildcard_match_edge_cases() {
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("*", "abc"));
        assert!(wildcard_match("a*b", "ab"));
        assert!(wildcard_match("a*b*c", "aXbYc"));
        assert!(!wildcard_match("a*b*c", "aXcYb"));
        assert!(!wildcard_match("abc", "abcd"));
    }
}
