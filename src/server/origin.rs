//! Origin validation
//!
//! Decides whether a WebSocket upgrade may proceed based on the request's
//! declared `Origin` header and the configured allow-set.

use std::collections::HashSet;

/// Allow-set member that accepts any origin
pub const WILDCARD_ORIGIN: &str = "*";

/// Set of origins permitted to open a socket.
///
/// Built once at startup and shared read-only between connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedOrigins {
    origins: HashSet<String>,
}

impl AllowedOrigins {
    /// Create an allow-set from a list of origins
    pub fn new(origins: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            origins: origins.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the set has no members
    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    /// Whether the set contains exactly this string
    pub fn contains(&self, origin: &str) -> bool {
        self.origins.contains(origin)
    }

    /// Check a request origin against the set.
    ///
    /// Accepts when the origin is empty, the set is empty, the set holds the
    /// wildcard, or the set holds the exact origin string. Matching is
    /// case- and scheme-sensitive.
    pub fn is_allowed(&self, origin: &str) -> bool {
        origin.is_empty()
            || self.is_empty()
            || self.contains(WILDCARD_ORIGIN)
            || self.contains(origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_ORIGINS: [&str; 5] = [
        "",
        "https://www.walletlink.org",
        "http://www.walletlink.org",
        "https://evil.example",
        "null",
    ];

    #[test]
    fn test_wildcard_accepts_everything() {
        let allowed = AllowedOrigins::new(["https://www.walletlink.org", WILDCARD_ORIGIN]);
        for origin in SAMPLE_ORIGINS {
            assert!(allowed.is_allowed(origin), "origin {origin:?} rejected");
        }
    }

    #[test]
    fn test_empty_set_accepts_everything() {
        let allowed = AllowedOrigins::default();
        for origin in SAMPLE_ORIGINS {
            assert!(allowed.is_allowed(origin), "origin {origin:?} rejected");
        }
    }

    #[test]
    fn test_exact_membership() {
        let allowed = AllowedOrigins::new(["https://www.walletlink.org", "https://app.example"]);
        assert!(allowed.is_allowed("https://www.walletlink.org"));
        assert!(allowed.is_allowed("https://app.example"));
        assert!(!allowed.is_allowed("https://evil.example"));
        assert!(!allowed.is_allowed("null"));
    }

    #[test]
    fn test_empty_origin_always_accepted() {
        let allowed = AllowedOrigins::new(["https://www.walletlink.org"]);
        assert!(allowed.is_allowed(""));
    }

    #[test]
    fn test_no_normalization() {
        let allowed = AllowedOrigins::new(["https://www.walletlink.org"]);
        assert!(!allowed.is_allowed("http://www.walletlink.org"));
        assert!(!allowed.is_allowed("https://WWW.WALLETLINK.ORG"));
        assert!(!allowed.is_allowed("https://www.walletlink.org/"));
    }
}
