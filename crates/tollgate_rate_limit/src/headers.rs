//! Quota information carried in API response headers.
//!
//! Servers report how much of the quota remains, the quota size, and how long
//! to wait after a throttled call. Different APIs name these headers
//! differently, so the names are configuration ([`HeaderNames`]) rather than
//! literals, and lookups go through the [`HeaderSource`] trait so the same
//! parsing works over `reqwest` header maps and plain string maps.

use crate::retry::parse_retry_after;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::time::Duration;

/// Read-only, case-insensitive access to response headers.
pub trait HeaderSource {
    /// Value of the named header, if present and valid UTF-8.
    fn header(&self, name: &str) -> Option<&str>;
}

impl HeaderSource for HeaderMap {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name)?.to_str().ok()
    }
}

impl<S: BuildHasher> HeaderSource for HashMap<String, String, S> {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name)
            .or_else(|| {
                self.iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
    }
}

impl<S: BuildHasher> HeaderSource for HashMap<&str, &str, S> {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name).copied().or_else(|| {
            self.iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| *value)
        })
    }
}

impl<T: HeaderSource + ?Sized> HeaderSource for &T {
    fn header(&self, name: &str) -> Option<&str> {
        (**self).header(name)
    }
}

/// Names of the quota headers for a particular API.
///
/// # Example
///
/// ```toml
/// [headers]
/// remaining = "x-ratelimit-remaining"
/// limit = "x-ratelimit-limit"
/// retry_after = "retry-after"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(default)]
pub struct HeaderNames {
    /// Header reporting calls left in the current window
    pub remaining: String,
    /// Header reporting the quota size
    pub limit: String,
    /// Header carrying the retry hint (seconds or HTTP-date)
    pub retry_after: String,
}

impl Default for HeaderNames {
    fn default() -> Self {
        Self {
            remaining: "x-ratelimit-remaining".to_string(),
            limit: "x-ratelimit-limit".to_string(),
            retry_after: "retry-after".to_string(),
        }
    }
}

impl HeaderNames {
    /// Header names with custom field names.
    pub fn new(
        remaining: impl Into<String>,
        limit: impl Into<String>,
        retry_after: impl Into<String>,
    ) -> Self {
        Self {
            remaining: remaining.into(),
            limit: limit.into(),
            retry_after: retry_after.into(),
        }
    }
}

/// Quota fields parsed from one response.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QuotaHeaders {
    /// Calls left in the server's current window
    pub remaining: Option<u64>,
    /// Server's quota size
    pub limit: Option<u64>,
    /// How long the server asked us to wait
    pub retry_after: Option<Duration>,
}

impl QuotaHeaders {
    /// Parse all quota fields at once. Missing or malformed values become `None`.
    ///
    /// # Example
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use tollgate_rate_limit::{HeaderNames, QuotaHeaders};
    ///
    /// let headers = HashMap::from([("X-RateLimit-Remaining", "5"), ("X-RateLimit-Limit", "100")]);
    /// let quota = QuotaHeaders::from_headers(&headers, &HeaderNames::default());
    /// assert_eq!(quota.remaining, Some(5));
    /// assert_eq!(quota.remaining_fraction(), Some(0.05));
    /// ```
    pub fn from_headers<H: HeaderSource + ?Sized>(headers: &H, names: &HeaderNames) -> Self {
        Self {
            remaining: parse_count(headers.header(&names.remaining)),
            limit: parse_count(headers.header(&names.limit)),
            retry_after: parse_retry_after(headers.header(&names.retry_after)),
        }
    }

    /// Fraction of the quota still available, when both fields are known.
    pub fn remaining_fraction(&self) -> Option<f64> {
        match (self.remaining, self.limit) {
            (Some(remaining), Some(limit)) if limit > 0 => Some(remaining as f64 / limit as f64),
            _ => None,
        }
    }

    /// True when no quota field was present.
    pub fn is_empty(&self) -> bool {
        self.remaining.is_none() && self.limit.is_none() && self.retry_after.is_none()
    }
}

/// Helper to parse a non-negative count, tolerating "5.0" style values.
fn parse_count(value: Option<&str>) -> Option<u64> {
    let value = value?.trim();
    value.parse::<u64>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|n| n.floor() as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_lookup_ignores_case() {
        let headers = HashMap::from([("X-RateLimit-Limit".to_string(), "100".to_string())]);
        assert_eq!(headers.header("x-ratelimit-limit"), Some("100"));
    }

    #[test]
    fn test_reqwest_header_map() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("7"));
        headers.insert("retry-after", HeaderValue::from_static("30"));

        let quota = QuotaHeaders::from_headers(&headers, &HeaderNames::default());
        assert_eq!(quota.remaining, Some(7));
        assert_eq!(quota.limit, None);
        assert_eq!(quota.retry_after, Some(Duration::from_secs(30)));
        assert_eq!(quota.remaining_fraction(), None);
    }

    #[test]
    fn test_custom_header_names() {
        let names = HeaderNames::new("ratelimit-left", "ratelimit-size", "wait");
        let headers = HashMap::from([("ratelimit-left", "1"), ("ratelimit-size", "10")]);

        let quota = QuotaHeaders::from_headers(&headers, &names);
        assert_eq!(quota.remaining, Some(1));
        assert_eq!(quota.limit, Some(10));
    }

    #[test]
    fn test_malformed_counts_are_ignored() {
        let headers = HashMap::from([("x-ratelimit-remaining", "lots"), ("x-ratelimit-limit", "-3")]);
        let quota = QuotaHeaders::from_headers(&headers, &HeaderNames::default());
        assert!(quota.is_empty());
    }

    #[test]
    fn test_zero_limit_has_no_fraction() {
        let quota = QuotaHeaders {
            remaining: Some(0),
            limit: Some(0),
            retry_after: None,
        };
        assert_eq!(quota.remaining_fraction(), None);
    }
}
