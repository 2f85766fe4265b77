//! Canonical session record types
//!
//! A [`CanonicalRecord`] is the normalized, immutable form of one captured
//! HTTP transaction. Records are created once at ingestion and shared as
//! `Arc<CanonicalRecord>` between the buffers and every snapshot.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single header value: either one string or the repeated values of a
/// header that appeared more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Single(String),
    Multi(Vec<String>),
}

/// Header map with unique keys
pub type HeaderMap = BTreeMap<String, HeaderValue>;

/// Normalized captured HTTP transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRecord {
    /// Session identifier supplied by the capture agent (never empty)
    pub id: String,
    pub url: String,
    pub host: String,
    pub method: String,
    pub scheme: String,
    pub status_code: u16,
    pub content_type: String,
    pub content_length: u64,
    pub request_headers: HeaderMap,
    pub response_headers: HeaderMap,
    pub request_body: String,
    pub response_body: String,
    /// Epoch seconds
    pub received_at: f64,
    /// Verdict text from the upstream intelligence source
    pub threat_annotation: Option<String>,
    /// Notes left by the normalizer when the payload was degraded
    pub diagnostic: Option<String>,
    /// True when `id` was fabricated because the payload carried none
    pub id_synthesized: bool,
}

impl CanonicalRecord {
    /// Minimal well-formed record used when the payload could not be read.
    pub fn minimal(id: String, received_at: f64, diagnostic: String) -> Self {
        Self {
            id,
            url: String::new(),
            host: String::new(),
            method: String::new(),
            scheme: "http".to_string(),
            status_code: 0,
            content_type: String::new(),
            content_length: 0,
            request_headers: HeaderMap::new(),
            response_headers: HeaderMap::new(),
            request_body: String::new(),
            response_body: String::new(),
            received_at,
            threat_annotation: None,
            diagnostic: Some(diagnostic),
            id_synthesized: true,
        }
    }

    /// Reception time as a UTC timestamp
    pub fn received_at_utc(&self) -> DateTime<Utc> {
        let secs = self.received_at.floor();
        let nanos = ((self.received_at - secs) * 1e9) as u32;
        Utc.timestamp_opt(secs as i64, nanos.min(999_999_999))
            .single()
            .unwrap_or_default()
    }

    /// Reception time in RFC 3339 form
    pub fn received_at_iso(&self) -> String {
        self.received_at_utc()
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }

    /// MIME type without parameters, lower-cased
    pub fn base_content_type(&self) -> String {
        base_mime(&self.content_type)
    }

    /// Byte length of the decoded response body
    pub fn response_size(&self) -> usize {
        self.response_body.len()
    }

    /// Byte length of the decoded request body
    pub fn request_size(&self) -> usize {
        self.request_body.len()
    }

    pub fn is_https(&self) -> bool {
        self.scheme.eq_ignore_ascii_case("https")
    }

    /// Non-empty, trimmed threat annotation
    pub fn annotation(&self) -> Option<&str> {
        self.threat_annotation
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Strip MIME parameters (`text/html; charset=utf-8` → `text/html`).
pub fn base_mime(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_mime() {
        assert_eq!(base_mime("text/HTML; charset=utf-8"), "text/html");
        assert_eq!(base_mime("application/json"), "application/json");
        assert_eq!(base_mime(""), "");
    }

    #[test]
    fn test_minimal_record() {
        let record = CanonicalRecord::minimal("error-1".to_string(), 10.0, "bad".to_string());
        assert_eq!(record.id, "error-1");
        assert!(record.id_synthesized);
        assert_eq!(record.diagnostic.as_deref(), Some("bad"));
        assert!(record.annotation().is_none());
    }

    #[test]
    fn test_received_at_iso() {
        let mut record = CanonicalRecord::minimal("a".to_string(), 0.0, String::new());
        record.received_at = 1_700_000_000.5;
        assert_eq!(record.received_at_iso(), "2023-11-14T22:13:20.500Z");
    }

    #[test]
    fn test_annotation_blank_is_none() {
        let mut record = CanonicalRecord::minimal("a".to_string(), 0.0, String::new());
        record.threat_annotation = Some("   ".to_string());
        assert!(record.annotation().is_none());
        record.threat_annotation = Some(" High: eval ".to_string());
        assert_eq!(record.annotation(), Some("High: eval"));
    }

    #[test]
    fn test_header_value_serialization() {
        let mut headers = HeaderMap::new();
        headers.insert("Host".to_string(), HeaderValue::Single("a.com".to_string()));
        headers.insert(
            "Set-Cookie".to_string(),
            HeaderValue::Multi(vec!["a=1".to_string(), "b=2".to_string()]),
        );
        let json = serde_json::to_string(&headers).unwrap();
        assert_eq!(json, r#"{"Host":"a.com","Set-Cookie":["a=1","b=2"]}"#);
    }
}
