//! Query filters
//!
//! [`QueryFilters`] is the caller-facing description; [`CompiledFilters`] is
//! the validated, regex-compiled form used by the engine. All filters are
//! AND-combined.

use crate::error::{Error, Result};
use crate::session::types::{base_mime, CanonicalRecord};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Default number of records returned
pub const DEFAULT_LIMIT: usize = 50;

/// Hard ceiling on returned records
pub const MAX_LIMIT: usize = 500;

/// Recency filters look back at most this many minutes.
pub const MAX_SINCE_MINUTES: u64 = 360;

pub const DEFAULT_STATUS_MAX: u16 = 999;

pub const DEFAULT_MAX_SIZE: u64 = 1_000_000_000;

/// Caller-supplied filters; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    /// Only records received within this many minutes (capped, 0 = no limit)
    pub since_minutes: Option<u64>,
    /// Case-insensitive substring or regex over the host
    pub host_pattern: Option<String>,
    /// Case-insensitive plain substring over the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_contains: Option<String>,
    /// Case-insensitive substring or regex over the URL
    pub url_pattern: Option<String>,
    pub method: Option<String>,
    pub status_min: Option<u16>,
    pub status_max: Option<u16>,
    /// Inclusive bounds on the declared content length
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    /// Group name (`javascript`, `html`, ...) or an exact MIME type
    pub content_type: Option<String>,
    pub limit: Option<usize>,
}

impl QueryFilters {
    /// Requested limit clamped to `1..=MAX_LIMIT`
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    /// Requested recency window, capped; `None` when unrestricted
    pub fn effective_since_minutes(&self) -> Option<u64> {
        self.since_minutes
            .filter(|m| *m > 0)
            .map(|m| m.min(MAX_SINCE_MINUTES))
    }
}

/// A filter that was ignored for this call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterWarning {
    pub field: String,
    pub message: String,
}

/// Case-insensitive text matcher: substring or regex.
#[derive(Debug, Clone)]
pub struct TextPattern {
    needle: String,
    regex: Regex,
}

impl TextPattern {
    pub fn compile(pattern: &str) -> std::result::Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self {
            needle: pattern.to_lowercase(),
            regex,
        })
    }

    pub fn matches(&self, haystack: &str) -> bool {
        haystack.to_lowercase().contains(&self.needle) || self.regex.is_match(haystack)
    }
}

/// Does `content_type` belong to the requested group or equal the MIME?
pub fn content_type_matches(content_type: &str, wanted: &str) -> bool {
    let base = base_mime(content_type);
    let wanted = wanted.trim().to_ascii_lowercase();
    let group: &[&str] = match wanted.as_str() {
        "javascript" => &[
            "application/javascript",
            "text/javascript",
            "application/x-javascript",
            "application/ecmascript",
            "text/ecmascript",
        ],
        "html" => &["text/html", "application/xhtml+xml"],
        "json" => &["application/json", "text/json"],
        "css" => &["text/css"],
        "plain" => &["text/plain"],
        "xml" => &["application/xml", "text/xml"],
        "image" => return base.starts_with("image/"),
        _ => &[],
    };
    group.contains(&base.as_str()) || base == base_mime(&wanted)
}

/// Validated filters ready to run against a snapshot
#[derive(Debug, Clone)]
pub struct CompiledFilters {
    cutoff: Option<f64>,
    host: Option<TextPattern>,
    host_contains: Option<String>,
    url: Option<TextPattern>,
    method: Option<String>,
    status: (u16, u16),
    size: (u64, u64),
    content_type: Option<String>,
    pub limit: usize,
}

impl CompiledFilters {
    /// Validate and compile. Invalid patterns are dropped with a warning;
    /// inverted ranges reject the call.
    pub fn compile(filters: &QueryFilters, now: f64) -> Result<(Self, Vec<FilterWarning>)> {
        let status = (
            filters.status_min.unwrap_or(0),
            filters.status_max.unwrap_or(DEFAULT_STATUS_MAX),
        );
        if status.0 > status.1 {
            return Err(Error::invalid_filter(
                "status",
                format!("status_min {} exceeds status_max {}", status.0, status.1),
            ));
        }

        let size = (
            filters.min_size.unwrap_or(0),
            filters.max_size.unwrap_or(DEFAULT_MAX_SIZE),
        );
        if size.0 > size.1 {
            return Err(Error::invalid_filter(
                "size",
                format!("min_size {} exceeds max_size {}", size.0, size.1),
            ));
        }

        let mut warnings = Vec::new();
        let host = compile_pattern("host_pattern", filters.host_pattern.as_deref(), &mut warnings);
        let url = compile_pattern("url_pattern", filters.url_pattern.as_deref(), &mut warnings);

        let compiled = Self {
            cutoff: filters
                .effective_since_minutes()
                .map(|minutes| now - (minutes * 60) as f64),
            host,
            host_contains: non_empty(filters.host_contains.as_deref()).map(str::to_lowercase),
            url,
            method: non_empty(filters.method.as_deref()).map(str::to_ascii_uppercase),
            status,
            size,
            content_type: non_empty(filters.content_type.as_deref()).map(str::to_string),
            limit: filters.effective_limit(),
        };
        Ok((compiled, warnings))
    }

    pub fn matches(&self, record: &CanonicalRecord) -> bool {
        if let Some(cutoff) = self.cutoff {
            if record.received_at < cutoff {
                return false;
            }
        }
        if let Some(host) = &self.host {
            if !host.matches(&record.host) {
                return false;
            }
        }
        if let Some(needle) = &self.host_contains {
            if !record.host.to_lowercase().contains(needle.as_str()) {
                return false;
            }
        }
        if let Some(url) = &self.url {
            if !url.matches(&record.url) {
                return false;
            }
        }
        if let Some(method) = &self.method {
            if !record.method.eq_ignore_ascii_case(method) {
                return false;
            }
        }
        if record.status_code < self.status.0 || record.status_code > self.status.1 {
            return false;
        }
        if record.content_length < self.size.0 || record.content_length > self.size.1 {
            return false;
        }
        if let Some(wanted) = &self.content_type {
            if !content_type_matches(&record.content_type, wanted) {
                return false;
            }
        }
        true
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn compile_pattern(
    field: &str,
    pattern: Option<&str>,
    warnings: &mut Vec<FilterWarning>,
) -> Option<TextPattern> {
    let pattern = non_empty(pattern)?;
    match TextPattern::compile(pattern) {
        Ok(compiled) => Some(compiled),
        Err(e) => {
            tracing::warn!(field, pattern, error = %e, "Ignoring invalid filter pattern");
            warnings.push(FilterWarning {
                field: field.to_string(),
                message: format!("invalid pattern '{}' ignored: {}", pattern, e),
            });
            None
        }
    }
}
