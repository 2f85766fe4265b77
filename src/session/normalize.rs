//! Payload normalization
//!
//! Turns the loosely-typed JSON pushed by the capture agent into a
//! [`CanonicalRecord`]. Every field is resolved through [`FIELD_ALIASES`]:
//! the first alias that is present, not `null` and not an empty string wins.
//!
//! Normalization never fails. Payloads that cannot be read in full produce a
//! degraded record carrying a `diagnostic` note; payloads without any id get
//! a synthetic, strictly increasing millisecond id.

use crate::session::types::{CanonicalRecord, HeaderMap, HeaderValue};
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// Alias lists per canonical field, in priority order.
#[derive(Debug)]
pub struct FieldAliases {
    pub id: &'static [&'static str],
    pub url: &'static [&'static str],
    pub host: &'static [&'static str],
    pub method: &'static [&'static str],
    pub status: &'static [&'static str],
    pub content_type: &'static [&'static str],
    pub content_length: &'static [&'static str],
    pub response_body: &'static [&'static str],
    pub response_body_base64: &'static [&'static str],
    pub request_body: &'static [&'static str],
    pub request_body_base64: &'static [&'static str],
    pub received_at: &'static [&'static str],
    pub scheme: &'static [&'static str],
    pub request_headers: &'static [&'static str],
    pub response_headers: &'static [&'static str],
    pub threat_annotation: &'static [&'static str],
}

/// Field alias table used by [`normalize`].
pub const FIELD_ALIASES: FieldAliases = FieldAliases {
    id: &["id", "session_id", "fiddler_session_id"],
    url: &["url"],
    host: &["host"],
    method: &["method", "RequestMethod"],
    status: &["statusCode", "status"],
    content_type: &["contentType", "mime"],
    content_length: &["contentLength", "body_length"],
    response_body: &["responseBody"],
    response_body_base64: &["responseBodyBase64", "response_body_base64"],
    request_body: &["requestBody", "request_body"],
    request_body_base64: &["requestBodyBase64", "request_body_base64"],
    received_at: &["received_at", "timestamp", "StartedDateTime"],
    scheme: &["scheme", "protocol"],
    request_headers: &["requestHeaders", "request_headers"],
    response_headers: &["responseHeaders", "response_headers"],
    threat_annotation: &["ekfiddleComments", "sessionFlags", "ekfiddleFlags"],
};

/// Epoch values above this are read as milliseconds.
const MILLIS_THRESHOLD: f64 = 1e12;

/// Whether the payload was read in full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeOutcome {
    Clean,
    /// Some part of the payload was unusable; see `record.diagnostic`
    Degraded,
}

/// Result of normalizing one payload
#[derive(Debug, Clone)]
pub struct Normalized {
    pub record: CanonicalRecord,
    pub outcome: NormalizeOutcome,
}

/// Normalize a raw payload, stamping defaults with the current time.
pub fn normalize(raw: &Value) -> Normalized {
    normalize_at(raw, now_epoch())
}

/// Normalize a raw payload with an explicit ingestion time (epoch seconds).
pub fn normalize_at(raw: &Value, now: f64) -> Normalized {
    let Some(obj) = raw.as_object() else {
        let id = synthetic_id("error", now);
        let kind = json_kind(raw);
        tracing::error!(
            session_id = %id,
            payload_kind = kind,
            "Normalization failed and payload carries no session id"
        );
        let record = CanonicalRecord::minimal(
            id,
            now,
            format!("normalization_error: payload is a JSON {} rather than an object", kind),
        );
        return Normalized {
            record,
            outcome: NormalizeOutcome::Degraded,
        };
    };

    let aliases = &FIELD_ALIASES;
    let mut notes: Vec<String> = Vec::new();

    let url = resolve_text(obj, aliases.url).unwrap_or_default();
    let parsed_url = url::Url::parse(&url).ok();

    let (id, id_synthesized) = match first_usable(obj, aliases.id) {
        Some(value) => (id_text(value), false),
        None => {
            let id = synthetic_id("missing-id", now);
            tracing::warn!(
                session_id = %id,
                url = %truncate(&url, 100),
                "No session id in payload; synthesized a fallback id"
            );
            notes.push("session id missing from payload; id synthesized".to_string());
            (id, true)
        }
    };

    let host = resolve_text(obj, aliases.host)
        .or_else(|| {
            parsed_url
                .as_ref()
                .and_then(|u| u.host_str().map(str::to_string))
        })
        .unwrap_or_default();

    let scheme = resolve_text(obj, aliases.scheme)
        .or_else(|| parsed_url.as_ref().map(|u| u.scheme().to_string()))
        .unwrap_or_else(|| "http".to_string())
        .to_ascii_lowercase();

    let status_code = first_usable(obj, aliases.status)
        .and_then(as_u64)
        .and_then(|code| u16::try_from(code).ok())
        .unwrap_or(0);

    let content_length = first_usable(obj, aliases.content_length)
        .and_then(as_u64)
        .unwrap_or(0);

    let response_body = resolve_body(
        obj,
        aliases.response_body,
        aliases.response_body_base64,
        "response body",
        &mut notes,
    );
    let request_body = resolve_body(
        obj,
        aliases.request_body,
        aliases.request_body_base64,
        "request body",
        &mut notes,
    );

    let request_headers = resolve_headers(obj, aliases.request_headers, "request", &mut notes);
    let response_headers = resolve_headers(obj, aliases.response_headers, "response", &mut notes);

    let received_at = coerce_timestamp(first_usable(obj, aliases.received_at), now);

    let threat_annotation = resolve_text(obj, aliases.threat_annotation)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());

    let outcome = if notes.is_empty() {
        NormalizeOutcome::Clean
    } else {
        tracing::debug!(session_id = %id, notes = ?notes, "Payload normalized with degradations");
        NormalizeOutcome::Degraded
    };

    let record = CanonicalRecord {
        id,
        url,
        host,
        method: resolve_text(obj, aliases.method).unwrap_or_default(),
        scheme,
        status_code,
        content_type: resolve_text(obj, aliases.content_type).unwrap_or_default(),
        content_length,
        request_headers,
        response_headers,
        request_body,
        response_body,
        received_at,
        threat_annotation,
        diagnostic: (!notes.is_empty()).then(|| notes.join("; ")),
        id_synthesized,
    };

    Normalized { record, outcome }
}

/// Convert assorted timestamp inputs into epoch seconds.
///
/// Accepts RFC 3339 / ISO-8601 strings (naive values are read as UTC),
/// numeric strings and numbers. Values above 1e12 are milliseconds. Anything
/// unreadable or non-finite falls back to `default`.
pub fn coerce_timestamp(value: Option<&Value>, default: f64) -> f64 {
    let secs = match value {
        Some(Value::Number(n)) => n.as_f64().map(epoch_seconds),
        Some(Value::String(s)) => parse_timestamp_str(s),
        _ => None,
    };
    secs.filter(|s| s.is_finite()).unwrap_or(default)
}

fn parse_timestamp_str(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(datetime_seconds(&dt.with_timezone(&Utc)));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(datetime_seconds(&dt.with_timezone(&Utc)));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(datetime_seconds(&Utc.from_utc_datetime(&naive)));
        }
    }
    s.parse::<f64>().ok().map(epoch_seconds)
}

fn datetime_seconds(dt: &DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) / 1e9
}

fn epoch_seconds(value: f64) -> f64 {
    if value > MILLIS_THRESHOLD {
        value / 1000.0
    } else {
        value
    }
}

/// First alias whose value is present, not null and not an empty string.
fn first_usable<'a>(obj: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|key| obj.get(*key))
        .find(|value| match value {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        })
}

fn resolve_text(obj: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    first_usable(obj, aliases).and_then(scalar_text)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn id_text(value: &Value) -> String {
    scalar_text(value).unwrap_or_else(|| value.to_string())
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn resolve_body(
    obj: &Map<String, Value>,
    text_aliases: &[&str],
    base64_aliases: &[&str],
    label: &str,
    notes: &mut Vec<String>,
) -> String {
    if let Some(text) = resolve_text(obj, text_aliases) {
        return text;
    }
    match first_usable(obj, base64_aliases) {
        None => String::new(),
        Some(Value::String(encoded)) => {
            let compact: String = encoded
                .chars()
                .filter(|c| !c.is_ascii_whitespace())
                .collect();
            match base64::engine::general_purpose::STANDARD.decode(compact.as_bytes()) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    notes.push(format!("{} base64 decode failed: {}", label, e));
                    String::new()
                }
            }
        }
        Some(other) => {
            notes.push(format!(
                "{} base64 field is a JSON {}, expected string",
                label,
                json_kind(other)
            ));
            String::new()
        }
    }
}

fn resolve_headers(
    obj: &Map<String, Value>,
    aliases: &[&str],
    label: &str,
    notes: &mut Vec<String>,
) -> HeaderMap {
    match first_usable(obj, aliases) {
        None => HeaderMap::new(),
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(name, value)| header_value(value).map(|v| (name.clone(), v)))
            .collect(),
        Some(other) => {
            notes.push(format!(
                "{} headers are a JSON {}, expected object",
                label,
                json_kind(other)
            ));
            HeaderMap::new()
        }
    }
}

fn header_value(value: &Value) -> Option<HeaderValue> {
    match value {
        Value::Array(items) => Some(HeaderValue::Multi(
            items.iter().filter_map(scalar_text).collect(),
        )),
        other => scalar_text(other).map(HeaderValue::Single),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

static LAST_SYNTHETIC_MILLIS: AtomicU64 = AtomicU64::new(0);

/// `<prefix>-<millis>` where millis is strictly increasing across the process.
fn synthetic_id(prefix: &str, now: f64) -> String {
    let now_ms = (now * 1000.0).max(0.0) as u64;
    let mut last = LAST_SYNTHETIC_MILLIS.load(Ordering::Acquire);
    loop {
        let next = now_ms.max(last + 1);
        match LAST_SYNTHETIC_MILLIS.compare_exchange_weak(
            last,
            next,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => return format!("{}-{}", prefix, next),
            Err(actual) => last = actual,
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Current time in epoch seconds
pub fn now_epoch() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
