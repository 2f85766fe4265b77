//! Presentation views over captured sessions
//!
//! Shapes returned by the HTTP layer: overview rows for listings, the
//! per-session detail, headers and body views, exports and health.

use super::CaptureBridge;
use crate::config::ExtractionConfig;
use crate::error::{Error, Result};
use crate::extract::{ContentExtractor, Extraction};
use crate::risk::{self, RiskLevel};
use crate::session::{BufferKind, CanonicalRecord, HeaderMap, HeaderValue};
use chrono::Local;
use serde::{Deserialize, Serialize};

/// Default number of sessions exported
pub const DEFAULT_EXPORT_LIMIT: usize = 100;

/// Hard ceiling on exported sessions
pub const MAX_EXPORT_LIMIT: usize = 1000;

fn local_time(record: &CanonicalRecord, fmt: &str) -> String {
    record
        .received_at_utc()
        .with_timezone(&Local)
        .format(fmt)
        .to_string()
}

// =============================================================================
// Overview
// =============================================================================

/// One row of a listing or search result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionOverview {
    pub id: String,
    pub time: String,
    pub method: String,
    pub url: String,
    pub host: String,
    pub status: String,
    pub status_code: u16,
    pub content_type: String,
    pub content_type_full: String,
    /// Declared content length
    pub size: u64,
    /// Decoded response body length
    pub response_size: usize,
    pub is_https: bool,
    pub risk_flag: Option<String>,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub risk_reasons: Vec<String>,
    pub received_at: f64,
    pub received_at_iso: String,
}

impl SessionOverview {
    pub fn from_record(record: &CanonicalRecord) -> Self {
        let assessment = risk::classify(record);
        Self {
            id: record.id.clone(),
            time: local_time(record, "%H:%M:%S"),
            method: record.method.clone(),
            url: record.url.clone(),
            host: record.host.clone(),
            status: record.status_code.to_string(),
            status_code: record.status_code,
            content_type: record.base_content_type(),
            content_type_full: record.content_type.clone(),
            size: record.content_length,
            response_size: record.response_size(),
            is_https: record.is_https(),
            risk_flag: assessment.flag,
            risk_score: assessment.score,
            risk_level: assessment.level,
            risk_reasons: assessment.reasons,
            received_at: record.received_at,
            received_at_iso: record.received_at_iso(),
        }
    }
}

// =============================================================================
// Detail
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionDetail {
    pub session: DetailRecord,
    pub analysis: SessionAnalysis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailRecord {
    pub id: String,
    pub url: String,
    pub host: String,
    pub method: String,
    pub status_code: u16,
    pub content_type: String,
    pub content_length: u64,
    pub response_size: usize,
    pub scheme: String,
    pub received_at: f64,
    pub received_at_iso: String,
    pub request_headers: HeaderMap,
    pub response_headers: HeaderMap,
    pub threat_annotation: Option<String>,
    pub diagnostic: Option<String>,
    pub id_synthesized: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionAnalysis {
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub risk_flag: Option<String>,
    pub classification: String,
    pub indicators: Vec<String>,
    pub reasons: Vec<String>,
    pub recommendations: Vec<String>,
}

impl SessionDetail {
    pub fn from_record(record: &CanonicalRecord) -> Self {
        let assessment = risk::classify(record);

        let mut indicators = assessment.reasons.clone();
        if let Some(annotation) = record.annotation() {
            indicators.extend(risk::annotation_indicators(annotation));
        }

        let analysis = SessionAnalysis {
            risk_score: assessment.score,
            risk_level: assessment.level,
            classification: risk::classification_label(assessment.flag.as_deref()).to_string(),
            recommendations: risk::recommendations(&assessment),
            risk_flag: assessment.flag,
            indicators,
            reasons: assessment.reasons,
        };

        let session = DetailRecord {
            id: record.id.clone(),
            url: record.url.clone(),
            host: record.host.clone(),
            method: record.method.clone(),
            status_code: record.status_code,
            content_type: record.content_type.clone(),
            content_length: record.content_length,
            response_size: record.response_size(),
            scheme: record.scheme.clone(),
            received_at: record.received_at,
            received_at_iso: record.received_at_iso(),
            request_headers: record.request_headers.clone(),
            response_headers: record.response_headers.clone(),
            threat_annotation: record.threat_annotation.clone(),
            diagnostic: record.diagnostic.clone(),
            id_synthesized: record.id_synthesized,
        };

        Self { session, analysis }
    }
}

// =============================================================================
// Headers
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeadersView {
    pub session_id: String,
    pub request_headers: HeaderMap,
    pub response_headers: HeaderMap,
}

impl HeadersView {
    pub fn from_record(record: &CanonicalRecord) -> Self {
        Self {
            session_id: record.id.clone(),
            request_headers: record.request_headers.clone(),
            response_headers: record.response_headers.clone(),
        }
    }
}

// =============================================================================
// Body
// =============================================================================

/// Caller options for the body view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct BodyOptions {
    /// Return full bodies without truncation
    #[serde(default)]
    pub raw: bool,
    /// Attach a budgeted extraction when the response is larger than the preview
    #[serde(default)]
    pub smart_extract: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BodySizes {
    pub response: usize,
    pub request: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BodyView {
    pub id: String,
    pub content_type: String,
    pub content_length: u64,
    pub response_body: String,
    pub request_body: String,
    pub truncated: bool,
    pub response_truncated: bool,
    pub request_truncated: bool,
    pub full_size: BodySizes,
    pub threat_annotation: Option<String>,
    pub smart_extraction_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smart_extraction: Option<Extraction>,
}

impl BodyView {
    pub fn build(
        record: &CanonicalRecord,
        options: BodyOptions,
        limits: &ExtractionConfig,
        extractor: &ContentExtractor,
    ) -> Self {
        let response_size = record.response_size();
        let request_size = record.request_size();

        if response_size > limits.large_body_warning_bytes {
            tracing::warn!(
                session_id = %record.id,
                bytes = response_size,
                "Serving large response body"
            );
        }

        let (response_body, response_truncated) =
            preview(&record.response_body, "Response", limits.preview_bytes, options.raw);
        let (request_body, request_truncated) =
            preview(&record.request_body, "Request", limits.preview_bytes, options.raw);

        let smart_extraction = (options.smart_extract && response_size > limits.preview_bytes)
            .then(|| {
                extractor.extract(
                    &record.response_body,
                    &record.content_type,
                    limits.default_budget,
                )
            });

        Self {
            id: record.id.clone(),
            content_type: record.content_type.clone(),
            content_length: record.content_length,
            response_body,
            request_body,
            truncated: response_truncated || request_truncated,
            response_truncated,
            request_truncated,
            full_size: BodySizes {
                response: response_size,
                request: request_size,
            },
            threat_annotation: record.threat_annotation.clone(),
            smart_extraction_available: smart_extraction.is_some(),
            smart_extraction,
        }
    }
}

/// Truncate `body` to `max` bytes with a marker unless `raw`.
fn preview(body: &str, label: &str, max: usize, raw: bool) -> (String, bool) {
    if raw || body.len() <= max {
        return (body.to_string(), false);
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    let text = format!(
        "{}\n\n... [TRUNCATED: {} was {} bytes; showing first {} bytes] ...",
        &body[..end],
        label,
        body.len(),
        end
    );
    (text, true)
}

// =============================================================================
// Export
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
    Har,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "har" => Ok(Self::Har),
            other => Err(format!("Unsupported export format: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub format: ExportFormat,
    pub limit: Option<usize>,
    pub host_filter: Option<String>,
    #[serde(default)]
    pub include_bodies: bool,
}

impl ExportRequest {
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_EXPORT_LIMIT)
            .clamp(1, MAX_EXPORT_LIMIT)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportDocument {
    pub format: ExportFormat,
    pub sessions_exported: usize,
    pub includes_bodies: bool,
    pub host_filter: Option<String>,
    pub export_data: ExportData,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ExportData {
    Json(JsonExport),
    Csv(CsvExport),
    Har(HarExport),
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonExport {
    pub export_info: ExportInfo,
    pub sessions: Vec<CanonicalRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportInfo {
    pub format: ExportFormat,
    pub exported_at: String,
    pub session_count: usize,
    pub includes_bodies: bool,
}

pub const CSV_COLUMNS: [&str; 8] = [
    "id",
    "time",
    "method",
    "host",
    "url",
    "status",
    "content_type",
    "size",
];

#[derive(Debug, Clone, Serialize)]
pub struct CsvExport {
    pub format: ExportFormat,
    pub headers: Vec<String>,
    pub data: Vec<CsvRow>,
    /// The same rows rendered as RFC 4180 text
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CsvRow {
    pub id: String,
    pub time: String,
    pub method: String,
    pub host: String,
    pub url: String,
    pub status: u16,
    pub content_type: String,
    pub size: u64,
}

impl CsvRow {
    fn from_record(record: &CanonicalRecord) -> Self {
        Self {
            id: record.id.clone(),
            time: local_time(record, "%Y-%m-%d %H:%M:%S"),
            method: record.method.clone(),
            host: record.host.clone(),
            url: record.url.clone(),
            status: record.status_code,
            content_type: record.content_type.clone(),
            size: record.content_length,
        }
    }
}

/// Render rows as RFC 4180 text with a header line.
fn csv_text(rows: &[CsvRow]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    if rows.is_empty() {
        writer.write_record(CSV_COLUMNS)?;
    }
    let bytes = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[derive(Debug, Clone, Serialize)]
pub struct HarExport {
    pub log: HarLog,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarLog {
    pub version: String,
    pub creator: HarCreator,
    pub entries: Vec<HarEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarCreator {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarEntry {
    pub started_date_time: String,
    pub request: HarRequest,
    pub response: HarResponse,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<HarHeader>,
    pub body_size: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<HarHeader>,
    pub content: HarContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    pub size: u64,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarHeader {
    pub name: String,
    pub value: String,
}

fn har_headers(headers: &HeaderMap) -> Vec<HarHeader> {
    headers
        .iter()
        .flat_map(|(name, value)| {
            let values = match value {
                HeaderValue::Single(v) => vec![v.clone()],
                HeaderValue::Multi(vs) => vs.clone(),
            };
            values.into_iter().map(move |value| HarHeader {
                name: name.clone(),
                value,
            })
        })
        .collect()
}

fn har_entry(record: &CanonicalRecord, include_bodies: bool) -> HarEntry {
    let status_text = axum::http::StatusCode::from_u16(record.status_code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or_default()
        .to_string();
    HarEntry {
        started_date_time: record.received_at_iso(),
        request: HarRequest {
            method: record.method.clone(),
            url: record.url.clone(),
            headers: har_headers(&record.request_headers),
            body_size: record.request_size() as i64,
        },
        response: HarResponse {
            status: record.status_code,
            status_text,
            headers: har_headers(&record.response_headers),
            content: HarContent {
                size: record.content_length,
                mime_type: record.content_type.clone(),
                text: include_bodies.then(|| record.response_body.clone()),
            },
        },
    }
}

impl CaptureBridge {
    /// Export the most recent live sessions, oldest first.
    pub async fn export(&self, request: &ExportRequest) -> Result<ExportDocument> {
        let snapshot = self.store().snapshot(BufferKind::All).await;
        let host_filter = request
            .host_filter
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_lowercase);

        let matched: Vec<&CanonicalRecord> = snapshot
            .iter()
            .map(|r| &**r)
            .filter(|r| match &host_filter {
                Some(filter) => r.host.to_lowercase().contains(filter.as_str()),
                None => true,
            })
            .collect();
        let start = matched.len().saturating_sub(request.effective_limit());
        let records = &matched[start..];

        let export_data = match request.format {
            ExportFormat::Json => ExportData::Json(JsonExport {
                export_info: ExportInfo {
                    format: ExportFormat::Json,
                    exported_at: Local::now().to_rfc3339(),
                    session_count: records.len(),
                    includes_bodies: request.include_bodies,
                },
                sessions: records
                    .iter()
                    .map(|r| {
                        let mut record = (*r).clone();
                        if !request.include_bodies {
                            record.request_body.clear();
                            record.response_body.clear();
                        }
                        record
                    })
                    .collect(),
            }),
            ExportFormat::Csv => {
                let data: Vec<CsvRow> = records.iter().map(|r| CsvRow::from_record(r)).collect();
                ExportData::Csv(CsvExport {
                    format: ExportFormat::Csv,
                    headers: CSV_COLUMNS.iter().map(|c| c.to_string()).collect(),
                    text: csv_text(&data)?,
                    data,
                })
            }
            ExportFormat::Har => ExportData::Har(HarExport {
                log: HarLog {
                    version: "1.2".to_string(),
                    creator: HarCreator {
                        name: env!("CARGO_PKG_NAME").to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    },
                    entries: records
                        .iter()
                        .map(|r| har_entry(r, request.include_bodies))
                        .collect(),
                },
            }),
        };

        tracing::info!(
            format = ?request.format,
            sessions = records.len(),
            "Sessions exported"
        );

        Ok(ExportDocument {
            format: request.format,
            sessions_exported: records.len(),
            includes_bodies: request.include_bodies,
            host_filter,
            export_data,
        })
    }

    pub async fn health(&self) -> HealthView {
        let counts = self.store().counts().await;
        HealthView {
            status: "healthy".to_string(),
            uptime_seconds: self.uptime_seconds(),
            live_buffer_size: counts.live_len,
            flagged_buffer_size: counts.flagged_len,
        }
    }
}

// =============================================================================
// Health
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthView {
    pub status: String,
    pub uptime_seconds: f64,
    pub live_buffer_size: usize,
    pub flagged_buffer_size: usize,
}
