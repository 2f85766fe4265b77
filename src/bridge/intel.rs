//! Threat hunting and annotation analysis views
//!
//! Read-only reports built from a snapshot of the live buffer. They use the
//! rules in [`crate::risk::hunt`] and [`crate::risk::annotation`] and never
//! write back into the store.

use super::views::SessionOverview;
use super::CaptureBridge;
use crate::error::{Error, Result};
use crate::query::filter::MAX_SINCE_MINUTES;
use crate::query::MAX_LIMIT;
use crate::risk::annotation::{summarize, AnnotationSummary};
use crate::risk::{
    self, AnnotationAnalysis, HuntFinding, HuntType, SeverityFilter, ThreatAssessment,
    ThreatLevel, ThreatType,
};
use crate::session::normalize::now_epoch;
use crate::session::{BufferKind, CanonicalRecord};
use serde::Serialize;
use std::sync::Arc;

pub const DEFAULT_HUNT_MINUTES: u64 = 30;
pub const DEFAULT_ANNOTATED_MINUTES: u64 = 60;
pub const DEFAULT_ANNOTATED_LIMIT: usize = 50;
pub const DEFAULT_THREAT_MINUTES: u64 = 120;
pub const DEFAULT_MIN_RISK_SCORE: f64 = 0.7;
pub const DEFAULT_THREAT_CATEGORIES: &[ThreatType] = &[ThreatType::Malware, ThreatType::Phishing];

/// Score at which a threat session is called critical
const CRITICAL_SCORE: f64 = 0.8;

/// Cap a recency window; zero means unrestricted.
fn window(minutes: u64) -> u64 {
    minutes.min(MAX_SINCE_MINUTES)
}

fn in_window(record: &CanonicalRecord, minutes: u64, now: f64) -> bool {
    minutes == 0 || record.received_at >= now - (minutes * 60) as f64
}

// =============================================================================
// Threat hunt
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HuntRequest {
    pub hunt_type: HuntType,
    pub time_range_minutes: u64,
    pub include_analysis: bool,
}

impl Default for HuntRequest {
    fn default() -> Self {
        Self {
            hunt_type: HuntType::All,
            time_range_minutes: DEFAULT_HUNT_MINUTES,
            include_analysis: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HuntHit {
    #[serde(flatten)]
    pub finding: HuntFinding,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<SessionOverview>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HuntReport {
    pub hunt_type: HuntType,
    pub time_range_minutes: u64,
    pub sessions_analyzed: usize,
    pub findings_count: usize,
    pub findings: Vec<HuntHit>,
}

// =============================================================================
// Annotation analysis
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotatedRequest {
    pub limit: usize,
    pub time_range_minutes: u64,
    pub threat_level: SeverityFilter,
}

impl Default for AnnotatedRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_ANNOTATED_LIMIT,
            time_range_minutes: DEFAULT_ANNOTATED_MINUTES,
            threat_level: SeverityFilter::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedSession {
    #[serde(flatten)]
    pub session: SessionOverview,
    pub annotation: String,
    pub analysis: AnnotationAnalysis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedReport {
    pub sessions: Vec<AnnotatedSession>,
    pub total_sessions: usize,
    pub threats_found: usize,
    pub time_range_minutes: u64,
    pub threat_level_filter: SeverityFilter,
    pub summary: AnnotationSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationDetail {
    pub session_id: String,
    pub annotation: Option<String>,
    pub analysis: AnnotationAnalysis,
    pub threat_assessment: ThreatAssessment,
    pub threat_score: f64,
    pub classification: ThreatLevel,
    pub indicators: Vec<String>,
    pub session: SessionOverview,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThreatRequest {
    pub time_range_minutes: u64,
    pub min_risk_score: f64,
    pub categories: Vec<ThreatType>,
}

impl Default for ThreatRequest {
    fn default() -> Self {
        Self {
            time_range_minutes: DEFAULT_THREAT_MINUTES,
            min_risk_score: DEFAULT_MIN_RISK_SCORE,
            categories: DEFAULT_THREAT_CATEGORIES.to_vec(),
        }
    }
}

impl ThreatRequest {
    pub fn validate(&self) -> Result<()> {
        if !self.min_risk_score.is_finite() || !(0.0..=1.0).contains(&self.min_risk_score) {
            return Err(Error::InvalidFilter {
                field: "min_risk_score".to_string(),
                message: "must be between 0 and 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Parse a comma-separated category list. Unknown names are rejected.
pub fn parse_categories(raw: &str) -> Result<Vec<ThreatType>> {
    let mut categories = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let category = match name.to_ascii_lowercase().as_str() {
            // exploit kits are reported under malware
            "malware" | "exploit" => ThreatType::Malware,
            "phishing" => ThreatType::Phishing,
            "suspicious" => ThreatType::Suspicious,
            _ => {
                return Err(Error::InvalidFilter {
                    field: "categories".to_string(),
                    message: format!("Unknown category: {}", name),
                })
            }
        };
        if !categories.contains(&category) {
            categories.push(category);
        }
    }
    if categories.is_empty() {
        categories = DEFAULT_THREAT_CATEGORIES.to_vec();
    }
    Ok(categories)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreatSession {
    #[serde(flatten)]
    pub session: SessionOverview,
    pub annotation: String,
    pub threat_score: f64,
    pub threat_level: ThreatLevel,
    pub threat_types: Vec<ThreatType>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreatReport {
    pub threats: Vec<ThreatSession>,
    pub total_count: usize,
    pub critical_sessions: Vec<ThreatSession>,
    pub critical_count: usize,
    pub time_range_minutes: u64,
    pub min_risk_score: f64,
    pub categories_searched: Vec<ThreatType>,
}

impl CaptureBridge {
    /// Newest-first live records inside the window.
    async fn recent_records(&self, minutes: u64) -> (usize, Vec<Arc<CanonicalRecord>>) {
        let snapshot = self.store().snapshot(BufferKind::All).await;
        let now = now_epoch();
        let records = snapshot
            .iter()
            .rev()
            .filter(|r| in_window(r, minutes, now))
            .cloned()
            .collect();
        (snapshot.len(), records)
    }

    pub async fn threat_hunt(&self, request: &HuntRequest) -> HuntReport {
        let minutes = window(request.time_range_minutes);
        let (_, records) = self.recent_records(minutes).await;

        let findings: Vec<HuntHit> = records
            .iter()
            .flat_map(|record| {
                risk::hunt(record, request.hunt_type)
                    .into_iter()
                    .map(move |finding| HuntHit {
                        finding,
                        timestamp: record.received_at_iso(),
                        details: request
                            .include_analysis
                            .then(|| SessionOverview::from_record(record)),
                    })
            })
            .collect();

        tracing::info!(
            hunt_type = ?request.hunt_type,
            sessions = records.len(),
            findings = findings.len(),
            "Threat hunt completed"
        );

        HuntReport {
            hunt_type: request.hunt_type,
            time_range_minutes: minutes,
            sessions_analyzed: records.len(),
            findings_count: findings.len(),
            findings,
        }
    }

    /// Annotated live sessions with their analysis, newest first.
    pub async fn annotated_sessions(&self, request: &AnnotatedRequest) -> AnnotatedReport {
        let minutes = window(request.time_range_minutes);
        let (total_sessions, records) = self.recent_records(minutes).await;

        let matched: Vec<AnnotatedSession> = records
            .iter()
            .filter_map(|record| {
                let annotation = record.annotation()?;
                let analysis = risk::analyze_annotation(annotation);
                request
                    .threat_level
                    .admits(analysis.severity)
                    .then(|| AnnotatedSession {
                        session: SessionOverview::from_record(record),
                        annotation: annotation.to_string(),
                        analysis,
                    })
            })
            .collect();

        let summary = summarize(matched.iter().map(|s| &s.analysis));
        let threats_found = matched.len();
        let sessions = matched
            .into_iter()
            .take(request.limit.clamp(1, MAX_LIMIT))
            .collect();

        AnnotatedReport {
            sessions,
            total_sessions,
            threats_found,
            time_range_minutes: minutes,
            threat_level_filter: request.threat_level,
            summary,
        }
    }

    pub async fn annotation_detail(&self, id: &str) -> Option<AnnotationDetail> {
        let record = self.store().find(id).await?;
        let annotation = record.annotation().unwrap_or_default();
        let analysis = risk::analyze_annotation(annotation);
        let threat_assessment = risk::assess_annotation(annotation);
        Some(AnnotationDetail {
            session_id: record.id.clone(),
            annotation: record.annotation().map(str::to_string),
            indicators: analysis.indicators.clone(),
            threat_score: threat_assessment.risk_score,
            classification: threat_assessment.threat_level,
            analysis,
            threat_assessment,
            session: SessionOverview::from_record(&record),
        })
    }

    /// Annotated sessions above a score in any of the requested categories.
    pub async fn annotation_threats(&self, request: &ThreatRequest) -> Result<ThreatReport> {
        request.validate()?;
        let minutes = window(request.time_range_minutes);
        let (_, records) = self.recent_records(minutes).await;

        let threats: Vec<ThreatSession> = records
            .iter()
            .filter_map(|record| {
                let annotation = record.annotation()?;
                let analysis = risk::analyze_annotation(annotation);
                let assessment = risk::assess_annotation(annotation);
                let in_category = analysis
                    .threat_types
                    .iter()
                    .any(|t| request.categories.contains(t));
                (assessment.risk_score >= request.min_risk_score && in_category).then(|| {
                    ThreatSession {
                        session: SessionOverview::from_record(record),
                        annotation: annotation.to_string(),
                        threat_score: assessment.risk_score,
                        threat_level: assessment.threat_level,
                        threat_types: analysis.threat_types,
                        recommendations: assessment.recommendations,
                    }
                })
            })
            .collect();

        let critical_sessions: Vec<ThreatSession> = threats
            .iter()
            .filter(|t| t.threat_score >= CRITICAL_SCORE)
            .cloned()
            .collect();

        if !critical_sessions.is_empty() {
            tracing::warn!(
                critical = critical_sessions.len(),
                "Critical annotated threats in window"
            );
        }

        Ok(ThreatReport {
            total_count: threats.len(),
            critical_count: critical_sessions.len(),
            threats,
            critical_sessions,
            time_range_minutes: minutes,
            min_risk_score: request.min_risk_score,
            categories_searched: request.categories.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::risk::AnnotationSeverity;
    use serde_json::json;

    async fn seeded() -> CaptureBridge {
        let bridge = CaptureBridge::new(&BridgeConfig::default());
        for raw in [
            json!({"id": "plain", "url": "http://a.com/", "statusCode": 200}),
            json!({
                "id": "kit",
                "url": "http://landing.tk/chrome_update.exe",
                "statusCode": 200,
                "ekfiddleComments": "High: exploit kit\nObfuscated JavaScript payload"
            }),
            json!({
                "id": "odd",
                "url": "http://b.com/x",
                "statusCode": 200,
                "ekfiddleComments": "Unusual redirect"
            }),
            json!({
                "id": "login",
                "url": "http://c.com/login",
                "statusCode": 200,
                "ekfiddleComments": "Fake login page"
            }),
        ] {
            bridge.ingest(&raw).await;
        }
        bridge
    }

    #[tokio::test]
    async fn test_threat_hunt_all() {
        let bridge = seeded().await;
        let report = bridge.threat_hunt(&HuntRequest::default()).await;
        assert_eq!(report.sessions_analyzed, 4);
        assert_eq!(report.findings_count, 3);
        assert!(report.findings.iter().all(|f| f.finding.session_id == "kit"));
        assert!(report.findings[0].details.is_some());
    }

    #[tokio::test]
    async fn test_threat_hunt_window_capped() {
        let bridge = seeded().await;
        let report = bridge
            .threat_hunt(&HuntRequest {
                hunt_type: HuntType::MalwareDownloads,
                time_range_minutes: 10_000,
                include_analysis: false,
            })
            .await;
        assert_eq!(report.time_range_minutes, 360);
        assert_eq!(report.findings_count, 1);
        assert!(report.findings[0].details.is_none());
    }

    #[tokio::test]
    async fn test_annotated_sessions_filter() {
        let bridge = seeded().await;
        let all = bridge.annotated_sessions(&AnnotatedRequest::default()).await;
        assert_eq!(all.total_sessions, 4);
        assert_eq!(all.threats_found, 3);
        assert_eq!(all.sessions[0].session.id, "login");
        assert_eq!(all.summary.severity_distribution["high"], 2);

        let high = bridge
            .annotated_sessions(&AnnotatedRequest {
                threat_level: SeverityFilter::High,
                limit: 1,
                ..Default::default()
            })
            .await;
        assert_eq!(high.threats_found, 2);
        assert_eq!(high.sessions.len(), 1);
        assert!(high
            .sessions
            .iter()
            .all(|s| s.analysis.severity == AnnotationSeverity::High));
    }

    #[tokio::test]
    async fn test_annotation_detail() {
        let bridge = seeded().await;
        let detail = bridge.annotation_detail("kit").await.unwrap();
        assert_eq!(detail.classification, ThreatLevel::Critical);
        assert_eq!(detail.indicators.len(), 2);
        assert_eq!(detail.analysis.threat_types, vec![ThreatType::Malware]);

        let plain = bridge.annotation_detail("plain").await.unwrap();
        assert!(plain.annotation.is_none());
        assert_eq!(plain.classification, ThreatLevel::None);
        assert!(bridge.annotation_detail("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_annotation_threats() {
        let bridge = seeded().await;
        let report = bridge.annotation_threats(&ThreatRequest::default()).await.unwrap();
        assert_eq!(report.total_count, 1);
        assert_eq!(report.threats[0].session.id, "kit");
        assert_eq!(report.critical_count, 1);

        let phishing = bridge
            .annotation_threats(&ThreatRequest {
                min_risk_score: 0.0,
                categories: vec![ThreatType::Phishing],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(phishing.total_count, 1);
        assert_eq!(phishing.threats[0].session.id, "login");
        assert_eq!(phishing.critical_count, 0);
    }

    #[tokio::test]
    async fn test_annotation_threats_rejects_bad_score() {
        let bridge = seeded().await;
        let err = bridge
            .annotation_threats(&ThreatRequest {
                min_risk_score: 1.5,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFilter { .. }));
    }

    #[test]
    fn test_parse_categories() {
        assert_eq!(
            parse_categories("exploit, malware,phishing").unwrap(),
            vec![ThreatType::Malware, ThreatType::Phishing]
        );
        assert_eq!(parse_categories(" ").unwrap(), DEFAULT_THREAT_CATEGORIES.to_vec());
        assert!(parse_categories("ransom").is_err());
    }
}
