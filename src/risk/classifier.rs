//! Risk classification driven by upstream threat intelligence
//!
//! The only escalating signal is the record's threat annotation. HTTP error
//! statuses are reported as informational reasons and never raise the score.

use crate::session::types::CanonicalRecord;
use serde::{Deserialize, Serialize};

/// Flag attached to every record carrying an annotation
pub const EXTERNAL_INTEL_FLAG: &str = "external-intel-alert";

/// Score used when the annotation names no severity
pub const UNRATED_ANNOTATION_SCORE: f64 = 0.5;

/// Severity tokens are looked for in this many leading characters.
const SEVERITY_WINDOW: usize = 20;

/// Minimum annotation line length reported as an indicator
const MIN_INDICATOR_LEN: usize = 5;

const MALWARE_TERMS: &[&str] = &["exploit", "malware", "trojan", "backdoor", "ransomware"];
const PHISHING_TERMS: &[&str] = &["phishing", "credential", "socgholish", "fake update"];
const SUSPICIOUS_TERMS: &[&str] = &["suspicious", "obfuscated", "encoded", "eval"];

/// Risk level, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Threshold mapping of a score
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::Critical
        } else if score >= 0.6 {
            Self::High
        } else if score >= 0.4 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying one record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub score: f64,
    pub level: RiskLevel,
    pub flag: Option<String>,
    pub reasons: Vec<String>,
}

impl RiskAssessment {
    pub fn is_flagged(&self) -> bool {
        self.flag.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeverityToken {
    Critical,
    High,
    Medium,
    Low,
}

impl SeverityToken {
    fn score(self) -> f64 {
        match self {
            Self::Critical => 1.0,
            Self::High => 0.85,
            Self::Medium => 0.65,
            Self::Low => 0.4,
        }
    }

    fn level(self) -> RiskLevel {
        match self {
            Self::Critical => RiskLevel::Critical,
            Self::High => RiskLevel::High,
            // Low-rated annotations are still surfaced for review
            Self::Medium | Self::Low => RiskLevel::Medium,
        }
    }
}

/// Classify a record. Pure and deterministic.
pub fn classify(record: &CanonicalRecord) -> RiskAssessment {
    match record.annotation() {
        Some(annotation) => classify_annotation(annotation),
        None => {
            let mut reasons = Vec::new();
            if record.status_code >= 400 {
                reasons.push(format!(
                    "HTTP error status {} (informational only)",
                    record.status_code
                ));
            }
            RiskAssessment {
                score: 0.0,
                level: RiskLevel::Low,
                flag: None,
                reasons,
            }
        }
    }
}

fn classify_annotation(annotation: &str) -> RiskAssessment {
    let lower = annotation.to_lowercase();
    let token = severity_token(&lower);

    let (mut score, mut level) = match token {
        Some(token) => (token.score(), token.level()),
        None => (
            UNRATED_ANNOTATION_SCORE,
            RiskLevel::from_score(UNRATED_ANNOTATION_SCORE),
        ),
    };

    if contains_any(&lower, MALWARE_TERMS) {
        score = 1.0;
        level = RiskLevel::Critical;
    } else if contains_any(&lower, PHISHING_TERMS) {
        score = score.max(0.85);
        level = level.max(RiskLevel::High);
    } else if contains_any(&lower, SUSPICIOUS_TERMS) {
        score = score.max(0.65);
        if token == Some(SeverityToken::High) {
            level = level.max(RiskLevel::High);
        }
    }

    RiskAssessment {
        score,
        level,
        flag: Some(EXTERNAL_INTEL_FLAG.to_string()),
        reasons: vec![format!("External intel: {}", annotation)],
    }
}

fn severity_token(lower: &str) -> Option<SeverityToken> {
    let head: String = lower.chars().take(SEVERITY_WINDOW).collect();
    [
        ("critical", SeverityToken::Critical),
        ("high", SeverityToken::High),
        ("medium", SeverityToken::Medium),
        ("low", SeverityToken::Low),
    ]
    .into_iter()
    .find(|(word, _)| head.contains(word))
    .map(|(_, token)| token)
}

pub(super) fn contains_any(text: &str, terms: &[&str]) -> bool {
    terms.iter().any(|term| text.contains(term))
}

/// Whether a record belongs in the flagged buffer.
pub fn is_retained(record: &CanonicalRecord) -> bool {
    record.annotation().is_some() || record.status_code >= 400
}

/// Non-trivial annotation lines, trimmed.
pub fn annotation_indicators(annotation: &str) -> Vec<String> {
    annotation
        .lines()
        .map(str::trim)
        .filter(|line| line.len() > MIN_INDICATOR_LEN)
        .map(str::to_string)
        .collect()
}

/// Label shown in the detail view for a classification flag.
pub fn classification_label(flag: Option<&str>) -> &'static str {
    match flag {
        Some(EXTERNAL_INTEL_FLAG) => "EXTERNAL_INTEL",
        _ => "NORMAL",
    }
}

/// Follow-up actions for a classification flag.
pub fn recommendations(assessment: &RiskAssessment) -> Vec<String> {
    let mut out = Vec::new();
    if assessment.flag.as_deref() == Some(EXTERNAL_INTEL_FLAG) {
        out.push("Review external intelligence findings for exploitation activity".to_string());
        if assessment.level == RiskLevel::Critical {
            out.push("Isolate the affected host and preserve the captured session".to_string());
        }
    }
    out
}
