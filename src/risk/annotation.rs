//! Structured reading of threat annotations
//!
//! Breaks an annotation into threat types, a coarse severity and detected
//! content patterns, and scores it on its own keyword scale. None of this
//! feeds [`classify`](super::classify): it is a separate lens for analysts
//! and never changes buffer placement or the record's risk level.

use super::classifier::{annotation_indicators, contains_any};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const MALWARE_TERMS: &[&str] = &["exploit", "malware", "trojan"];
const PHISHING_TERMS: &[&str] = &["phishing", "fake", "scam"];
const SUSPICIOUS_TERMS: &[&str] = &["suspicious", "anomaly", "unusual"];

const CONTENT_PATTERNS: &[(&str, &str)] = &[
    ("javascript", "JavaScript analysis"),
    ("payload", "Payload detected"),
    ("redirect", "Redirect chain"),
    ("obfuscated", "Obfuscated content"),
];

/// Weighted keyword groups: terms, score added, recommendation.
const SCORED_GROUPS: &[(&[&str], f64, &str)] = &[
    (
        &["exploit", "malware", "trojan", "backdoor"],
        0.8,
        "IMMEDIATE ISOLATION - Malware detected",
    ),
    (
        &["phishing", "credential", "steal"],
        0.7,
        "BLOCK AND INVESTIGATE - Phishing attempt",
    ),
    (
        &["suspicious", "anomaly", "unusual"],
        0.5,
        "Enhanced monitoring recommended",
    ),
    (
        &["obfuscated", "encoded", "packed"],
        0.4,
        "Content analysis required",
    ),
];

/// Terms counted towards the multi-indicator bonus
const CORROBORATING_TERMS: &[&str] = &["exploit", "malware", "suspicious", "phishing", "obfuscated"];
const CORROBORATION_BONUS: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatType {
    Malware,
    Phishing,
    Suspicious,
}

impl ThreatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malware => "malware",
            Self::Phishing => "phishing",
            Self::Suspicious => "suspicious",
        }
    }
}

/// Coarse severity of an annotation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationSeverity {
    /// No annotation at all
    #[default]
    Unknown,
    Low,
    Medium,
    High,
}

impl AnnotationSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Minimum severity requested by a caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityFilter {
    #[default]
    All,
    Low,
    Medium,
    High,
}

impl SeverityFilter {
    pub fn admits(&self, severity: AnnotationSeverity) -> bool {
        match self {
            Self::All => true,
            Self::Low => severity >= AnnotationSeverity::Low,
            Self::Medium => severity >= AnnotationSeverity::Medium,
            Self::High => severity == AnnotationSeverity::High,
        }
    }
}

impl std::str::FromStr for SeverityFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("Unknown threat level: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnnotationAnalysis {
    pub indicators: Vec<String>,
    pub threat_types: Vec<ThreatType>,
    pub severity: AnnotationSeverity,
    pub patterns_detected: Vec<String>,
}

/// Break an annotation into threat types, severity and content patterns.
pub fn analyze_annotation(annotation: &str) -> AnnotationAnalysis {
    let annotation = annotation.trim();
    if annotation.is_empty() {
        return AnnotationAnalysis::default();
    }
    let lower = annotation.to_lowercase();

    let mut threat_types = Vec::new();
    let mut severity = AnnotationSeverity::Low;
    if contains_any(&lower, MALWARE_TERMS) {
        threat_types.push(ThreatType::Malware);
        severity = AnnotationSeverity::High;
    }
    if contains_any(&lower, PHISHING_TERMS) {
        threat_types.push(ThreatType::Phishing);
        severity = AnnotationSeverity::High;
    }
    if contains_any(&lower, SUSPICIOUS_TERMS) {
        threat_types.push(ThreatType::Suspicious);
        severity = severity.max(AnnotationSeverity::Medium);
    }

    AnnotationAnalysis {
        indicators: annotation_indicators(annotation),
        threat_types,
        severity,
        patterns_detected: CONTENT_PATTERNS
            .iter()
            .filter(|(term, _)| lower.contains(term))
            .map(|(_, label)| label.to_string())
            .collect(),
    }
}

/// Level derived from an annotation's keyword score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
    #[default]
    None,
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::Critical
        } else if score >= 0.6 {
            Self::High
        } else if score >= 0.4 {
            Self::Medium
        } else if score >= 0.2 {
            Self::Low
        } else {
            Self::Minimal
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    #[default]
    Unknown,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThreatAssessment {
    pub risk_score: f64,
    pub threat_level: ThreatLevel,
    pub recommendations: Vec<String>,
    pub confidence: Confidence,
}

/// Keyword score of an annotation, capped at 1.0.
pub fn assess_annotation(annotation: &str) -> ThreatAssessment {
    let lower = annotation.trim().to_lowercase();
    if lower.is_empty() {
        return ThreatAssessment::default();
    }

    let mut score = 0.0;
    let mut confidence = Confidence::Unknown;
    let mut recommendations = Vec::new();
    for (terms, weight, recommendation) in SCORED_GROUPS {
        if !contains_any(&lower, terms) {
            continue;
        }
        score += weight;
        recommendations.push(recommendation.to_string());
        if *weight >= 0.7 {
            confidence = Confidence::High;
        } else if *weight >= 0.5 && confidence == Confidence::Unknown {
            confidence = Confidence::Medium;
        }
    }

    let corroborating = CORROBORATING_TERMS
        .iter()
        .filter(|term| lower.contains(*term))
        .count();
    if corroborating > 2 {
        score += CORROBORATION_BONUS;
    }

    if recommendations.is_empty() {
        recommendations.push("No immediate action required".to_string());
    }

    let risk_score = f64::min(score, 1.0);
    ThreatAssessment {
        risk_score,
        threat_level: ThreatLevel::from_score(risk_score),
        recommendations,
        confidence,
    }
}

/// Distribution of analyses across a set of sessions
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnnotationSummary {
    pub total_sessions: usize,
    pub threat_distribution: BTreeMap<String, usize>,
    pub severity_distribution: BTreeMap<String, usize>,
    pub top_patterns: BTreeMap<String, usize>,
    pub recommendations: Vec<String>,
}

pub fn summarize<'a>(analyses: impl IntoIterator<Item = &'a AnnotationAnalysis>) -> AnnotationSummary {
    let mut summary = AnnotationSummary::default();
    for analysis in analyses {
        summary.total_sessions += 1;
        for threat in &analysis.threat_types {
            *summary
                .threat_distribution
                .entry(threat.as_str().to_string())
                .or_default() += 1;
        }
        *summary
            .severity_distribution
            .entry(analysis.severity.as_str().to_string())
            .or_default() += 1;
        for pattern in &analysis.patterns_detected {
            *summary.top_patterns.entry(pattern.clone()).or_default() += 1;
        }
    }

    let high = summary.severity_distribution.get("high").copied().unwrap_or(0);
    if high > 0 {
        summary
            .recommendations
            .push(format!("URGENT: {} high-severity annotated threats detected", high));
    }
    let medium = summary.severity_distribution.get("medium").copied().unwrap_or(0);
    if medium > 0 {
        summary
            .recommendations
            .push(format!("MONITOR: {} medium-severity annotated threats require attention", medium));
    }
    if summary.total_sessions == 0 {
        summary
            .recommendations
            .push("No annotated sessions available".to_string());
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_empty() {
        let analysis = analyze_annotation("   ");
        assert_eq!(analysis.severity, AnnotationSeverity::Unknown);
        assert!(analysis.threat_types.is_empty());
        assert!(analysis.indicators.is_empty());
    }

    #[test]
    fn test_analyze_threat_types_and_patterns() {
        let analysis = analyze_annotation(
            "High: Exploit kit landing\nObfuscated JavaScript with redirect\nok",
        );
        assert_eq!(analysis.threat_types, vec![ThreatType::Malware]);
        assert_eq!(analysis.severity, AnnotationSeverity::High);
        assert_eq!(
            analysis.patterns_detected,
            vec!["JavaScript analysis", "Redirect chain", "Obfuscated content"]
        );
        assert_eq!(analysis.indicators.len(), 2);
    }

    #[test]
    fn test_analyze_severity_levels() {
        let suspicious = analyze_annotation("Unusual beacon interval");
        assert_eq!(suspicious.threat_types, vec![ThreatType::Suspicious]);
        assert_eq!(suspicious.severity, AnnotationSeverity::Medium);

        let mixed = analyze_annotation("Fake login page, suspicious form");
        assert_eq!(mixed.threat_types, vec![ThreatType::Phishing, ThreatType::Suspicious]);
        assert_eq!(mixed.severity, AnnotationSeverity::High);

        let plain = analyze_annotation("Medium: large inline script");
        assert!(plain.threat_types.is_empty());
        assert_eq!(plain.severity, AnnotationSeverity::Low);
    }

    #[test]
    fn test_severity_filter() {
        assert!(SeverityFilter::All.admits(AnnotationSeverity::Unknown));
        assert!(SeverityFilter::Low.admits(AnnotationSeverity::Low));
        assert!(!SeverityFilter::Low.admits(AnnotationSeverity::Unknown));
        assert!(SeverityFilter::Medium.admits(AnnotationSeverity::High));
        assert!(!SeverityFilter::Medium.admits(AnnotationSeverity::Low));
        assert!(!SeverityFilter::High.admits(AnnotationSeverity::Medium));
        assert_eq!("HIGH".parse::<SeverityFilter>(), Ok(SeverityFilter::High));
        assert!("severe".parse::<SeverityFilter>().is_err());
    }

    #[test]
    fn test_assess_empty() {
        let assessment = assess_annotation("");
        assert_eq!(assessment.risk_score, 0.0);
        assert_eq!(assessment.threat_level, ThreatLevel::None);
        assert!(assessment.recommendations.is_empty());
    }

    #[test]
    fn test_assess_scores() {
        let benign = assess_annotation("Large response");
        assert_eq!(benign.threat_level, ThreatLevel::Minimal);
        assert_eq!(benign.recommendations, vec!["No immediate action required"]);

        let suspicious = assess_annotation("Suspicious redirect");
        assert_eq!(suspicious.risk_score, 0.5);
        assert_eq!(suspicious.threat_level, ThreatLevel::Medium);
        assert_eq!(suspicious.confidence, Confidence::Medium);

        let phishing = assess_annotation("Credential harvesting form");
        assert_eq!(phishing.risk_score, 0.7);
        assert_eq!(phishing.threat_level, ThreatLevel::High);
        assert_eq!(phishing.confidence, Confidence::High);

        let malware = assess_annotation("Trojan dropper");
        assert_eq!(malware.threat_level, ThreatLevel::Critical);
    }

    #[test]
    fn test_assess_capped_with_bonus() {
        let assessment = assess_annotation("exploit malware, suspicious obfuscated phishing");
        assert_eq!(assessment.risk_score, 1.0);
        assert_eq!(assessment.threat_level, ThreatLevel::Critical);
        assert_eq!(assessment.recommendations.len(), 4);
    }

    #[test]
    fn test_summarize() {
        let analyses = [
            analyze_annotation("Malware payload"),
            analyze_annotation("Suspicious redirect"),
            analyze_annotation("Malware again"),
        ];
        let summary = summarize(&analyses);
        assert_eq!(summary.total_sessions, 3);
        assert_eq!(summary.threat_distribution["malware"], 2);
        assert_eq!(summary.severity_distribution["medium"], 1);
        assert_eq!(summary.top_patterns["Payload detected"], 1);
        assert_eq!(summary.recommendations.len(), 2);
        assert!(summary.recommendations[0].starts_with("URGENT: 2"));

        let empty = summarize(std::iter::empty());
        assert_eq!(empty.recommendations, vec!["No annotated sessions available"]);
    }
}
