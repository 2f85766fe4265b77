//! Threat hunting rules over captured sessions
//!
//! Each rule looks only at the URL and host of a record, so hunts work on
//! unannotated traffic too. Findings are advisory and leave the record's
//! risk level untouched.

use super::classifier::contains_any;
use crate::session::CanonicalRecord;
use serde::{Deserialize, Serialize};

const UPDATE_TERMS: &[&str] = &["update", "download", "install"];
const BROWSER_TERMS: &[&str] = &["chrome", "firefox", "edge", "browser", "flash"];
const DOWNLOAD_EXTENSIONS: &[&str] = &[".exe", ".zip", ".scr", ".dll", ".bat"];
const HIGH_RISK_TLDS: &[&str] = &[".tk", ".ml", ".ga", ".cf", ".gq"];

const FAKE_UPDATE_SCORE: f64 = 0.8;
const MALWARE_DOWNLOAD_SCORE: f64 = 0.7;
const HIGH_RISK_TLD_SCORE: f64 = 0.6;

/// Which rules a hunt runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HuntType {
    #[default]
    All,
    FakeUpdates,
    MalwareDownloads,
    C2Communication,
}

impl HuntType {
    fn runs(&self, kind: FindingKind) -> bool {
        match self {
            Self::All => true,
            Self::FakeUpdates => kind == FindingKind::FakeUpdate,
            Self::MalwareDownloads => kind == FindingKind::MalwareDownload,
            Self::C2Communication => kind == FindingKind::C2Communication,
        }
    }
}

impl std::str::FromStr for HuntType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "fake_updates" => Ok(Self::FakeUpdates),
            "malware_downloads" => Ok(Self::MalwareDownloads),
            "c2_communication" => Ok(Self::C2Communication),
            other => Err(format!("Unknown hunt type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    FakeUpdate,
    MalwareDownload,
    C2Communication,
}

/// One rule hit on one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HuntFinding {
    #[serde(rename = "type")]
    pub kind: FindingKind,
    pub description: String,
    pub session_id: String,
    pub risk_score: f64,
    pub url: String,
    pub host: String,
}

/// Run the selected rules against one record.
pub fn hunt(record: &CanonicalRecord, hunt_type: HuntType) -> Vec<HuntFinding> {
    let url = record.url.to_lowercase();
    let host = record.host.to_lowercase();
    let finding = |kind, risk_score, description: String| HuntFinding {
        kind,
        description,
        session_id: record.id.clone(),
        risk_score,
        url: record.url.clone(),
        host: record.host.clone(),
    };

    let mut findings = Vec::new();
    if hunt_type.runs(FindingKind::FakeUpdate)
        && contains_any(&url, UPDATE_TERMS)
        && contains_any(&url, BROWSER_TERMS)
    {
        findings.push(finding(
            FindingKind::FakeUpdate,
            FAKE_UPDATE_SCORE,
            format!("Potential fake update hosted on {}", record.host),
        ));
    }

    let path = url.split(['?', '#']).next().unwrap_or_default();
    if hunt_type.runs(FindingKind::MalwareDownload)
        && DOWNLOAD_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
    {
        let file = path.rsplit('/').next().unwrap_or(path);
        findings.push(finding(
            FindingKind::MalwareDownload,
            MALWARE_DOWNLOAD_SCORE,
            format!("Suspicious download {}", file),
        ));
    }

    if hunt_type.runs(FindingKind::C2Communication)
        && HIGH_RISK_TLDS.iter().any(|tld| host.ends_with(tld))
    {
        findings.push(finding(
            FindingKind::C2Communication,
            HIGH_RISK_TLD_SCORE,
            format!("Communication with high-risk TLD {}", record.host),
        ));
    }

    findings
}
