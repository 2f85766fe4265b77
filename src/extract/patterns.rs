//! Security pattern catalogue scanned by the extractor
//!
//! Order matters: snippets are collected pattern by pattern, so earlier
//! entries win when the budget runs out.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Broad family of a security pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternCategory {
    CodeExecution,
    DomInjection,
    Navigation,
    ElementCreation,
    Obfuscation,
    Exfiltration,
    Storage,
    AntiDebugging,
}

/// (regex, display name, category)
const CATALOGUE: &[(&str, &str, PatternCategory)] = &[
    // Code execution
    (r"eval\s*\(", "eval()", PatternCategory::CodeExecution),
    (r"Function\s*\(", "Function()", PatternCategory::CodeExecution),
    (r"new\s+Function\s*\(", "new Function()", PatternCategory::CodeExecution),
    (r#"setTimeout\s*\([^)]*["']"#, "setTimeout with string", PatternCategory::CodeExecution),
    (r#"setInterval\s*\([^)]*["']"#, "setInterval with string", PatternCategory::CodeExecution),
    // DOM injection
    (r"document\.write\s*\(", "document.write()", PatternCategory::DomInjection),
    (r"innerHTML\s*=", "innerHTML assignment", PatternCategory::DomInjection),
    (r"outerHTML\s*=", "outerHTML assignment", PatternCategory::DomInjection),
    (r"insertAdjacentHTML\s*\(", "insertAdjacentHTML()", PatternCategory::DomInjection),
    // Navigation
    (r"window\.location\s*=", "window.location redirect", PatternCategory::Navigation),
    (r"document\.location\s*=", "document.location redirect", PatternCategory::Navigation),
    (r"location\.href\s*=", "location.href redirect", PatternCategory::Navigation),
    (r"location\.replace\s*\(", "location.replace()", PatternCategory::Navigation),
    // Element creation
    (r#"createElement\s*\(\s*["']script"#, "createElement script", PatternCategory::ElementCreation),
    (r#"createElement\s*\(\s*["']iframe"#, "createElement iframe", PatternCategory::ElementCreation),
    (r"appendChild\s*\(", "appendChild()", PatternCategory::ElementCreation),
    // Obfuscation / encoding
    (r"\\x[0-9a-f]{2}", "hex escape sequences", PatternCategory::Obfuscation),
    (r"\\u[0-9a-f]{4}", "unicode escapes", PatternCategory::Obfuscation),
    (r"fromCharCode\s*\(", "fromCharCode()", PatternCategory::Obfuscation),
    (r"charCodeAt\s*\(", "charCodeAt()", PatternCategory::Obfuscation),
    (r"atob\s*\(", "atob() base64 decode", PatternCategory::Obfuscation),
    (r"btoa\s*\(", "btoa() base64 encode", PatternCategory::Obfuscation),
    // Exfiltration
    (r"XMLHttpRequest", "XMLHttpRequest", PatternCategory::Exfiltration),
    (r"fetch\s*\(", "fetch()", PatternCategory::Exfiltration),
    (r"sendBeacon\s*\(", "sendBeacon()", PatternCategory::Exfiltration),
    // Storage and cookies
    (r"localStorage\s*[.\[]", "localStorage access", PatternCategory::Storage),
    (r"sessionStorage\s*[.\[]", "sessionStorage access", PatternCategory::Storage),
    (r"document\.cookie", "cookie access", PatternCategory::Storage),
    // Anti-debugging
    (r"debugger\s*;", "debugger statement", PatternCategory::AntiDebugging),
    (r"console\s*\.\s*clear\s*\(", "console.clear()", PatternCategory::AntiDebugging),
];

/// A compiled catalogue entry
#[derive(Debug, Clone)]
pub struct SecurityPattern {
    pub name: &'static str,
    pub category: PatternCategory,
    pub regex: Regex,
}

/// Compile the catalogue (case-insensitive), in order.
pub fn compile_catalogue() -> Vec<SecurityPattern> {
    CATALOGUE
        .iter()
        .filter_map(|(source, name, category)| {
            match RegexBuilder::new(source).case_insensitive(true).build() {
                Ok(regex) => Some(SecurityPattern {
                    name: *name,
                    category: *category,
                    regex,
                }),
                Err(e) => {
                    tracing::error!(pattern = *name, error = %e, "Skipping uncompilable security pattern");
                    None
                }
            }
        })
        .collect()
}
