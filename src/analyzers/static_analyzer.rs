//! Static analysis: risk scoring on file bytes and metadata, no execution.

use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::models::report::ThreatFinding;
use crate::models::signature::Severity;
use crate::utils::hash_file;

/// Extensions scored as directly executable.
const EXECUTABLE_EXTENSIONS: &[&str] =
    &["exe", "dll", "bat", "ps1", "msi", "cmd", "scr", "com", "bin", "run"];

/// Extensions scored as scripts; these also get the pattern sweep.
const SCRIPT_EXTENSIONS: &[&str] = &["py", "js", "vba", "vbs", "sh", "pl", "rb", "php"];

/// Byte patterns checked against raw file content. Case-sensitive by
/// design: these match API names and literal tool invocations.
const KEYWORDS: &[(&[u8], Severity)] = &[
    (b"cmd.exe", Severity::Medium),
    (b"powershell", Severity::Medium),
    (b"CreateProcess", Severity::High),
    (b"WriteProcessMemory", Severity::High),
    (b"curl", Severity::Low),
    (b"wget", Severity::Low),
    (b"socket", Severity::Medium),
    (b"registry", Severity::Medium),
    (b"os.system", Severity::Medium),
    (b"eval", Severity::High),
    (b"exec", Severity::High),
    (b"malicious.example.com", Severity::High),
];

lazy_static! {
    /// Category → pattern table for the script sweep.
    static ref SCRIPT_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("Obfuscation", Regex::new(r"(?i)eval\(|exec\(|base64\.decode|fromCharCode").unwrap()),
        ("System Access", Regex::new(r"(?i)subprocess\.call|os\.system|runtime\.exec").unwrap()),
        ("Privilege Escalation", Regex::new(r"(?i)sudo |runas|powershell -command").unwrap()),
        (
            "Network Connection",
            Regex::new(r"(?i)socket\.connect|https?://|urllib|requests\.get|curl |wget ").unwrap()
        ),
        (
            "Data Exfiltration",
            Regex::new(r"(?i)\.upload\(|POST http|ftp\.put|send\(|mail\(").unwrap()
        ),
        ("Registry Access", Regex::new(r"(?i)HKEY_|Registry\.|Reg(Create|Set)Key").unwrap()),
    ];
}

/// Outcome of one static pass over a file.
#[derive(Debug, Clone)]
pub struct StaticAnalysis {
    pub filename: String,
    pub file_hash: String,
    pub md5_hash: String,
    /// Capped to `[0.0, 1.0]`, 2-decimal rounding.
    pub threat_score: f64,
    pub findings: Vec<ThreatFinding>,
    /// Set when the file was missing or unreadable.
    pub error: Option<String>,
}

pub struct StaticAnalyzer;

impl StaticAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Score a file without executing it. Never fails: a missing or
    /// unreadable file degrades into a zero-or-partial score with an
    /// explicit error marker instead of aborting the scan.
    pub fn analyze(&self, path: &Path) -> StaticAnalysis {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        if !path.exists() {
            warn!("static analysis target missing: {}", path.display());
            return StaticAnalysis {
                filename,
                file_hash: String::new(),
                md5_hash: String::new(),
                threat_score: 0.0,
                findings: vec![ThreatFinding::heuristic(
                    "error",
                    Severity::None,
                    "file not found",
                )],
                error: Some("file not found".to_string()),
            };
        }

        let (file_hash, md5_hash) = match hash_file(path) {
            Ok(hashes) => hashes,
            Err(e) => {
                debug!("hashing {} failed: {}", path.display(), e);
                (String::new(), String::new())
            }
        };

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        let mut score = 0.0;
        let mut findings = Vec::new();
        let mut error = None;

        if EXECUTABLE_EXTENSIONS.contains(&extension.as_str()) {
            score += Severity::Medium.weight();
            findings.push(
                ThreatFinding::heuristic("extension", Severity::Medium, format!(".{extension}"))
                    .with_confidence(0.8),
            );
        } else if SCRIPT_EXTENSIONS.contains(&extension.as_str()) {
            score += Severity::Low.weight();
            findings.push(
                ThreatFinding::heuristic("script", Severity::Low, format!(".{extension}"))
                    .with_confidence(0.6),
            );
        }

        match std::fs::read(path) {
            Ok(content) => {
                for (keyword, severity) in KEYWORDS {
                    if contains_bytes(&content, keyword) {
                        score += severity.weight();
                        findings.push(ThreatFinding::heuristic(
                            "keyword",
                            *severity,
                            String::from_utf8_lossy(keyword).into_owned(),
                        ));
                    }
                }

                if SCRIPT_EXTENSIONS.contains(&extension.as_str()) {
                    let text = String::from_utf8_lossy(&content);
                    for (category, pattern) in SCRIPT_PATTERNS.iter() {
                        if pattern.is_match(&text) {
                            score += Severity::Low.weight();
                            findings.push(ThreatFinding::heuristic(
                                "pattern",
                                Severity::Low,
                                format!("Suspicious {category} pattern"),
                            ));
                        }
                    }
                }
            }
            Err(e) => {
                warn!("static analysis could not read {}: {}", path.display(), e);
                findings.push(ThreatFinding::heuristic(
                    "error",
                    Severity::None,
                    format!("unreadable: {e}"),
                ));
                error = Some(e.to_string());
            }
        }

        let threat_score = super::round_score(score.min(1.0));
        info!("static analysis of {} scored {:.2}", filename, threat_score);

        StaticAnalysis { filename, file_hash, md5_hash, threat_score, findings, error }
    }
}

impl Default for StaticAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}
