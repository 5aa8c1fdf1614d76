//! Dynamic analysis: signature matching over observed runtime activity.

use serde::Serialize;
use tracing::{debug, info};

use crate::models::activity::ActivityReport;
use crate::models::report::ThreatFinding;
use crate::models::signature::SignatureRegistry;

/// Outcome of one dynamic pass over an activity report.
#[derive(Debug, Clone)]
pub struct DynamicAnalysis {
    /// Capped to `[0.0, 1.0]` independently of the static score.
    pub threat_score: f64,
    pub findings: Vec<ThreatFinding>,
}

pub struct DynamicAnalyzer {
    registry: SignatureRegistry,
    platform: String,
}

impl DynamicAnalyzer {
    pub fn new(registry: SignatureRegistry, platform: &str) -> Self {
        Self { registry, platform: platform.to_string() }
    }

    /// Match every activity record against the signature set. Each record
    /// contributes at most one finding per signature (the first indicator
    /// hit wins); signatures are filtered by the record's platform before
    /// matching. An unserializable record contributes nothing.
    pub fn analyze(&self, report: &ActivityReport) -> DynamicAnalysis {
        let mut score = 0.0;
        let mut findings = Vec::new();

        let serialized: Vec<String> = serialize_records(&report.file_operations)
            .chain(serialize_records(&report.network_activity))
            .chain(serialize_records(&report.registry_operations))
            .collect();

        for text in &serialized {
            for signature in self.registry.signatures() {
                if !signature.applies_to(&self.platform) {
                    continue;
                }
                let hit = signature
                    .indicators
                    .iter()
                    .find(|indicator| text.contains(&json_escaped_lower(indicator)));
                if let Some(indicator) = hit {
                    score += signature.severity.weight();
                    findings.push(ThreatFinding::from_signature(signature, indicator));
                }
            }
        }

        let threat_score = super::round_score(score.min(1.0));
        info!(
            "dynamic analysis matched {} findings over {} records, score {:.2}",
            findings.len(),
            report.len(),
            threat_score
        );
        DynamicAnalysis { threat_score, findings }
    }
}

/// Indicators are matched against JSON-serialized records, so they must be
/// compared in their JSON-escaped form or backslashed Windows paths would
/// never hit.
fn json_escaped_lower(indicator: &str) -> String {
    let escaped = serde_json::to_string(indicator).unwrap_or_else(|_| indicator.to_string());
    escaped.trim_matches('"').to_ascii_lowercase()
}

/// Records as lowercase JSON text, the comparable form indicators are
/// matched against.
fn serialize_records<T: Serialize>(records: &[T]) -> impl Iterator<Item = String> + '_ {
    records.iter().filter_map(|record| match serde_json::to_string(record) {
        Ok(text) => Some(text.to_ascii_lowercase()),
        Err(e) => {
            debug!("skipping unserializable activity record: {}", e);
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::activity::{FileAccessRecord, NetworkRecord, RegistryRecord};
    use chrono::Utc;

    fn analyzer_for(platform: &str) -> DynamicAnalyzer {
        DynamicAnalyzer::new(SignatureRegistry::builtin(), platform)
    }

    fn file_record(path: &str) -> FileAccessRecord {
        FileAccessRecord { timestamp: Utc::now(), path: path.to_string() }
    }

    fn network_record(remote: &str) -> NetworkRecord {
        NetworkRecord { timestamp: Utc::now(), remote: remote.to_string() }
    }

    #[test]
    fn empty_report_scores_zero() {
        let analysis = analyzer_for("linux").analyze(&ActivityReport::default());
        assert_eq!(analysis.threat_score, 0.0);
        assert!(analysis.findings.is_empty());
    }

    #[test]
    fn passwd_access_matches_system_file_signature() {
        let report = ActivityReport {
            file_operations: vec![file_record("/etc/passwd")],
            ..Default::default()
        };
        let analysis = analyzer_for("linux").analyze(&report);
        assert_eq!(analysis.threat_score, 0.4);
        assert_eq!(analysis.findings.len(), 1);
        assert_eq!(analysis.findings[0].signature_id.as_deref(), Some("SIG-001"));
    }

    #[test]
    fn windows_only_signature_never_fires_on_linux() {
        let report = ActivityReport {
            registry_operations: vec![RegistryRecord {
                timestamp: Utc::now(),
                dll: "c:\\windows\\system32\\advapi32.dll".to_string(),
                key: "HKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Run"
                    .to_string(),
            }],
            ..Default::default()
        };

        let on_linux = analyzer_for("linux").analyze(&report);
        assert!(on_linux.findings.iter().all(|f| f.signature_id.as_deref() != Some("SIG-002")));

        let on_windows = analyzer_for("windows").analyze(&report);
        assert!(on_windows.findings.iter().any(|f| f.signature_id.as_deref() == Some("SIG-002")));
    }

    #[test]
    fn one_record_hits_a_signature_at_most_once() {
        // Both the port and the domain indicator of SIG-003 appear in one
        // record; only the first indicator hit may count.
        let report = ActivityReport {
            network_activity: vec![network_record("malicious.example.com:4444")],
            ..Default::default()
        };
        let analysis = analyzer_for("linux").analyze(&report);
        let sig003: Vec<_> = analysis
            .findings
            .iter()
            .filter(|f| f.signature_id.as_deref() == Some("SIG-003"))
            .collect();
        assert_eq!(sig003.len(), 1);
        assert_eq!(analysis.threat_score, 0.4);
    }

    #[test]
    fn two_records_each_contribute() {
        let report = ActivityReport {
            network_activity: vec![network_record("10.0.0.1:4444"), network_record("10.0.0.2:1337")],
            ..Default::default()
        };
        let analysis = analyzer_for("linux").analyze(&report);
        assert_eq!(analysis.findings.len(), 2);
        assert_eq!(analysis.threat_score, 0.8);
    }

    #[test]
    fn score_caps_at_one_independently() {
        let report = ActivityReport {
            network_activity: (0..5).map(|i| network_record(&format!("10.0.0.{i}:4444"))).collect(),
            ..Default::default()
        };
        let analysis = analyzer_for("linux").analyze(&report);
        assert_eq!(analysis.threat_score, 1.0);
        assert_eq!(analysis.findings.len(), 5);
    }
}
