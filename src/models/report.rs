//! Findings, the final execution report, and the report sink.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::activity::ActivityReport;
use crate::models::signature::{Severity, ThreatSignature};

/// One scored observation attributed to a signature or a static heuristic.
/// Findings are append-only within a scan and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatFinding {
    /// Heuristic tag (`extension`, `script`, `keyword`, `pattern`, `error`)
    /// for static findings; absent on signature hits.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_name: Option<String>,
    pub threat_level: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl ThreatFinding {
    /// A static-heuristic finding with no backing signature.
    pub fn heuristic(kind: &str, severity: Severity, details: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.to_string()),
            signature_id: None,
            signature_name: None,
            threat_level: severity,
            category: None,
            details: details.into(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// A dynamic finding attributed to a signature, recording the
    /// indicator that fired.
    pub fn from_signature(signature: &ThreatSignature, indicator: &str) -> Self {
        Self {
            kind: None,
            signature_id: Some(signature.id.clone()),
            signature_name: Some(signature.name.clone()),
            threat_level: signature.severity,
            category: Some(signature.category.clone()),
            details: indicator.to_string(),
            confidence: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreatAnalysis {
    pub threats: Vec<ThreatFinding>,
}

/// The terminal artifact of one scan. Built once, immutable thereafter;
/// the returned value is authoritative and the persisted copy is a side
/// channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub sandbox_id: String,
    pub filename: String,
    /// SHA-256 of the original file; empty when the file was unreadable.
    pub file_hash: String,
    pub md5_hash: String,
    /// Wall-clock duration of the scan in seconds.
    pub execution_time: f64,
    pub status: ScanStatus,
    pub exit_code: i32,
    /// Combined threat score in `[0.0, 1.0]`, 2-decimal rounding.
    pub threat_level: f64,
    pub threat_analysis: ThreatAnalysis,
    pub file_operations: Vec<crate::models::activity::FileAccessRecord>,
    pub network_activity: Vec<crate::models::activity::NetworkRecord>,
    pub registry_operations: Vec<crate::models::activity::RegistryRecord>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionReport {
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        sandbox_id: &str,
        filename: &str,
        file_hash: &str,
        md5_hash: &str,
        execution_time: f64,
        status: ScanStatus,
        exit_code: i32,
        threat_level: f64,
        threats: Vec<ThreatFinding>,
        activity: ActivityReport,
    ) -> Self {
        Self {
            sandbox_id: sandbox_id.to_string(),
            filename: filename.to_string(),
            file_hash: file_hash.to_string(),
            md5_hash: md5_hash.to_string(),
            execution_time,
            status,
            exit_code,
            threat_level,
            threat_analysis: ThreatAnalysis { threats },
            file_operations: activity.file_operations,
            network_activity: activity.network_activity,
            registry_operations: activity.registry_operations,
            timestamp: Utc::now(),
        }
    }
}

/// Where finished reports land on disk. Constructed once at startup and
/// passed down; persistence failures are logged and never surface to the
/// scan (the in-memory report stays authoritative).
#[derive(Debug, Clone)]
pub struct ReportSink {
    report_dir: PathBuf,
}

impl ReportSink {
    pub fn new(report_dir: PathBuf) -> Self {
        Self { report_dir }
    }

    pub fn persist(&self, report: &ExecutionReport) {
        let path = self.report_dir.join(format!("report_{}.json", report.sandbox_id));
        let serialized = match serde_json::to_string_pretty(report) {
            Ok(s) => s,
            Err(e) => {
                warn!("failed to serialize report {}: {}", report.sandbox_id, e);
                return;
            }
        };
        if let Err(e) = std::fs::create_dir_all(&self.report_dir)
            .and_then(|_| std::fs::write(&path, serialized))
        {
            warn!("failed to persist report to {}: {}", path.display(), e);
        } else {
            info!("report persisted to {}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> ExecutionReport {
        ExecutionReport::assemble(
            "sb-1",
            "dropper.exe",
            "abc123",
            "def456",
            1.25,
            ScanStatus::Completed,
            0,
            0.6,
            vec![ThreatFinding::heuristic("extension", Severity::Medium, ".exe")],
            ActivityReport::default(),
        )
    }

    #[test]
    fn report_serializes_contract_field_names() {
        let json = serde_json::to_value(sample_report()).unwrap();
        for field in [
            "sandbox_id",
            "filename",
            "file_hash",
            "execution_time",
            "status",
            "exit_code",
            "threat_level",
            "threat_analysis",
            "file_operations",
            "network_activity",
            "registry_operations",
        ] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(json["status"], "completed");
        assert_eq!(json["threat_analysis"]["threats"][0]["type"], "extension");
        assert_eq!(json["threat_analysis"]["threats"][0]["threat_level"], "medium");
    }

    #[test]
    fn heuristic_findings_omit_signature_fields() {
        let json =
            serde_json::to_value(ThreatFinding::heuristic("keyword", Severity::High, "eval"))
                .unwrap();
        assert!(json.get("signature_id").is_none());
        assert!(json.get("signature_name").is_none());
        assert_eq!(json["type"], "keyword");
    }

    #[test]
    fn signature_findings_carry_attribution() {
        let registry = crate::models::signature::SignatureRegistry::builtin();
        let sig = &registry.signatures()[0];
        let json = serde_json::to_value(ThreatFinding::from_signature(sig, "/etc/passwd")).unwrap();
        assert_eq!(json["signature_id"], "SIG-001");
        assert_eq!(json["details"], "/etc/passwd");
        assert!(json.get("type").is_none());
    }

    #[test]
    fn sink_persists_report_json() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ReportSink::new(dir.path().to_path_buf());
        let report = sample_report();
        sink.persist(&report);

        let path = dir.path().join("report_sb-1.json");
        let content = std::fs::read_to_string(path).unwrap();
        let back: ExecutionReport = serde_json::from_str(&content).unwrap();
        assert_eq!(back.filename, "dropper.exe");
        assert_eq!(back.threat_level, 0.6);
    }
}
