//! Activity records produced by the process monitor.
//!
//! Records are deduplicated within one monitoring session: the first
//! observation of a path, remote endpoint, or module wins and repeats
//! change nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observed file-handle open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAccessRecord {
    pub timestamp: DateTime<Utc>,
    pub path: String,
}

/// One observed established connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub timestamp: DateTime<Utc>,
    /// `ip:port` of the remote endpoint.
    pub remote: String,
}

/// One registry-API module observed in the target's address space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub timestamp: DateTime<Utc>,
    /// Path of the loaded module associated with registry APIs.
    pub dll: String,
    /// Representative autorun key the module grants access to.
    pub key: String,
}

/// Monitoring session output under the normalized field names the threat
/// detector consumes. Also serialized as-is into the session artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityReport {
    pub file_operations: Vec<FileAccessRecord>,
    pub network_activity: Vec<NetworkRecord>,
    pub registry_operations: Vec<RegistryRecord>,
    /// Running point counter kept by the monitor (+10 file / +20 network /
    /// +5 registry on suspicious matches). Diagnostic only: the canonical
    /// dynamic score comes from signature matching, and reconciling the two
    /// paths is an open product question.
    pub advisory_score: u32,
}

impl ActivityReport {
    pub fn len(&self) -> usize {
        self.file_operations.len() + self.network_activity.len() + self.registry_operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_counts_zero() {
        let report = ActivityReport::default();
        assert!(report.is_empty());
        assert_eq!(report.advisory_score, 0);
    }

    #[test]
    fn report_round_trips_through_json() {
        let report = ActivityReport {
            file_operations: vec![FileAccessRecord {
                timestamp: Utc::now(),
                path: "/etc/passwd".to_string(),
            }],
            network_activity: vec![NetworkRecord {
                timestamp: Utc::now(),
                remote: "10.0.0.5:4444".to_string(),
            }],
            registry_operations: Vec::new(),
            advisory_score: 30,
        };
        let json = serde_json::to_string(&report).unwrap();
        let back: ActivityReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.advisory_score, 30);
        assert_eq!(back.file_operations[0].path, "/etc/passwd");
    }
}
