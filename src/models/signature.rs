//! Threat signatures and the read-only registry matched against both file
//! bytes and runtime activity.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Severity scale for signatures and findings.
///
/// Five severities map onto four non-zero score weights; `None` carries no
/// weight. The mapping is fixed so scores stay comparable across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Score weight contributed by one finding of this severity.
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Critical => 1.0,
            Severity::High => 0.4,
            Severity::Medium => 0.2,
            Severity::Low => 0.1,
            Severity::None => 0.0,
        }
    }

    /// Lenient parse; unknown strings carry no weight.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Severity::Low,
            "medium" => Severity::Medium,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named indicator pattern with a severity and platform applicability.
/// Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatSignature {
    pub id: String,
    pub name: String,
    pub description: String,
    pub indicators: Vec<String>,
    pub severity: Severity,
    pub category: String,
    /// Platform names this signature applies to; `"all"` matches any.
    pub platforms: Vec<String>,
}

impl ThreatSignature {
    /// Whether this signature is eligible on the given platform.
    pub fn applies_to(&self, platform: &str) -> bool {
        self.platforms
            .iter()
            .any(|p| p.eq_ignore_ascii_case("all") || p.eq_ignore_ascii_case(platform))
    }
}

/// Read-only signature set shared across scans.
#[derive(Debug, Clone)]
pub struct SignatureRegistry {
    signatures: Arc<[ThreatSignature]>,
}

impl SignatureRegistry {
    /// The built-in signature set.
    pub fn builtin() -> Self {
        let signatures = vec![
            ThreatSignature {
                id: "SIG-001".to_string(),
                name: "System File Access".to_string(),
                description: "Accesses sensitive system files".to_string(),
                indicators: vec![
                    "/etc/passwd".to_string(),
                    "c:\\windows\\system32\\config".to_string(),
                ],
                severity: Severity::High,
                category: "File Access".to_string(),
                platforms: vec!["linux".to_string(), "windows".to_string(), "macos".to_string()],
            },
            ThreatSignature {
                id: "SIG-002".to_string(),
                name: "Registry Modification".to_string(),
                description: "Modifies autorun registry keys".to_string(),
                indicators: vec![
                    "hkey_local_machine\\software\\microsoft\\windows\\currentversion\\run"
                        .to_string(),
                ],
                severity: Severity::Medium,
                category: "Registry Modification".to_string(),
                platforms: vec!["windows".to_string()],
            },
            ThreatSignature {
                id: "SIG-003".to_string(),
                name: "Suspicious Network Connection".to_string(),
                description: "Connects to common malicious ports or domains".to_string(),
                indicators: vec![
                    ":4444".to_string(),
                    ":1337".to_string(),
                    ":31337".to_string(),
                    ":8080".to_string(),
                    "malicious.example.com".to_string(),
                ],
                severity: Severity::High,
                category: "Network Activity".to_string(),
                platforms: vec!["all".to_string()],
            },
        ];
        Self { signatures: signatures.into() }
    }

    /// Built-in signatures plus any found in `*.json` files under `dir`.
    /// Unreadable or malformed files are skipped with a warning; the
    /// resulting registry is read-only for the life of the process.
    pub fn with_extra_dir(dir: &Path) -> Self {
        let mut signatures: Vec<ThreatSignature> =
            Self::builtin().signatures.iter().cloned().collect();

        match std::fs::read_dir(dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    match Self::load_signature_file(&path) {
                        Ok(mut extra) => {
                            debug!("loaded {} signatures from {}", extra.len(), path.display());
                            signatures.append(&mut extra);
                        }
                        Err(e) => warn!("skipping signature file {}: {}", path.display(), e),
                    }
                }
            }
            Err(e) => warn!("signature directory {} unreadable: {}", dir.display(), e),
        }

        Self { signatures: signatures.into() }
    }

    fn load_signature_file(path: &Path) -> anyhow::Result<Vec<ThreatSignature>> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn signatures(&self) -> &[ThreatSignature] {
        &self.signatures
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}
