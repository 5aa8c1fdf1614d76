//! Configuration for the scan pipeline.
//!
//! Everything is environment-variable driven with sensible defaults:
//! `FIRECELL_*` variables override, a `.env` file is honored when present.
//! Persistence of configuration is out of scope here; this module only
//! reads the recognized keys.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Coarse policy knob controlling resource limits and network access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Low,
    Medium,
    High,
}

impl SecurityLevel {
    /// Lenient parse: an unrecognized level is normalized to `Medium` with
    /// a warning, never left unset.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => SecurityLevel::Low,
            "medium" => SecurityLevel::Medium,
            "high" => SecurityLevel::High,
            other => {
                warn!("unrecognized security level '{}', defaulting to medium", other);
                SecurityLevel::Medium
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityLevel::Low => "low",
            SecurityLevel::Medium => "medium",
            SecurityLevel::High => "high",
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityLevel {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(SecurityLevel::parse_lenient(s))
    }
}

/// Which backend family executes the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMethod {
    Container,
    Process,
}

impl IsolationMethod {
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "container" => IsolationMethod::Container,
            "process" => IsolationMethod::Process,
            other => {
                warn!("unrecognized isolation method '{}', defaulting to container", other);
                IsolationMethod::Container
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationMethod::Container => "container",
            IsolationMethod::Process => "process",
        }
    }
}

impl fmt::Display for IsolationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationMethod {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(IsolationMethod::parse_lenient(s))
    }
}

/// Operator-configurable ceilings for any isolation environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimitsConfig {
    pub cpu_percent: u8,
    pub memory_mb: u64,
}

impl Default for ResourceLimitsConfig {
    fn default() -> Self {
        Self { cpu_percent: 50, memory_mb: 1024 }
    }
}

/// Concrete limits granted to one isolated execution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourcePolicy {
    pub network_access: bool,
    pub memory_limit_mb: u64,
    pub cpu_limit_percent: u8,
}

impl ResourcePolicy {
    /// Fixed level-to-policy mapping, clamped to the configured ceilings.
    /// Total over all three levels; callers normalize unknown level strings
    /// before reaching this point.
    pub fn for_level(level: SecurityLevel, limits: &ResourceLimitsConfig) -> Self {
        let (network_access, memory_limit_mb, cpu_limit_percent) = match level {
            SecurityLevel::Low => (true, 1024, 50),
            SecurityLevel::Medium => (true, 512, 30),
            SecurityLevel::High => (false, 256, 10),
        };
        Self {
            network_access,
            memory_limit_mb: memory_limit_mb.min(limits.memory_mb),
            cpu_limit_percent: cpu_limit_percent.min(limits.cpu_percent),
        }
    }
}

/// Sandbox execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    pub default_security_level: SecurityLevel,
    pub isolation_method: IsolationMethod,
    /// Maximum execution time in seconds.
    pub max_execution_time: u64,
    pub resource_limits: ResourceLimitsConfig,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            default_security_level: SecurityLevel::Medium,
            isolation_method: IsolationMethod::Container,
            max_execution_time: 300,
            resource_limits: ResourceLimitsConfig::default(),
        }
    }
}

impl SandboxSettings {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            default_security_level: env::var("FIRECELL_SECURITY_LEVEL")
                .map(|v| SecurityLevel::parse_lenient(&v))
                .unwrap_or(defaults.default_security_level),
            isolation_method: env::var("FIRECELL_ISOLATION_METHOD")
                .map(|v| IsolationMethod::parse_lenient(&v))
                .unwrap_or(defaults.isolation_method),
            max_execution_time: env::var("FIRECELL_MAX_EXECUTION_TIME")
                .unwrap_or_else(|_| defaults.max_execution_time.to_string())
                .parse()
                .context("Invalid FIRECELL_MAX_EXECUTION_TIME")?,
            resource_limits: ResourceLimitsConfig {
                cpu_percent: env::var("FIRECELL_CPU_PERCENT")
                    .unwrap_or_else(|_| defaults.resource_limits.cpu_percent.to_string())
                    .parse()
                    .context("Invalid FIRECELL_CPU_PERCENT")?,
                memory_mb: env::var("FIRECELL_MEMORY_MB")
                    .unwrap_or_else(|_| defaults.resource_limits.memory_mb.to_string())
                    .parse()
                    .context("Invalid FIRECELL_MEMORY_MB")?,
            },
        })
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.max_execution_time > 0, "max_execution_time must be non-zero");
        anyhow::ensure!(self.resource_limits.memory_mb > 0, "memory_mb must be non-zero");
        anyhow::ensure!(
            (1..=100).contains(&self.resource_limits.cpu_percent),
            "cpu_percent must be within 1..=100"
        );
        Ok(())
    }
}

/// On-disk layout for workspaces, reports, and monitor artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoriesConfig {
    pub app_dir: PathBuf,
}

impl DirectoriesConfig {
    fn from_env() -> Self {
        let app_dir = env::var("FIRECELL_APP_DIR").map(PathBuf::from).unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".firecell"))
                .unwrap_or_else(|| env::temp_dir().join("firecell"))
        });
        Self { app_dir }
    }

    pub fn sandbox_dir(&self) -> PathBuf {
        self.app_dir.join("sandbox")
    }

    pub fn report_dir(&self) -> PathBuf {
        self.app_dir.join("reports")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.app_dir.join("logs")
    }

    /// Create the directory tree. Safe to call repeatedly.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [self.app_dir.clone(), self.sandbox_dir(), self.report_dir(), self.log_dir()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Optional directory of extra signature files merged into the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub signatures_dir: Option<PathBuf>,
}

impl DetectionConfig {
    fn from_env() -> Self {
        Self { signatures_dir: env::var("FIRECELL_SIGNATURES_DIR").map(PathBuf::from).ok() }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub sandbox: SandboxSettings,
    pub directories: DirectoriesConfig,
    pub detection: DetectionConfig,
}

impl Config {
    /// Load configuration from environment variables, honoring `.env`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            sandbox: SandboxSettings::from_env()?,
            directories: DirectoriesConfig::from_env(),
            detection: DetectionConfig::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.sandbox.validate()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sandbox: SandboxSettings::default(),
            directories: DirectoriesConfig::from_env(),
            detection: DetectionConfig::default(),
        }
    }
}
