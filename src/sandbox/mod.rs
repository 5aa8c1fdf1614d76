//! The sandbox orchestrator: one end-to-end scan per instance.

pub mod monitor;

pub use monitor::ProcessMonitor;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analyzers::{combine_scores, ThreatDetector, ESCALATION_THRESHOLD};
use crate::config::{Config, IsolationMethod, ResourceLimitsConfig, ResourcePolicy, SecurityLevel};
use crate::error::ScanError;
use crate::isolation::{select_environment, IsolationEnvironment};
use crate::models::activity::ActivityReport;
use crate::models::report::{ExecutionReport, ReportSink, ScanStatus};
use crate::models::signature::SignatureRegistry;
use crate::utils::host_platform;

/// Scan lifecycle. `Failed` is terminal and reachable from any step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Created,
    Prepared,
    Executing,
    Monitoring,
    Analyzed,
    CleanedUp,
    Failed,
}

/// One scan instance. Owns its isolation environment and monitor for its
/// whole lifetime; both are torn down unconditionally when the scan ends,
/// whatever the outcome.
pub struct Sandbox {
    id: String,
    state: SandboxState,
    requested_level: SecurityLevel,
    effective_level: SecurityLevel,
    resource_limits: ResourceLimitsConfig,
    environment: IsolationEnvironment,
    detector: ThreatDetector,
    monitor: ProcessMonitor,
    sink: ReportSink,
    workspace: PathBuf,
}

impl Sandbox {
    /// Resolve a backend and assemble a scan instance. Backend detection
    /// happens here, before anything touches the filesystem: with no
    /// usable backend this fails with `BackendUnavailable` and leaves no
    /// side effects behind.
    pub async fn new(
        config: &Config,
        method: IsolationMethod,
        level: SecurityLevel,
        registry: SignatureRegistry,
        sink: ReportSink,
    ) -> Result<Self, ScanError> {
        let policy = ResourcePolicy::for_level(level, &config.sandbox.resource_limits);
        let environment = select_environment(method, level, policy).await?;

        let id = Uuid::new_v4().to_string();
        let workspace = config.directories.sandbox_dir().join(&id);
        let log_dir = config.directories.log_dir().join(&id);
        let monitor = ProcessMonitor::new(&id, log_dir);
        let detector = ThreatDetector::new(registry, host_platform());

        info!(
            "sandbox {} created with {} isolation at {} level",
            id,
            environment.method(),
            level
        );

        Ok(Self {
            id,
            state: SandboxState::Created,
            requested_level: level,
            effective_level: level,
            resource_limits: config.sandbox.resource_limits.clone(),
            environment,
            detector,
            monitor,
            sink,
            workspace,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    pub fn requested_level(&self) -> SecurityLevel {
        self.requested_level
    }

    pub fn effective_level(&self) -> SecurityLevel {
        self.effective_level
    }

    /// Run one scan end to end. Cleanup runs on every exit path; only
    /// unrunnable-scan errors propagate, everything else degrades into the
    /// returned report.
    pub async fn execute_file(
        &mut self,
        path: &Path,
        timeout: Duration,
        monitor: bool,
    ) -> Result<ExecutionReport, ScanError> {
        let result = self.run_pipeline(path, timeout, monitor).await;
        self.cleanup().await;

        match result {
            Ok(report) => {
                self.state = SandboxState::CleanedUp;
                self.sink.persist(&report);
                info!(
                    "scan {} finished: status {:?}, threat level {:.2}",
                    self.id, report.status, report.threat_level
                );
                Ok(report)
            }
            Err(e) => {
                self.state = SandboxState::Failed;
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &mut self,
        path: &Path,
        timeout: Duration,
        monitor: bool,
    ) -> Result<ExecutionReport, ScanError> {
        let started = Instant::now();

        if !path.exists() {
            return Err(ScanError::TargetMissing(path.to_path_buf()));
        }

        // Prepared: static pass first, so its verdict can tighten the
        // isolation policy before anything runs.
        let statics = self.detector.analyze_file(path);
        self.state = SandboxState::Prepared;

        let escalated = escalated_level(self.effective_level, statics.threat_score);
        if escalated != self.effective_level {
            info!(
                "static score {:.2} exceeds {:.2}, escalating isolation from {} to {}",
                statics.threat_score, ESCALATION_THRESHOLD, self.effective_level, escalated
            );
            self.effective_level = escalated;
            let policy = ResourcePolicy::for_level(escalated, &self.resource_limits);
            self.environment.set_policy(escalated, policy);
        }

        let target = stage_target(&self.workspace, path)?;

        // Executing
        self.state = SandboxState::Executing;
        self.environment.setup().await?;

        let (status, exit_code, activity) = match self.environment.method() {
            IsolationMethod::Container => self.execute_in_container(&target, timeout).await,
            IsolationMethod::Process => self.execute_in_process(&target, timeout, monitor).await,
        };

        // Analyzed: the monitor has fully quiesced (or been abandoned)
        // before this read.
        self.state = SandboxState::Analyzed;
        let dynamics = self.detector.analyze_report(&activity);
        let threat_level = combine_scores(statics.threat_score, dynamics.threat_score);

        let mut threats = statics.findings;
        threats.extend(dynamics.findings);

        Ok(ExecutionReport::assemble(
            &self.id,
            &statics.filename,
            &statics.file_hash,
            &statics.md5_hash,
            started.elapsed().as_secs_f64(),
            status,
            exit_code,
            threat_level,
            threats,
            activity,
        ))
    }

    /// Container path: execution runs to completion inside the backend, so
    /// the deadline wraps the whole call and there is no pid to observe.
    async fn execute_in_container(
        &mut self,
        target: &Path,
        timeout: Duration,
    ) -> (ScanStatus, i32, ActivityReport) {
        match tokio::time::timeout(timeout, self.environment.execute(target, &[])).await {
            Ok(Ok(outcome)) => {
                (ScanStatus::Completed, outcome.exit_code.unwrap_or(0), ActivityReport::default())
            }
            Ok(Err(e)) => {
                warn!("container execution failed: {}", e);
                (ScanStatus::Failed, -1, ActivityReport::default())
            }
            Err(_) => {
                warn!("container execution timed out after {:?}", timeout);
                (ScanStatus::Completed, -1, ActivityReport::default())
            }
        }
    }

    /// Process path: spawn, observe the live pid while waiting, terminate
    /// on deadline, then stop the monitor before anyone reads its records.
    async fn execute_in_process(
        &mut self,
        target: &Path,
        timeout: Duration,
        monitor: bool,
    ) -> (ScanStatus, i32, ActivityReport) {
        let outcome = match self.environment.execute(target, &[]).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("process execution failed: {}", e);
                return (ScanStatus::Failed, -1, ActivityReport::default());
            }
        };

        if monitor {
            if let Some(pid) = outcome.pid {
                self.state = SandboxState::Monitoring;
                self.monitor.start(pid);
            }
        }

        let exit_code = match self.environment.wait_with_timeout(timeout).await {
            Ok(code) => code,
            Err(ScanError::ExecutionTimeout) => {
                warn!("execution timed out after {:?}, terminating", timeout);
                self.environment.terminate().await;
                -1
            }
            Err(e) => {
                debug!("wait ended early: {}", e);
                -1
            }
        };

        let activity = self.monitor.stop().await;
        (ScanStatus::Completed, exit_code, activity)
    }

    /// Unconditional teardown of the isolation environment and the
    /// per-sandbox workspace. Errors are logged, never raised: cleanup
    /// must not mask a valid report. Safe to call repeatedly.
    pub async fn cleanup(&mut self) {
        self.environment.cleanup().await;

        if self.workspace.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.workspace) {
                warn!("{}", ScanError::Cleanup(format!(
                    "workspace {} not removed: {e}",
                    self.workspace.display()
                )));
            } else {
                debug!("workspace {} removed", self.workspace.display());
            }
        }
    }
}

/// Static risk only ever raises isolation strictness.
fn escalated_level(current: SecurityLevel, static_score: f64) -> SecurityLevel {
    if static_score > ESCALATION_THRESHOLD {
        SecurityLevel::High
    } else {
        current
    }
}

/// Copy the target into the per-sandbox workspace and return the staged
/// path.
fn stage_target(workspace: &Path, path: &Path) -> Result<PathBuf, ScanError> {
    let files_dir = workspace.join("files");
    std::fs::create_dir_all(&files_dir)?;

    let filename = path
        .file_name()
        .ok_or_else(|| ScanError::Workspace(std::io::Error::other("target has no file name")))?;
    let staged = files_dir.join(filename);
    std::fs::copy(path, &staged)?;
    debug!("target staged at {}", staged.display());
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_raises_low_to_high_above_threshold() {
        assert_eq!(escalated_level(SecurityLevel::Low, 0.25), SecurityLevel::High);
        assert_eq!(escalated_level(SecurityLevel::Medium, 0.6), SecurityLevel::High);
    }

    #[test]
    fn escalation_threshold_is_strict() {
        assert_eq!(escalated_level(SecurityLevel::Low, 0.2), SecurityLevel::Low);
        assert_eq!(escalated_level(SecurityLevel::Low, 0.0), SecurityLevel::Low);
    }

    #[test]
    fn escalation_never_lowers() {
        assert_eq!(escalated_level(SecurityLevel::High, 0.0), SecurityLevel::High);
        assert_eq!(escalated_level(SecurityLevel::High, 0.9), SecurityLevel::High);
    }

    #[test]
    fn staging_copies_into_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("sample.sh");
        std::fs::write(&source, b"#!/bin/sh\ntrue\n").unwrap();

        let workspace = dir.path().join("ws");
        let staged = stage_target(&workspace, &source).unwrap();
        assert!(staged.exists());
        assert_eq!(staged, workspace.join("files").join("sample.sh"));
        assert_eq!(std::fs::read(&staged).unwrap(), b"#!/bin/sh\ntrue\n");
    }

    #[test]
    fn staging_missing_source_is_a_workspace_error() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("ws");
        let result = stage_target(&workspace, &dir.path().join("gone.bin"));
        assert!(matches!(result, Err(ScanError::Workspace(_))));
    }
}
