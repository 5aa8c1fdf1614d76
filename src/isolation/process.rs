//! Process-backed isolation: the target runs as a direct child under a
//! restricted-privilege sandboxing utility.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{ResourcePolicy, SecurityLevel};
use crate::error::ScanError;
use crate::isolation::ExecutionOutcome;

/// Grace period between the terminate signal and a forced kill.
const TERMINATION_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationUtility {
    Firejail,
    Bubblewrap,
}

impl IsolationUtility {
    fn command(&self) -> &'static str {
        match self {
            IsolationUtility::Firejail => "firejail",
            IsolationUtility::Bubblewrap => "bwrap",
        }
    }
}

/// Low-level driver for the process-isolation utility, per the backend
/// contract: `initialize`, `execute_isolated`, `terminate`, `probe`.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    utility: IsolationUtility,
}

impl ProcessBackend {
    /// Probe for a usable utility, preferring firejail over bubblewrap.
    pub async fn detect() -> Option<Self> {
        for utility in [IsolationUtility::Firejail, IsolationUtility::Bubblewrap] {
            if Self::probe(utility).await {
                debug!("process isolation utility detected: {}", utility.command());
                return Some(Self { utility });
            }
        }
        None
    }

    async fn probe(utility: IsolationUtility) -> bool {
        Command::new(utility.command())
            .arg("--version")
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    pub fn utility(&self) -> IsolationUtility {
        self.utility
    }

    /// Build the restriction profile for one security level. Pure argument
    /// construction; validated here, applied at spawn time.
    pub fn initialize(&self, level: SecurityLevel, policy: &ResourcePolicy) -> Vec<String> {
        match self.utility {
            IsolationUtility::Firejail => {
                let mut args = vec!["--quiet".to_string(), "--private-tmp".to_string()];
                args.push(format!("--rlimit-as={}", policy.memory_limit_mb * 1024 * 1024));
                if !policy.network_access || level == SecurityLevel::High {
                    args.push("--net=none".to_string());
                }
                if level == SecurityLevel::High {
                    // No --private here: it would mask the staged target
                    // under the caller's home.
                    args.push("--caps.drop=all".to_string());
                    args.push("--nonewprivs".to_string());
                }
                args
            }
            IsolationUtility::Bubblewrap => {
                let mut args = vec![
                    "--ro-bind".to_string(),
                    "/".to_string(),
                    "/".to_string(),
                    "--dev".to_string(),
                    "/dev".to_string(),
                    "--proc".to_string(),
                    "/proc".to_string(),
                    "--tmpfs".to_string(),
                    "/tmp".to_string(),
                    "--die-with-parent".to_string(),
                ];
                if !policy.network_access || level == SecurityLevel::High {
                    args.push("--unshare-net".to_string());
                }
                if level == SecurityLevel::High {
                    args.push("--unshare-all".to_string());
                }
                args
            }
        }
    }

    /// Spawn the target under the utility with piped stdio. The returned
    /// child is owned by the caller; stdio drains in background tasks so
    /// the target can never block on a full pipe.
    pub fn execute_isolated(
        &self,
        profile: &[String],
        path: &Path,
        args: &[String],
    ) -> Result<SpawnedTarget, ScanError> {
        let mut child = Command::new(self.utility.command())
            .args(profile)
            .arg(path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ScanError::CreationFailed(format!("{} spawn: {e}", self.utility.command()))
            })?;

        let pid = child.id();
        let stdout = child.stdout.take().map(drain_pipe);
        let stderr = child.stderr.take().map(drain_pipe);

        info!("spawned isolated process pid {:?} under {}", pid, self.utility.command());
        Ok(SpawnedTarget { child, pid, stdout, stderr })
    }

    /// Graceful terminate, bounded grace period, then forced kill.
    pub async fn terminate(&self, target: &mut SpawnedTarget) {
        #[cfg(unix)]
        if let Some(pid) = target.pid {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!("SIGTERM to {} failed: {}", pid, e);
            }
        }

        match timeout(TERMINATION_GRACE, target.child.wait()).await {
            Ok(Ok(status)) => debug!("process exited after terminate: {:?}", status.code()),
            Ok(Err(e)) => warn!("wait after terminate failed: {}", e),
            Err(_) => {
                warn!("process ignored terminate, killing");
                if let Err(e) = target.child.kill().await {
                    warn!("forced kill failed: {}", e);
                }
            }
        }
    }
}

fn drain_pipe<R>(mut reader: R) -> JoinHandle<String>
where
    R: AsyncReadExt + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// A live isolated child plus its stdio drains.
pub struct SpawnedTarget {
    child: Child,
    pid: Option<u32>,
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
}

impl SpawnedTarget {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn collect_stdio(&mut self) -> (String, String) {
        let stdout = match self.stdout.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        (stdout, stderr)
    }
}

/// Process variant of the isolation environment: at most one live child,
/// terminated at cleanup if still running.
pub struct ProcessIsolation {
    backend: ProcessBackend,
    level: SecurityLevel,
    policy: ResourcePolicy,
    profile: Vec<String>,
    target: Option<SpawnedTarget>,
}

impl ProcessIsolation {
    pub fn new(backend: ProcessBackend, level: SecurityLevel, policy: ResourcePolicy) -> Self {
        Self { backend, level, policy, profile: Vec::new(), target: None }
    }

    pub fn set_policy(&mut self, level: SecurityLevel, policy: ResourcePolicy) {
        self.level = level;
        self.policy = policy;
    }

    /// Build the restriction profile for the configured level.
    pub async fn setup(&mut self) -> Result<(), ScanError> {
        self.profile = self.backend.initialize(self.level, &self.policy);
        Ok(())
    }

    /// Spawn the target. Returns immediately with the pid; completion is
    /// observed through [`wait_with_timeout`](Self::wait_with_timeout).
    pub async fn execute(
        &mut self,
        path: &Path,
        args: &[String],
    ) -> Result<ExecutionOutcome, ScanError> {
        if self.profile.is_empty() {
            self.setup().await?;
        }
        let target = self.backend.execute_isolated(&self.profile, path, args)?;
        let pid = target.pid();
        self.target = Some(target);
        Ok(ExecutionOutcome { exit_code: None, pid, stdout: String::new(), stderr: String::new() })
    }

    /// Wait for the child up to the deadline. `Err(ExecutionTimeout)` when
    /// the deadline expires; the child keeps running until terminated.
    pub async fn wait_with_timeout(&mut self, deadline: Duration) -> Result<i32, ScanError> {
        let target = self
            .target
            .as_mut()
            .ok_or_else(|| ScanError::Observation("no process to wait for".to_string()))?;

        match timeout(deadline, target.child.wait()).await {
            Ok(Ok(status)) => {
                let exit_code = status.code().unwrap_or(-1);
                let (stdout, stderr) = target.collect_stdio().await;
                debug!(
                    "isolated process finished, exit {} ({}B stdout, {}B stderr)",
                    exit_code,
                    stdout.len(),
                    stderr.len()
                );
                self.target = None;
                Ok(exit_code)
            }
            Ok(Err(e)) => {
                self.target = None;
                Err(ScanError::Observation(format!("wait failed: {e}")))
            }
            Err(_) => Err(ScanError::ExecutionTimeout),
        }
    }

    /// Terminate a still-running child: graceful signal, grace period,
    /// forced kill.
    pub async fn terminate(&mut self) {
        if let Some(mut target) = self.target.take() {
            self.backend.terminate(&mut target).await;
            let (stdout, stderr) = target.collect_stdio().await;
            debug!(
                "terminated isolated process ({}B stdout, {}B stderr)",
                stdout.len(),
                stderr.len()
            );
        }
    }

    /// Idempotent: terminates any still-running child, no-op otherwise.
    pub async fn cleanup(&mut self) {
        self.terminate().await;
    }

    pub async fn is_available(&self) -> bool {
        ProcessBackend::probe(self.backend.utility).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceLimitsConfig;

    fn policy(level: SecurityLevel) -> ResourcePolicy {
        ResourcePolicy::for_level(level, &ResourceLimitsConfig::default())
    }

    #[test]
    fn firejail_profile_denies_network_at_high() {
        let backend = ProcessBackend { utility: IsolationUtility::Firejail };
        let args = backend.initialize(SecurityLevel::High, &policy(SecurityLevel::High));
        assert!(args.contains(&"--net=none".to_string()));
        assert!(args.contains(&"--caps.drop=all".to_string()));
        assert!(args.contains(&"--nonewprivs".to_string()));
    }

    #[test]
    fn firejail_profile_allows_network_at_low() {
        let backend = ProcessBackend { utility: IsolationUtility::Firejail };
        let args = backend.initialize(SecurityLevel::Low, &policy(SecurityLevel::Low));
        assert!(!args.contains(&"--net=none".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--rlimit-as=")));
    }

    #[test]
    fn bubblewrap_profile_unshares_network_when_denied() {
        let backend = ProcessBackend { utility: IsolationUtility::Bubblewrap };
        let args = backend.initialize(SecurityLevel::High, &policy(SecurityLevel::High));
        assert!(args.contains(&"--unshare-net".to_string()));
        assert!(args.contains(&"--die-with-parent".to_string()));
    }

    #[tokio::test]
    async fn cleanup_with_no_child_is_a_no_op() {
        let backend = ProcessBackend { utility: IsolationUtility::Firejail };
        let mut isolation =
            ProcessIsolation::new(backend, SecurityLevel::Medium, policy(SecurityLevel::Medium));
        isolation.cleanup().await;
        isolation.cleanup().await;
        assert!(isolation.target.is_none());
    }

    #[tokio::test]
    async fn wait_without_execute_is_an_observation_error() {
        let backend = ProcessBackend { utility: IsolationUtility::Firejail };
        let mut isolation =
            ProcessIsolation::new(backend, SecurityLevel::Medium, policy(SecurityLevel::Medium));
        let result = isolation.wait_with_timeout(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ScanError::Observation(_))));
    }
}
