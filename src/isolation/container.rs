//! Container-backed isolation driving a local container engine.

use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{ResourcePolicy, SecurityLevel};
use crate::error::ScanError;
use crate::isolation::ExecutionOutcome;

/// Image used for disposable scan containers.
const SANDBOX_IMAGE: &str = "alpine:latest";

/// In-container directory the target is copied to.
const SANDBOX_DIR: &str = "/sandbox";

/// Low-level driver for a container engine, per the backend contract:
/// `create`, `execute`, `remove`, `probe`.
#[derive(Debug, Clone)]
pub struct ContainerBackend {
    engine: &'static str,
}

impl ContainerBackend {
    /// Probe for a usable engine, preferring docker over podman.
    pub async fn detect() -> Option<Self> {
        for engine in ["docker", "podman"] {
            if Self::probe(engine).await {
                debug!("container engine detected: {}", engine);
                return Some(Self { engine });
            }
        }
        None
    }

    async fn probe(engine: &str) -> bool {
        Command::new(engine)
            .arg("--version")
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    pub fn engine(&self) -> &str {
        self.engine
    }

    /// Create a detached keep-alive container constrained by the policy.
    /// Returns the engine's container id.
    pub async fn create(
        &self,
        level: SecurityLevel,
        policy: &ResourcePolicy,
    ) -> Result<String, ScanError> {
        let mut cmd = Command::new(self.engine);
        cmd.args(["run", "-d"])
            .arg("--memory")
            .arg(format!("{}m", policy.memory_limit_mb))
            .arg("--cpus")
            .arg(format!("{}", policy.cpu_limit_percent as f64 / 100.0));

        if !policy.network_access || level == SecurityLevel::High {
            cmd.arg("--network=none");
        }
        match level {
            SecurityLevel::High => {
                cmd.args(["--cap-drop=ALL", "--security-opt=no-new-privileges"]);
            }
            SecurityLevel::Medium => {
                cmd.args(["--cap-drop=NET_ADMIN", "--cap-drop=SYS_ADMIN"]);
            }
            SecurityLevel::Low => {}
        }

        cmd.arg(SANDBOX_IMAGE).args(["tail", "-f", "/dev/null"]);

        let output = cmd
            .output()
            .await
            .map_err(|e| ScanError::CreationFailed(format!("{} run: {e}", self.engine)))?;
        if !output.status.success() {
            return Err(ScanError::CreationFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if container_id.is_empty() {
            return Err(ScanError::CreationFailed("engine returned no container id".to_string()));
        }
        info!("created container {} at {} level", short_id(&container_id), level);
        Ok(container_id)
    }

    /// Copy the target into the container and mark it executable. Returns
    /// the in-container path.
    pub async fn copy_into(&self, container_id: &str, path: &Path) -> Result<String, ScanError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ScanError::CreationFailed(format!("invalid path {}", path.display())))?;
        let container_path = format!("{SANDBOX_DIR}/{filename}");

        self.run_checked(&["exec", container_id, "mkdir", "-p", SANDBOX_DIR]).await?;
        self.run_checked(&[
            "cp",
            &path.to_string_lossy(),
            &format!("{container_id}:{SANDBOX_DIR}/"),
        ])
        .await?;
        self.run_checked(&["exec", container_id, "chmod", "+x", &container_path]).await?;

        Ok(container_path)
    }

    /// Execute a path inside the container, capturing stdio. Blocks until
    /// the command finishes.
    pub async fn execute(
        &self,
        container_id: &str,
        container_path: &str,
        args: &[String],
    ) -> Result<ExecutionOutcome, ScanError> {
        debug!("executing {} in container {}", container_path, short_id(container_id));

        let output = Command::new(self.engine)
            .args(["exec", container_id, container_path])
            .args(args)
            .output()
            .await
            .map_err(|e| ScanError::CreationFailed(format!("{} exec: {e}", self.engine)))?;

        Ok(ExecutionOutcome {
            exit_code: output.status.code(),
            pid: None,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Stop and remove a container. Tolerant: failures are logged and
    /// reported, never escalated by callers.
    pub async fn remove(&self, container_id: &str) -> Result<(), ScanError> {
        if let Err(e) = self.run_checked(&["stop", "-t", "5", container_id]).await {
            debug!("container stop failed (may already be stopped): {}", e);
        }
        self.run_checked(&["rm", "-f", container_id])
            .await
            .map_err(|e| ScanError::Cleanup(format!("remove container: {e}")))?;
        info!("removed container {}", short_id(container_id));
        Ok(())
    }

    async fn run_checked(&self, args: &[&str]) -> Result<(), ScanError> {
        let output = Command::new(self.engine)
            .args(args)
            .output()
            .await
            .map_err(|e| ScanError::CreationFailed(format!("{} {}: {e}", self.engine, args[0])))?;
        if !output.status.success() {
            return Err(ScanError::CreationFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

fn short_id(container_id: &str) -> &str {
    &container_id[..container_id.len().min(12)]
}

/// Container variant of the isolation environment: one backend engine, at
/// most one live container handle, released exactly once.
pub struct ContainerIsolation {
    backend: ContainerBackend,
    level: SecurityLevel,
    policy: ResourcePolicy,
    container_id: Option<String>,
}

impl ContainerIsolation {
    pub fn new(backend: ContainerBackend, level: SecurityLevel, policy: ResourcePolicy) -> Self {
        Self { backend, level, policy, container_id: None }
    }

    pub fn set_policy(&mut self, level: SecurityLevel, policy: ResourcePolicy) {
        self.level = level;
        self.policy = policy;
    }

    /// Create the container. No-op when one already exists.
    pub async fn setup(&mut self) -> Result<(), ScanError> {
        if self.container_id.is_none() {
            let id = self.backend.create(self.level, &self.policy).await?;
            self.container_id = Some(id);
        }
        Ok(())
    }

    /// Copy the target in and run it. Sets up first if needed, so a
    /// container is never executed before a successful `setup`.
    pub async fn execute(
        &mut self,
        path: &Path,
        args: &[String],
    ) -> Result<ExecutionOutcome, ScanError> {
        self.setup().await?;
        let container_id = self
            .container_id
            .clone()
            .ok_or_else(|| ScanError::CreationFailed("container id missing after setup".into()))?;
        let container_path = self.backend.copy_into(&container_id, path).await?;
        self.backend.execute(&container_id, &container_path, args).await
    }

    /// Remove the container. Idempotent: safe to call when none exists,
    /// and the handle is released exactly once.
    pub async fn cleanup(&mut self) {
        if let Some(container_id) = self.container_id.take() {
            if let Err(e) = self.backend.remove(&container_id).await {
                warn!("container cleanup failed: {}", e);
            }
        }
    }

    pub async fn is_available(&self) -> bool {
        ContainerBackend::probe(self.backend.engine).await
    }

    pub fn engine(&self) -> &str {
        self.backend.engine()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceLimitsConfig;

    fn policy(level: SecurityLevel) -> ResourcePolicy {
        ResourcePolicy::for_level(level, &ResourceLimitsConfig::default())
    }

    #[tokio::test]
    async fn cleanup_without_container_is_a_no_op() {
        let backend = ContainerBackend { engine: "docker" };
        let mut isolation = ContainerIsolation::new(backend, SecurityLevel::Medium, policy(SecurityLevel::Medium));
        // No handle was ever created; both calls must be silent no-ops.
        isolation.cleanup().await;
        isolation.cleanup().await;
        assert!(isolation.container_id.is_none());
    }

    #[test]
    fn short_id_truncates_long_ids() {
        assert_eq!(short_id("0123456789abcdef0123"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }
}
