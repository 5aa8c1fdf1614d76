//! Isolation abstraction layer: a closed union over the two backend
//! families, selected by capability detection before any sandbox exists.

pub mod container;
pub mod process;

pub use container::{ContainerBackend, ContainerIsolation};
pub use process::{ProcessBackend, ProcessIsolation};

use std::path::Path;
use std::time::Duration;

use tracing::warn;

use crate::config::{IsolationMethod, ResourcePolicy, SecurityLevel};
use crate::error::ScanError;

/// Uniform result of driving a target through either backend.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    /// Exit status when execution has completed; `None` for a
    /// still-running process-isolation child.
    pub exit_code: Option<i32>,
    /// Live pid for the process variant; containers expose none.
    pub pid: Option<u32>,
    pub stdout: String,
    pub stderr: String,
}

/// The two isolation variants behind one interface. Dispatch is a closed
/// `match`; the variant is fixed at selection time.
pub enum IsolationEnvironment {
    Container(ContainerIsolation),
    Process(ProcessIsolation),
}

impl IsolationEnvironment {
    pub fn method(&self) -> IsolationMethod {
        match self {
            IsolationEnvironment::Container(_) => IsolationMethod::Container,
            IsolationEnvironment::Process(_) => IsolationMethod::Process,
        }
    }

    /// Tighten (or restate) the policy before setup, e.g. after a static
    /// escalation.
    pub fn set_policy(&mut self, level: SecurityLevel, policy: ResourcePolicy) {
        match self {
            IsolationEnvironment::Container(c) => c.set_policy(level, policy),
            IsolationEnvironment::Process(p) => p.set_policy(level, policy),
        }
    }

    pub async fn setup(&mut self) -> Result<(), ScanError> {
        match self {
            IsolationEnvironment::Container(c) => c.setup().await,
            IsolationEnvironment::Process(p) => p.setup().await,
        }
    }

    pub async fn execute(
        &mut self,
        path: &Path,
        args: &[String],
    ) -> Result<ExecutionOutcome, ScanError> {
        match self {
            IsolationEnvironment::Container(c) => c.execute(path, args).await,
            IsolationEnvironment::Process(p) => p.execute(path, args).await,
        }
    }

    /// Wait for a process-variant child up to the deadline. Meaningless
    /// for containers, whose `execute` already ran to completion.
    pub async fn wait_with_timeout(&mut self, deadline: Duration) -> Result<i32, ScanError> {
        match self {
            IsolationEnvironment::Container(_) => {
                Err(ScanError::Observation("container execution has no waitable child".into()))
            }
            IsolationEnvironment::Process(p) => p.wait_with_timeout(deadline).await,
        }
    }

    /// Terminate a still-running process-variant child. No-op for
    /// containers (teardown happens in `cleanup`).
    pub async fn terminate(&mut self) {
        if let IsolationEnvironment::Process(p) = self {
            p.terminate().await;
        }
    }

    /// Unconditional teardown; idempotent for both variants.
    pub async fn cleanup(&mut self) {
        match self {
            IsolationEnvironment::Container(c) => c.cleanup().await,
            IsolationEnvironment::Process(p) => p.cleanup().await,
        }
    }

    pub async fn is_available(&self) -> bool {
        match self {
            IsolationEnvironment::Container(c) => c.is_available().await,
            IsolationEnvironment::Process(p) => p.is_available().await,
        }
    }
}

/// Capability-detected backend selection. Container is tried first when
/// requested, falling back to process isolation; requesting process
/// isolation skips containers entirely. With neither backend usable the
/// scan is unrunnable: there is no fallback to executing unisolated.
pub async fn select_environment(
    method: IsolationMethod,
    level: SecurityLevel,
    policy: ResourcePolicy,
) -> Result<IsolationEnvironment, ScanError> {
    if method == IsolationMethod::Container {
        if let Some(backend) = ContainerBackend::detect().await {
            return Ok(IsolationEnvironment::Container(ContainerIsolation::new(
                backend, level, policy,
            )));
        }
        warn!("no container engine available, falling back to process isolation");
    }

    if let Some(backend) = ProcessBackend::detect().await {
        return Ok(IsolationEnvironment::Process(ProcessIsolation::new(backend, level, policy)));
    }

    Err(ScanError::BackendUnavailable(format!(
        "requested '{method}': no container engine (docker, podman) or process isolation utility (firejail, bwrap) found"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceLimitsConfig;

    #[tokio::test]
    async fn selection_never_returns_an_unrequested_container() {
        let policy =
            ResourcePolicy::for_level(SecurityLevel::Medium, &ResourceLimitsConfig::default());
        // Process was requested: whatever this host has installed, the
        // result is either a process environment or a hard failure.
        match select_environment(IsolationMethod::Process, SecurityLevel::Medium, policy).await {
            Ok(env) => assert_eq!(env.method(), IsolationMethod::Process),
            Err(e) => assert!(matches!(e, ScanError::BackendUnavailable(_))),
        }
    }

    #[tokio::test]
    async fn container_wait_is_not_supported() {
        let backend = ContainerBackend::detect().await;
        let Some(backend) = backend else { return };
        let policy =
            ResourcePolicy::for_level(SecurityLevel::Medium, &ResourceLimitsConfig::default());
        let mut env = IsolationEnvironment::Container(ContainerIsolation::new(
            backend,
            SecurityLevel::Medium,
            policy,
        ));
        let result = env.wait_with_timeout(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ScanError::Observation(_))));
    }
}
