//! Error taxonomy for the scan pipeline.
//!
//! Only a handful of variants ever reach the caller of
//! [`Sandbox::execute_file`](crate::sandbox::Sandbox::execute_file): a
//! missing target, an unusable or failed isolation backend, and workspace
//! I/O failures. Everything else is recovered inside the pipeline and
//! degrades into a lower-confidence report.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    /// The requested target does not exist. Raised before any side effects.
    #[error("target file not found: {0}")]
    TargetMissing(PathBuf),

    /// No usable isolation backend after probing the requested method and
    /// its fallback. Fatal; nothing has been created at this point.
    #[error("no isolation backend available: {0}")]
    BackendUnavailable(String),

    /// A backend accepted the setup request but failed to deliver an
    /// environment. Fatal for this scan; retrying is the caller's call.
    #[error("isolation environment creation failed: {0}")]
    CreationFailed(String),

    /// Execution exceeded the configured deadline. Recovered locally: the
    /// target is terminated and analysis proceeds with what was observed.
    #[error("execution timed out")]
    ExecutionTimeout,

    /// Reading process state failed mid-observation. Recovered locally by
    /// ending the monitoring loop early.
    #[error("observation error: {0}")]
    Observation(String),

    /// A malformed record or unreadable input during analysis. Recovered
    /// locally: contributes zero score plus a diagnostic finding.
    #[error("analysis error: {0}")]
    Analysis(String),

    /// Teardown failure. Always recovered locally and logged.
    #[error("cleanup error: {0}")]
    Cleanup(String),

    /// Workspace preparation failure (copying the target, creating the
    /// per-sandbox directory). Fatal: aborts before isolation setup.
    #[error("workspace error: {0}")]
    Workspace(#[from] std::io::Error),
}

impl ScanError {
    /// Whether this error aborts the scan instead of degrading the report.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScanError::TargetMissing(_)
                | ScanError::BackendUnavailable(_)
                | ScanError::CreationFailed(_)
                | ScanError::Workspace(_)
        )
    }
}
