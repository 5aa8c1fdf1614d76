//! firecell: runs an untrusted file inside an isolated environment,
//! observes its behavior, and produces a single risk verdict combining
//! static inspection with runtime observation.
//!
//! The pipeline is a single-host, single-run-at-a-time state machine: the
//! [`sandbox::Sandbox`] orchestrator stages the target into a workspace,
//! drives one [`isolation::IsolationEnvironment`] (container or restricted
//! process), attaches a [`sandbox::ProcessMonitor`] when there is a live
//! pid to watch, and feeds both the file and the observed activity through
//! the [`analyzers::ThreatDetector`] to assemble an immutable
//! [`models::ExecutionReport`].

pub mod analyzers;
pub mod config;
pub mod error;
pub mod isolation;
pub mod models;
pub mod sandbox;
pub mod utils;

pub use analyzers::{combine_scores, ThreatDetector};
pub use config::{Config, IsolationMethod, ResourcePolicy, SecurityLevel};
pub use error::ScanError;
pub use isolation::IsolationEnvironment;
pub use models::{ActivityReport, ExecutionReport, ReportSink, ScanStatus, SignatureRegistry};
pub use sandbox::{ProcessMonitor, Sandbox, SandboxState};
