//! Data model shared across the scan pipeline.

pub mod activity;
pub mod report;
pub mod signature;

pub use activity::{ActivityReport, FileAccessRecord, NetworkRecord, RegistryRecord};
pub use report::{ExecutionReport, ReportSink, ScanStatus, ThreatFinding};
pub use signature::{Severity, SignatureRegistry, ThreatSignature};
