//! Runtime observation of one monitored pid.
//!
//! A background task polls the target on a fixed 1-second cadence and
//! appends deduplicated activity records to a mutex-guarded collector
//! shared with the orchestrator. Stopping is a two-step handshake: clear
//! the run flag, then join the loop with a bounded wait, so the collector
//! is quiescent (or abandoned) before anyone reads it for analysis.

use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::models::activity::{ActivityReport, FileAccessRecord, NetworkRecord, RegistryRecord};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Bounded wait for the background loop to exit after the run flag is
/// cleared; past this the monitor proceeds with whatever was collected.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Advisory point increments per activity class.
const FILE_POINTS: u32 = 10;
const NETWORK_POINTS: u32 = 20;
const REGISTRY_POINTS: u32 = 5;

const SENSITIVE_FILE_PATTERNS: &[&str] = &["c:\\windows\\system32\\config", "/etc/passwd"];
const SUSPICIOUS_NETWORK_PATTERNS: &[&str] =
    &["malicious.example.com", ":4444", ":1337", ":31337"];
const REGISTRY_MODULES: &[&str] = &["advapi32.dll"];
const AUTORUN_KEY: &str = "HKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Run";

/// Deduplicating accumulator for one monitoring session. First observation
/// of a key wins; repeats change nothing, including the advisory score.
#[derive(Debug, Default)]
struct ActivityCollector {
    seen_paths: HashSet<String>,
    seen_remotes: HashSet<String>,
    seen_modules: HashSet<String>,
    report: ActivityReport,
}

impl ActivityCollector {
    fn record_file(&mut self, path: &str) {
        if !self.seen_paths.insert(path.to_string()) {
            return;
        }
        self.report
            .file_operations
            .push(FileAccessRecord { timestamp: Utc::now(), path: path.to_string() });
        let lowered = path.to_ascii_lowercase();
        if SENSITIVE_FILE_PATTERNS.iter().any(|p| lowered.contains(p)) {
            self.report.advisory_score += FILE_POINTS;
        }
    }

    fn record_connection(&mut self, remote: &str) {
        if !self.seen_remotes.insert(remote.to_string()) {
            return;
        }
        self.report
            .network_activity
            .push(NetworkRecord { timestamp: Utc::now(), remote: remote.to_string() });
        let lowered = remote.to_ascii_lowercase();
        if SUSPICIOUS_NETWORK_PATTERNS.iter().any(|p| lowered.contains(p)) {
            self.report.advisory_score += NETWORK_POINTS;
        }
    }

    fn record_module(&mut self, module_path: &str) {
        if !self.seen_modules.insert(module_path.to_string()) {
            return;
        }
        self.report.registry_operations.push(RegistryRecord {
            timestamp: Utc::now(),
            dll: module_path.to_string(),
            key: AUTORUN_KEY.to_string(),
        });
        self.report.advisory_score += REGISTRY_POINTS;
    }

    fn snapshot(&self) -> ActivityReport {
        self.report.clone()
    }
}

/// Background observer of a single live pid.
pub struct ProcessMonitor {
    sandbox_id: String,
    log_dir: PathBuf,
    running: Arc<AtomicBool>,
    collector: Arc<Mutex<ActivityCollector>>,
    task: Option<JoinHandle<()>>,
    pid: Option<u32>,
}

impl ProcessMonitor {
    pub fn new(sandbox_id: &str, log_dir: PathBuf) -> Self {
        Self {
            sandbox_id: sandbox_id.to_string(),
            log_dir,
            running: Arc::new(AtomicBool::new(false)),
            collector: Arc::new(Mutex::new(ActivityCollector::default())),
            task: None,
            pid: None,
        }
    }

    /// Start observing `pid`. A pid that is already gone leaves the
    /// monitor idle; the eventual report is simply empty.
    pub fn start(&mut self, pid: u32) {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
        if system.process(Pid::from_u32(pid)).is_none() {
            warn!("process {} is not running, monitoring skipped", pid);
            return;
        }

        self.pid = Some(pid);
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let collector = self.collector.clone();
        self.task = Some(tokio::spawn(monitor_loop(pid, running, collector)));
        info!("started monitoring pid {} for sandbox {}", pid, self.sandbox_id);
    }

    /// Stop the loop and hand back the session's activity. Clears the run
    /// flag, joins with a bounded wait, persists the session artifact, and
    /// returns the records under the detector's field names.
    pub async fn stop(&mut self) -> ActivityReport {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            match timeout(JOIN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("monitor task failed: {}", e),
                Err(_) => warn!("monitor loop did not quiesce in time, proceeding"),
            }
        }

        let report = self.collector.lock().await.snapshot();
        if let Some(pid) = self.pid {
            self.persist_artifact(pid, &report);
        }
        info!(
            "stopped monitoring: {} file, {} network, {} registry records, advisory {}",
            report.file_operations.len(),
            report.network_activity.len(),
            report.registry_operations.len(),
            report.advisory_score
        );
        report
    }

    fn persist_artifact(&self, pid: u32, report: &ActivityReport) {
        let path = self.log_dir.join(format!("monitor_{pid}.json"));
        let serialized = match serde_json::to_string_pretty(report) {
            Ok(s) => s,
            Err(e) => {
                warn!("monitor artifact serialization failed: {}", e);
                return;
            }
        };
        if let Err(e) = std::fs::create_dir_all(&self.log_dir)
            .and_then(|_| std::fs::write(&path, serialized))
        {
            warn!("monitor artifact not persisted to {}: {}", path.display(), e);
        }
    }
}

/// The polling loop. Exits when the flag clears, the process goes away, or
/// process state becomes unreadable (silent stop; partial observation is
/// acceptable).
async fn monitor_loop(pid: u32, running: Arc<AtomicBool>, collector: Arc<Mutex<ActivityCollector>>) {
    let mut system = System::new();
    let mut ticker = interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while running.load(Ordering::SeqCst) {
        ticker.tick().await;
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let target = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        if system.process(target).is_none() {
            debug!("process {} has terminated, monitoring stops", pid);
            break;
        }

        match sample_process(pid) {
            Ok(sample) => {
                let mut collector = collector.lock().await;
                for path in &sample.open_paths {
                    collector.record_file(path);
                }
                for remote in &sample.remotes {
                    collector.record_connection(remote);
                }
                for module in &sample.registry_modules {
                    collector.record_module(module);
                }
            }
            Err(e) => {
                // Vanished or access-denied process state; not a scan failure.
                debug!("observation of {} ended: {}", pid, e);
                break;
            }
        }
    }
}

#[derive(Debug, Default)]
struct ProcessSample {
    open_paths: Vec<String>,
    remotes: Vec<String>,
    registry_modules: Vec<String>,
}

#[cfg(target_os = "linux")]
fn sample_process(pid: u32) -> std::io::Result<ProcessSample> {
    let (open_paths, socket_inodes) = scan_fd_table(pid)?;
    let remotes = established_remotes(&socket_inodes)?;
    let registry_modules = registry_modules(pid)?;
    Ok(ProcessSample { open_paths, remotes, registry_modules })
}

/// Platforms without /proc get liveness-only monitoring.
#[cfg(not(target_os = "linux"))]
fn sample_process(_pid: u32) -> std::io::Result<ProcessSample> {
    Ok(ProcessSample::default())
}

/// Walk `/proc/<pid>/fd`: regular paths become file-access candidates,
/// socket links are collected by inode for the connection join.
#[cfg(target_os = "linux")]
fn scan_fd_table(pid: u32) -> std::io::Result<(Vec<String>, HashSet<u64>)> {
    let mut open_paths = Vec::new();
    let mut inodes = HashSet::new();

    for entry in std::fs::read_dir(format!("/proc/{pid}/fd"))? {
        let entry = entry?;
        let Ok(link) = std::fs::read_link(entry.path()) else { continue };
        let link = link.to_string_lossy().into_owned();

        if let Some(inode) = link.strip_prefix("socket:[").and_then(|s| s.strip_suffix(']')) {
            if let Ok(inode) = inode.parse() {
                inodes.insert(inode);
            }
        } else if link.starts_with('/') && !link.starts_with("/dev/") {
            open_paths.push(link);
        }
    }
    Ok((open_paths, inodes))
}

/// Established remote endpoints owned by the target, joined against the
/// kernel's TCP tables by socket inode.
#[cfg(target_os = "linux")]
fn established_remotes(inodes: &HashSet<u64>) -> std::io::Result<Vec<String>> {
    if inodes.is_empty() {
        return Ok(Vec::new());
    }
    let mut remotes = Vec::new();
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        let Ok(content) = std::fs::read_to_string(table) else { continue };
        remotes.extend(parse_tcp_table(&content, inodes));
    }
    Ok(remotes)
}

/// Parse `/proc/net/tcp{,6}` rows: keep ESTABLISHED entries whose inode
/// belongs to the target.
fn parse_tcp_table(content: &str, inodes: &HashSet<u64>) -> Vec<String> {
    const STATE_ESTABLISHED: &str = "01";

    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 || fields[3] != STATE_ESTABLISHED {
                return None;
            }
            let inode: u64 = fields[9].parse().ok()?;
            if !inodes.contains(&inode) {
                return None;
            }
            decode_endpoint(fields[2])
        })
        .collect()
}

/// Decode a kernel `ADDR:PORT` hex endpoint into `ip:port` text.
fn decode_endpoint(endpoint: &str) -> Option<String> {
    let (addr, port) = endpoint.split_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;
    match addr.len() {
        8 => {
            let raw = u32::from_str_radix(addr, 16).ok()?;
            Some(format!("{}:{}", Ipv4Addr::from(raw.to_le_bytes()), port))
        }
        32 => {
            let mut bytes = [0u8; 16];
            for (i, chunk) in addr.as_bytes().chunks(8).enumerate() {
                let chunk = std::str::from_utf8(chunk).ok()?;
                let raw = u32::from_str_radix(chunk, 16).ok()?;
                bytes[i * 4..(i + 1) * 4].copy_from_slice(&raw.to_le_bytes());
            }
            Some(format!("[{}]:{}", Ipv6Addr::from(bytes), port))
        }
        _ => None,
    }
}

/// Registry-adjacent observation: file-backed mappings whose module name
/// is associated with registry APIs (seen under Wine on this platform).
#[cfg(target_os = "linux")]
fn registry_modules(pid: u32) -> std::io::Result<Vec<String>> {
    let maps = std::fs::read_to_string(format!("/proc/{pid}/maps"))?;
    let mut modules = Vec::new();
    for line in maps.lines() {
        let Some(path) = line.split_whitespace().nth(5) else { continue };
        let lowered = path.to_ascii_lowercase();
        if REGISTRY_MODULES.iter().any(|m| lowered.contains(m)) && !modules.contains(&lowered) {
            modules.push(lowered);
        }
    }
    Ok(modules)
}
