use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use firecell::config::{Config, IsolationMethod, SecurityLevel};
use firecell::models::{ReportSink, SignatureRegistry};
use firecell::sandbox::Sandbox;

/// Run an untrusted file in an isolated sandbox and print a risk report.
#[derive(Parser, Debug)]
#[command(name = "firecell", version, about)]
struct Cli {
    /// File to execute in the sandbox.
    file: PathBuf,

    /// Security level (low, medium, high). Unrecognized values fall back
    /// to medium.
    #[arg(long)]
    security: Option<String>,

    /// Isolation method (container, process).
    #[arg(long)]
    isolation: Option<String>,

    /// Maximum execution time in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Skip runtime monitoring (process isolation only).
    #[arg(long)]
    no_monitor: bool,

    /// Directory of extra signature files (*.json) merged into the
    /// built-in set.
    #[arg(long)]
    signatures: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = config.directories.ensure() {
        error!("could not create application directories: {}", e);
        return ExitCode::FAILURE;
    }

    let level = cli
        .security
        .as_deref()
        .map(SecurityLevel::parse_lenient)
        .unwrap_or(config.sandbox.default_security_level);
    let method = cli
        .isolation
        .as_deref()
        .map(IsolationMethod::parse_lenient)
        .unwrap_or(config.sandbox.isolation_method);
    let timeout = Duration::from_secs(cli.timeout.unwrap_or(config.sandbox.max_execution_time));

    let registry = match cli.signatures.as_deref().or(config.detection.signatures_dir.as_deref()) {
        Some(dir) => SignatureRegistry::with_extra_dir(dir),
        None => SignatureRegistry::builtin(),
    };
    info!("loaded {} threat signatures", registry.len());

    let sink = ReportSink::new(config.directories.report_dir());

    let mut sandbox = match Sandbox::new(&config, method, level, registry, sink).await {
        Ok(sandbox) => sandbox,
        Err(e) => {
            error!("cannot start scan: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match sandbox.execute_file(&cli.file, timeout, !cli.no_monitor).await {
        Ok(report) => {
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{json}"),
                Err(e) => error!("report serialization failed: {}", e),
            }
            // A completed scan exits zero regardless of verdict.
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("scan failed to run: {}", e);
            ExitCode::FAILURE
        }
    }
}
