//! Hyper-V maintenance backup CLI

use clap::{Args, Parser, Subcommand};
use hvbackup::{
    logging, ConfigOverrides, HyperV, LocalHost, MaintenanceConfig, Orchestrator, PingProbe, Result,
    RunIdentity, RunSummary, SystemClock, VmCheck,
};
use std::path::PathBuf;
use tabled::{Table, Tabled};

#[derive(Parser)]
#[command(name = "hvbackup")]
#[command(about = "Stop, export and restart Hyper-V VMs one at a time", long_about = None)]
struct Cli {
    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the maintenance pass
    Run(ConfigArgs),
    /// Preflight and capacity report; no VM is touched
    Check(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// VM to process, in order (repeatable, replaces the configured list)
    #[arg(long = "vm")]
    vms: Vec<String>,
    /// Health-probe target as VM=TARGET (repeatable)
    #[arg(long = "probe")]
    probes: Vec<String>,
    #[arg(long)]
    backup_root: Option<PathBuf>,
    /// Seconds to wait for a graceful shutdown
    #[arg(long)]
    shutdown_timeout: Option<u64>,
    /// Free space that must remain after the export
    #[arg(long)]
    min_free_gb: Option<u64>,
    /// Seconds to wait after restart before probing
    #[arg(long)]
    cool_down: Option<u64>,
    #[arg(long)]
    ping_count: Option<u32>,
    /// Health probe attempts
    #[arg(long)]
    retries: Option<u32>,
    /// Seconds between health probe attempts
    #[arg(long)]
    retry_interval: Option<u64>,
}

impl ConfigArgs {
    fn into_config(self) -> Result<MaintenanceConfig> {
        let overrides = ConfigOverrides {
            vms: self.vms,
            probes: self.probes,
            backup_root: self.backup_root,
            shutdown_timeout_secs: self.shutdown_timeout,
            min_free_gb: self.min_free_gb,
            cool_down_secs: self.cool_down,
            ping_count: self.ping_count,
            health_retries: self.retries,
            retry_interval_secs: self.retry_interval,
        };
        MaintenanceConfig::resolve(self.config.as_deref(), &overrides)
    }
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "VM")]
    vm: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Export")]
    export: String,
    #[tabled(rename = "Health")]
    health: String,
}

#[derive(Tabled)]
struct CheckRow {
    #[tabled(rename = "VM")]
    vm: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Required GB")]
    required: String,
    #[tabled(rename = "Free GB")]
    available: String,
    #[tabled(rename = "Verdict")]
    verdict: String,
}

fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    let code = match cli.command {
        Commands::Run(args) => cmd_run(args, verbose),
        Commands::Check(args) => cmd_check(args, verbose),
    };

    match code {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            let stage = if e.is_fatal() { "not started" } else { "aborted" };
            tracing::error!(error = %e, "Maintenance run {}", stage);
            eprintln!("Error: maintenance run {}: {}", stage, e);
            std::process::exit(1);
        }
    }
}

fn cmd_run(args: ConfigArgs, verbose: bool) -> Result<i32> {
    let config = args.into_config()?;
    let (platform, host, probe, clock) = (HyperV::new(), LocalHost, PingProbe, SystemClock);
    let orchestrator = Orchestrator::new(&config, &platform, &host, &probe, &clock, RunIdentity::from_env());

    // nothing may be written under the backup root until preflight passes
    tracing::subscriber::with_default(logging::console_subscriber(verbose), || orchestrator.preflight())?;
    logging::init(verbose, Some(&config.transcript_path()))?;

    let summary = orchestrator.process_queue()?;
    print_summary(&summary);
    Ok(summary.exit_code())
}

fn cmd_check(args: ConfigArgs, verbose: bool) -> Result<i32> {
    logging::init(verbose, None)?;
    let config = args.into_config()?;
    let (platform, host, probe, clock) = (HyperV::new(), LocalHost, PingProbe, SystemClock);
    let orchestrator = Orchestrator::new(&config, &platform, &host, &probe, &clock, RunIdentity::from_env());

    let checks = orchestrator.check()?;
    print_checks(&checks);
    Ok(if checks.iter().all(VmCheck::is_ready) { 0 } else { 2 })
}

fn print_summary(summary: &RunSummary) {
    let rows: Vec<RecordRow> = summary
        .records
        .iter()
        .map(|r| RecordRow {
            vm: r.vm.clone(),
            outcome: r.outcome.to_string(),
            export: r
                .export_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
            health: match &r.health {
                Some(h) if h.passed => format!("passed ({} attempts)", h.attempts),
                Some(h) => format!("FAILED ({} attempts)", h.attempts),
                None => "-".to_string(),
            },
        })
        .collect();

    println!("\nRun {}", summary.run_id);
    println!("{}", Table::new(rows));
    println!(
        "{} succeeded, {} skipped, {} failed",
        summary.succeeded(),
        summary.skipped(),
        summary.failed()
    );
    if let Some(abort) = &summary.halted {
        println!("\nHALTED: {}", abort.message);
    }
}

fn print_checks(checks: &[VmCheck]) {
    let gb = |bytes: Option<u64>| {
        bytes
            .map(|b| format!("{:.2}", hvbackup::capacity::to_gb(b)))
            .unwrap_or_else(|| "-".to_string())
    };

    let rows: Vec<CheckRow> = checks
        .iter()
        .map(|c| CheckRow {
            vm: c.vm.clone(),
            state: c.state.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
            required: gb(c.required),
            available: gb(c.available),
            verdict: c.problem.clone().unwrap_or_else(|| "ready".to_string()),
        })
        .collect();

    println!("{}", Table::new(rows));
}
