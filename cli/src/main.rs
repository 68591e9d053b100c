//! jobspawn CLI binary
//!
//! Command-line interface over the spawner and the process inspection
//! utilities: launch a command as a detached background job, list the
//! kernel process table, or ask whether the job behind a lock file is
//! still alive.

use clap::{Parser, Subcommand};
use jobspawn_core::{process_runs, spawn, ProcessTable};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, UNIX_EPOCH};
use tracing::error;

#[derive(Parser)]
#[command(name = "jobspawn")]
#[command(about = "Spawn a shell command as a detached background job")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command as a detached background job
    Run {
        /// The command to run, split on single spaces (no shell quoting)
        command: String,
        /// Path of the report file the job appends to when it finishes
        #[arg(long)]
        report: PathBuf,
        /// Absolute path of the lock file identifying this job
        #[arg(long)]
        lock: PathBuf,
    },
    /// List currently-visible processes
    Ps {
        /// Also print the status attributes of each process
        #[arg(long)]
        full: bool,
    },
    /// Check whether the job behind a lock file is still running
    Alive {
        /// Lock file path written by a previous `run`
        lock: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = jobspawn_core::utils::init_tracing(&cli.log_level) {
        eprintln!("failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Commands::Run {
            command,
            report,
            lock,
        } => match spawn(&command, &report, &lock) {
            Ok(pid) => {
                println!("spawned: {pid}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                error!("spawn failed [{}]: {}", err.code(), err);
                ExitCode::FAILURE
            }
        },
        Commands::Ps { full } => {
            let mut table = ProcessTable::new();
            for record in table.processes() {
                let since = humantime::format_rfc3339_seconds(
                    UNIX_EPOCH + Duration::from_secs(record.running_since),
                );
                println!("{}\t{}\t{}", record.id, since, record.cmdline);
                if full {
                    let mut keys: Vec<_> = record.status.keys().collect();
                    keys.sort();
                    for key in keys {
                        println!("    {}: {}", key, record.status[key]);
                    }
                }
            }
            ExitCode::SUCCESS
        }
        Commands::Alive { lock } => {
            if process_runs(&lock) {
                println!("running");
                ExitCode::SUCCESS
            } else {
                println!("not running");
                ExitCode::FAILURE
            }
        }
    }
}
