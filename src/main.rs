// src/main.rs

use anyhow::{Context, Result};
use binrep::config::{Config, ENDPOINT_ENV};
use binrep::release::retention::{self, DEFAULT_KEEP_RELEASES};
use binrep::release::timestamp::ReleaseTimestamp;
use binrep::transfer::{
    Bandwidth, CancelToken, LocalBinary, PullOptions, PushOptions, Release, Transfer,
};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

/// Exit status for usage errors: bad flags, missing endpoint
const EXIT_USAGE: u8 = 1;
/// Exit status for failed operations
const EXIT_FAILURE: u8 = 2;

#[derive(Parser)]
#[command(name = "binrep")]
#[command(author, version, about = "Static binary repository manager", long_about = None)]
struct Cli {
    /// Repository endpoint: a directory or file:///path
    #[arg(long, global = true, env = ENDPOINT_ENV)]
    endpoint: Option<String>,

    /// Abort the operation after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List projects and their latest release
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Show the binaries of a release
    Show {
        /// Project path, e.g. github.com/user/project
        project: String,
        /// Release timestamp (YYYYMMDDHHMMSS, default: latest)
        #[arg(short, long)]
        timestamp: Option<ReleaseTimestamp>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Publish binaries as a new release
    Push {
        /// Project path, e.g. github.com/user/project
        project: String,
        /// Binaries to publish
        #[arg(required = true)]
        binaries: Vec<PathBuf>,
        /// Release timestamp (YYYYMMDDHHMMSS, default: now)
        #[arg(short, long)]
        timestamp: Option<ReleaseTimestamp>,
        /// Number of releases to keep, 0 keeps everything
        #[arg(short, long, default_value_t = DEFAULT_KEEP_RELEASES)]
        keep_releases: usize,
        /// Upload binaries even when an identical one was already pushed
        #[arg(short, long)]
        force: bool,
        /// Version recorded for every pushed binary
        #[arg(long)]
        binary_version: Option<String>,
        /// Concurrent uploads
        #[arg(short, long, default_value_t = 1)]
        jobs: usize,
    },
    /// Install the binaries of a release
    Pull {
        /// Project path, e.g. github.com/user/project
        project: String,
        /// Directory the binaries are installed into
        install_dir: PathBuf,
        /// Release timestamp (YYYYMMDDHHMMSS, default: latest)
        #[arg(short, long)]
        timestamp: Option<ReleaseTimestamp>,
        /// Bandwidth limit, e.g. 10MB or 512KiB (per second)
        #[arg(long)]
        max_bandwidth: Option<Bandwidth>,
        /// Concurrent downloads
        #[arg(short, long, default_value_t = 1)]
        jobs: usize,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: Shell,
    },
}

#[derive(Serialize)]
struct ProjectSummary {
    project: String,
    latest: Option<ReleaseTimestamp>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version come through here too
            let code = if e.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "binrep", &mut io::stdout());
        return ExitCode::SUCCESS;
    }

    let transfer = match open_repository(&cli) {
        Ok(transfer) => transfer,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };
    install_interrupt_handler(transfer.cancel_token().clone());

    match run(cli.command, &transfer) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

/// Resolve the endpoint and open the repository it points at
fn open_repository(cli: &Cli) -> binrep::Result<Transfer> {
    let endpoint = cli.endpoint.as_deref().unwrap_or_default();
    let config = Config::new(endpoint)?.with_timeout(cli.timeout.map(Duration::from_secs));
    let store = config.open_store()?;
    Ok(Transfer::new(store).with_cancel(config.cancel_token()))
}

/// First Ctrl-C cancels running transfers, a second one exits immediately
fn install_interrupt_handler(cancel: CancelToken) {
    let result = ctrlc::set_handler(move || {
        if cancel.is_cancelled() {
            eprintln!("\nReceived second interrupt, exiting immediately...");
            std::process::exit(130);
        }
        eprintln!("\nReceived interrupt, cancelling transfers...");
        cancel.cancel();
    });
    if let Err(e) = result {
        warn!("Failed to install interrupt handler: {}", e);
    }
}

fn run(command: Commands, transfer: &Transfer) -> Result<()> {
    match command {
        Commands::List { json } => {
            let mut summaries = Vec::new();
            for project in transfer.resolver().projects()? {
                let latest = transfer.latest_release(&project)?;
                summaries.push(ProjectSummary { project, latest });
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else if summaries.is_empty() {
                println!("No projects found.");
            } else {
                for summary in &summaries {
                    let latest = summary.latest.as_ref().map_or("-", |ts| ts.as_str());
                    println!("{} {}", summary.project, latest);
                }
            }
            Ok(())
        }
        Commands::Show {
            project,
            timestamp,
            json,
        } => {
            let release = transfer
                .release(&project, timestamp.as_ref())
                .with_context(|| format!("Failed to show {}", project))?;
            print_release(&release, json)
        }
        Commands::Push {
            project,
            binaries,
            timestamp,
            keep_releases,
            force,
            binary_version,
            jobs,
        } => {
            let locals = binaries
                .iter()
                .map(|path| {
                    let local = LocalBinary::from_path(path)?;
                    Ok(match &binary_version {
                        Some(version) => local.with_version(version.as_str()),
                        None => local,
                    })
                })
                .collect::<binrep::Result<Vec<_>>>()?;

            let options = PushOptions {
                timestamp,
                force,
                jobs,
            };
            let report = transfer
                .push(&project, &locals, &options)
                .with_context(|| format!("Failed to push {}", project))?;

            if report.is_noop() {
                println!("Nothing to push: every binary is already published.");
                return Ok(());
            }

            println!("Pushed {} release {}", report.project, report.timestamp);
            for record in &report.uploaded {
                println!("  uploaded {}", record.inspect());
            }
            for record in &report.skipped {
                println!("  skipped  {}", record.inspect());
            }

            match retention::prune_releases(
                transfer.store(),
                &report.project,
                keep_releases,
                transfer.cancel_token(),
            ) {
                Ok(removed) if !removed.is_empty() => {
                    info!("Removed {} old releases of {}", removed.len(), report.project);
                }
                Ok(_) => {}
                // The release itself is published; a failed cleanup is not fatal
                Err(e) => warn!("Failed to prune old releases of {}: {}", report.project, e),
            }
            Ok(())
        }
        Commands::Pull {
            project,
            install_dir,
            timestamp,
            max_bandwidth,
            jobs,
        } => {
            let options = PullOptions {
                timestamp,
                max_bandwidth,
                jobs,
            };
            let report = transfer
                .pull(&project, &install_dir, &options)
                .with_context(|| format!("Failed to pull {}", project))?;

            println!(
                "Installed {} release {} into {}",
                report.project,
                report.timestamp,
                install_dir.display()
            );
            for path in &report.installed {
                println!("  {}", path.display());
            }
            Ok(())
        }
        Commands::Completions { .. } => Ok(()),
    }
}

fn print_release(release: &Release, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(release)?);
        return Ok(());
    }

    println!("{} {}", release.project, release.timestamp);
    for record in &release.binaries {
        println!("  {}", record.inspect());
    }
    Ok(())
}
