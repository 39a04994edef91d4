//! arxline - batch harvester for arXiv LaTeX sources
//!
//! Downloads every revision of an owner's assigned papers, keeps only the
//! `.tex`/`.bib` files, and adds arXiv metadata plus Semantic Scholar
//! references next to them.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "arxline")]
#[command(about = "Batch harvester for arXiv LaTeX sources, metadata and references")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./arxline.toml or ~/.config/arxline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Read timeout in seconds for stall detection
    #[arg(long, global = true)]
    read_timeout: Option<u64>,

    /// Maximum retry attempts for transient failures
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Also append log records to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Harvest an owner's assigned papers (metadata, sources, references)
    Run(cmd::run::RunArgs),
    /// Validate the harvested corpus on disk
    Check(cmd::check::CheckArgs),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let progress = Arc::new(arxline_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug, progress bars show activity
    //   non-TTY: info unless --debug, logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    arxline_core::init_logging(quiet, cli.debug, multi, cli.log_file.as_deref());

    setup_signal_handler();

    match run(cli, &progress) {
        Ok(code) => code,
        Err(e) => {
            log::error!("Fatal error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, progress: &arxline_core::SharedProgress) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;

    // Config file defaults, CLI overrides
    arxline_core::set_http_config(arxline_core::HttpConfig {
        read_timeout: std::time::Duration::from_secs(
            cli.read_timeout.unwrap_or(config.http.read_timeout),
        ),
        max_retries: cli.max_retries.unwrap_or(config.http.max_retries),
    });

    match cli.command {
        Command::Run(args) => cmd::run::run(args, &config, progress),
        Command::Check(args) => cmd::check::run(args, &config),
        Command::Config => {
            eprintln!("\n{}", config.format_table());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
}

fn setup_signal_handler() {
    // First signal: set graceful shutdown flag
    // Second signal: force exit
    // SAFETY: AtomicBool::swap and process::exit are async-signal-safe
    for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
        let registered = unsafe {
            signal_hook::low_level::register(signal, || {
                if arxline_core::shutdown_flag().swap(true, Ordering::Relaxed) {
                    std::process::exit(130);
                }
            })
        };
        if let Err(e) = registered {
            log::warn!("Cannot install handler for signal {signal}: {e}");
        }
    }
}
