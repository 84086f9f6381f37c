//! corridord - cache maintenance daemon for the corridor proxy.
//!
//! Sweeps stale entries out of the persistent corridor cache, inspects
//! cached corridors per query, and can keep running as an hourly sweeper.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use corridor_core::cache::PersistentCache;
use corridor_core::config::Config;

/// Cache maintenance for the corridor proxy.
#[derive(Parser)]
#[command(name = "corridord", about = "Corridor cache maintenance daemon", version)]
struct Args {
    /// Path to a dotted-key config file (`cache.database.path = ...`).
    #[arg(short, long)]
    config: Option<String>,

    /// Cache database path; overrides the config file.
    #[arg(short, long)]
    db: Option<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Delete entries not accessed for N days, then dangling query rows.
    Cleanup {
        /// Age threshold in days.
        #[arg(long, default_value = "30")]
        days: i64,
    },
    /// List cached entries for one query.
    Show {
        /// The query string exactly as the dashboards send it.
        query: String,
    },
    /// Run a cleanup sweep every hour until interrupted.
    Watch {
        /// Age threshold in days for each sweep.
        #[arg(long, default_value = "30")]
        days: i64,
        /// Seconds between sweeps.
        #[arg(long, default_value = "3600")]
        interval: u64,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => Config::from_dotted_str(&std::fs::read_to_string(path)?)?,
        None => Config::default(),
    };
    if let Some(db) = &args.db {
        config.cache.database.path = db.clone();
    }

    let mut cache = PersistentCache::open(&config.cache.database.path)?;

    match &args.command {
        Command::Cleanup { days } => {
            let (entries, queries) = cache.cleanup(*days, Utc::now().timestamp())?;
            info!("removed {} cache entries and {} query rows", entries, queries);
        }
        Command::Show { query } => {
            let entries = cache.load_all(query)?;
            if entries.is_empty() {
                info!("no cached entries for '{}'", query);
            }
            for (fingerprint, entry) in entries {
                let corridor = entry.corridor();
                info!(
                    "{} rebuilds={} harmonics={}U/{}L placeholder={} created_at={}",
                    fingerprint,
                    entry.dft_rebuild_count,
                    corridor.upper.coeffs.len(),
                    corridor.lower.coeffs.len(),
                    entry.is_placeholder(),
                    entry.created_at,
                );
            }
        }
        Command::Watch { days, interval } => {
            let running = Arc::new(AtomicBool::new(true));
            let flag = running.clone();
            ctrlc::set_handler(move || {
                flag.store(false, Ordering::SeqCst);
            })?;

            info!("sweeping every {}s, threshold {} days", interval, days);
            while running.load(Ordering::SeqCst) {
                match cache.cleanup(*days, Utc::now().timestamp()) {
                    Ok((entries, queries)) => {
                        info!("sweep removed {} entries, {} queries", entries, queries)
                    }
                    Err(e) => error!("sweep failed: {}", e),
                }
                // Sleep in short slices so Ctrl-C is handled promptly.
                for _ in 0..*interval {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
            info!("shutting down");
        }
    }
    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
