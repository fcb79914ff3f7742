//! Command-line interface for the chain tracker.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::{Arg, ArgAction, Command, value_parser};
use tokio::signal;

use chain_tracker::{
    ChainTracker, ChainTrackerError, Config, LevelFilter, LogFileConfig, LoggingConfig, Network,
    PruneMode, SyncOutcome,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = Command::new("chain-tracker")
        .version(chain_tracker::VERSION)
        .about("Chain header tracker and sync engine")
        .arg(
            Arg::new("network")
                .short('n')
                .long("network")
                .value_name("NETWORK")
                .help("Network whose chain is tracked")
                .value_parser(["mainnet", "testnet", "signet", "regtest"])
                .default_value("mainnet"),
        )
        .arg(
            Arg::new("data-dir")
                .short('d')
                .long("data-dir")
                .value_name("DIR")
                .help("Data directory for header files and logs")
                .default_value("./chain-tracker-data"),
        )
        .arg(
            Arg::new("remote")
                .short('r')
                .long("remote")
                .value_name("URL")
                .help("Base URL of the remote header source"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value("info"),
        )
        .arg(
            Arg::new("batch-size")
                .long("batch-size")
                .value_name("COUNT")
                .help("Headers requested per backward fetch")
                .value_parser(value_parser!(u32))
                .default_value("1000"),
        )
        .arg(
            Arg::new("prune-mode")
                .long("prune-mode")
                .value_name("MODE")
                .help("Which hash-index entries are dropped below the retention depth")
                .value_parser(["orphans", "depth"])
                .default_value("orphans"),
        )
        .arg(
            Arg::new("once")
                .long("once")
                .help("Sync once and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("interval")
                .long("interval")
                .value_name("SECONDS")
                .help("Seconds between sync passes")
                .value_parser(value_parser!(u64))
                .default_value("60"),
        )
        .get_matches();

    let network = match matches.get_one::<String>("network").map(String::as_str) {
        Some("testnet") => Network::Testnet,
        Some("signet") => Network::Signet,
        Some("regtest") => Network::Regtest,
        _ => Network::Bitcoin,
    };

    let prune_mode = match matches.get_one::<String>("prune-mode").map(String::as_str) {
        Some("depth") => PruneMode::Depth,
        _ => PruneMode::OrphansOnly,
    };

    let level = match matches.get_one::<String>("log-level").map(String::as_str) {
        Some("error") => LevelFilter::ERROR,
        Some("warn") => LevelFilter::WARN,
        Some("debug") => LevelFilter::DEBUG,
        Some("trace") => LevelFilter::TRACE,
        _ => LevelFilter::INFO,
    };

    let data_dir = PathBuf::from(
        matches.get_one::<String>("data-dir").context("data directory is required")?,
    );
    let batch_size = matches.get_one::<u32>("batch-size").copied().unwrap_or(1000);
    let interval = Duration::from_secs(matches.get_one::<u64>("interval").copied().unwrap_or(60));
    let once = matches.get_flag("once");

    let _logging_guard = chain_tracker::init_logging(LoggingConfig {
        level: Some(level),
        console: true,
        file: Some(LogFileConfig {
            log_dir: data_dir.join("logs"),
            max_files: 20,
        }),
    })
    .context("failed to initialize logging")?;

    let mut config = Config::new(network)
        .with_storage_path(data_dir.join("headers"))
        .with_prune_mode(prune_mode)
        .with_sync_batch_size(batch_size);
    if let Some(url) = matches.get_one::<String>("remote") {
        config = config.with_remote_url(url.clone());
    }

    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        process::exit(1);
    }

    tracing::info!("Starting chain tracker");
    tracing::info!("Network: {:?}", network);
    tracing::info!("Data directory: {}", data_dir.display());
    tracing::info!("Prune mode: {:?}", prune_mode);

    let tracker = match ChainTracker::new(config).await {
        Ok(tracker) => tracker,
        Err(e) => {
            eprintln!("Failed to start chain tracker: {}", e);
            process::exit(1);
        }
    };

    spawn_event_logger(&tracker);

    if tracker.config().remote_url.is_none() {
        print_tip(&tracker).await;
        return Ok(());
    }

    if once {
        let outcome = tracker.sync_remote().await.context("sync failed")?;
        report(&outcome);
        print_tip(&tracker).await;
        return Ok(());
    }

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match tracker.sync_remote().await {
                    Ok(outcome) => report(&outcome),
                    Err(ChainTrackerError::Sync(e)) => {
                        tracing::warn!("Sync pass failed ({}): {}", e.category(), e);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            _ = signal::ctrl_c() => {
                tracing::info!("Received Ctrl-C, shutting down");
                break;
            }
        }
    }

    print_tip(&tracker).await;
    Ok(())
}

fn spawn_event_logger(tracker: &ChainTracker) {
    let mut tips = tracker.subscribe_tip();
    let mut reorgs = tracker.subscribe_reorg();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                tip = tips.recv() => match tip {
                    Some(tip) => tracing::info!("New tip {} at height {}", tip.hash, tip.height),
                    None => break,
                },
                reorg = reorgs.recv() => match reorg {
                    Some(event) => tracing::info!(
                        "Reorg of depth {} below {}, {} headers orphaned",
                        event.depth,
                        event.new_tip.hash,
                        event.orphaned.len()
                    ),
                    None => break,
                },
            }
        }
    });
}

fn report(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::AlreadySynced {
            tip,
        } => tracing::info!("Already synced at height {}", tip.height),
        SyncOutcome::Extended {
            imported,
            requests,
            ..
        } => tracing::info!("Imported {} headers in {} requests", imported, requests),
        SyncOutcome::Reorganized {
            depth,
            imported,
            requests,
            ..
        } => tracing::info!(
            "Reorganized {} headers deep, imported {} in {} requests",
            depth,
            imported,
            requests
        ),
    }
}

async fn print_tip(tracker: &ChainTracker) {
    match tracker.tip().await {
        Some(tip) => println!("{} {} {}", tip.height, tip.hash, tip.chain_work),
        None => println!("no tip"),
    }
}
