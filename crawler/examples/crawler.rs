//! Crawl an overlay network from a set of seed peers.
//!
//! Peers are tracked in a sled database until interrupted with Ctrl-C.

use clap::Parser;
use log::LevelFilter;
use overlay_peers_crawler::{
    AddressBook, CrawlerBuilder, RecordStore, SeedAddress, TcpConnector,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Seed peer as <peer-id>@<ip>:<port>, may be repeated.
    #[arg(short, long = "seed", required = true)]
    seeds: Vec<SeedAddress>,

    /// Directory of the peer database.
    #[arg(short, long, default_value = "peers.db")]
    db: PathBuf,

    /// Log new and departed peers at info level.
    #[arg(short, long)]
    verbose: bool,

    /// Log level.
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Deadline of a probe's first connection attempt, in seconds.
    #[arg(long, default_value = "10")]
    probe_timeout_secs: u64,

    /// Minimum seconds between the starts of two liveliness sweeps.
    #[arg(long, default_value = "30")]
    sweep_interval_secs: u64,

    /// Minimum seconds between the starts of two random walks.
    #[arg(long, default_value = "1")]
    walk_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {} - {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log_level)
        .level_for("sled", LevelFilter::Warn)
        .chain(std::io::stderr())
        .apply()?;

    log::info!("CRAWLING THE OVERLAY NETWORK");

    let store = Arc::new(RecordStore::open(&args.db)?);
    log::debug!("Opened peer database at {}", args.db.display());

    // The static router and the connector share one address book.
    let book = AddressBook::new();
    let crawler = CrawlerBuilder::new(book.clone(), TcpConnector::new(book), store)
        .with_probe_timeout(Duration::from_secs(args.probe_timeout_secs))?
        .with_sweep_interval(Duration::from_secs(args.sweep_interval_secs))?
        .with_walk_interval(Duration::from_secs(args.walk_interval_secs))?
        .build();

    let handle = crawler.start(&args.seeds, args.verbose).await?;

    tokio::signal::ctrl_c().await?;
    log::info!("Interrupted, shutting down");
    handle.stop().await?;

    Ok(())
}
