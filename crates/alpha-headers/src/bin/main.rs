use std::{path::PathBuf, sync::Arc};

use alpha_headers::{
    Checkpoint, ErrorKind, FastChain, Header, HeaderOrganizer, MemoryChain, MemoryHeaderPool,
    Network, PrioritizedMutex, Settings, blockdata::GenesisInfo, database::DatabaseChain,
};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Registry, fmt::time::ChronoUtc, layer::SubscriberExt, util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "Unicity Alpha Header Organizer")]
#[command(about = "Validates Alpha block headers and organizes them into a candidate chain.", long_about = None)]
struct Args {
    /// Use the specified network (alpha, alphatestnet, alpharegtest).
    #[arg(short, long, default_value = "alpha")]
    pub network: Network,

    /// Directory holding the header database. Headers are kept in memory if unset.
    #[arg(short, long)]
    pub datadir: Option<PathBuf>,

    /// JSON settings file. Overrides --network.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// File of hex-encoded headers, one per line, to organize in order.
    #[arg(long)]
    pub headers: Option<PathBuf>,

    /// Additional checkpoint as hash:height. May be repeated.
    #[arg(long = "checkpoint")]
    pub checkpoints: Vec<Checkpoint>,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Disable colored output.
    #[arg(long, default_value_t = false)]
    pub no_color: bool,
}

#[derive(Debug, Default)]
struct Tally {
    organized: usize,
    pooled: usize,
    duplicate: usize,
    rejected: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    init_tracing(&args)?;

    let mut settings = match &args.config {
        Some(path) => Settings::from_json(&tokio::fs::read_to_string(path).await?)?,
        None => Settings::new(args.network),
    };
    settings.checkpoints.extend(args.checkpoints.iter().copied());

    let genesis = GenesisInfo::for_network(settings.network).to_header();
    let chain: Arc<dyn FastChain> = match &args.datadir {
        Some(datadir) => {
            let path = datadir.join(settings.network.as_str()).join("headers.redb");
            Arc::new(DatabaseChain::open(path, genesis)?)
        }
        None => Arc::new(MemoryChain::new(genesis)),
    };

    let pool = Arc::new(MemoryHeaderPool::new(chain.clone()));
    let organizer = Arc::new(HeaderOrganizer::new(
        chain.clone(),
        pool,
        Arc::new(PrioritizedMutex::new()),
        settings,
    ));
    organizer.start();

    let headers = match &args.headers {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => String::new(),
    };

    let mut tally = Tally::default();
    for line in headers.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let header = Header::from_hex(line)?;
        let hash = header.block_hash();

        let task = organizer.clone();
        let result = tokio::task::spawn_blocking(move || task.organize(header)).await?;

        match result {
            Ok(()) => tally.organized = tally.organized.saturating_add(1),
            Err(error) => match error.kind() {
                ErrorKind::InsufficientWork => tally.pooled = tally.pooled.saturating_add(1),
                ErrorKind::Duplicate => tally.duplicate = tally.duplicate.saturating_add(1),
                ErrorKind::Fatal => {
                    error!(%hash, %error, "Header store failed, stopping");
                    organizer.stop();
                    return Err(error.into());
                }
                _ => {
                    warn!(%hash, %error, "Header rejected");
                    tally.rejected = tally.rejected.saturating_add(1);
                }
            },
        }
    }

    organizer.stop();

    match chain.top(true)? {
        Some(top) => info!(
            height = top.height,
            hash = %top.hash,
            organized = tally.organized,
            pooled = tally.pooled,
            duplicate = tally.duplicate,
            rejected = tally.rejected,
            "Candidate chain tip"
        ),
        None => warn!("Candidate chain is empty"),
    }

    Ok(())
}

fn init_tracing(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let level = match args.log_level.as_str() {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "info" => tracing::Level::INFO,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => {
            eprintln!(
                "Invalid log level: {}. Using 'info' as default.",
                args.log_level
            );
            tracing::Level::INFO
        }
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
        .add_directive("tokio=warn".parse()?);

    let use_ansi = std::io::IsTerminal::is_terminal(&std::io::stderr()) && !args.no_color;

    let subscriber = Registry::default().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_level(true)
            .with_target(true)
            .with_thread_ids(args.verbose)
            .with_thread_names(args.verbose)
            .with_ansi(use_ansi)
            .with_file(args.verbose)
            .with_line_number(args.verbose)
            .with_timer(ChronoUtc::rfc_3339()),
    );

    subscriber.try_init()?;

    Ok(())
}
