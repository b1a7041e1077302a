//! Resolve a peer identity through a Kademlia DHT, or by asking the bootstrap
//! nodes directly.
//!
//! Run: `kad-query <bootnodes> <peer id> [--strategy direct]`

use std::{
    process::ExitCode,
    time::{Duration, Instant},
};

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kad_query::{
    parse_bootnodes, parse_identity, KadMode, LookupKind, Multiaddr, Node, QueryStrategy,
    Reporter, Result,
};

/// Used to wait for the first connection when no deadline was given.
const DEFAULT_BOOTSTRAP_WAIT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Comma separated bootstrap multiaddresses, each ending in /p2p/<peer id>
    bootnodes: Option<String>,
    /// Peer id to look up
    query: Option<String>,
    #[arg(long, value_enum, default_value_t = QueryStrategy::DhtLookup)]
    strategy: QueryStrategy,
    #[arg(long, value_enum, default_value_t = LookupKind::Record)]
    kind: LookupKind,
    /// Deadline in milliseconds, covering the wait for a first connection
    /// and the query itself. 0 disables it
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
    #[arg(long, value_enum, default_value_t = KadMode::Client)]
    mode: KadMode,
    /// Don't dial the bootstrap nodes up front, leave it to the DHT
    #[arg(long)]
    no_dial: bool,
    /// Comma separated addresses to listen on
    #[arg(long, value_delimiter = ',')]
    listen: Vec<Multiaddr>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let bootnodes = parse_bootnodes(cli.bootnodes.as_deref().unwrap_or_default())?;
    let target = parse_identity(cli.query.as_deref().unwrap_or_default())?;
    let deadline = (cli.timeout_ms > 0).then(|| Duration::from_millis(cli.timeout_ms));
    let start = Instant::now();

    let node = Node::builder()
        .bootstrap(&bootnodes)
        .dial_bootstrap(!cli.no_dial)
        .kad_mode(cli.mode)
        .listen(&cli.listen)
        .build()?;

    if !cli.no_dial {
        if node.bootstrapped(deadline.unwrap_or(DEFAULT_BOOTSTRAP_WAIT))? {
            info!("Connected to the network");
        } else {
            warn!("No bootstrap node reachable, querying anyway");
        }
    }

    // The query only gets what the connection wait left over.
    let deadline = deadline.map(|deadline| deadline.saturating_sub(start.elapsed()));

    let query = cli.strategy.into_query(bootnodes, cli.kind, deadline);
    let outcome = query.execute(&node, &target);

    node.shutdown();

    Reporter::stdout().report(&outcome?);

    Ok(())
}
