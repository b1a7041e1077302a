//! A Kademlia server node that also answers direct queries.
//!
//! Run: `kad-server -l /ip4/0.0.0.0/tcp/64001 -b <bootnode>`

use std::process::ExitCode;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kad_query::{DefaultServer, Multiaddr, Node, PeerAddress, Result};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Addresses to listen on
    #[arg(
        short,
        long = "listen",
        value_delimiter = ',',
        default_value = "/ip4/0.0.0.0/tcp/64001,/ip4/0.0.0.0/tcp/64002/ws"
    )]
    listen_addrs: Vec<Multiaddr>,
    /// Bootstrap nodes, each ending in /p2p/<peer id>
    #[arg(short, long, value_delimiter = ',')]
    bootnodes: Vec<PeerAddress>,
    /// Publish a peer record for every Kademlia peer identified
    #[arg(long)]
    publish: bool,
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
    let node = Node::builder()
        .server_mode()
        .listen(&cli.listen_addrs)
        .bootstrap(&cli.bootnodes)
        .server(Box::new(DefaultServer))
        .publish_peer_records(cli.publish)
        .build()?;

    let info = node.info()?;

    for address in info.listen_addrs() {
        println!("{}", PeerAddress::new(address.clone(), *info.peer_id()));
    }

    let (tx_interrupted, rx_interrupted) = flume::bounded::<()>(1);

    if let Err(error) = ctrlc::set_handler(move || {
        let _ = tx_interrupted.send(());
    }) {
        return Err(std::io::Error::other(error).into());
    }

    info!("Press Ctrl+C to stop");

    let _ = rx_interrupted.recv();

    info!("Shutting down");
    node.shutdown();

    Ok(())
}
