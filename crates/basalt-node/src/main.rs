//! basalt-node binary entry point.

use anyhow::{Context, Result};
use basalt_chain::{ChainId, MemoryChain};
use basalt_node::{config::NodeConfig, node::Node};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Peer-to-peer node for the basalt chain.
#[derive(Parser, Debug)]
#[command(name = "basalt-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "basalt-node.toml")]
    config: PathBuf,

    /// The host:port used to listen for incoming p2p connections
    #[arg(long)]
    p2p_listen_endpoint: Option<String>,

    /// An externally accessible host:port identifying this node
    #[arg(long)]
    p2p_server_address: Option<String>,

    /// The public endpoint of a peer node to connect to; repeat to compose
    /// a network
    #[arg(long)]
    p2p_peer_address: Vec<String>,

    /// The name supplied to identify this node amongst the peers
    #[arg(long)]
    agent_name: Option<String>,

    /// Maximum number of clients from which connections are accepted,
    /// 0 for no limit
    #[arg(long)]
    max_clients: Option<usize>,

    /// Number of seconds to wait before cleaning up dead connections
    #[arg(long)]
    connection_cleanup_period: Option<u64>,

    /// Fixed node id as 64 hex characters; random when absent
    #[arg(long)]
    node_id: Option<String>,

    /// Chain id as 64 hex characters
    #[arg(long)]
    chain_id: Option<String>,

    /// Log level: trace, debug, info, warn, or error
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn apply_overrides(config: &mut NodeConfig, args: &Args) {
    if let Some(listen) = &args.p2p_listen_endpoint {
        config.listen_endpoint = listen.clone();
    }
    if let Some(server_address) = &args.p2p_server_address {
        config.server_address = Some(server_address.clone());
    }
    if !args.p2p_peer_address.is_empty() {
        config.peers.extend(args.p2p_peer_address.iter().cloned());
    }
    if let Some(agent_name) = &args.agent_name {
        config.agent_name = agent_name.clone();
    }
    if let Some(max_clients) = args.max_clients {
        config.max_clients = max_clients;
    }
    if let Some(period) = args.connection_cleanup_period {
        config.connection_cleanup_period = period;
    }
    if let Some(node_id) = &args.node_id {
        config.node_id = Some(node_id.clone());
    }
    if let Some(chain_id) = &args.chain_id {
        config.chain_id = Some(chain_id.clone());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level: Level = args
        .log_level
        .parse()
        .context("log_level must be trace, debug, info, warn, or error")?;
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install log subscriber")?;

    let mut config = NodeConfig::load(&args.config)?;
    apply_overrides(&mut config, &args);

    let chain_id = match &config.chain_id {
        Some(hex_id) => {
            let bytes = hex::decode(hex_id).context("chain_id is not valid hex")?;
            ChainId::from_slice(&bytes).context("chain_id must be 32 bytes")?
        }
        None => ChainId::zero(),
    };
    let chain = Arc::new(MemoryChain::new(chain_id));

    let handle = Node::start(config, chain).await?;
    if let Some(addr) = handle.local_addr() {
        info!(addr = %addr, "p2p listening");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for ctrl-c")?;
    info!("Interrupted, shutting down");
    handle.shutdown().await?;

    Ok(())
}
