use std::sync::Arc;

use anyhow::{anyhow, bail};
use clap::Parser;
use clap_derive::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};

use neighbourhood::config::NodeConfig;
use neighbourhood::endpoint_key::EndpointKey;
use neighbourhood::message_handler::LoggingMessageHandler;
use neighbourhood::node::Node;

#[derive(Parser)]
struct Args {
    /// e.g. 127.0.0.1:9001
    listen_address: String,

    #[clap(long)]
    identity: Option<String>,

    /// peers to connect to on startup
    #[clap(long)]
    connect: Vec<String>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

/// Starts a node and reads commands from stdin, one per line:
///
/// ```text
/// connect <ip:port>
/// send <ip:port> <text>
/// remove <ip:port>
/// is <ip:port>
/// list
/// quit
/// ```
#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let mut config = NodeConfig::new(args.listen_address.parse()?);
    if let Some(identity) = args.identity {
        config.identity = identity;
    }

    let node = Node::start(config, Arc::new(LoggingMessageHandler)).await?;
    info!("started {:?}", node);

    for peer in args.connect {
        node.connect(peer.parse()?).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match execute(&node, line.trim()).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => warn!("{}", e),
        }
    }

    node.shutdown().await;
    Ok(())
}

/// returns `false` to quit
async fn execute(node: &Node, line: &str) -> anyhow::Result<bool> {
    let mut parts = line.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();
    let mut peer = || -> anyhow::Result<EndpointKey> {
        parts.next()
            .ok_or_else(|| anyhow!("missing peer address"))?
            .parse()
    };

    match command {
        "" => {}
        "connect" => node.connect(peer()?).await?,
        "send" => {
            let key = peer()?;
            let text = parts.next().unwrap_or_default();
            if !node.send_message(key, text.as_bytes()).await {
                bail!("{} is not a neighbour", key);
            }
        }
        "remove" => {
            let key = peer()?;
            if !node.disconnect(key).await {
                info!("{} was not a neighbour", key);
            }
        }
        "is" => {
            let key = peer()?;
            info!("{}: {:?}", key, node.connection_state(key).await);
        }
        "list" => info!("neighbours: {:?}", node.neighbours().await),
        "quit" => return Ok(false),
        other => bail!("unknown command {:?}", other),
    }
    Ok(true)
}
