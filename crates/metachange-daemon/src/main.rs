//! metachange node.
//!
//! Hosts a change handler over a set of tags and lets other nodes negotiate
//! changes to it.
//!
//! Run two nodes and propose a change to the first:
//!   metachange-node serve --peer node:a --listen 127.0.0.1:7001 --initial primary
//!   metachange-node serve --peer node:b --listen 127.0.0.1:7002 --connect ws://127.0.0.1:7001
//!   metachange-node propose --connect ws://127.0.0.1:7001 --add replica

mod config;

use clap::{Parser, Subcommand};
use config::NodeConfig;
use metachange_core::{Address, MailboxId, PeerId, Semilattice};
use metachange_handler::{ChangeHandler, InMemoryView, Outcome, propose_with_retry};
use metachange_transport::WsNode;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

type Tags = BTreeSet<String>;

#[derive(Parser)]
#[command(name = "metachange-node", about = "Negotiate changes to cluster metadata")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, env = "METACHANGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a node
    Serve {
        /// Peer id, e.g. node:alpha
        #[arg(long)]
        peer: Option<PeerId>,
        /// Address to listen on
        #[arg(long)]
        listen: Option<SocketAddr>,
        /// Node to link to at startup (repeatable)
        #[arg(long)]
        connect: Vec<String>,
        /// Tag present at startup (repeatable)
        #[arg(long)]
        initial: Vec<String>,
    },
    /// Add tags to a remote node's metadata
    Propose {
        /// Node to change, e.g. ws://127.0.0.1:7001
        #[arg(long)]
        connect: String,
        /// Peer id to present to the remote node
        #[arg(long)]
        peer: Option<PeerId>,
        /// Tag to add (repeatable)
        #[arg(long = "add", required = true)]
        tags: Vec<String>,
        /// Attempts before giving up on rejected commits
        #[arg(long, default_value_t = 3)]
        attempts: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "metachange=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = NodeConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Serve {
            peer,
            listen,
            connect,
            initial,
        } => serve(config.with_overrides(peer, listen, connect, initial)).await,
        Command::Propose {
            connect,
            peer,
            tags,
            attempts,
        } => propose(peer.or(config.peer), &connect, tags, attempts).await,
    }
}

async fn serve(config: NodeConfig) -> anyhow::Result<()> {
    let peer = config.peer_or_default();
    anyhow::ensure!(
        !peer.is_ephemeral(),
        "{peer} is an ephemeral id; a serving node needs a stable one"
    );
    let node = WsNode::bind(peer.clone(), config.listen_or_default()).await?;

    for url in &config.connect {
        if let Err(e) = node.dial(url).await {
            tracing::warn!("Failed to link to {}: {}", url, e);
        }
    }

    let view = Arc::new(InMemoryView::new(
        config.initial.iter().cloned().collect::<Tags>(),
    ));
    let handler = ChangeHandler::<Tags>::new(node.manager().clone(), view.clone())?;
    tracing::info!("Serving changes for {} at {}", peer, handler.request_address());

    let mut changes = view.subscribe();
    let log_changes = tokio::spawn(async move {
        loop {
            let tags: Vec<String> = changes.borrow_and_update().iter().cloned().collect();
            tracing::info!("Metadata: [{}]", tags.join(", "));
            if changes.changed().await.is_err() {
                break;
            }
        }
    });

    let result = serve_until(node, handler, tokio::signal::ctrl_c()).await;
    log_changes.abort();
    result
}

/// Serve until `stop` resolves, then close every link and drain the handler.
/// Shutdown runs even when `stop` fails; its error is returned afterwards.
async fn serve_until<F>(node: WsNode, handler: ChangeHandler<Tags>, stop: F) -> anyhow::Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    let peer = node.manager().peer().clone();
    let stopped = stop.await;
    match &stopped {
        Ok(()) => tracing::info!("Shutting down {}", peer),
        Err(e) => tracing::error!("Failed to wait for ctrl-c ({}); shutting down {}", e, peer),
    }

    // Closing every link concludes negotiations still waiting on a peer.
    drop(node);
    handler.shutdown().await;
    stopped?;
    Ok(())
}

async fn propose(
    peer: Option<PeerId>,
    url: &str,
    tags: Vec<String>,
    attempts: usize,
) -> anyhow::Result<()> {
    let peer = peer.unwrap_or_else(|| PeerId::ephemeral("propose"));
    let node = WsNode::bind(peer, ([127, 0, 0, 1], 0).into()).await?;
    let owner = node.dial(url).await?;
    let address = Address::new(owner.clone(), MailboxId::CHANGE_REQUESTS);
    let additions: Tags = tags.into_iter().collect();

    let outcome = propose_with_retry(node.manager(), &address, attempts, |baseline: &Tags| {
        let proposed = baseline.clone().joined(&additions);
        (proposed != *baseline).then_some(proposed)
    })
    .await?;

    match outcome {
        Outcome::Committed(value) => {
            let tags: Vec<String> = value.into_iter().collect();
            println!("{owner} now has [{}]", tags.join(", "));
        }
        Outcome::Abandoned => println!("{owner} already has every tag"),
        Outcome::Exhausted => {
            anyhow::bail!("{owner} rejected the change {attempts} times; try again")
        }
    }
    Ok(())
}
