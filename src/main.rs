use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::{self, Duration};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use meshdiag::{DiagNode, GatherConfig, Identity};

#[derive(Clone, Debug)]
struct PeerArg {
    identity: Identity,
    addr: SocketAddr,
}

impl FromStr for PeerArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (id_part, addr_part) = s
            .split_once('@')
            .context("peer must be given as IDENTITY@IP:PORT")?;

        let identity = Identity::from_hex(id_part).context("invalid hex identity")?;
        let addr: SocketAddr = addr_part.parse().context("invalid socket address")?;

        Ok(PeerArg { identity, addr })
    }
}

#[derive(Parser, Debug)]
#[command(name = "meshdiag")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,

    /// Node identity as 64 hex characters; random if omitted.
    #[arg(short, long)]
    identity: Option<Identity>,

    #[arg(short, long = "peer", value_name = "PEER")]
    peers: Vec<PeerArg>,

    /// Seconds between diagnostic rounds; 0 answers requests only.
    #[arg(short, long, default_value = "60")]
    gather_interval: u64,

    /// Per-round timeout in seconds.
    #[arg(short, long, default_value = "10")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    let identity = args.identity.unwrap_or_else(Identity::random);
    let node = DiagNode::bind_with(&args.bind.to_string(), identity, GatherConfig::default()).await?;
    info!("Node identity: {}", node.identity());

    for peer in &args.peers {
        if node.add_peer(peer.identity, peer.addr) {
            info!("Added peer {}@{}", peer.identity.short(), peer.addr);
        } else {
            warn!(peer = %peer.identity.short(), "peer rejected");
        }
    }

    if args.gather_interval == 0 {
        tokio::signal::ctrl_c().await.context("failed to wait for shutdown signal")?;
        info!("Received shutdown signal, exiting gracefully");
        node.shutdown();
        return Ok(());
    }

    let round_timeout = Duration::from_secs(args.timeout);
    let mut interval = time::interval(Duration::from_secs(args.gather_interval));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, exiting gracefully");
                break;
            }
            _ = interval.tick() => {
                match node.diagnostic(round_timeout).await {
                    Ok(infos) => {
                        let versions: Vec<&str> = infos.iter().map(|i| i.code_version.as_str()).collect();
                        info!(nodes = infos.len(), versions = ?versions, "diagnostic round");
                        match serde_json::to_string_pretty(&infos) {
                            Ok(json) => println!("{}", json),
                            Err(e) => warn!(error = %e, "failed to render diagnostic result"),
                        }
                    }
                    Err(e) => warn!(error = %e, "diagnostic round failed"),
                }
            }
        }
    }

    node.shutdown();
    Ok(())
}
