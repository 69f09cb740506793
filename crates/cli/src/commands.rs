//! CLI commands.

use crate::config::CliConfig;
use anyhow::{Context, Result};
use clap::Subcommand;
use corelib::{HashRing, RingBuilder};
use proxy::{Proxy, ProxyConfig};
use tokio::sync::broadcast;
use tracing::info;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Receive metrics and forward them to the backend nodes (default)
    Serve,

    /// Print the node each key routes to when every configured node is live
    Route {
        /// Metric keys (the part before ':')
        #[arg(value_name = "KEY", required = true)]
        keys: Vec<String>,
    },
}

impl Command {
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        let config = cli.load_proxy_config()?;
        match self {
            Command::Serve => serve(config).await,
            Command::Route { keys } => {
                let ring = full_ring(&config)?;
                for key in keys {
                    let node = ring.resolve(key.as_bytes())?;
                    println!("{key} -> {node}");
                }
                Ok(())
            }
        }
    }
}

/// Ring with every configured node as a member.
pub fn full_ring(config: &ProxyConfig) -> Result<HashRing> {
    config
        .nodes
        .iter()
        .fold(
            RingBuilder::new().with_replicas(config.replicas),
            |builder, node| builder.add_member(node.name()),
        )
        .build()
        .context("invalid ring configuration")
}

async fn serve(config: ProxyConfig) -> Result<()> {
    info!(
        "config: listen={}, nodes={}, interval={}ms, udp={:?}",
        config.listen_addr(),
        config.nodes.len(),
        config.check_interval,
        config.udp_version
    );

    let proxy = Proxy::bind(config).await?;
    info!("proxy listening on {}", proxy.local_addr());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut task = tokio::spawn(proxy.run(shutdown_rx));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("cannot listen for ctrl-c")?;
            info!("received ctrl-c, initiating graceful shutdown");
        }
        res = &mut task => {
            res??;
            return Ok(());
        }
    }

    let _ = shutdown_tx.send(());
    task.await??;
    info!("shutdown complete");
    Ok(())
}
