//! `ledgerpdf serve`: run the networked node — handshake, sync, mining
//! lock, and the mining worker — until interrupted (spec.md §4.E).

use std::sync::Arc;

use clap::Args;
use ledgerpdf_consensus::{MiningWorker, WorkerConfig};
use ledgerpdf_core::Ledger;
use ledgerpdf_network::{Node, NodeConfig};
use tracing::info;

use crate::config::{LedgerArgs, NetworkArgs};

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub ledger: LedgerArgs,

    #[command(flatten)]
    pub network: NetworkArgs,
}

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    args.ledger.validate()?;
    let ledger = Arc::new(Ledger::open(args.ledger.ledger_config()).await?);

    let node = Node::new(
        NodeConfig {
            host: args.network.host.clone(),
            port: args.network.port,
            peers_path: args.network.peers_path.clone(),
        },
        ledger.clone(),
    )
    .await;

    // `Node` implements `MiningCoordinator`, so the worker defers to the
    // network mining lock and sync-pause instead of the single-node
    // `NullCoordinator` used by `register`/tests.
    let worker = MiningWorker::new(ledger.clone(), node.clone(), WorkerConfig::default());
    node.set_miner_control(worker.clone()).await;

    for endpoint in &args.network.seed_peers {
        let node = node.clone();
        let endpoint = endpoint.clone();
        tokio::spawn(async move {
            if let Err(e) = node.connect_to(&endpoint).await {
                tracing::warn!(endpoint, error = %e, "failed to connect to seed peer");
            }
        });
    }

    node.start().await?;
    let worker_handle = tokio::spawn(worker.clone().run());

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");

    // Stop the node first so it releases the mining lock and observes the
    // worker's last `MINING_FINISH` broadcast before the worker itself
    // stops taking new lock requests.
    node.shutdown().await;
    worker.stop();
    let _ = worker_handle.await;

    Ok(())
}
