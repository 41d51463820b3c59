use std::process::ExitCode;
use std::sync::Arc;

use catchup_lib::chain::{ChainClient, RpcChainClient};
use catchup_lib::store::{EpochStore, FjallEpochStore, StoreDisabler};
use catchup_lib::syncer::Syncer;
use catchup_lib::worker::Worker;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> ExitCode {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    info!("Starting epoch catch-up demo");

    match run_catchup().await {
        Ok(_) => {
            info!("Catch-up completed successfully!");
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!("Catch-up failed: {}", error);
            ExitCode::FAILURE
        }
    }
}

async fn run_catchup() -> anyhow::Result<()> {
    let node_url =
        std::env::var("CATCHUP_NODE_URL").unwrap_or_else(|_| "http://localhost:12537".to_string());

    let chain: Arc<dyn ChainClient> = Arc::new(RpcChainClient::new(node_url.clone())?);
    let store = Arc::new(FjallEpochStore::open(
        "./catchup-demo-db",
        StoreDisabler::default(),
    )?);

    // Two workers against the same node; a real deployment spreads the pool
    // over several nodes.
    let workers = vec![
        Worker::new("catchup-worker#0", Arc::new(RpcChainClient::new(node_url.clone())?), 64),
        Worker::new("catchup-worker#1", Arc::new(RpcChainClient::new(node_url)?), 64),
    ];

    let epoch_from = store.latest_epoch()?.map(|latest| latest + 1).unwrap_or(0);
    info!(epoch_from, "Resuming catch-up from the persisted prefix");

    let mut syncer = Syncer::builder()
        .chain(chain)
        .store(store.clone() as Arc<dyn EpochStore>)
        .workers(workers)
        .epoch_from(epoch_from)
        .benchmark(true)
        .build();

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Shutdown signal received");
            ctrl_c_cancel.cancel();
        }
    });

    syncer.sync(&cancel).await;
    syncer.close().await;
    store.close();

    info!(epoch_from = syncer.range().from, "Catch-up stopped");

    Ok(())
}
