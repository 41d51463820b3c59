use std::sync::Arc;

use anyhow::Context;
use catchup_lib::chain::{ChainClient, RpcChainClient};
use catchup_lib::config::get_catchup_config;
use catchup_lib::store::{EpochStore, FjallEpochStore};
use catchup_lib::syncer::Syncer;
use clap::{Command, arg, command};
use dotenv::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{CliConfig, get_cli_config};

mod config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ignore failures as .env might not be present at runtime, and this use-case is tolerated
    dotenv()
        .inspect_err(|err| println!("[WARN] reading .env files failed with err {err}"))
        .ok();

    let cli_config = get_cli_config()?;

    // logs
    let (non_blocking_appender, _guard_stdout) = tracing_appender::non_blocking(std::io::stdout());
    let stdout_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_appender)
        .with_filter(cli_config.rust_log);
    tracing_subscriber::registry()
        .with(stdout_subscriber)
        .init();

    let matches = command!() // requires `cargo` feature
        .propagate_version(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("sync")
                .alias("s")
                .about("catch the store up to the latest stable epoch")
                .arg(
                    arg!(--from <EPOCH> "first epoch to sync; defaults to resuming after the persisted prefix")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(--to <EPOCH> "last epoch to sync; fixes the target instead of tracking the chain")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(arg!(--benchmark "report fetch and persistence throughput on completion")),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("sync", sub_matches)) => {
            let epoch_from = sub_matches.get_one::<u64>("from").copied();
            let epoch_to = sub_matches.get_one::<u64>("to").copied();
            let benchmark = sub_matches.get_flag("benchmark");

            run_sync(&cli_config, epoch_from, epoch_to, benchmark).await?;
        }
        _ => unreachable!("a subcommand is required"),
    }

    Ok(())
}

async fn run_sync(
    cli_config: &CliConfig,
    epoch_from: Option<u64>,
    epoch_to: Option<u64>,
    benchmark: bool,
) -> anyhow::Result<()> {
    let catchup_config = get_catchup_config()?;

    let store = Arc::new(FjallEpochStore::open(
        &cli_config.catchup_db_root,
        cli_config.disabler(),
    )?);

    // Resume after the persisted prefix unless a start was given.
    let epoch_from = match epoch_from {
        Some(from) => Some(from),
        None => store.latest_epoch()?.map(|latest| latest + 1),
    };

    let status_url = catchup_config
        .node_pool
        .first()
        .context("no chain nodes configured (CATCHUP_NODE_POOL)")?;
    let chain: Arc<dyn ChainClient> = Arc::new(RpcChainClient::new(status_url.clone())?);

    let mut syncer = Syncer::builder()
        .chain(chain)
        .store(Arc::clone(&store) as Arc<dyn EpochStore>)
        .workers(Syncer::workers_from_config(&catchup_config)?)
        .maybe_epoch_from(epoch_from)
        .maybe_epoch_to(epoch_to)
        .adaptive(epoch_to.is_none())
        .min_batch_db_rows(catchup_config.db_rows_threshold)
        .max_db_rows(catchup_config.max_db_rows)
        .benchmark(benchmark)
        .build();

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, stopping catch-up");
            ctrl_c_cancel.cancel();
        }
    });

    info!(
        epoch_from = ?epoch_from,
        epoch_to = ?epoch_to,
        num_workers = catchup_config.node_pool.len(),
        "Starting catch-up sync"
    );
    syncer.sync(&cancel).await;

    syncer.close().await;
    store.close();
    info!(epoch_from = syncer.range().from, "Catch-up sync stopped");

    Ok(())
}
