use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::benchmark::Benchmarker;
use crate::chain::{ChainClient, RpcChainClient};
use crate::config::CatchupConfig;
use crate::epoch::EpochData;
use crate::range::EpochRange;
use crate::store::{EpochStore, StoreDisabler};
use crate::worker::Worker;

const RETRY_INTERVAL: Duration = Duration::from_secs(1);
const STATUS_RETRY_ESCALATION: u32 = 50;

/// Accelerates epoch catch-up by fanning fetches out over a pool of workers
/// and reassembling their strided subsequences into one contiguous stream.
///
/// With `W` workers and a range starting at `s`, worker `i` fetches epochs
/// `s+i, s+i+W, s+i+2W, …`. Draining the workers in a fixed cycle therefore
/// yields the epochs in order without any sort step.
pub struct Syncer {
    workers: Vec<Arc<Worker>>,
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn EpochStore>,
    sync_range: EpochRange,
    adaptive: bool,
    min_batch_db_rows: usize,
    max_db_rows: usize,
    bmarker: Option<Benchmarker>,
}

#[bon::bon]
impl Syncer {
    /// The builder exposes the optional knobs: adaptive target tracking, a
    /// fixed range, both batch thresholds, the worker pool, and benchmarking.
    #[builder]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn EpochStore>,
        #[builder(default)] workers: Vec<Worker>,
        epoch_from: Option<u64>,
        epoch_to: Option<u64>,
        #[builder(default = true)] adaptive: bool,
        #[builder(default = 1500)] min_batch_db_rows: usize,
        #[builder(default = 7500)] max_db_rows: usize,
        #[builder(default = false)] benchmark: bool,
    ) -> Self {
        Self {
            workers: workers.into_iter().map(Arc::new).collect(),
            chain,
            store,
            sync_range: EpochRange::new(epoch_from.unwrap_or(0), epoch_to.unwrap_or(0)),
            adaptive,
            min_batch_db_rows,
            max_db_rows,
            bmarker: benchmark.then(Benchmarker::new),
        }
    }
}

impl Syncer {
    /// One RPC worker per configured node URL, in pool order.
    pub fn workers_from_config(config: &CatchupConfig) -> anyhow::Result<Vec<Worker>> {
        let mut workers = Vec::with_capacity(config.node_pool.len());
        for (i, node_url) in config.node_pool.iter().enumerate() {
            let client = Arc::new(RpcChainClient::new(node_url.clone())?);
            workers.push(Worker::new(
                format!("catchup-worker#{i}"),
                client,
                config.worker_chan_size,
            ));
        }
        Ok(workers)
    }

    pub fn range(&self) -> EpochRange {
        self.sync_range
    }

    /// Closes every worker. Call after `sync` has returned.
    pub async fn close(&self) {
        for worker in &self.workers {
            worker.close().await;
        }
    }

    /// Runs catch-up until the range is exhausted (non-adaptive), the target
    /// stops advancing (adaptive), or the token trips.
    pub async fn sync(&mut self, cancel: &CancellationToken) {
        debug!(
            num_workers = self.workers.len(),
            epoch_from = self.sync_range.from,
            epoch_to = self.sync_range.to,
            "Catch-up syncer starting"
        );

        if self.workers.is_empty() {
            debug!("Catch-up syncer skipped: no workers configured");
            return;
        }

        if self.adaptive && !self.update_epoch_to(cancel).await {
            debug!("Catch-up syncer skipped: cancelled while resolving target epoch");
            return;
        }

        let bench_from = self.sync_range.from;
        if let Some(bmarker) = self.bmarker.as_mut() {
            bmarker.mark_start();
        }

        loop {
            let EpochRange { from: start, to: end } = self.sync_range;
            if start > end || cancel.is_cancelled() {
                break;
            }

            self.sync_once(cancel, start, end).await;

            if self.adaptive && !self.update_epoch_to(cancel).await {
                break;
            }
        }

        if let Some(bmarker) = &self.bmarker {
            bmarker.report(bench_from, self.sync_range.from);
        }
    }

    /// One collector round over `[start, end]`: spawn the worker pool on its
    /// strided subsequences, reassemble their outputs, join the pool.
    async fn sync_once(&mut self, cancel: &CancellationToken, start: u64, end: u64) {
        let stride = self.workers.len() as u64;

        let mut handles = Vec::with_capacity(self.workers.len());
        for (i, worker) in self.workers.iter().enumerate() {
            // A start past the numeric ceiling carries no epochs; the
            // collector's counter stops before this slot comes up in the
            // cycle.
            let Some(worker_start) = start.checked_add(i as u64) else {
                continue;
            };
            let worker = Arc::clone(worker);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                worker.sync(&cancel, worker_start, end, stride).await;
            }));
        }

        self.collect(cancel, start, end).await;

        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "Catch-up worker task panicked");
            }
        }
    }

    /// Drains the workers in strict round-robin order, reassembling the
    /// contiguous epoch stream and flushing batches as thresholds are hit.
    async fn collect(&mut self, cancel: &CancellationToken, start: u64, end: u64) {
        let mut state = PersistState::default();

        let mut epoch_number = start;
        'round_robin: while epoch_number <= end {
            for i in 0..self.workers.len() {
                if epoch_number > end {
                    break;
                }
                let worker = Arc::clone(&self.workers[i]);

                let waited_at = Instant::now();
                let epoch = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break 'round_robin,
                    received = worker.data().recv_async() => match received {
                        Ok(epoch) => epoch,
                        Err(_) => {
                            error!(worker = %worker.name(), "Catch-up worker channel closed unexpectedly");
                            break 'round_robin;
                        }
                    },
                };

                if let Some(bmarker) = self.bmarker.as_mut() {
                    bmarker.record_fetch(waited_at.elapsed());
                }

                let epoch_no = epoch.number;
                let (epoch_db_rows, store_db_rows) = state.update(epoch, self.store.disabler());

                debug!(
                    worker = %worker.name(),
                    epoch_no,
                    epoch_db_rows,
                    store_db_rows,
                    insert_db_rows = state.insert_db_rows,
                    total_db_rows = state.total_db_rows,
                    "Catch-up syncer collected epoch data from worker"
                );

                // Batch insert once enough insert rows accumulate; the total
                // also triggers so memory stays bounded when most row classes
                // are disabled.
                if state.total_db_rows >= self.max_db_rows
                    || state.insert_db_rows >= self.min_batch_db_rows
                {
                    self.persist(&mut state).await;
                }

                // The range ends at the numeric ceiling: stopping here keeps
                // the cycle away from workers that were never spawned because
                // their start would overflow.
                epoch_number = match epoch_number.checked_add(1) {
                    Some(next) => next,
                    None => break 'round_robin,
                };
            }
        }

        // Flush whatever is left, including after cancellation: epochs the
        // collector has received must reach the store.
        self.persist(&mut state).await;
    }

    /// Pushes the accumulated batch, retrying until the store accepts it,
    /// then advances the range and resets the state.
    async fn persist(&mut self, state: &mut PersistState) {
        let num_epochs = state.num_epochs();
        if num_epochs == 0 {
            return;
        }

        let started_at = Instant::now();
        loop {
            match self.store.push(&state.epochs).await {
                Ok(()) => break,
                Err(err) => {
                    error!(error = %err, "Catch-up syncer failed to persist epoch data");
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
            }
        }

        self.sync_range.from += num_epochs as u64;
        if let Some(bmarker) = self.bmarker.as_mut() {
            bmarker.record_persist(
                started_at.elapsed(),
                num_epochs,
                state.total_db_rows,
                state.insert_db_rows,
            );
        }
        state.reset();

        debug!(
            epoch_from = self.sync_range.from,
            epoch_to = self.sync_range.to,
            num_epochs,
            "Catch-up syncer persisted epoch data"
        );
    }

    /// Repeatedly queries chain status until the target epoch is refreshed.
    /// Returns false only when the token trips during retry.
    async fn update_epoch_to(&mut self, cancel: &CancellationToken) -> bool {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            attempt += 1;

            match self.chain.get_status().await {
                Ok(status) => {
                    self.sync_range.to = status.stable_epoch();
                    debug!(
                        epoch_from = self.sync_range.from,
                        epoch_to = self.sync_range.to,
                        "Catch-up syncer updated target epoch"
                    );
                    return true;
                }
                Err(err) => {
                    if attempt % STATUS_RETRY_ESCALATION == 0 {
                        error!(attempt, error = %err, "Catch-up syncer failed to update target epoch");
                    } else {
                        debug!(attempt, error = %err, "Catch-up syncer failed to update target epoch");
                    }
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(RETRY_INTERVAL) => {}
            }
        }
    }
}

/// Transient accumulator between flushes, owned by the collector.
#[derive(Default)]
struct PersistState {
    total_db_rows: usize,
    insert_db_rows: usize,
    epochs: Vec<EpochData>,
}

impl PersistState {
    fn reset(&mut self) {
        self.total_db_rows = 0;
        self.insert_db_rows = 0;
        self.epochs = Vec::new();
    }

    fn num_epochs(&self) -> usize {
        self.epochs.len()
    }

    fn update(&mut self, epoch: EpochData, disabler: StoreDisabler) -> (usize, usize) {
        let (total_db_rows, store_db_rows) = count_db_rows(&epoch, disabler);

        self.epochs.push(epoch);
        self.total_db_rows += total_db_rows;
        self.insert_db_rows += store_db_rows;

        (total_db_rows, store_db_rows)
    }
}

/// Counts all rows and to-be-inserted rows in one epoch. Disabled row
/// classes still count toward the total, which caps memory, but not toward
/// the insert tally that drives batch efficiency.
fn count_db_rows(epoch: &EpochData, disabler: StoreDisabler) -> (usize, usize) {
    let num_blocks = epoch.blocks.len();
    let num_receipts = epoch.receipts.len();
    let num_logs = epoch.num_logs();

    let total_db_rows = num_blocks + num_receipts + num_logs;

    let mut store_db_rows = 0;
    if !disabler.blocks_disabled {
        store_db_rows += num_blocks;
    }
    if !disabler.receipts_or_txns_disabled {
        store_db_rows += num_receipts;
    }
    if !disabler.logs_disabled {
        store_db_rows += num_logs;
    }

    (total_db_rows, store_db_rows)
}

#[cfg(test)]
mod tests;
