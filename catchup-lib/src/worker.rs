use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::chain::ChainClient;
use crate::epoch::EpochData;

const FETCH_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// One catch-up worker: owns a chain client and the producer side of a
/// bounded channel of fetched epochs.
///
/// The channel bound is the backpressure mechanism: a full channel blocks the
/// worker on send, throttling fetches to persister speed.
pub struct Worker {
    name: String,
    client: Arc<dyn ChainClient>,
    data_tx: flume::Sender<EpochData>,
    data_rx: flume::Receiver<EpochData>,
}

impl Worker {
    pub fn new(name: impl Into<String>, client: Arc<dyn ChainClient>, chan_size: usize) -> Self {
        let (data_tx, data_rx) = flume::bounded(chan_size);
        Self {
            name: name.into(),
            client,
            data_tx,
            data_rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consumer side of the outbound channel; read by the collector only.
    pub fn data(&self) -> &flume::Receiver<EpochData> {
        &self.data_rx
    }

    /// Fetches `start, start + stride, …` up to and including `end`, emitting
    /// each epoch in issue order. Returns when the subsequence is exhausted,
    /// the token trips, or the collector goes away.
    pub async fn sync(&self, cancel: &CancellationToken, start: u64, end: u64, stride: u64) {
        debug!(
            worker = %self.name,
            start, end, stride,
            "Catch-up worker started"
        );

        let mut epoch_number = start;
        while epoch_number <= end {
            let Some(epoch) = self.fetch(cancel, epoch_number).await else {
                return;
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                sent = self.data_tx.send_async(epoch) => {
                    if sent.is_err() {
                        debug!(worker = %self.name, "Collector dropped the channel, stopping worker");
                        return;
                    }
                }
            }

            epoch_number = match epoch_number.checked_add(stride) {
                Some(next) => next,
                None => break,
            };
        }

        trace!(worker = %self.name, "Catch-up worker exhausted its epoch subsequence");
    }

    /// Retries until the epoch is fetched or the token trips; never yields a
    /// partial epoch.
    async fn fetch(&self, cancel: &CancellationToken, epoch_number: u64) -> Option<EpochData> {
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                result = self.client.get_epoch_by_number(epoch_number) => result,
            };

            match result {
                Ok(epoch) => return Some(epoch),
                Err(err) => {
                    warn!(
                        worker = %self.name,
                        epoch_number,
                        error = %err,
                        "Catch-up worker failed to fetch epoch"
                    );
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(FETCH_RETRY_INTERVAL) => {}
            }
        }
    }

    /// Releases the underlying chain client. Called once when the syncer
    /// closes.
    pub async fn close(&self) {
        self.client.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticChain {
        fail_fetches: AtomicUsize,
    }

    impl StaticChain {
        fn new(fail_fetches: usize) -> Arc<Self> {
            Arc::new(Self {
                fail_fetches: AtomicUsize::new(fail_fetches),
            })
        }
    }

    #[async_trait]
    impl ChainClient for StaticChain {
        async fn get_status(&self) -> anyhow::Result<ChainStatus> {
            unimplemented!("workers never query status")
        }

        async fn get_epoch_by_number(&self, epoch_number: u64) -> anyhow::Result<EpochData> {
            let remaining = self.fail_fetches.load(Ordering::Relaxed);
            if remaining > 0 {
                self.fail_fetches.store(remaining - 1, Ordering::Relaxed);
                anyhow::bail!("transient fetch failure");
            }
            Ok(EpochData {
                number: epoch_number,
                blocks: Vec::new(),
                receipts: Vec::new(),
            })
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn emits_exactly_the_strided_subsequence() {
        let worker = Worker::new("worker#0", StaticChain::new(0), 16);
        let cancel = CancellationToken::new();

        worker.sync(&cancel, 1, 10, 3).await;

        let numbers: Vec<u64> = worker.data().drain().map(|epoch| epoch.number).collect();
        assert_eq!(numbers, vec![1, 4, 7, 10]);
    }

    #[tokio::test]
    async fn start_beyond_end_emits_nothing() {
        let worker = Worker::new("worker#1", StaticChain::new(0), 16);
        let cancel = CancellationToken::new();

        worker.sync(&cancel, 11, 10, 2).await;

        assert!(worker.data().drain().next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_failed_fetches_until_they_succeed() {
        let worker = Worker::new("worker#2", StaticChain::new(2), 16);
        let cancel = CancellationToken::new();

        worker.sync(&cancel, 5, 5, 1).await;

        let numbers: Vec<u64> = worker.data().drain().map(|epoch| epoch.number).collect();
        assert_eq!(numbers, vec![5]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_retry_loop() {
        let worker = Arc::new(Worker::new("worker#3", StaticChain::new(usize::MAX), 16));
        let cancel = CancellationToken::new();

        let sync_handle = {
            let worker = Arc::clone(&worker);
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.sync(&cancel, 0, 10, 1).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        sync_handle.await.unwrap();

        assert!(worker.data().drain().next().is_none());
    }
}
