use super::*;
use crate::chain::ChainStatus;
use crate::epoch::{Block, Log, Receipt};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

fn test_epoch(number: u64, num_blocks: usize, num_receipts: usize, logs_per_receipt: usize) -> EpochData {
    EpochData {
        number,
        blocks: (0..num_blocks)
            .map(|i| Block {
                hash: format!("0xb{number:08x}{i:02x}"),
                epoch_number: number,
                timestamp: 1_700_000_000 + number,
                transactions: Vec::new(),
            })
            .collect(),
        receipts: (0..num_receipts)
            .map(|i| Receipt {
                transaction_hash: format!("0xt{number:08x}{i:02x}"),
                outcome_status: 0,
                logs: (0..logs_per_receipt)
                    .map(|j| Log {
                        address: "0xa0".into(),
                        topics: vec![format!("0x{j:x}")],
                        data: "0x".into(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Serves deterministic epochs shaped by the constructor arguments. Statuses
/// are handed out front to back, repeating the last one.
struct MockChain {
    num_blocks: usize,
    num_receipts: usize,
    logs_per_receipt: usize,
    statuses: Mutex<VecDeque<u64>>,
    status_calls: AtomicUsize,
    fail_fetches: AtomicUsize,
    max_available: Option<u64>,
}

impl MockChain {
    fn new(num_blocks: usize, num_receipts: usize, logs_per_receipt: usize) -> Self {
        Self {
            num_blocks,
            num_receipts,
            logs_per_receipt,
            statuses: Mutex::new(VecDeque::new()),
            status_calls: AtomicUsize::new(0),
            fail_fetches: AtomicUsize::new(0),
            max_available: None,
        }
    }

    fn with_statuses(self, stable_epochs: impl IntoIterator<Item = u64>) -> Self {
        *self.statuses.lock().unwrap() = stable_epochs.into_iter().collect();
        self
    }

    fn with_fail_fetches(self, count: usize) -> Self {
        self.fail_fetches.store(count, Ordering::Relaxed);
        self
    }

    /// Epochs above `max` never resolve, pinning workers at a suspension
    /// point until cancellation.
    fn with_max_available(mut self, max: u64) -> Self {
        self.max_available = Some(max);
        self
    }

    fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn get_status(&self) -> anyhow::Result<ChainStatus> {
        self.status_calls.fetch_add(1, Ordering::Relaxed);
        let mut statuses = self.statuses.lock().unwrap();
        let stable = if statuses.len() > 1 {
            statuses.pop_front().unwrap()
        } else {
            *statuses.front().expect("no status configured")
        };
        Ok(ChainStatus {
            latest_checkpoint: stable.saturating_sub(1),
            latest_finalized: stable,
        })
    }

    async fn get_epoch_by_number(&self, epoch_number: u64) -> anyhow::Result<EpochData> {
        if let Some(max) = self.max_available {
            if epoch_number > max {
                std::future::pending::<()>().await;
            }
        }

        let remaining = self.fail_fetches.load(Ordering::Relaxed);
        if remaining > 0 {
            self.fail_fetches.store(remaining - 1, Ordering::Relaxed);
            anyhow::bail!("transient fetch failure");
        }

        Ok(test_epoch(
            epoch_number,
            self.num_blocks,
            self.num_receipts,
            self.logs_per_receipt,
        ))
    }

    async fn close(&self) {}
}

/// Records every push as the list of epoch numbers it carried.
struct MockStore {
    pushes: Mutex<Vec<Vec<u64>>>,
    fail_pushes: AtomicUsize,
    disabler: StoreDisabler,
}

impl MockStore {
    fn new() -> Self {
        Self {
            pushes: Mutex::new(Vec::new()),
            fail_pushes: AtomicUsize::new(0),
            disabler: StoreDisabler::default(),
        }
    }

    fn with_disabler(mut self, disabler: StoreDisabler) -> Self {
        self.disabler = disabler;
        self
    }

    fn with_fail_pushes(self, count: usize) -> Self {
        self.fail_pushes.store(count, Ordering::Relaxed);
        self
    }

    fn pushes(&self) -> Vec<Vec<u64>> {
        self.pushes.lock().unwrap().clone()
    }

    fn pushed_epochs(&self) -> Vec<u64> {
        self.pushes().into_iter().flatten().collect()
    }
}

#[async_trait]
impl EpochStore for MockStore {
    async fn push(&self, epochs: &[EpochData]) -> anyhow::Result<()> {
        let remaining = self.fail_pushes.load(Ordering::Relaxed);
        if remaining > 0 {
            self.fail_pushes.store(remaining - 1, Ordering::Relaxed);
            anyhow::bail!("store unavailable");
        }
        self.pushes
            .lock()
            .unwrap()
            .push(epochs.iter().map(|epoch| epoch.number).collect());
        Ok(())
    }

    fn disabler(&self) -> StoreDisabler {
        self.disabler
    }

    fn close(&self) {}
}

fn make_workers(chain: &Arc<MockChain>, count: usize, chan_size: usize) -> Vec<Worker> {
    (0..count)
        .map(|i| {
            Worker::new(
                format!("catchup-worker#{i}"),
                Arc::clone(chain) as Arc<dyn ChainClient>,
                chan_size,
            )
        })
        .collect()
}

#[tokio::test]
async fn happy_path_delivers_one_batch_in_order() {
    let chain = Arc::new(MockChain::new(3, 5, 2));
    let store = Arc::new(MockStore::new());

    let mut syncer = Syncer::builder()
        .chain(Arc::clone(&chain) as Arc<dyn ChainClient>)
        .store(Arc::clone(&store) as Arc<dyn EpochStore>)
        .workers(make_workers(&chain, 2, 16))
        .epoch_from(100)
        .epoch_to(105)
        .adaptive(false)
        .benchmark(true)
        .build();

    syncer.sync(&CancellationToken::new()).await;

    assert_eq!(store.pushes(), vec![(100..=105).collect::<Vec<_>>()]);
    assert_eq!(syncer.range().from, 106);
    assert_eq!(chain.status_calls(), 0);
}

#[tokio::test]
async fn flush_floor_batches_on_insert_rows() {
    // 3 insert rows per epoch against a floor of 10: the fourth epoch tips
    // each batch over.
    let chain = Arc::new(MockChain::new(1, 1, 1));
    let store = Arc::new(MockStore::new());

    let mut syncer = Syncer::builder()
        .chain(Arc::clone(&chain) as Arc<dyn ChainClient>)
        .store(Arc::clone(&store) as Arc<dyn EpochStore>)
        .workers(make_workers(&chain, 1, 16))
        .epoch_from(0)
        .epoch_to(9)
        .adaptive(false)
        .min_batch_db_rows(10)
        .max_db_rows(10_000)
        .build();

    syncer.sync(&CancellationToken::new()).await;

    assert_eq!(
        store.pushes(),
        vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]
    );
    assert_eq!(syncer.range().from, 10);
}

#[tokio::test]
async fn memory_ceiling_batches_on_total_rows() {
    // All row classes disabled: insert rows stay at zero and only the total
    // ceiling can trigger a flush.
    let chain = Arc::new(MockChain::new(1, 1, 1));
    let store = Arc::new(MockStore::new().with_disabler(StoreDisabler {
        blocks_disabled: true,
        receipts_or_txns_disabled: true,
        logs_disabled: true,
    }));

    let mut syncer = Syncer::builder()
        .chain(Arc::clone(&chain) as Arc<dyn ChainClient>)
        .store(Arc::clone(&store) as Arc<dyn EpochStore>)
        .workers(make_workers(&chain, 1, 16))
        .epoch_from(0)
        .epoch_to(9)
        .adaptive(false)
        .min_batch_db_rows(10_000)
        .max_db_rows(5)
        .build();

    syncer.sync(&CancellationToken::new()).await;

    assert_eq!(
        store.pushes(),
        vec![vec![0, 1], vec![2, 3], vec![4, 5], vec![6, 7], vec![8, 9]]
    );
}

#[tokio::test(start_paused = true)]
async fn transient_persist_failure_retries_the_same_batch() {
    let chain = Arc::new(MockChain::new(1, 1, 1));
    let store = Arc::new(MockStore::new().with_fail_pushes(2));

    let mut syncer = Syncer::builder()
        .chain(Arc::clone(&chain) as Arc<dyn ChainClient>)
        .store(Arc::clone(&store) as Arc<dyn EpochStore>)
        .workers(make_workers(&chain, 1, 16))
        .epoch_from(0)
        .epoch_to(2)
        .adaptive(false)
        .build();

    syncer.sync(&CancellationToken::new()).await;

    // Exactly one logical flush lands, with the full contents, and the range
    // advances once.
    assert_eq!(store.pushes(), vec![vec![0, 1, 2]]);
    assert_eq!(syncer.range().from, 3);
}

#[tokio::test(start_paused = true)]
async fn cancellation_flushes_exactly_what_was_received() {
    // Epochs beyond 14 never resolve, so the collector has received 0..=14
    // by the time every task is parked and the cancel fires.
    let chain = Arc::new(MockChain::new(1, 1, 1).with_max_available(14));
    let store = Arc::new(MockStore::new());
    let cancel = CancellationToken::new();

    let mut syncer = Syncer::builder()
        .chain(Arc::clone(&chain) as Arc<dyn ChainClient>)
        .store(Arc::clone(&store) as Arc<dyn EpochStore>)
        .workers(make_workers(&chain, 3, 32))
        .epoch_from(0)
        .epoch_to(99)
        .adaptive(false)
        .build();

    let sync_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            syncer.sync(&cancel).await;
            syncer
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    let syncer = sync_handle.await.unwrap();

    assert_eq!(store.pushes(), vec![(0..=14).collect::<Vec<_>>()]);
    assert_eq!(syncer.range().from, 15);
}

#[tokio::test]
async fn adaptive_mode_extends_the_target_until_it_stabilizes() {
    let chain = Arc::new(MockChain::new(1, 0, 0).with_statuses([100, 150, 150]));
    let store = Arc::new(MockStore::new());

    let mut syncer = Syncer::builder()
        .chain(Arc::clone(&chain) as Arc<dyn ChainClient>)
        .store(Arc::clone(&store) as Arc<dyn EpochStore>)
        .workers(make_workers(&chain, 2, 16))
        .epoch_from(95)
        .build();

    syncer.sync(&CancellationToken::new()).await;

    assert_eq!(
        store.pushes(),
        vec![(95..=100).collect::<Vec<_>>(), (101..=150).collect::<Vec<_>>()]
    );
    assert_eq!(syncer.range().from, 151);
    assert_eq!(syncer.range().to, 150);
    assert_eq!(chain.status_calls(), 3);
}

#[tokio::test]
async fn every_push_except_the_last_meets_a_threshold() {
    // 11 insert rows per epoch against a floor of 40: four epochs per batch,
    // with a two-epoch remainder flushed at the end of the round.
    let chain = Arc::new(MockChain::new(2, 3, 2));
    let store = Arc::new(MockStore::new());
    let min_batch_db_rows = 40;

    let mut syncer = Syncer::builder()
        .chain(Arc::clone(&chain) as Arc<dyn ChainClient>)
        .store(Arc::clone(&store) as Arc<dyn EpochStore>)
        .workers(make_workers(&chain, 1, 16))
        .epoch_from(0)
        .epoch_to(25)
        .adaptive(false)
        .min_batch_db_rows(min_batch_db_rows)
        .build();

    syncer.sync(&CancellationToken::new()).await;

    let pushes = store.pushes();

    // Contiguity and monotonicity across the concatenated batches.
    assert_eq!(store.pushed_epochs(), (0..=25).collect::<Vec<_>>());

    let insert_rows_per_epoch = 2 + 3 + 2 * 3;
    for batch in &pushes[..pushes.len() - 1] {
        assert!(batch.len() * insert_rows_per_epoch >= min_batch_db_rows);
    }
}

#[tokio::test(start_paused = true)]
async fn fetch_failures_do_not_break_ordering() {
    let chain = Arc::new(MockChain::new(1, 1, 1).with_fail_fetches(3));
    let store = Arc::new(MockStore::new());

    let mut syncer = Syncer::builder()
        .chain(Arc::clone(&chain) as Arc<dyn ChainClient>)
        .store(Arc::clone(&store) as Arc<dyn EpochStore>)
        .workers(make_workers(&chain, 2, 16))
        .epoch_from(0)
        .epoch_to(9)
        .adaptive(false)
        .build();

    syncer.sync(&CancellationToken::new()).await;

    assert_eq!(store.pushes(), vec![(0..=9).collect::<Vec<_>>()]);
    assert_eq!(syncer.range().from, 10);
}

#[tokio::test]
async fn empty_worker_pool_returns_without_touching_state() {
    let chain = Arc::new(MockChain::new(1, 1, 1).with_statuses([100]));
    let store = Arc::new(MockStore::new());

    let mut syncer = Syncer::builder()
        .chain(Arc::clone(&chain) as Arc<dyn ChainClient>)
        .store(Arc::clone(&store) as Arc<dyn EpochStore>)
        .epoch_from(5)
        .build();

    syncer.sync(&CancellationToken::new()).await;

    assert!(store.pushes().is_empty());
    assert_eq!(syncer.range().from, 5);
    assert_eq!(chain.status_calls(), 0);
}

#[tokio::test]
async fn empty_range_does_nothing() {
    let chain = Arc::new(MockChain::new(1, 1, 1));
    let store = Arc::new(MockStore::new());

    let mut syncer = Syncer::builder()
        .chain(Arc::clone(&chain) as Arc<dyn ChainClient>)
        .store(Arc::clone(&store) as Arc<dyn EpochStore>)
        .workers(make_workers(&chain, 1, 16))
        .epoch_from(5)
        .epoch_to(4)
        .adaptive(false)
        .build();

    syncer.sync(&CancellationToken::new()).await;

    assert!(store.pushes().is_empty());
    assert_eq!(syncer.range().from, 5);
}

#[test]
fn count_db_rows_tracks_disabler_flags() {
    let epoch = test_epoch(0, 3, 5, 2);
    let all_rows = 3 + 5 + 10;

    let (total, insert) = count_db_rows(&epoch, StoreDisabler::default());
    assert_eq!((total, insert), (all_rows, all_rows));

    let (total, insert) = count_db_rows(
        &epoch,
        StoreDisabler {
            blocks_disabled: true,
            receipts_or_txns_disabled: false,
            logs_disabled: true,
        },
    );
    assert_eq!((total, insert), (all_rows, 5));

    let (total, insert) = count_db_rows(
        &epoch,
        StoreDisabler {
            blocks_disabled: true,
            receipts_or_txns_disabled: true,
            logs_disabled: true,
        },
    );
    assert_eq!((total, insert), (all_rows, 0));
}

#[test]
fn persist_state_accumulates_and_resets() {
    let mut state = PersistState::default();

    let (total, insert) = state.update(test_epoch(3, 1, 2, 1), StoreDisabler::default());
    assert_eq!((total, insert), (5, 5));

    state.update(
        test_epoch(4, 1, 2, 1),
        StoreDisabler {
            blocks_disabled: true,
            receipts_or_txns_disabled: false,
            logs_disabled: false,
        },
    );

    assert_eq!(state.num_epochs(), 2);
    assert_eq!(state.total_db_rows, 10);
    assert_eq!(state.insert_db_rows, 9);

    state.reset();
    assert_eq!(state.num_epochs(), 0);
    assert_eq!(state.total_db_rows, 0);
    assert_eq!(state.insert_db_rows, 0);
}
