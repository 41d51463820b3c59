use std::path::Path;

use anyhow::{Context, Result, bail};
use fjall::{PartitionCreateOptions, ReadTransaction, TxKeyspace, TxPartition, WriteTransaction};
use tracing::debug;

use super::{EpochStore, StoreDisabler};
use crate::epoch::{Block, EpochData, Log, Receipt};

fn block_key(epoch_number: u64, index: u16) -> [u8; 10] {
    let mut key = [0u8; 10];
    key[..8].copy_from_slice(&epoch_number.to_be_bytes());
    key[8..].copy_from_slice(&index.to_be_bytes());
    key
}

fn receipt_key(epoch_number: u64, index: u16) -> [u8; 10] {
    block_key(epoch_number, index)
}

fn log_key(epoch_number: u64, receipt_index: u16, log_index: u16) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&epoch_number.to_be_bytes());
    key[8..10].copy_from_slice(&receipt_index.to_be_bytes());
    key[10..].copy_from_slice(&log_index.to_be_bytes());
    key
}

/// Block rows.
/// Key: epoch number (8 bytes BE) + block index (2 bytes BE)
/// Value: JSON-encoded block
#[derive(Clone)]
pub struct BlocksPartition(TxPartition);

impl BlocksPartition {
    pub fn new(keyspace: &TxKeyspace) -> Result<Self> {
        Ok(Self(keyspace.open_partition(
            "blocks",
            PartitionCreateOptions::default(),
        )?))
    }

    pub fn insert(
        &self,
        wtx: &mut WriteTransaction,
        epoch_number: u64,
        index: u16,
        block: &Block,
    ) -> Result<()> {
        wtx.insert(
            &self.0,
            block_key(epoch_number, index),
            serde_json::to_vec(block)?,
        );
        Ok(())
    }

    pub fn get(
        &self,
        rtx: &ReadTransaction,
        epoch_number: u64,
        index: u16,
    ) -> Result<Option<Block>> {
        let Some(bytes) = rtx.get(&self.0, block_key(epoch_number, index))? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

/// Receipt rows, in epoch order then transaction order.
/// Key: epoch number (8 bytes BE) + receipt index (2 bytes BE)
/// Value: JSON-encoded receipt
#[derive(Clone)]
pub struct ReceiptsPartition(TxPartition);

impl ReceiptsPartition {
    pub fn new(keyspace: &TxKeyspace) -> Result<Self> {
        Ok(Self(keyspace.open_partition(
            "receipts",
            PartitionCreateOptions::default(),
        )?))
    }

    pub fn insert(
        &self,
        wtx: &mut WriteTransaction,
        epoch_number: u64,
        index: u16,
        receipt: &Receipt,
    ) -> Result<()> {
        wtx.insert(
            &self.0,
            receipt_key(epoch_number, index),
            serde_json::to_vec(receipt)?,
        );
        Ok(())
    }

    pub fn get(
        &self,
        rtx: &ReadTransaction,
        epoch_number: u64,
        index: u16,
    ) -> Result<Option<Receipt>> {
        let Some(bytes) = rtx.get(&self.0, receipt_key(epoch_number, index))? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

/// Individual log rows, addressable by their position in the epoch.
/// Key: epoch number (8 bytes BE) + receipt index (2 bytes BE) + log index (2 bytes BE)
/// Value: JSON-encoded log
#[derive(Clone)]
pub struct LogsPartition(TxPartition);

impl LogsPartition {
    pub fn new(keyspace: &TxKeyspace) -> Result<Self> {
        Ok(Self(keyspace.open_partition(
            "logs",
            PartitionCreateOptions::default(),
        )?))
    }

    pub fn insert(
        &self,
        wtx: &mut WriteTransaction,
        epoch_number: u64,
        receipt_index: u16,
        log_index: u16,
        log: &Log,
    ) -> Result<()> {
        wtx.insert(
            &self.0,
            log_key(epoch_number, receipt_index, log_index),
            serde_json::to_vec(log)?,
        );
        Ok(())
    }

    pub fn get(
        &self,
        rtx: &ReadTransaction,
        epoch_number: u64,
        receipt_index: u16,
        log_index: u16,
    ) -> Result<Option<Log>> {
        let Some(bytes) = rtx.get(&self.0, log_key(epoch_number, receipt_index, log_index))? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

#[repr(u8)]
enum SyncMetaKey {
    LatestEpoch = 0,
}

/// Sync bookkeeping.
/// Key: enum of metadata types
/// Value: epoch number as big-endian bytes
#[derive(Clone)]
pub struct SyncMetaPartition(TxPartition);

impl SyncMetaPartition {
    pub fn new(keyspace: &TxKeyspace) -> Result<Self> {
        Ok(Self(keyspace.open_partition(
            "sync_meta",
            PartitionCreateOptions::default(),
        )?))
    }

    pub fn set_latest_epoch(&self, wtx: &mut WriteTransaction, epoch_number: u64) {
        wtx.insert(
            &self.0,
            [SyncMetaKey::LatestEpoch as u8],
            epoch_number.to_be_bytes(),
        );
    }

    pub fn get_latest_epoch(&self, rtx: &ReadTransaction) -> Result<Option<u64>> {
        let Some(bytes) = rtx.get(&self.0, [SyncMetaKey::LatestEpoch as u8])? else {
            return Ok(None);
        };
        if bytes.len() != 8 {
            return Ok(None);
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes);
        Ok(Some(u64::from_be_bytes(buf)))
    }
}

/// Stackable epoch store over a transactional fjall keyspace.
///
/// Each `push` batch is one write transaction, so a batch lands entirely or
/// not at all. Keys order rows by epoch, which keeps appends sequential and
/// range scans cheap.
#[derive(Clone)]
pub struct FjallEpochStore {
    keyspace: TxKeyspace,
    blocks: BlocksPartition,
    receipts: ReceiptsPartition,
    logs: LogsPartition,
    sync_meta: SyncMetaPartition,
    disabler: StoreDisabler,
}

impl FjallEpochStore {
    pub fn open(path: impl AsRef<Path>, disabler: StoreDisabler) -> Result<Self> {
        let keyspace = fjall::Config::new(path).open_transactional()?;

        Ok(Self {
            blocks: BlocksPartition::new(&keyspace)?,
            receipts: ReceiptsPartition::new(&keyspace)?,
            logs: LogsPartition::new(&keyspace)?,
            sync_meta: SyncMetaPartition::new(&keyspace)?,
            keyspace,
            disabler,
        })
    }

    /// Highest epoch number persisted so far, if any.
    pub fn latest_epoch(&self) -> Result<Option<u64>> {
        self.sync_meta.get_latest_epoch(&self.keyspace.read_tx())
    }

    pub fn read_tx(&self) -> ReadTransaction {
        self.keyspace.read_tx()
    }

    pub fn blocks(&self) -> &BlocksPartition {
        &self.blocks
    }

    pub fn receipts(&self) -> &ReceiptsPartition {
        &self.receipts
    }

    pub fn logs(&self) -> &LogsPartition {
        &self.logs
    }

    fn push_sync(&self, epochs: &[EpochData]) -> Result<()> {
        let Some(first) = epochs.first() else {
            return Ok(());
        };

        // Stack discipline: a batch extends the persisted prefix by exactly
        // one contiguous run.
        if let Some(latest) = self.latest_epoch()? {
            if first.number != latest + 1 {
                bail!(
                    "batch starts at epoch {} but the store is at epoch {latest}",
                    first.number
                );
            }
        }
        let mut expected = first.number;
        for epoch in epochs {
            if epoch.number != expected {
                bail!("batch is not contiguous at epoch {}", epoch.number);
            }
            expected = expected.saturating_add(1);
        }

        let disabler = self.disabler;
        let mut wtx = self.keyspace.write_tx();

        for epoch in epochs {
            if !disabler.blocks_disabled {
                for (index, block) in epoch.blocks.iter().enumerate() {
                    self.blocks.insert(&mut wtx, epoch.number, index as u16, block)?;
                }
            }
            if !disabler.receipts_or_txns_disabled {
                for (index, receipt) in epoch.receipts.iter().enumerate() {
                    self.receipts
                        .insert(&mut wtx, epoch.number, index as u16, receipt)?;
                }
            }
            if !disabler.logs_disabled {
                for (receipt_index, receipt) in epoch.receipts.iter().enumerate() {
                    for (log_index, log) in receipt.logs.iter().enumerate() {
                        self.logs.insert(
                            &mut wtx,
                            epoch.number,
                            receipt_index as u16,
                            log_index as u16,
                            log,
                        )?;
                    }
                }
            }
            self.sync_meta.set_latest_epoch(&mut wtx, epoch.number);
        }

        wtx.commit().context("failed to commit epoch batch")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl EpochStore for FjallEpochStore {
    async fn push(&self, epochs: &[EpochData]) -> Result<()> {
        if epochs.is_empty() {
            return Ok(());
        }

        let store = self.clone();
        let epochs = epochs.to_vec();
        tokio::task::spawn_blocking(move || store.push_sync(&epochs)).await?
    }

    fn disabler(&self) -> StoreDisabler {
        self.disabler
    }

    fn close(&self) {
        debug!("Epoch store closed");
    }
}
