use async_trait::async_trait;
use serde::Deserialize;

use crate::epoch::EpochData;

pub mod persistent;

pub use persistent::FjallEpochStore;

/// Row classes the store is configured to skip.
///
/// Re-read before every row count so live configuration is reflected
/// mid-run. A disabled class still counts toward the memory-capping total,
/// just not toward the insert tally.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StoreDisabler {
    #[serde(default)]
    pub blocks_disabled: bool,
    #[serde(default)]
    pub receipts_or_txns_disabled: bool,
    #[serde(default)]
    pub logs_disabled: bool,
}

/// Capability set the catch-up core needs from the persistent store.
#[async_trait]
pub trait EpochStore: Send + Sync {
    /// Atomically appends an ordered batch of epochs.
    async fn push(&self, epochs: &[EpochData]) -> anyhow::Result<()>;

    /// Current disabler flags.
    fn disabler(&self) -> StoreDisabler;

    fn close(&self);
}
