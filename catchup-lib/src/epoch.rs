use serde::{Deserialize, Serialize};

/// One epoch of chain data: the unit of transfer between worker and
/// collector and the unit of append for the store.
///
/// Carries three row classes: blocks, receipts, and the logs nested in each
/// receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochData {
    pub number: u64,
    pub blocks: Vec<Block>,
    pub receipts: Vec<Receipt>,
}

impl EpochData {
    /// Logs across all receipts.
    pub fn num_logs(&self) -> usize {
        self.receipts.iter().map(|receipt| receipt.logs.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub hash: String,
    #[serde(with = "crate::hex")]
    pub epoch_number: u64,
    #[serde(with = "crate::hex")]
    pub timestamp: u64,
    #[serde(default)]
    pub transactions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: String,
    #[serde(with = "crate::hex")]
    pub outcome_status: u64,
    #[serde(default)]
    pub logs: Vec<Log>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    pub data: String,
}
