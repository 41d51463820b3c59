use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::epoch::{Block, EpochData, Receipt};

/// Network status reported by a chain node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStatus {
    #[serde(with = "crate::hex")]
    pub latest_checkpoint: u64,
    #[serde(with = "crate::hex")]
    pub latest_finalized: u64,
}

impl ChainStatus {
    /// The catch-up target: the maximum of the two durability marks.
    pub fn stable_epoch(&self) -> u64 {
        self.latest_finalized.max(self.latest_checkpoint)
    }
}

/// Capability set the catch-up core needs from a chain node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_status(&self) -> anyhow::Result<ChainStatus>;

    async fn get_epoch_by_number(&self, epoch_number: u64) -> anyhow::Result<EpochData>;

    async fn close(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("response carries neither result nor error")]
    MissingResult,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// JSON-RPC 2.0 client for one upstream chain node.
///
/// No per-request timeout: a stalled call surfaces as a transport error once
/// the connection drops, and the caller retries. Cancellation is the only
/// way to abandon a fetch early.
pub struct RpcChainClient {
    endpoint: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcChainClient {
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            endpoint: endpoint.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, RpcError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response: RpcResponse<T> = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        response.result.ok_or(RpcError::MissingResult)
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn get_status(&self) -> anyhow::Result<ChainStatus> {
        Ok(self.call("cfx_getStatus", json!([])).await?)
    }

    async fn get_epoch_by_number(&self, epoch_number: u64) -> anyhow::Result<EpochData> {
        let epoch_tag = format!("{epoch_number:#x}");

        let hashes: Vec<String> = self
            .call("cfx_getBlocksByEpoch", json!([epoch_tag]))
            .await?;

        let mut blocks = Vec::with_capacity(hashes.len());
        for hash in &hashes {
            let block: Block = self.call("cfx_getBlockByHash", json!([hash, true])).await?;
            blocks.push(block);
        }

        // Receipts come grouped per block; flatten in block order.
        let grouped: Vec<Vec<Receipt>> = self
            .call("cfx_getEpochReceipts", json!([epoch_tag]))
            .await?;
        let receipts = grouped.into_iter().flatten().collect();

        Ok(EpochData {
            number: epoch_number,
            blocks,
            receipts,
        })
    }

    async fn close(&self) {}
}
