//! EVM Client Module
//!
//! Client for EVM-compatible development nodes via their JSON-RPC API. Besides
//! the standard `eth_*` methods it exposes the dev-chain controls used to drive
//! forked networks in tests: time travel, mining, snapshots and account
//! impersonation.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::abi;

// ============================================================================
// API RESPONSE STRUCTURES
// ============================================================================

/// EVM JSON-RPC request wrapper
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Vec<serde_json::Value>,
    id: u64,
}

/// EVM JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    #[allow(dead_code)]
    jsonrpc: String,
    result: Option<T>,
    error: Option<JsonRpcError>,
    #[allow(dead_code)]
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Error object returned by the node for a failed JSON-RPC call.
///
/// Wrapped inside `anyhow::Error`; callers that need to tell a revert apart
/// from a transport failure use `err.downcast_ref::<JsonRpcFailure>()`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("JSON-RPC error {code} from {method}: {message}")]
pub struct JsonRpcFailure {
    /// Method that failed
    pub method: String,
    /// Node error code
    pub code: i64,
    /// Node error message
    pub message: String,
    /// Optional error payload (revert data on anvil/hardhat)
    pub data: Option<serde_json::Value>,
}

impl JsonRpcFailure {
    /// Returns the raw revert data if the node attached any.
    ///
    /// Anvil puts the hex string directly in `data`; hardhat nests it under
    /// `data.data`.
    pub fn revert_data(&self) -> Option<String> {
        match self.data.as_ref()? {
            serde_json::Value::String(s) if s.starts_with("0x") => Some(s.clone()),
            serde_json::Value::Object(map) => map
                .get("data")
                .and_then(|v| v.as_str())
                .filter(|s| s.starts_with("0x"))
                .map(|s| s.to_string()),
            _ => None,
        }
    }

    /// Best-effort revert reason.
    ///
    /// Tries the ABI payload first, then the `execution reverted: <reason>`
    /// message format, then falls back to the raw message.
    pub fn revert_reason(&self) -> String {
        if let Some(reason) = self.revert_data().as_deref().and_then(abi::decode_revert_reason) {
            return reason;
        }
        for prefix in [
            "execution reverted: ",
            "VM Exception while processing transaction: reverted with reason string ",
        ] {
            if let Some(idx) = self.message.find(prefix) {
                let reason = &self.message[idx + prefix.len()..];
                return reason.trim_matches('\'').to_string();
            }
        }
        self.message.clone()
    }
}

/// EVM event log entry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvmLog {
    /// Address of the contract that emitted the event
    pub address: String,
    /// Array of topics (indexed event parameters)
    pub topics: Vec<String>,
    /// Event data (non-indexed parameters)
    pub data: String,
    /// Block number (JSON-RPC uses camelCase: blockNumber)
    #[serde(rename = "blockNumber", default)]
    pub block_number: Option<String>,
    /// Transaction hash (JSON-RPC uses camelCase: transactionHash)
    #[serde(rename = "transactionHash", default)]
    pub transaction_hash: Option<String>,
    /// Log index (JSON-RPC uses camelCase: logIndex)
    #[serde(rename = "logIndex", default)]
    pub log_index: Option<String>,
}

/// Transaction receipt subset used by the runner.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvmReceipt {
    /// Transaction hash
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    /// Block number (hex string)
    #[serde(rename = "blockNumber", default)]
    pub block_number: Option<String>,
    /// Transaction status ("0x1" = success, "0x0" = failure)
    #[serde(default)]
    pub status: Option<String>,
    /// Logs emitted by the transaction
    #[serde(default)]
    pub logs: Vec<EvmLog>,
}

impl EvmReceipt {
    /// True when the node reports a successful execution.
    pub fn succeeded(&self) -> bool {
        matches!(self.status.as_deref(), Some("0x1") | Some("0x01"))
    }
}

/// Unsigned transaction submitted through `eth_sendTransaction`.
///
/// The node signs on behalf of `from`, which must be unlocked or impersonated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    /// Sender address
    pub from: String,
    /// Target contract or account
    pub to: String,
    /// Hex calldata (`0x` for plain value transfers)
    pub data: String,
    /// Native value in wei
    pub value: u128,
}

impl TxRequest {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "from": self.from,
            "to": self.to,
            "data": self.data,
            "value": format!("0x{:x}", self.value),
        })
    }
}

/// Dev-node flavour, which decides the RPC namespace for impersonation
/// and balance cheats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impersonation {
    /// Foundry anvil (`anvil_*`)
    Anvil,
    /// Hardhat network (`hardhat_*`)
    Hardhat,
}

impl Impersonation {
    fn namespace(&self) -> &'static str {
        match self {
            Impersonation::Anvil => "anvil",
            Impersonation::Hardhat => "hardhat",
        }
    }
}

// ============================================================================
// EVM CLIENT IMPLEMENTATION
// ============================================================================

/// Client for communicating with EVM development nodes via JSON-RPC
#[derive(Debug, Clone)]
pub struct EvmClient {
    /// HTTP client for making requests
    client: Client,
    /// Base URL of the EVM node (e.g., "http://127.0.0.1:8545")
    base_url: String,
    /// How long to wait for a submitted transaction to be mined
    receipt_timeout: Duration,
    /// Delay between receipt polls
    poll_interval: Duration,
}

impl EvmClient {
    /// Creates a new EVM client for the given node URL
    ///
    /// # Arguments
    ///
    /// * `node_url` - Base URL of the EVM node (e.g., "http://127.0.0.1:8545")
    ///
    /// # Returns
    ///
    /// * `Ok(EvmClient)` - Successfully created client
    /// * `Err(anyhow::Error)` - Failed to create client
    pub fn new(node_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .no_proxy()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: node_url.to_string(),
            receipt_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
        })
    }

    /// Overrides how long `wait_for_receipt` polls before giving up.
    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    /// Returns the base URL of this client
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends a JSON-RPC request and returns the (possibly null) result.
    ///
    /// A node-side error is returned as a `JsonRpcFailure` inside the
    /// `anyhow::Error`.
    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<Option<T>> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: 1,
        };

        debug!("JSON-RPC {} -> {}", method, self.base_url);

        let response: JsonRpcResponse<T> = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request to {}", method, self.base_url))?
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response from {}", method, self.base_url))?;

        if let Some(error) = response.error {
            return Err(JsonRpcFailure {
                method: method.to_string(),
                code: error.code,
                message: error.message,
                data: error.data,
            }
            .into());
        }

        Ok(response.result)
    }

    /// Sends a JSON-RPC request whose result must be present.
    pub async fn json_rpc<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T> {
        self.request(method, params)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No result in {} response from {}", method, self.base_url))
    }

    /// Gets the current block number
    pub async fn get_block_number(&self) -> Result<u64> {
        let block_hex: String = self.json_rpc("eth_blockNumber", vec![]).await?;
        parse_hex_u64(&block_hex).context("Failed to parse block number")
    }

    /// Gets the timestamp of the latest block in seconds
    pub async fn get_block_timestamp(&self) -> Result<u64> {
        #[derive(Debug, Deserialize)]
        struct Block {
            timestamp: String,
        }

        let block: Block = self
            .json_rpc(
                "eth_getBlockByNumber",
                vec![serde_json::json!("latest"), serde_json::json!(false)],
            )
            .await?;
        parse_hex_u64(&block.timestamp).context("Failed to parse block timestamp")
    }

    /// Returns the deployed bytecode at `address` (`"0x"` when empty)
    pub async fn get_code(&self, address: &str) -> Result<String> {
        self.json_rpc(
            "eth_getCode",
            vec![serde_json::json!(address), serde_json::json!("latest")],
        )
        .await
    }

    /// Returns the native balance of `address` in wei
    pub async fn get_balance(&self, address: &str) -> Result<u128> {
        let balance_hex: String = self
            .json_rpc(
                "eth_getBalance",
                vec![serde_json::json!(address), serde_json::json!("latest")],
            )
            .await?;
        parse_hex_u128(&balance_hex).context("Failed to parse balance")
    }

    /// Executes a read-only call against the latest block.
    ///
    /// # Arguments
    ///
    /// * `to` - Contract address
    /// * `data` - Hex calldata
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - Hex return data
    /// * `Err(anyhow::Error)` - Call reverted or the node is unreachable
    pub async fn call(&self, to: &str, data: &str) -> Result<String> {
        self.json_rpc(
            "eth_call",
            vec![
                serde_json::json!({ "to": to, "data": data }),
                serde_json::json!("latest"),
            ],
        )
        .await
    }

    /// Replays a transaction as `eth_call` to surface its revert reason.
    pub async fn call_as(&self, tx: &TxRequest) -> Result<String> {
        self.json_rpc("eth_call", vec![tx.to_json(), serde_json::json!("latest")])
            .await
    }

    /// Submits a transaction signed by the node and returns its hash.
    pub async fn send_transaction(&self, tx: &TxRequest) -> Result<String> {
        let hash: String = self
            .json_rpc("eth_sendTransaction", vec![tx.to_json()])
            .await?;
        debug!("Submitted transaction {} from {} to {}", hash, tx.from, tx.to);
        Ok(hash)
    }

    /// Queries a transaction receipt; `None` while the transaction is pending
    pub async fn get_transaction_receipt(&self, hash: &str) -> Result<Option<EvmReceipt>> {
        let hash = if hash.starts_with("0x") {
            hash.to_string()
        } else {
            format!("0x{}", hash)
        };
        self.request("eth_getTransactionReceipt", vec![serde_json::json!(hash)])
            .await
    }

    /// Polls for a receipt until it is available or the receipt timeout elapses.
    pub async fn wait_for_receipt(&self, hash: &str) -> Result<EvmReceipt> {
        let started = Instant::now();
        loop {
            if let Some(receipt) = self.get_transaction_receipt(hash).await? {
                return Ok(receipt);
            }
            if started.elapsed() >= self.receipt_timeout {
                anyhow::bail!(
                    "Transaction {} not mined within {}ms",
                    hash,
                    self.receipt_timeout.as_millis()
                );
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    // ------------------------------------------------------------------------
    // Dev-chain controls
    // ------------------------------------------------------------------------

    /// Moves the chain clock forward; takes effect on the next mined block.
    pub async fn increase_time(&self, seconds: u64) -> Result<()> {
        let _: serde_json::Value = self
            .json_rpc("evm_increaseTime", vec![serde_json::json!(seconds)])
            .await?;
        info!("Advanced chain time by {}s", seconds);
        Ok(())
    }

    /// Mines `blocks` empty blocks.
    pub async fn mine(&self, blocks: u64) -> Result<()> {
        for _ in 0..blocks {
            let _: serde_json::Value = self.json_rpc("evm_mine", vec![]).await?;
        }
        debug!("Mined {} block(s)", blocks);
        Ok(())
    }

    /// Takes a state snapshot and returns its identifier.
    pub async fn snapshot(&self) -> Result<String> {
        let id: serde_json::Value = self.json_rpc("evm_snapshot", vec![]).await?;
        match id {
            serde_json::Value::String(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    }

    /// Restores a snapshot taken with `snapshot`.
    pub async fn revert_to(&self, snapshot_id: &str) -> Result<()> {
        let reverted: bool = self
            .json_rpc("evm_revert", vec![serde_json::json!(snapshot_id)])
            .await?;
        if !reverted {
            anyhow::bail!("Node refused to revert to snapshot {}", snapshot_id);
        }
        Ok(())
    }

    /// Lets `eth_sendTransaction` sign for `address` without its key.
    pub async fn impersonate(&self, address: &str, flavour: Impersonation) -> Result<()> {
        let method = format!("{}_impersonateAccount", flavour.namespace());
        let _: serde_json::Value = self
            .request(&method, vec![serde_json::json!(address)])
            .await?
            .unwrap_or(serde_json::Value::Null);
        debug!("Impersonating {}", address);
        Ok(())
    }

    /// Overwrites the native balance of `address`.
    pub async fn set_balance(&self, address: &str, wei: u128, flavour: Impersonation) -> Result<()> {
        let method = format!("{}_setBalance", flavour.namespace());
        let _: serde_json::Value = self
            .request(
                &method,
                vec![serde_json::json!(address), serde_json::json!(format!("0x{:x}", wei))],
            )
            .await?
            .unwrap_or(serde_json::Value::Null);
        Ok(())
    }
}

fn parse_hex_u64(value: &str) -> Result<u64> {
    u64::from_str_radix(value.strip_prefix("0x").unwrap_or(value), 16)
        .with_context(|| format!("Invalid hex quantity {}", value))
}

fn parse_hex_u128(value: &str) -> Result<u128> {
    u128::from_str_radix(value.strip_prefix("0x").unwrap_or(value), 16)
        .with_context(|| format!("Invalid hex quantity {}", value))
}
