//! Thin typed JSON-RPC client over a single HTTP endpoint.
//!
//! Every operation carries an explicit timeout budget: 5s for reads, 15s for
//! raw submission, 18s for waiting on a receipt. Timeouts are retried with a
//! bounded backoff; an explicit node error is surfaced as-is and never
//! retried here.

pub mod batch;
pub mod types;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use alloy::primitives::{Address, Bytes, B256, U256, U64};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::{sleep, timeout, Duration};

use crate::error::RpcError;
use crate::utils::hex::quantity_to_u64;
use types::{CallRequest, RpcBlock, RpcBlockFull, RpcReceipt};

pub const READ_TIMEOUT_MS: u64 = 5_000;
pub const SEND_TIMEOUT_MS: u64 = 15_000;
pub const CONFIRM_TIMEOUT_MS: u64 = 18_000;

const TIMEOUT_RETRY_ATTEMPTS: usize = 3;
const RECEIPT_POLL_MS: u64 = 500;

pub fn bounded_exponential_backoff_ms(base_ms: u64, streak: u32, cap_ms: u64) -> u64 {
    if base_ms == 0 {
        return 0;
    }
    let clamped = streak.min(8);
    base_ms
        .saturating_mul(1u64 << clamped)
        .min(cap_ms.max(base_ms))
}

pub fn block_tag(height: u64) -> String {
    format!("0x{height:x}")
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RemoteError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
}

/// Per-element outcome of a batched POST, in request order.
#[derive(Debug, Clone)]
pub enum BatchEntry {
    Result(Value),
    Error(RemoteError),
    /// The response array had no element with this request's id.
    Missing,
}

pub struct RpcClient {
    http: reqwest::Client,
    url: reqwest::Url,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: &str) -> Result<Self, RpcError> {
        let parsed = url.parse::<reqwest::Url>().map_err(|e| RpcError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(RpcError::InvalidUrl {
                    url: url.to_string(),
                    reason: format!("unsupported scheme `{other}`"),
                })
            }
        }
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(READ_TIMEOUT_MS))
            .build()
            .map_err(|e| RpcError::Transport {
                method: "client-init".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            url: parsed,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        self.url.as_str()
    }

    fn take_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn post_once(
        &self,
        body: &Value,
        method: &str,
        timeout_ms: u64,
    ) -> Result<Value, RpcError> {
        let request = self.http.post(self.url.clone()).json(body).send();
        let response = timeout(Duration::from_millis(timeout_ms), request)
            .await
            .map_err(|_| RpcError::Timeout {
                method: method.to_string(),
                timeout_ms,
            })?
            .map_err(|e| RpcError::Transport {
                method: method.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(RpcError::Transport {
                method: method.to_string(),
                reason: format!("http status {}", response.status()),
            });
        }

        let remaining = Duration::from_millis(timeout_ms);
        timeout(remaining, response.json::<Value>())
            .await
            .map_err(|_| RpcError::Timeout {
                method: method.to_string(),
                timeout_ms,
            })?
            .map_err(|e| RpcError::Malformed {
                method: method.to_string(),
                reason: e.to_string(),
            })
    }

    /// One logical call with timeout retries. Remote errors bubble
    /// immediately; only `Timeout` loops, with bounded backoff.
    pub async fn call_raw(
        &self,
        method: &str,
        params: Value,
        timeout_ms: u64,
    ) -> Result<Value, RpcError> {
        let id = self.take_id();
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let mut attempt = 0usize;
        loop {
            match self.post_once(&body, method, timeout_ms).await {
                Ok(raw) => {
                    let envelope: RpcEnvelope =
                        serde_json::from_value(raw).map_err(|e| RpcError::Malformed {
                            method: method.to_string(),
                            reason: e.to_string(),
                        })?;
                    if let Some(err) = envelope.error {
                        return Err(RpcError::Remote {
                            method: method.to_string(),
                            code: err.code,
                            message: err.message,
                        });
                    }
                    return envelope.result.ok_or_else(|| RpcError::Malformed {
                        method: method.to_string(),
                        reason: "response carries neither result nor error".to_string(),
                    });
                }
                Err(err) if err.is_retryable() && attempt + 1 < TIMEOUT_RETRY_ATTEMPTS => {
                    attempt += 1;
                    let backoff = bounded_exponential_backoff_ms(100, attempt as u32, 1_500);
                    tracing::debug!(method, attempt, backoff_ms = backoff, "rpc timeout, retrying");
                    sleep(Duration::from_millis(backoff)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<R, RpcError> {
        let raw = self.call_raw(method, params, READ_TIMEOUT_MS).await?;
        serde_json::from_value(raw).map_err(|e| RpcError::Malformed {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    /// One HTTP POST carrying a JSON array of requests. Outcomes come back in
    /// request order, correlated by id; a transport failure fails the whole
    /// batch.
    pub async fn batch_call(
        &self,
        calls: &[(String, Value)],
        timeout_ms: u64,
    ) -> Result<Vec<BatchEntry>, RpcError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::with_capacity(calls.len());
        let body: Vec<Value> = calls
            .iter()
            .map(|(method, params)| {
                let id = self.take_id();
                ids.push(id);
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "method": method,
                    "params": params,
                })
            })
            .collect();

        let raw = self
            .post_once(&Value::Array(body), "batch", timeout_ms)
            .await?;
        let elements: Vec<RpcEnvelope> =
            serde_json::from_value(raw).map_err(|e| RpcError::Malformed {
                method: "batch".to_string(),
                reason: e.to_string(),
            })?;

        let mut by_id = std::collections::HashMap::with_capacity(elements.len());
        for envelope in elements {
            if let Some(id) = envelope.id.as_u64() {
                by_id.insert(id, envelope);
            }
        }

        Ok(ids
            .into_iter()
            .map(|id| match by_id.remove(&id) {
                Some(envelope) => match (envelope.result, envelope.error) {
                    (_, Some(err)) => BatchEntry::Error(err),
                    (Some(result), None) => BatchEntry::Result(result),
                    (None, None) => BatchEntry::Missing,
                },
                None => BatchEntry::Missing,
            })
            .collect())
    }

    // Typed surface ---------------------------------------------------------

    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        let id: U64 = self.call("eth_chainId", json!([])).await?;
        Ok(id.to::<u64>())
    }

    pub async fn get_block(&self, tag: &str) -> Result<Option<RpcBlock>, RpcError> {
        self.call("eth_getBlockByNumber", json!([tag, false])).await
    }

    pub async fn get_block_by_number(&self, height: u64) -> Result<Option<RpcBlock>, RpcError> {
        self.get_block(&block_tag(height)).await
    }

    pub async fn get_block_with_txs(&self, height: u64) -> Result<Option<RpcBlockFull>, RpcError> {
        self.call("eth_getBlockByNumber", json!([block_tag(height), true]))
            .await
    }

    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let n: U64 = self.call("eth_blockNumber", json!([])).await?;
        Ok(n.to::<u64>())
    }

    pub async fn get_receipt(&self, hash: B256) -> Result<Option<RpcReceipt>, RpcError> {
        self.call("eth_getTransactionReceipt", json!([hash])).await
    }

    pub async fn get_tx_count(&self, address: Address, tag: &str) -> Result<u64, RpcError> {
        let n: U64 = self
            .call("eth_getTransactionCount", json!([address, tag]))
            .await?;
        Ok(n.to::<u64>())
    }

    pub async fn get_balance(&self, address: Address, tag: &str) -> Result<U256, RpcError> {
        self.call("eth_getBalance", json!([address, tag])).await
    }

    pub async fn gas_price(&self) -> Result<u128, RpcError> {
        let price: U256 = self.call("eth_gasPrice", json!([])).await?;
        Ok(price.to::<u128>())
    }

    pub async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, RpcError> {
        let gas: U64 = self.call("eth_estimateGas", json!([call])).await?;
        Ok(gas.to::<u64>())
    }

    pub async fn send_raw(&self, raw: &Bytes) -> Result<B256, RpcError> {
        let hash = self
            .call_raw("eth_sendRawTransaction", json!([raw]), SEND_TIMEOUT_MS)
            .await?;
        serde_json::from_value(hash).map_err(|e| RpcError::Malformed {
            method: "eth_sendRawTransaction".to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn block_tx_count(&self, tag: &str) -> Result<u64, RpcError> {
        let raw = self
            .call_raw(
                "eth_getBlockTransactionCountByNumber",
                json!([tag]),
                READ_TIMEOUT_MS,
            )
            .await?;
        quantity_to_u64(&raw).ok_or_else(|| RpcError::Malformed {
            method: "eth_getBlockTransactionCountByNumber".to_string(),
            reason: format!("unparseable quantity {raw}"),
        })
    }

    pub async fn txpool_status(&self) -> Result<(u64, u64), RpcError> {
        let raw = self
            .call_raw("txpool_status", json!([]), READ_TIMEOUT_MS)
            .await?;
        let pending = raw.get("pending").and_then(quantity_to_u64);
        let queued = raw.get("queued").and_then(quantity_to_u64);
        match pending {
            Some(p) => Ok((p, queued.unwrap_or(0))),
            None => Err(RpcError::Malformed {
                method: "txpool_status".to_string(),
                reason: format!("unparseable status {raw}"),
            }),
        }
    }

    /// Entry counts from the full pool dump (`txpool_content`). Heavy on
    /// busy nodes; only the pending-count report asks for it.
    pub async fn txpool_content_counts(&self) -> Result<(u64, u64), RpcError> {
        let raw = self
            .call_raw("txpool_content", json!([]), READ_TIMEOUT_MS)
            .await?;
        fn section_len(section: Option<&Value>) -> u64 {
            section
                .and_then(|v| v.as_object())
                .map(|accounts| {
                    accounts
                        .values()
                        .filter_map(|by_nonce| by_nonce.as_object())
                        .map(|by_nonce| by_nonce.len() as u64)
                        .sum()
                })
                .unwrap_or(0)
        }
        Ok((section_len(raw.get("pending")), section_len(raw.get("queued"))))
    }

    /// Best-effort pending-transaction count. Probes, in order:
    /// `txpool_status`, the pending block's tx count, and finally the zero
    /// address's pending nonce as a weak upper bound.
    pub async fn pending_tx_count(&self) -> Result<u64, RpcError> {
        match self.txpool_status().await {
            Ok((pending, _)) => return Ok(pending),
            Err(err) => tracing::debug!("txpool_status unavailable: {err}"),
        }
        match self.block_tx_count("pending").await {
            Ok(count) => return Ok(count),
            Err(err) => tracing::debug!("pending block tx count unavailable: {err}"),
        }
        self.get_tx_count(Address::ZERO, "pending").await
    }

    /// Poll for a receipt until the confirmation budget is exhausted.
    pub async fn wait_mined(&self, hash: B256) -> Result<RpcReceipt, RpcError> {
        let started = Instant::now();
        loop {
            if let Some(receipt) = self.get_receipt(hash).await? {
                return Ok(receipt);
            }
            if started.elapsed() >= Duration::from_millis(CONFIRM_TIMEOUT_MS) {
                return Err(RpcError::Timeout {
                    method: format!("wait_mined({hash:#x})"),
                    timeout_ms: CONFIRM_TIMEOUT_MS,
                });
            }
            sleep(Duration::from_millis(RECEIPT_POLL_MS)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_bounded() {
        assert_eq!(bounded_exponential_backoff_ms(100, 0, 1_500), 100);
        assert_eq!(bounded_exponential_backoff_ms(100, 1, 1_500), 200);
        assert_eq!(bounded_exponential_backoff_ms(100, 10, 1_500), 1_500);
        assert_eq!(bounded_exponential_backoff_ms(0, 5, 1_500), 0);
    }

    #[test]
    fn block_tag_is_minimal_hex() {
        assert_eq!(block_tag(0), "0x0");
        assert_eq!(block_tag(436), "0x1b4");
    }

    #[test]
    fn client_rejects_non_http_urls() {
        assert!(RpcClient::new("ftp://example.com").is_err());
        assert!(RpcClient::new("not a url").is_err());
        assert!(RpcClient::new("http://localhost:8545").is_ok());
    }

    #[test]
    fn envelope_decodes_error_and_result_variants() {
        let ok: RpcEnvelope =
            serde_json::from_value(json!({"jsonrpc":"2.0","id":7,"result":"0x1"})).expect("ok");
        assert!(ok.error.is_none());
        assert_eq!(ok.result, Some(json!("0x1")));

        let err: RpcEnvelope = serde_json::from_value(
            json!({"jsonrpc":"2.0","id":8,"error":{"code":-32000,"message":"nonce too low"}}),
        )
        .expect("err");
        let remote = err.error.expect("remote error");
        assert_eq!(remote.code, -32000);
        assert_eq!(remote.message, "nonce too low");
    }

    #[test]
    fn timeout_classification_is_the_only_retryable_kind() {
        let timeout = RpcError::Timeout {
            method: "eth_getBalance".into(),
            timeout_ms: 5_000,
        };
        let remote = RpcError::Remote {
            method: "eth_sendRawTransaction".into(),
            code: -32000,
            message: "already known".into(),
        };
        assert!(timeout.is_retryable());
        assert!(!remote.is_retryable());
    }
}
