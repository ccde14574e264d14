//! Typed JSON-RPC payload records for the subset of the Ethereum surface
//! this tool consumes. Quantities stay in alloy primitives; hex encoding is
//! handled by their serde impls.

use alloy::primitives::{Address, Bytes, B256, U256, U64};
use serde::{Deserialize, Serialize};

/// Block with transaction hashes only (`eth_getBlockByNumber(tag, false)`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    pub number: U64,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: U64,
    pub gas_used: U64,
    pub gas_limit: U64,
    #[serde(default)]
    pub transactions: Vec<B256>,
}

/// Block with full transaction objects (`eth_getBlockByNumber(tag, true)`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlockFull {
    pub number: U64,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: U64,
    pub gas_used: U64,
    pub gas_limit: U64,
    #[serde(default)]
    pub transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: B256,
    pub from: Address,
    pub to: Option<Address>,
    #[serde(default)]
    pub value: U256,
    #[serde(default)]
    pub input: Bytes,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: B256,
    pub block_number: Option<U64>,
    pub status: Option<U64>,
    pub contract_address: Option<Address>,
    #[serde(default)]
    pub logs: Vec<RpcLog>,
}

impl RpcReceipt {
    pub fn succeeded(&self) -> bool {
        self.status.map(|s| s == U64::from(1)).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
}

/// Call object for `eth_estimateGas` / `eth_call`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_decodes_geth_shape() {
        let raw = serde_json::json!({
            "number": "0x1b4",
            "hash": "0x11aa000000000000000000000000000000000000000000000000000000000000",
            "parentHash": "0x22bb000000000000000000000000000000000000000000000000000000000000",
            "timestamp": "0x55ba467c",
            "gasUsed": "0x5208",
            "gasLimit": "0x1c9c380",
            "transactions": [
                "0x33cc000000000000000000000000000000000000000000000000000000000000"
            ],
            "extraData": "0x"
        });
        let block: RpcBlock = serde_json::from_value(raw).expect("decode");
        assert_eq!(block.number.to::<u64>(), 436);
        assert_eq!(block.gas_used.to::<u64>(), 21000);
        assert_eq!(block.transactions.len(), 1);
    }

    #[test]
    fn receipt_status_defaults_to_success_when_absent() {
        let raw = serde_json::json!({
            "transactionHash": "0x33cc000000000000000000000000000000000000000000000000000000000000",
            "blockNumber": "0x10",
            "logs": []
        });
        let receipt: RpcReceipt = serde_json::from_value(raw).expect("decode");
        assert!(receipt.succeeded());
        assert_eq!(receipt.block_number.map(|n| n.to::<u64>()), Some(16));
    }

    #[test]
    fn call_request_omits_unset_fields() {
        let call = CallRequest {
            to: Some(Address::repeat_byte(0x11)),
            ..Default::default()
        };
        let json = serde_json::to_value(&call).expect("encode");
        assert!(json.get("from").is_none());
        assert!(json.get("to").is_some());
    }
}
