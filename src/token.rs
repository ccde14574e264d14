//! Token runtimes for the ERC-20 and ERC-721 modes.
//!
//! A fresh contract is deployed per run from the funder, so sub-accounts are
//! known to start at zero token balance and no balance scan is needed. The
//! creation bytecode is an external artifact; this module only submits it.

use std::sync::Arc;

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use tokio::task::JoinSet;

use crate::builder::{TxSpec, ERC20_CALL_GAS_LIMIT, ERC20_TRANSFER_AMOUNT, IERC20};
use crate::error::{ConfigError, FloodError, Result, RpcError};
use crate::keys::DerivedAccount;
use crate::nonce::NonceBook;
use crate::rpc::RpcClient;
use crate::signer::sign_spec;
use crate::utils::{config, hex as hexutil};

const DEPLOY_GAS_LIMIT: u64 = 5_000_000;

/// Creation bytecode for a run-scoped token contract. Artifact compilation
/// and ABI handling live outside this tool; only the init code crosses the
/// boundary, as a hex file referenced from the environment.
#[derive(Debug, Clone)]
pub struct TokenArtifact {
    pub init_code: Bytes,
}

impl TokenArtifact {
    pub fn from_hex_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            ConfigError::Invalid(format!("cannot read token artifact `{path}`: {err}"))
        })?;
        let bytes = hex::decode(hexutil::clean_hex(&raw)).map_err(|err| {
            ConfigError::Invalid(format!("token artifact `{path}` is not hex: {err}"))
        })?;
        if bytes.is_empty() {
            return Err(
                ConfigError::Invalid(format!("token artifact `{path}` is empty")).into(),
            );
        }
        Ok(Self {
            init_code: Bytes::from(bytes),
        })
    }

    pub fn erc20_from_env() -> Result<Self> {
        let path = config::erc20_artifact_path()
            .ok_or_else(|| ConfigError::Missing("FLOOD_ERC20_ARTIFACT".to_string()))?;
        Self::from_hex_file(&path)
    }

    pub fn erc721_from_env() -> Result<Self> {
        let path = config::erc721_artifact_path()
            .ok_or_else(|| ConfigError::Missing("FLOOD_ERC721_ARTIFACT".to_string()))?;
        Self::from_hex_file(&path)
    }
}

pub struct TokenRuntime {
    client: Arc<RpcClient>,
    concurrency: usize,
    chain_id: u64,
}

impl TokenRuntime {
    pub fn new(client: Arc<RpcClient>, concurrency: usize, chain_id: u64) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
            chain_id,
        }
    }

    /// Deploy the artifact from the funder and wait for the contract address.
    pub async fn deploy(
        &self,
        nonces: &NonceBook,
        funder: &DerivedAccount,
        artifact: &TokenArtifact,
        gas_price: u128,
    ) -> Result<Address> {
        if nonces.peek(funder.address).is_none() {
            nonces.initialize(&self.client, funder.address).await?;
        }
        let nonce = nonces.reserve(funder.address, 1);
        let spec = TxSpec {
            from: funder.address,
            to: None,
            value: U256::ZERO,
            data: artifact.init_code.clone(),
            gas_limit: DEPLOY_GAS_LIMIT,
            gas_price,
            nonce,
            chain_id: self.chain_id,
        };
        let (hash, raw) = sign_spec(&spec, &funder.signer)?;
        self.client.send_raw(&raw).await?;
        let receipt = self.client.wait_mined(hash).await?;
        let address = receipt.contract_address.ok_or_else(|| {
            FloodError::Rpc(RpcError::Malformed {
                method: "eth_getTransactionReceipt".to_string(),
                reason: "deployment receipt carries no contractAddress".to_string(),
            })
        })?;
        tracing::info!(token = %address, "token deployed");
        Ok(address)
    }

    /// Per-account token requirement: enough units for this account's share
    /// of the run, rounded up.
    pub fn per_account_amount(num_tx: usize, ready: usize) -> U256 {
        if ready == 0 {
            return U256::ZERO;
        }
        U256::from(ERC20_TRANSFER_AMOUNT)
            .saturating_mul(U256::from(num_tx.div_ceil(ready) as u64))
    }

    /// Move each ready account's share from the funder's freshly minted
    /// supply. Same local-nonce wave scheme as the native distributor.
    pub async fn fund_token_balances(
        &self,
        nonces: &NonceBook,
        funder: &DerivedAccount,
        token: Address,
        ready: &[DerivedAccount],
        num_tx: usize,
        gas_price: u128,
    ) -> Result<usize> {
        if ready.is_empty() || num_tx == 0 {
            return Ok(0);
        }
        let amount = Self::per_account_amount(num_tx, ready.len());
        let nonce_base = nonces.reserve(funder.address, ready.len() as u64);

        let mut funded = 0usize;
        for (wave_no, wave) in ready.chunks(self.concurrency).enumerate() {
            let mut join_set = JoinSet::new();
            for (offset, account) in wave.iter().enumerate() {
                let client = Arc::clone(&self.client);
                let calldata = IERC20::transferCall {
                    to: account.address,
                    amount,
                }
                .abi_encode();
                let spec = TxSpec {
                    from: funder.address,
                    to: Some(token),
                    value: U256::ZERO,
                    data: Bytes::from(calldata),
                    gas_limit: ERC20_CALL_GAS_LIMIT,
                    gas_price,
                    nonce: nonce_base + (wave_no * self.concurrency) as u64 + offset as u64,
                    chain_id: self.chain_id,
                };
                let signer = funder.signer.clone();
                let index = account.index;
                join_set.spawn(async move {
                    let (hash, raw) = sign_spec(&spec, &signer)?;
                    client.send_raw(&raw).await?;
                    client.wait_mined(hash).await?;
                    Ok::<u32, FloodError>(index)
                });
            }
            while let Some(outcome) = join_set.join_next().await {
                match outcome {
                    Ok(Ok(_)) => funded += 1,
                    Ok(Err(err)) => tracing::warn!("token top-up failed: {err}"),
                    Err(err) => tracing::warn!("token top-up task aborted: {err}"),
                }
            }
        }

        tracing::info!(funded, total = ready.len(), "token distribution complete");
        Ok(funded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_account_amount_rounds_up() {
        assert_eq!(TokenRuntime::per_account_amount(10, 4), U256::from(3));
        assert_eq!(TokenRuntime::per_account_amount(12, 4), U256::from(3));
        assert_eq!(TokenRuntime::per_account_amount(1, 4), U256::from(1));
        assert_eq!(TokenRuntime::per_account_amount(10, 0), U256::ZERO);
    }

    #[test]
    fn artifact_rejects_garbage_files() {
        let dir = std::env::temp_dir();
        let path = dir.join("floodgate-artifact-test.hex");
        std::fs::write(&path, "0xzz-not-hex").expect("write");
        assert!(TokenArtifact::from_hex_file(path.to_str().unwrap()).is_err());

        std::fs::write(&path, "0x6080604052").expect("write");
        let artifact = TokenArtifact::from_hex_file(path.to_str().unwrap()).expect("load");
        assert_eq!(artifact.init_code.len(), 5);
        let _ = std::fs::remove_file(&path);
    }
}
