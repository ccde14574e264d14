//! Native-currency top-up pipeline.
//!
//! Balance discovery runs in waves of `concurrency`; accounts whose balance
//! query timed out are assumed ready (stalling the whole run on one slow
//! query is worse than an optimistic miss), query errors skip the account.
//! Underfunded accounts are funded cheapest-first from the funder, with
//! nonces allocated locally so waves can overlap in the mempool.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use alloy::primitives::U256;
use tokio::task::JoinSet;

use crate::builder::{TxSpec, EOA_TRANSFER_VALUE_WEI};
use crate::error::{FloodError, Result, RpcError};
use crate::keys::DerivedAccount;
use crate::nonce::NonceBook;
use crate::rpc::types::CallRequest;
use crate::rpc::RpcClient;
use crate::signer::sign_spec;

const FALLBACK_TRANSFER_GAS: u64 = 21_000;

#[derive(Debug, Clone)]
pub struct DistributionOutcome {
    /// Ready sub-accounts in original request order.
    pub ready: Vec<DerivedAccount>,
    pub funded: usize,
    pub assumed_ready: usize,
    pub skipped: usize,
}

enum BalanceProbe {
    Known(U256),
    AssumedReady,
    Skipped,
}

pub struct Distributor {
    client: Arc<RpcClient>,
    concurrency: usize,
    chain_id: u64,
}

impl Distributor {
    pub fn new(client: Arc<RpcClient>, concurrency: usize, chain_id: u64) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
            chain_id,
        }
    }

    /// Gas for a plain value transfer, estimated once against the funder.
    pub async fn estimate_base_gas(&self, funder: &DerivedAccount) -> u64 {
        let call = CallRequest {
            from: Some(funder.address),
            to: Some(funder.address),
            value: Some(U256::from(1)),
            data: None,
        };
        match self.client.estimate_gas(&call).await {
            Ok(gas) => gas,
            Err(err) => {
                tracing::warn!("eth_estimateGas failed ({err}); assuming {FALLBACK_TRANSFER_GAS}");
                FALLBACK_TRANSFER_GAS
            }
        }
    }

    /// Per-account balance required for `num_tx` transactions at `gas_price`.
    pub fn required_balance(num_tx: usize, gas_price: u128, base_gas: u64) -> U256 {
        let per_tx = U256::from(gas_price)
            .saturating_mul(U256::from(base_gas))
            .saturating_add(U256::from(EOA_TRANSFER_VALUE_WEI));
        U256::from(num_tx as u64).saturating_mul(per_tx)
    }

    async fn probe_balances(&self, subs: &[DerivedAccount]) -> Vec<BalanceProbe> {
        let mut probes: Vec<Option<BalanceProbe>> = (0..subs.len()).map(|_| None).collect();
        for wave in (0..subs.len()).collect::<Vec<_>>().chunks(self.concurrency) {
            let mut join_set = JoinSet::new();
            for &i in wave {
                let client = Arc::clone(&self.client);
                let address = subs[i].address;
                join_set.spawn(async move { (i, client.get_balance(address, "latest").await) });
            }
            while let Some(outcome) = join_set.join_next().await {
                let Ok((i, result)) = outcome else { continue };
                probes[i] = Some(match result {
                    Ok(balance) => BalanceProbe::Known(balance),
                    Err(err @ RpcError::Timeout { .. }) => {
                        tracing::warn!(
                            account = subs[i].index,
                            "balance query timed out ({err}); assuming ready"
                        );
                        BalanceProbe::AssumedReady
                    }
                    Err(err) => {
                        tracing::warn!(account = subs[i].index, "balance query failed: {err}");
                        BalanceProbe::Skipped
                    }
                });
            }
        }
        probes
            .into_iter()
            .map(|p| p.unwrap_or(BalanceProbe::Skipped))
            .collect()
    }

    /// Make the requested sub-accounts ready for `num_tx` transactions.
    pub async fn ensure_ready(
        &self,
        nonces: &NonceBook,
        funder: &DerivedAccount,
        subs: &[DerivedAccount],
        num_tx: usize,
        gas_price: u128,
    ) -> Result<DistributionOutcome> {
        if subs.is_empty() {
            return Ok(DistributionOutcome {
                ready: Vec::new(),
                funded: 0,
                assumed_ready: 0,
                skipped: 0,
            });
        }

        let base_gas = self.estimate_base_gas(funder).await;
        let required = Self::required_balance(num_tx, gas_price, base_gas);
        let funding_fee = U256::from(gas_price).saturating_mul(U256::from(base_gas));
        tracing::info!(
            accounts = subs.len(),
            required_wei = %required,
            "probing sub-account balances"
        );

        let probes = self.probe_balances(subs).await;

        let mut ready_indices: Vec<usize> = Vec::new();
        let mut assumed_ready = 0usize;
        let mut skipped = 0usize;
        // Min-heap keyed by missing funds: cheapest accounts first so a thin
        // funder still maximizes the ready count.
        let mut underfunded: BinaryHeap<Reverse<(U256, usize)>> = BinaryHeap::new();
        for (i, probe) in probes.iter().enumerate() {
            match probe {
                BalanceProbe::Known(balance) if *balance >= required => ready_indices.push(i),
                BalanceProbe::Known(balance) => {
                    underfunded.push(Reverse((required - balance, i)));
                }
                BalanceProbe::AssumedReady => {
                    assumed_ready += 1;
                    ready_indices.push(i);
                }
                BalanceProbe::Skipped => skipped += 1,
            }
        }

        let mut funded = 0usize;
        if !underfunded.is_empty() {
            let mut funder_available = self.client.get_balance(funder.address, "latest").await?;

            let mut fundable: Vec<(usize, U256)> = Vec::new();
            while let Some(Reverse((missing, i))) = underfunded.pop() {
                let cost = missing.saturating_add(funding_fee);
                if funder_available < cost {
                    tracing::warn!(
                        account = subs[i].index,
                        missing = %missing,
                        "funder exhausted; dropping account and the rest of the heap"
                    );
                    break;
                }
                funder_available -= cost;
                fundable.push((i, missing));
            }

            if fundable.is_empty() && ready_indices.is_empty() {
                let needed = underfunded
                    .peek()
                    .map(|Reverse((m, _))| m.saturating_add(funding_fee))
                    .unwrap_or(required);
                return Err(FloodError::InsufficientFunds {
                    needed,
                    available: funder_available,
                });
            }

            nonces.initialize(&self.client, funder.address).await?;
            let nonce_base = nonces.reserve(funder.address, fundable.len() as u64);

            for (wave_no, wave) in fundable.chunks(self.concurrency).enumerate() {
                let mut join_set = JoinSet::new();
                for (offset, &(i, missing)) in wave.iter().enumerate() {
                    let client = Arc::clone(&self.client);
                    let spec = TxSpec {
                        from: funder.address,
                        to: Some(subs[i].address),
                        value: missing,
                        data: Default::default(),
                        gas_limit: base_gas,
                        gas_price,
                        nonce: nonce_base
                            + (wave_no * self.concurrency) as u64
                            + offset as u64,
                        chain_id: self.chain_id,
                    };
                    let signer = funder.signer.clone();
                    join_set.spawn(async move {
                        let (hash, raw) = sign_spec(&spec, &signer)?;
                        client.send_raw(&raw).await?;
                        client.wait_mined(hash).await?;
                        Ok::<usize, FloodError>(i)
                    });
                }
                while let Some(outcome) = join_set.join_next().await {
                    match outcome {
                        Ok(Ok(i)) => {
                            funded += 1;
                            ready_indices.push(i);
                        }
                        Ok(Err(err)) => tracing::warn!("funding transfer failed: {err}"),
                        Err(err) => tracing::warn!("funding task aborted: {err}"),
                    }
                }
            }
        }

        ready_indices.sort_unstable();
        let ready: Vec<DerivedAccount> =
            ready_indices.iter().map(|&i| subs[i].clone()).collect();

        tracing::info!(
            ready = ready.len(),
            funded,
            assumed_ready,
            skipped,
            "distribution complete"
        );
        Ok(DistributionOutcome {
            ready,
            funded,
            assumed_ready,
            skipped,
        })
    }
}
