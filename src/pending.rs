//! Stuck-transaction maintenance utilities.
//!
//! A nonce is "stuck" when the node's pending count runs ahead of latest.
//! Each stuck nonce is replaced with a self-transfer priced above the
//! original so the mempool accepts the replacement.

use std::sync::Arc;

use alloy::primitives::U256;
use tokio::task::JoinSet;

use crate::builder::TxSpec;
use crate::error::{FloodError, Result};
use crate::keys;
use crate::nonce::NonceBook;
use crate::rpc::RpcClient;
use crate::signer::sign_spec;

/// Replacement gas price as a percentage of the current price.
const REPLACEMENT_GAS_PRICE_PERCENT: u128 = 125;

#[derive(Debug, Default, Clone, Copy)]
pub struct ClearReport {
    pub scanned: usize,
    pub stuck_accounts: usize,
    pub replaced: usize,
    pub failures: usize,
}

fn elevated_gas_price(gas_price: u128) -> u128 {
    gas_price
        .saturating_mul(REPLACEMENT_GAS_PRICE_PERCENT)
        .div_euclid(100)
        .max(gas_price.saturating_add(1))
}

/// Replace every stuck nonce for the account indices in `range`.
pub async fn clear_pending(
    client: Arc<RpcClient>,
    seed: &str,
    range: std::ops::Range<u32>,
    concurrency: usize,
    chain_id: u64,
) -> Result<ClearReport> {
    let gas_price = client.gas_price().await?;
    let bumped = elevated_gas_price(gas_price);
    let concurrency = concurrency.max(1);
    let nonces = NonceBook::new();

    let indices: Vec<u32> = range.collect();
    let mut report = ClearReport::default();

    for wave in indices.chunks(concurrency) {
        let mut join_set = JoinSet::new();
        for &index in wave {
            let client = Arc::clone(&client);
            let account = match keys::derive(seed, index) {
                Ok(account) => account,
                Err(err) => {
                    tracing::warn!(index, "cannot derive account: {err}");
                    report.failures += 1;
                    continue;
                }
            };
            join_set.spawn(async move {
                let pending = client.get_tx_count(account.address, "pending").await?;
                let latest = client.get_tx_count(account.address, "latest").await?;
                Ok::<_, FloodError>((account, latest, pending))
            });
        }

        while let Some(outcome) = join_set.join_next().await {
            report.scanned += 1;
            let (account, latest, pending) = match outcome {
                Ok(Ok(probe)) => probe,
                Ok(Err(err)) => {
                    tracing::warn!("pending probe failed: {err}");
                    report.failures += 1;
                    continue;
                }
                Err(err) => {
                    tracing::warn!("pending probe task aborted: {err}");
                    report.failures += 1;
                    continue;
                }
            };
            if pending <= latest {
                continue;
            }

            report.stuck_accounts += 1;
            tracing::info!(
                account = account.index,
                address = %account.address,
                stuck = pending - latest,
                "replacing stuck nonces {latest}..{pending}"
            );
            nonces.seed(account.address, latest);
            for nonce in latest..pending {
                let spec = TxSpec {
                    from: account.address,
                    to: Some(account.address),
                    value: U256::ZERO,
                    data: Default::default(),
                    gas_limit: 21_000,
                    gas_price: bumped,
                    nonce: nonces.reserve(account.address, 1),
                    chain_id,
                };
                debug_assert_eq!(spec.nonce, nonce);
                match sign_spec(&spec, &account.signer) {
                    Ok((_, raw)) => match client.send_raw(&raw).await {
                        Ok(_) => report.replaced += 1,
                        Err(err) => {
                            tracing::warn!(
                                account = account.index,
                                nonce,
                                "replacement rejected: {err}"
                            );
                            report.failures += 1;
                        }
                    },
                    Err(err) => {
                        tracing::warn!(account = account.index, nonce, "signing failed: {err}");
                        report.failures += 1;
                    }
                }
            }
        }
    }

    tracing::info!(
        scanned = report.scanned,
        stuck_accounts = report.stuck_accounts,
        replaced = report.replaced,
        failures = report.failures,
        "clear-pending sweep finished"
    );
    Ok(report)
}

/// Probe and report the node-wide pending transaction count.
pub async fn report_pending_count(client: Arc<RpcClient>) -> Result<u64> {
    let pending = client.pending_tx_count().await?;
    match client.txpool_content_counts().await {
        Ok((content_pending, queued)) => tracing::info!(
            pending,
            content_pending,
            queued,
            "node pending transaction count"
        ),
        Err(err) => {
            tracing::debug!("txpool_content unavailable: {err}");
            tracing::info!(pending, "node pending transaction count");
        }
    }
    println!("{pending}");
    Ok(pending)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elevated_price_is_at_least_a_bump() {
        assert_eq!(elevated_gas_price(1_000_000_000), 1_250_000_000);
        // Tiny prices still move by at least one wei.
        assert_eq!(elevated_gas_price(1), 2);
        assert_eq!(elevated_gas_price(0), 1);
    }
}
