//! Offline signing fanned out over blocking workers.
//!
//! The flattened spec list is cut into contiguous slices, one per worker;
//! each worker signs sequentially and tags results with the global index so
//! the merge step can restore per-sender queue order exactly. A slice that
//! fails kills the run: a hole in a sender's nonce chain would wedge every
//! later transaction from that sender.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::consensus::SignableTransaction;
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, B256};
use alloy::signers::local::PrivateKeySigner;
use tokio::task::JoinSet;

use crate::builder::TxSpec;
use crate::error::{InvariantError, Result};

const PROGRESS_TICK: usize = 256;

#[derive(Debug, Clone)]
pub struct SignedTx {
    pub global_index: usize,
    pub sender_slot: usize,
    pub from: Address,
    pub nonce: u64,
    pub hash: B256,
    pub raw: Bytes,
}

pub fn sign_spec(spec: &TxSpec, signer: &PrivateKeySigner) -> Result<(B256, Bytes)> {
    let mut tx = spec.to_legacy();
    let signature = signer
        .sign_transaction_sync(&mut tx)
        .map_err(|err| InvariantError::SigningFailed(err.to_string()))?;
    let signed = tx.into_signed(signature);
    let hash = *signed.hash();
    let envelope = alloy::consensus::TxEnvelope::from(signed);
    Ok((hash, Bytes::from(envelope.encoded_2718())))
}

pub fn default_worker_count(total: usize) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cores.min(total).max(1)
}

/// Sign every queue, preserving per-sender order, using `workers` blocking
/// threads (0 = one per core, capped by the total count).
pub async fn sign_queues(
    queues: &[Vec<TxSpec>],
    signers: &HashMap<Address, PrivateKeySigner>,
    workers: usize,
) -> Result<Vec<Vec<SignedTx>>> {
    let total: usize = queues.iter().map(|q| q.len()).sum();
    if total == 0 {
        return Ok(vec![Vec::new(); queues.len()]);
    }

    // Flatten queue-major; the global index keeps each sender's specs in
    // enqueue (= nonce) order.
    let mut flat: Vec<(usize, usize, TxSpec)> = Vec::with_capacity(total);
    for (slot, queue) in queues.iter().enumerate() {
        for spec in queue {
            flat.push((flat.len(), slot, spec.clone()));
        }
    }

    for (_, _, spec) in &flat {
        if !signers.contains_key(&spec.from) {
            return Err(InvariantError::SigningFailed(format!(
                "no signer for sender {:#x}",
                spec.from
            ))
            .into());
        }
    }

    let workers = if workers == 0 {
        default_worker_count(total)
    } else {
        workers.min(total)
    };
    let slice_len = total.div_ceil(workers);
    let signers = Arc::new(signers.clone());
    let flat = Arc::new(flat);

    let mut join_set = JoinSet::new();
    for w in 0..workers {
        let start = w * slice_len;
        let end = (start + slice_len).min(total);
        if start >= end {
            break;
        }
        let signers = Arc::clone(&signers);
        let flat = Arc::clone(&flat);
        join_set.spawn_blocking(move || -> Result<Vec<SignedTx>> {
            let mut out = Vec::with_capacity(end - start);
            for (done, (global_index, sender_slot, spec)) in flat[start..end].iter().enumerate() {
                let signer = signers.get(&spec.from).ok_or_else(|| {
                    InvariantError::SigningFailed(format!("no signer for sender {:#x}", spec.from))
                })?;
                let (hash, raw) = sign_spec(spec, signer)?;
                out.push(SignedTx {
                    global_index: *global_index,
                    sender_slot: *sender_slot,
                    from: spec.from,
                    nonce: spec.nonce,
                    hash,
                    raw,
                });
                if (done + 1) % PROGRESS_TICK == 0 {
                    tracing::debug!(worker = w, signed = done + 1, "signing progress");
                }
            }
            Ok(out)
        });
    }

    let mut signed: Vec<SignedTx> = Vec::with_capacity(total);
    while let Some(outcome) = join_set.join_next().await {
        match outcome {
            Ok(Ok(chunk)) => signed.extend(chunk),
            Ok(Err(err)) => return Err(err),
            Err(err) => {
                return Err(InvariantError::SigningFailed(format!(
                    "signing worker panicked or was cancelled: {err}"
                ))
                .into())
            }
        }
    }

    if signed.len() != total {
        return Err(InvariantError::SigningFailed(format!(
            "signed {} of {} transactions",
            signed.len(),
            total
        ))
        .into());
    }

    signed.sort_by_key(|tx| tx.global_index);

    let mut out: Vec<Vec<SignedTx>> = vec![Vec::new(); queues.len()];
    for tx in signed {
        out[tx.sender_slot].push(tx);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_queues, BuildMode, GasPlan, ReadyAccount};
    use crate::keys;

    const TEST_MNEMONIC: &str = "test test test test test test test test test test test junk";

    fn fixture(num_accounts: u32, num_tx: usize) -> (Vec<Vec<TxSpec>>, HashMap<Address, PrivateKeySigner>) {
        let mut accounts = Vec::new();
        let mut signers = HashMap::new();
        for index in 1..=num_accounts {
            let derived = keys::derive(TEST_MNEMONIC, index).expect("derive");
            accounts.push(ReadyAccount {
                index,
                address: derived.address,
                next_nonce: 0,
            });
            signers.insert(derived.address, derived.signer);
        }
        let queues = build_queues(
            &mut accounts,
            num_tx,
            &BuildMode::Eoa,
            GasPlan {
                gas_price: 1_000_000_000,
                gas_limit: 21_000,
                chain_id: 1337,
            },
        );
        (queues, signers)
    }

    #[tokio::test]
    async fn signing_preserves_per_sender_nonce_order() {
        let (queues, signers) = fixture(3, 11);
        let signed = sign_queues(&queues, &signers, 4).await.expect("sign");

        assert_eq!(signed.len(), 3);
        let total: usize = signed.iter().map(|q| q.len()).sum();
        assert_eq!(total, 11);

        for queue in &signed {
            for pair in queue.windows(2) {
                assert!(pair[0].nonce < pair[1].nonce);
                assert_eq!(pair[0].from, pair[1].from);
            }
        }
    }

    #[tokio::test]
    async fn worker_split_is_equivalent_to_sequential_signing() {
        let (queues, signers) = fixture(2, 6);
        let parallel = sign_queues(&queues, &signers, 3).await.expect("sign");
        let sequential = sign_queues(&queues, &signers, 1).await.expect("sign");

        for (a, b) in parallel.iter().flatten().zip(sequential.iter().flatten()) {
            assert_eq!(a.hash, b.hash);
            assert_eq!(a.raw, b.raw);
        }
    }

    #[tokio::test]
    async fn missing_signer_is_fatal() {
        let (queues, mut signers) = fixture(2, 4);
        let gone = *signers.keys().next().expect("key");
        signers.remove(&gone);
        assert!(sign_queues(&queues, &signers, 2).await.is_err());
    }

    #[tokio::test]
    async fn empty_input_short_circuits() {
        let (queues, signers) = fixture(2, 0);
        let signed = sign_queues(&queues, &signers, 2).await.expect("sign");
        assert!(signed.iter().all(|q| q.is_empty()));
    }
}
