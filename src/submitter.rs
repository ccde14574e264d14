//! Sharded batch submission.
//!
//! Each sender queue is statically bound to one worker (`slot % W`), so all
//! of a sender's transactions flow through a single worker's batch sequence.
//! Workers pack greedily into batches of `B` and dispatch them one at a
//! time, which keeps every sender's nonces arriving in ascending order.
//! Cross-sender ordering is best-effort only.

use std::sync::Arc;

use alloy::primitives::B256;
use serde_json::json;
use tokio::task::JoinSet;

use crate::error::Result;
use crate::rpc::batch::generate_batches;
use crate::rpc::{BatchEntry, RpcClient, SEND_TIMEOUT_MS};
use crate::signer::SignedTx;

#[derive(Debug, Default, Clone)]
pub struct SubmissionReport {
    /// Hashes the node accepted, across all workers.
    pub hashes: Vec<B256>,
    /// Elements the node answered with an error object.
    pub rejected: usize,
    /// Batches lost whole to transport failures.
    pub failed_batches: usize,
}

fn assign_slots(num_queues: usize, workers: usize) -> Vec<Vec<usize>> {
    let mut assignment = vec![Vec::new(); workers];
    for slot in 0..num_queues {
        assignment[slot % workers].push(slot);
    }
    assignment
}

fn pack_worker_batches(
    queues: &[Vec<SignedTx>],
    slots: &[usize],
    batch_size: usize,
) -> Vec<Vec<SignedTx>> {
    let owned: Vec<SignedTx> = slots
        .iter()
        .flat_map(|&slot| queues[slot].iter().cloned())
        .collect();
    generate_batches(&owned, batch_size)
}

pub async fn submit(
    client: Arc<RpcClient>,
    queues: &[Vec<SignedTx>],
    concurrency: usize,
    batch_size: usize,
) -> Result<SubmissionReport> {
    let total: usize = queues.iter().map(|q| q.len()).sum();
    if total == 0 || batch_size == 0 || concurrency == 0 {
        return Ok(SubmissionReport::default());
    }

    let workers = concurrency.min(queues.len());
    let assignment = assign_slots(queues.len(), workers);

    let mut join_set = JoinSet::new();
    for (worker, slots) in assignment.into_iter().enumerate() {
        if slots.is_empty() {
            continue;
        }
        let batches = pack_worker_batches(queues, &slots, batch_size);
        let client = Arc::clone(&client);
        join_set.spawn(async move {
            let mut report = SubmissionReport::default();
            for (seq, batch) in batches.iter().enumerate() {
                let calls: Vec<(String, serde_json::Value)> = batch
                    .iter()
                    .map(|tx| ("eth_sendRawTransaction".to_string(), json!([tx.raw])))
                    .collect();
                match client.batch_call(&calls, SEND_TIMEOUT_MS).await {
                    Ok(entries) => {
                        for (tx, entry) in batch.iter().zip(entries) {
                            match entry {
                                BatchEntry::Result(value) => {
                                    match serde_json::from_value::<B256>(value) {
                                        Ok(hash) => report.hashes.push(hash),
                                        Err(err) => {
                                            report.rejected += 1;
                                            tracing::warn!(
                                                worker,
                                                nonce = tx.nonce,
                                                from = %tx.from,
                                                "unparseable submission result: {err}"
                                            );
                                        }
                                    }
                                }
                                BatchEntry::Error(remote) => {
                                    report.rejected += 1;
                                    tracing::warn!(
                                        worker,
                                        nonce = tx.nonce,
                                        from = %tx.from,
                                        code = remote.code,
                                        "node rejected transaction: {}",
                                        remote.message
                                    );
                                }
                                BatchEntry::Missing => {
                                    report.rejected += 1;
                                    tracing::warn!(
                                        worker,
                                        nonce = tx.nonce,
                                        from = %tx.from,
                                        "no response element for transaction"
                                    );
                                }
                            }
                        }
                    }
                    Err(err) => {
                        report.failed_batches += 1;
                        tracing::warn!(
                            worker,
                            batch = seq,
                            size = batch.len(),
                            "batch submission failed: {err}"
                        );
                    }
                }
            }
            report
        });
    }

    let mut merged = SubmissionReport::default();
    while let Some(outcome) = join_set.join_next().await {
        match outcome {
            Ok(report) => {
                merged.hashes.extend(report.hashes);
                merged.rejected += report.rejected;
                merged.failed_batches += report.failed_batches;
            }
            Err(err) => {
                tracing::warn!("submission worker aborted: {err}");
            }
        }
    }

    tracing::info!(
        accepted = merged.hashes.len(),
        rejected = merged.rejected,
        failed_batches = merged.failed_batches,
        "submission complete"
    );
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, Bytes};

    fn tx(slot: usize, from: u8, nonce: u64) -> SignedTx {
        SignedTx {
            global_index: 0,
            sender_slot: slot,
            from: Address::repeat_byte(from),
            nonce,
            hash: B256::repeat_byte(nonce as u8),
            raw: Bytes::new(),
        }
    }

    #[test]
    fn slots_are_bound_by_modulo() {
        let assignment = assign_slots(5, 2);
        assert_eq!(assignment, vec![vec![0, 2, 4], vec![1, 3]]);
    }

    #[test]
    fn one_worker_owns_every_slot_when_queues_are_few() {
        let assignment = assign_slots(2, 2);
        assert_eq!(assignment, vec![vec![0], vec![1]]);
    }

    #[test]
    fn worker_batches_keep_per_sender_nonce_order() {
        // Worker owns slots 0 and 2; each sender's nonces must appear in
        // ascending order across the concatenated batch stream.
        let queues = vec![
            vec![tx(0, 1, 5), tx(0, 1, 6), tx(0, 1, 7)],
            vec![tx(1, 2, 0)],
            vec![tx(2, 3, 10), tx(2, 3, 11)],
        ];
        let batches = pack_worker_batches(&queues, &[0, 2], 2);

        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() <= 2));

        let mut last_nonce: std::collections::HashMap<Address, u64> = Default::default();
        for batch in &batches {
            for tx in batch {
                if let Some(prev) = last_nonce.get(&tx.from) {
                    assert!(tx.nonce > *prev, "nonce order broken for {}", tx.from);
                }
                last_nonce.insert(tx.from, tx.nonce);
            }
        }
    }

    #[test]
    fn zero_batch_size_packs_nothing() {
        let queues = vec![vec![tx(0, 1, 0)]];
        assert!(pack_worker_batches(&queues, &[0], 0).is_empty());
    }
}
