//! L2 withdrawal follower with reorg rollback.
//!
//! A pump loop walks blocks sequentially from the startup height. Every
//! block is verified against the previously applied hash; a mismatch rewinds
//! the store one height at a time until the chain reconnects. All RPC reads
//! for a block complete before its database transaction opens.

use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolEvent;
use tokio::time::{sleep, Duration};

use super::store::{BridgeDb, L2EventRow, L2HeaderRow};
use super::{lock_db, now_epoch_secs};
use crate::builder::IMoat::WithdrawalQueued;
use crate::error::{InvariantError, Result, RpcError};
use crate::rpc::RpcClient;

const HEAD_POLL_MS: u64 = 1_000;

/// Derive the join uid from a moat log, if it is a withdrawal event.
fn withdrawal_uid(topics: &[B256], data: &[u8], divisor: u128) -> Option<u64> {
    if topics.first() != Some(&WithdrawalQueued::SIGNATURE_HASH) {
        return None;
    }
    let event = WithdrawalQueued::decode_raw_log(topics.iter().copied(), data, false).ok()?;
    u64::try_from(event.amount / U256::from(divisor)).ok()
}

pub struct L2Follower {
    client: Arc<RpcClient>,
    db: Arc<Mutex<BridgeDb>>,
    moat: Address,
    uid_divisor: u128,
    last_height: u64,
    last_hash: B256,
}

impl L2Follower {
    /// Anchor the follower at the node's current head.
    pub async fn start(
        client: Arc<RpcClient>,
        db: Arc<Mutex<BridgeDb>>,
        moat: Address,
        uid_divisor: u128,
    ) -> Result<Self> {
        let head = client.block_number().await?;
        let block = client
            .get_block_by_number(head)
            .await?
            .ok_or_else(|| RpcError::Malformed {
                method: "eth_getBlockByNumber".to_string(),
                reason: format!("head block {head} not available"),
            })?;
        tracing::info!(height = head, hash = %block.hash, "L2 follower anchored");
        Ok(Self {
            client,
            db,
            moat,
            uid_divisor,
            last_height: head,
            last_hash: block.hash,
        })
    }

    /// Long-lived pump; lives until the owning run aborts it. Per-iteration
    /// errors are logged and retried on the next head.
    pub async fn run(mut self) {
        loop {
            match self.client.block_number().await {
                Ok(head) => {
                    if let Err(err) = self.pump(head).await {
                        tracing::warn!("L2 pump failed: {err}; retrying on next head");
                    }
                }
                Err(err) => tracing::debug!("head probe failed: {err}"),
            }
            sleep(Duration::from_millis(HEAD_POLL_MS)).await;
        }
    }

    async fn pump(&mut self, head: u64) -> Result<()> {
        while self.last_height < head {
            let next = self.last_height + 1;
            let Some(block) = self.client.get_block_with_txs(next).await? else {
                break;
            };

            if block.parent_hash != self.last_hash {
                tracing::warn!(
                    height = next,
                    expected = %self.last_hash,
                    actual = %block.parent_hash,
                    "parent hash mismatch; rewinding"
                );
                self.rewind().await?;
                continue;
            }

            // Gather every withdrawal event first; the store transaction
            // opens only once the reads are done.
            let timestamp = block.timestamp.to::<u64>();
            let mut events = Vec::new();
            for tx in &block.transactions {
                if tx.to != Some(self.moat) {
                    continue;
                }
                let Some(receipt) = self.client.get_receipt(tx.hash).await? else {
                    tracing::warn!(hash = %tx.hash, "mined tx without receipt; skipping");
                    continue;
                };
                for log in &receipt.logs {
                    if log.address != self.moat {
                        continue;
                    }
                    match withdrawal_uid(&log.topics, &log.data, self.uid_divisor) {
                        Some(uid) => events.push(L2EventRow {
                            uid,
                            txhash: format!("{:#x}", tx.hash),
                            height: next,
                            timestamp,
                        }),
                        None => {
                            tracing::debug!(hash = %tx.hash, "moat log is not a withdrawal")
                        }
                    }
                }
            }

            let header = L2HeaderRow {
                height: next,
                hash: format!("{:#x}", block.hash),
                timestamp,
                created_at: now_epoch_secs(),
            };
            lock_db(&self.db).apply_l2_block(&header, &events)?;
            if !events.is_empty() {
                tracing::info!(height = next, withdrawals = events.len(), "L2 block applied");
            }

            self.last_height = next;
            self.last_hash = block.hash;
        }
        Ok(())
    }

    async fn rewind(&mut self) -> Result<()> {
        let orphaned = self.last_height;
        lock_db(&self.db).rollback_l2(orphaned)?;
        self.last_height = orphaned.saturating_sub(1);

        let stored = lock_db(&self.db).l2_header_at(self.last_height)?;
        self.last_hash = match stored {
            Some(row) => row.hash.parse::<B256>().map_err(|err| {
                InvariantError::Broken(format!(
                    "stored L2 header {} has unparseable hash: {err}",
                    self.last_height
                ))
            })?,
            // Nothing stored below the startup anchor; trust the node.
            None => self
                .client
                .get_block_by_number(self.last_height)
                .await?
                .ok_or_else(|| RpcError::Malformed {
                    method: "eth_getBlockByNumber".to_string(),
                    reason: format!("rewind target {} not available", self.last_height),
                })?
                .hash,
        };
        tracing::info!(
            orphaned,
            resumed_at = self.last_height,
            "L2 store rewound"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::FixedBytes;

    #[test]
    fn withdrawal_uid_recovers_amount_over_divisor() {
        let divisor = 10_000_000_000u128;
        let amount = U256::from(110_000_000u64) * U256::from(divisor);
        let event = WithdrawalQueued {
            sender: Address::repeat_byte(0x01),
            target: FixedBytes::<20>::repeat_byte(0x42),
            amount,
        };
        let log = event.encode_log_data();

        let uid = withdrawal_uid(log.topics(), &log.data, divisor).expect("uid");
        assert_eq!(uid, 110_000_000);
    }

    #[test]
    fn foreign_topics_are_ignored() {
        let divisor = 10_000_000_000u128;
        assert_eq!(withdrawal_uid(&[], &[], divisor), None);
        assert_eq!(
            withdrawal_uid(&[B256::repeat_byte(0x13)], &[], divisor),
            None
        );
    }
}
