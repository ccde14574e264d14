//! Receipt discovery and per-block throughput statistics.
//!
//! Instead of polling receipts per hash, blocks are scanned sequentially
//! from the submission height and matched against the submitted hash set.
//! The scan ends when the pool is drained and everything is found, or when
//! the chain stops producing the next block for 10 continuous seconds.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use alloy::primitives::{B256, U64};
use serde::Serialize;
use tokio::time::{sleep, Duration};

use crate::error::Result;
use crate::rpc::RpcClient;

const BLOCK_WAIT_MS: u64 = 10_000;
const SCAN_POLL_MS: u64 = 500;

#[derive(Debug, Clone, Serialize)]
pub struct BlockReport {
    pub height: u64,
    #[serde(rename = "gasUsed")]
    pub gas_used: U64,
    #[serde(rename = "gasLimit")]
    pub gas_limit: U64,
    #[serde(rename = "numTxs")]
    pub num_txs: usize,
    pub utilization: f64,
    pub tps: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tps: u64,
    pub blocks: Vec<BlockReport>,
}

#[derive(Debug, Clone)]
pub struct CollectedStats {
    /// Block height per found transaction hash.
    pub found: HashMap<B256, u64>,
    pub total: usize,
    pub report: RunReport,
}

#[derive(Debug, Clone, Copy)]
struct BlockSample {
    height: u64,
    timestamp: u64,
    num_txs: usize,
    gas_used: u64,
    gas_limit: u64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn build_reports(samples: &[BlockSample], baseline_ts: Option<u64>) -> (Vec<BlockReport>, u64) {
    let mut blocks = Vec::with_capacity(samples.len());
    let mut prev_ts = baseline_ts;
    let mut txs_sum = 0u64;
    let mut delta_sum = 0u64;

    for sample in samples {
        let delta = prev_ts.map(|prev| sample.timestamp.abs_diff(prev));
        let tps = match delta {
            Some(d) if d > 0 => round2(sample.num_txs as f64 / d as f64),
            _ => 0.0,
        };
        if let Some(d) = delta {
            txs_sum += sample.num_txs as u64;
            delta_sum += d;
        }
        let utilization = if sample.gas_limit > 0 {
            round2(sample.gas_used as f64 / sample.gas_limit as f64 * 100.0)
        } else {
            0.0
        };
        blocks.push(BlockReport {
            height: sample.height,
            gas_used: U64::from(sample.gas_used),
            gas_limit: U64::from(sample.gas_limit),
            num_txs: sample.num_txs,
            utilization,
            tps,
        });
        prev_ts = Some(sample.timestamp);
    }

    let overall = if delta_sum > 0 {
        txs_sum.div_ceil(delta_sum)
    } else {
        0
    };
    (blocks, overall)
}

pub struct StatCollector {
    client: Arc<RpcClient>,
}

impl StatCollector {
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self { client }
    }

    pub async fn collect(&self, hashes: &[B256], start_block: u64) -> Result<CollectedStats> {
        let targets: HashSet<B256> = hashes.iter().copied().collect();
        let total = targets.len();
        let found = if total > 0 {
            self.scan(&targets, start_block).await
        } else {
            HashMap::new()
        };

        let heights: BTreeSet<u64> = found.values().copied().collect();
        let (blocks, overall) = self.block_reports(&heights).await;

        tracing::info!(
            found = found.len(),
            total,
            blocks = blocks.len(),
            tps = overall,
            "statistics collected"
        );
        Ok(CollectedStats {
            found,
            total,
            report: RunReport {
                tps: overall,
                blocks,
            },
        })
    }

    async fn scan(&self, targets: &HashSet<B256>, start_block: u64) -> HashMap<B256, u64> {
        let mut found: HashMap<B256, u64> = HashMap::with_capacity(targets.len());
        let mut height = start_block;
        let mut wait_started: Option<Instant> = None;

        loop {
            match self.client.pending_tx_count().await {
                Ok(0) if found.len() == targets.len() => {
                    tracing::debug!("pool drained and all hashes found");
                    break;
                }
                Ok(_) => {}
                Err(err) => tracing::debug!("pending count probe failed: {err}"),
            }

            match self.client.get_block_by_number(height).await {
                Ok(Some(block)) => {
                    wait_started = None;
                    for hash in &block.transactions {
                        if targets.contains(hash) {
                            found.insert(*hash, height);
                        }
                    }
                    tracing::debug!(
                        height,
                        found = found.len(),
                        total = targets.len(),
                        "scanned block"
                    );
                    // The counter advances only on a fetched block; the wait
                    // clock above bounds how long a missing height can stall.
                    height += 1;
                }
                absent_or_error => {
                    if let Err(err) = absent_or_error {
                        tracing::warn!(height, "block fetch failed: {err}");
                    }
                    let started = *wait_started.get_or_insert_with(Instant::now);
                    if started.elapsed() >= Duration::from_millis(BLOCK_WAIT_MS) {
                        tracing::warn!(
                            height,
                            found = found.len(),
                            total = targets.len(),
                            "no new block for {}s; ending scan",
                            BLOCK_WAIT_MS / 1000
                        );
                        break;
                    }
                    sleep(Duration::from_millis(SCAN_POLL_MS)).await;
                }
            }
        }
        found
    }

    async fn block_reports(&self, heights: &BTreeSet<u64>) -> (Vec<BlockReport>, u64) {
        let mut samples = Vec::with_capacity(heights.len());
        for &height in heights {
            match self.client.get_block_by_number(height).await {
                Ok(Some(block)) => samples.push(BlockSample {
                    height,
                    timestamp: block.timestamp.to::<u64>(),
                    num_txs: block.transactions.len(),
                    gas_used: block.gas_used.to::<u64>(),
                    gas_limit: block.gas_limit.to::<u64>(),
                }),
                Ok(None) => tracing::warn!(height, "stat block disappeared"),
                Err(err) => tracing::warn!(height, "stat block fetch failed: {err}"),
            }
        }

        // The first observed block needs a parent timestamp for its delta.
        let baseline_ts = match heights.first() {
            Some(&first) if first > 0 => self
                .client
                .get_block_by_number(first - 1)
                .await
                .ok()
                .flatten()
                .map(|b| b.timestamp.to::<u64>()),
            _ => None,
        };

        build_reports(&samples, baseline_ts)
    }
}

pub fn write_report(path: &Path, report: &RunReport) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(report)?;
    std::fs::write(path, rendered)?;
    tracing::info!(path = %path.display(), "results written");
    Ok(())
}
