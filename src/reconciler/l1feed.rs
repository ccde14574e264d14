//! L1 raw-block subscription.
//!
//! The node publishes complete serialized blocks on a ZeroMQ PUB socket
//! (`rawblock` topic, dogecoind-style multipart: topic, payload, sequence).
//! Each payload is parsed and, when it carries a BIP34 height, persisted in
//! one database transaction. Malformed messages are logged and skipped; the
//! subscription itself reconnects on transport errors.

use std::sync::{Arc, Mutex};

use tokio::time::{sleep, Duration};
use zeromq::{Socket, SocketRecv, SubSocket};

use super::l1block::parse_raw_block;
use super::store::{BridgeDb, L1HeaderRow, L1TxRow};
use super::{lock_db, now_epoch_secs};
use crate::error::{InvariantError, Result};

const RAWBLOCK_TOPIC: &str = "rawblock";
const RECONNECT_DELAY_MS: u64 = 2_000;

/// Parse and persist one raw block payload. Returns the block height when
/// the block was persisted.
pub fn ingest_raw_block(
    payload: &[u8],
    target: &[u8; 20],
    db: &Mutex<BridgeDb>,
) -> Result<Option<u64>> {
    let parsed = parse_raw_block(payload, target)
        .map_err(|err| InvariantError::Broken(format!("raw block rejected: {err}")))?;

    let Some(height) = parsed.height else {
        tracing::debug!("raw block without a coinbase height; not persisted");
        return Ok(None);
    };

    let header = L1HeaderRow {
        height,
        hash: parsed.header.hash.clone(),
        version: parsed.header.version,
        prev_hash: parsed.header.prev_hash.clone(),
        merkle_root: parsed.header.merkle_root.clone(),
        timestamp: parsed.header.timestamp as u64,
        created_at: now_epoch_secs(),
        bits: parsed.header.bits,
        nonce: parsed.header.nonce,
        size_bytes: parsed.header.size_bytes as u64,
    };
    let rows: Vec<L1TxRow> = parsed
        .txs
        .iter()
        .flat_map(|tx| {
            tx.target_payments.iter().map(move |&value| L1TxRow {
                uid: value,
                txhash: tx.txid.clone(),
                height,
                timestamp: parsed.header.timestamp as u64,
            })
        })
        .collect();

    lock_db(db).insert_l1_block(&header, &rows)?;
    tracing::info!(
        height,
        hash = %header.hash,
        matched = rows.len(),
        txs = parsed.txs.len(),
        "L1 block ingested"
    );
    Ok(Some(height))
}

async fn subscribe_and_pump(
    endpoint: &str,
    target: &[u8; 20],
    db: &Mutex<BridgeDb>,
) -> anyhow::Result<()> {
    let mut socket = SubSocket::new();
    socket.connect(endpoint).await?;
    socket.subscribe(RAWBLOCK_TOPIC).await?;
    tracing::info!(endpoint, "L1 raw-block feed connected");

    loop {
        let message = socket.recv().await?;
        let Some(payload) = message.get(1) else {
            tracing::debug!("short multipart message on raw-block feed");
            continue;
        };
        if let Err(err) = ingest_raw_block(payload.as_ref(), target, db) {
            tracing::warn!("raw block dropped: {err}");
        }
    }
}

/// Long-lived subscriber loop; lives until the owning run aborts it.
pub async fn run_l1_feed(endpoint: String, target: [u8; 20], db: Arc<Mutex<BridgeDb>>) {
    loop {
        if let Err(err) = subscribe_and_pump(&endpoint, &target, &db).await {
            tracing::warn!(endpoint = %endpoint, "raw-block feed failed: {err}; reconnecting");
        }
        sleep(Duration::from_millis(RECONNECT_DELAY_MS)).await;
    }
}
