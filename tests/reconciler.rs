//! Cross-chain reconciliation scenarios against the embedded store.

use std::sync::Mutex;

use floodgate::reconciler::l1feed::ingest_raw_block;
use floodgate::reconciler::store::{BridgeDb, L2EventRow, L2HeaderRow};

const UID_DIVISOR: u128 = 10_000_000_000;

fn push_varint(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        _ => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
    }
}

fn p2pkh_script(hash: &[u8; 20]) -> Vec<u8> {
    let mut script = vec![0x76, 0xa9, 0x14];
    script.extend_from_slice(hash);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

/// Minimal legacy-layout block: coinbase carrying a BIP34 height plus one
/// payment transaction with a P2PKH output to `target`.
fn fabricate_l1_block(height: u64, payment_sats: u64, target: &[u8; 20]) -> Vec<u8> {
    let mut block = Vec::new();
    block.extend_from_slice(&4u32.to_le_bytes());
    block.extend_from_slice(&[0x22u8; 32]);
    block.extend_from_slice(&[0x33u8; 32]);
    block.extend_from_slice(&1_700_000_000u32.to_le_bytes());
    block.extend_from_slice(&0x1a01_ab3fu32.to_le_bytes());
    block.extend_from_slice(&7u32.to_le_bytes());
    push_varint(&mut block, 2);

    // Coinbase.
    block.extend_from_slice(&1u32.to_le_bytes());
    push_varint(&mut block, 1);
    block.extend_from_slice(&[0u8; 32]);
    block.extend_from_slice(&u32::MAX.to_le_bytes());
    let cb_script = vec![0x03, height as u8, (height >> 8) as u8, (height >> 16) as u8];
    push_varint(&mut block, cb_script.len() as u64);
    block.extend_from_slice(&cb_script);
    block.extend_from_slice(&u32::MAX.to_le_bytes());
    push_varint(&mut block, 1);
    block.extend_from_slice(&5_000_000_000u64.to_le_bytes());
    let reward = p2pkh_script(&[0x11; 20]);
    push_varint(&mut block, reward.len() as u64);
    block.extend_from_slice(&reward);
    block.extend_from_slice(&0u32.to_le_bytes());

    // Payment.
    block.extend_from_slice(&1u32.to_le_bytes());
    push_varint(&mut block, 1);
    block.extend_from_slice(&[0xabu8; 32]);
    block.extend_from_slice(&0u32.to_le_bytes());
    push_varint(&mut block, 0);
    block.extend_from_slice(&0xffff_ffffu32.to_le_bytes());
    push_varint(&mut block, 1);
    block.extend_from_slice(&payment_sats.to_le_bytes());
    let script = p2pkh_script(target);
    push_varint(&mut block, script.len() as u64);
    block.extend_from_slice(&script);
    block.extend_from_slice(&0u32.to_le_bytes());

    block
}

#[test]
fn withdrawal_matches_across_both_chains() {
    let db = Mutex::new(BridgeDb::open_in_memory().expect("open"));
    let target = [0x42u8; 20];

    // L2 side: one withdrawal of amount 110000000 * 1e10 wei.
    let amount_wei: u128 = 110_000_000 * UID_DIVISOR;
    let uid = (amount_wei / UID_DIVISOR) as u64;
    db.lock()
        .expect("lock")
        .apply_l2_block(
            &L2HeaderRow {
                height: 900,
                hash: "0xaaaa".into(),
                timestamp: 1_700_000_500,
                created_at: 1_700_000_501,
            },
            &[L2EventRow {
                uid,
                txhash: "0xl2withdrawal".into(),
                height: 900,
                timestamp: 1_700_000_500,
            }],
        )
        .expect("l2 side");

    // L1 side: a fabricated block paying the same uid in satoshis.
    let payload = fabricate_l1_block(4_321, 110_000_000, &target);
    let height = ingest_raw_block(&payload, &target, &db)
        .expect("ingest")
        .expect("height");
    assert_eq!(height, 4_321);

    let guard = db.lock().expect("lock");
    let joined = guard.joined_tx(uid).expect("query").expect("row");
    assert!(joined.is_matched());
    assert_eq!(joined.uid, 110_000_000);
    assert_eq!(joined.l2_height, Some(900));
    assert_eq!(joined.l1_height, Some(4_321));
    assert_eq!(joined.l2_txhash.as_deref(), Some("0xl2withdrawal"));
}

#[test]
fn reorg_rollback_rewrites_the_orphaned_height() {
    let mut db = BridgeDb::open_in_memory().expect("open");

    // Original branch: block B_h with one withdrawal.
    db.apply_l2_block(
        &L2HeaderRow {
            height: 50,
            hash: "0xbranch-a".into(),
            timestamp: 1_700_000_000,
            created_at: 1_700_000_001,
        },
        &[L2EventRow {
            uid: 77,
            txhash: "0xorphaned".into(),
            height: 50,
            timestamp: 1_700_000_000,
        }],
    )
    .expect("apply B_h");

    // Parent-hash mismatch detected: rewind height 50.
    db.rollback_l2(50).expect("rollback");
    assert!(db.l2_header_at(50).expect("query").is_none());
    let cleared = db.joined_tx(77).expect("query").expect("row");
    assert!(cleared.l2_txhash.is_none());
    assert!(cleared.l2_height.is_none());

    // Replacement branch: block B'_h without the withdrawal.
    db.apply_l2_block(
        &L2HeaderRow {
            height: 50,
            hash: "0xbranch-b".into(),
            timestamp: 1_700_000_002,
            created_at: 1_700_000_003,
        },
        &[],
    )
    .expect("apply B'_h");

    let header = db.l2_header_at(50).expect("query").expect("row");
    assert_eq!(header.hash, "0xbranch-b");
    let row = db.joined_tx(77).expect("query").expect("row");
    assert!(row.l2_txhash.is_none(), "orphaned rows stay cleared");
}

#[test]
fn l1_blocks_with_no_matching_outputs_store_header_only() {
    let db = Mutex::new(BridgeDb::open_in_memory().expect("open"));
    let target = [0x42u8; 20];
    let other = [0x43u8; 20];

    let payload = fabricate_l1_block(10, 99, &other);
    ingest_raw_block(&payload, &target, &db).expect("ingest");

    let guard = db.lock().expect("lock");
    assert!(guard.l1_header_at(10).expect("query").is_some());
    assert!(guard.joined_tx(99).expect("query").is_none());
}
