//! Build -> sign pipeline invariants, exercised end-to-end without a node.

use std::collections::HashMap;

use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;

use floodgate::builder::{build_queues, BuildMode, GasPlan, ReadyAccount};
use floodgate::keys;
use floodgate::signer::sign_queues;

const TEST_MNEMONIC: &str = "test test test test test test test test test test test junk";

fn fleet(count: u32) -> (Vec<ReadyAccount>, HashMap<Address, PrivateKeySigner>) {
    let mut accounts = Vec::new();
    let mut signers = HashMap::new();
    for index in 1..=count {
        let derived = keys::derive(TEST_MNEMONIC, index).expect("derive");
        accounts.push(ReadyAccount {
            index,
            address: derived.address,
            next_nonce: 0,
        });
        signers.insert(derived.address, derived.signer);
    }
    (accounts, signers)
}

#[tokio::test]
async fn small_eoa_run_produces_ten_orderly_signed_txs() {
    let (mut accounts, signers) = fleet(4);
    let plan = GasPlan {
        gas_price: 1_000_000_000,
        gas_limit: 21_000,
        chain_id: 1337,
    };

    let queues = build_queues(&mut accounts, 10, &BuildMode::Eoa, plan);
    floodgate::builder::audit_duplicate_nonces(&queues).expect("no conflicts");

    // Round-robin over 4 senders: two get ceil(10/4) txs, two get floor.
    let mut lengths: Vec<usize> = queues.iter().map(|q| q.len()).collect();
    assert_eq!(lengths.iter().sum::<usize>(), 10);
    lengths.sort_unstable();
    assert_eq!(lengths, vec![2, 2, 3, 3]);
    for (account, queue) in accounts.iter().zip(&queues) {
        assert_eq!(account.next_nonce, queue.len() as u64);
    }

    let signed = sign_queues(&queues, &signers, 3).await.expect("sign");
    assert_eq!(signed.iter().map(|q| q.len()).sum::<usize>(), 10);

    // Every raw payload decodes back to the legacy tx it was built from.
    for (queue, specs) in signed.iter().zip(&queues) {
        for (tx, spec) in queue.iter().zip(specs) {
            let envelope =
                TxEnvelope::decode_2718(&mut tx.raw.as_ref()).expect("raw payload decodes");
            assert_eq!(envelope.tx_hash(), &tx.hash);
            assert_eq!(envelope.nonce(), spec.nonce);
            assert_eq!(envelope.chain_id(), Some(spec.chain_id));
        }
    }

    // Per-sender nonce order survives the worker fan-out.
    for queue in &signed {
        for pair in queue.windows(2) {
            assert!(pair[0].nonce < pair[1].nonce);
        }
    }
}

#[tokio::test]
async fn signing_is_stable_across_worker_counts() {
    let (mut accounts, signers) = fleet(3);
    let queues = build_queues(
        &mut accounts,
        9,
        &BuildMode::Eoa,
        GasPlan {
            gas_price: 2_000_000_000,
            gas_limit: 21_000,
            chain_id: 31337,
        },
    );

    let one = sign_queues(&queues, &signers, 1).await.expect("sign");
    let many = sign_queues(&queues, &signers, 8).await.expect("sign");

    let flat_one: Vec<_> = one.iter().flatten().map(|t| t.hash).collect();
    let flat_many: Vec<_> = many.iter().flatten().map(|t| t.hash).collect();
    assert_eq!(flat_one, flat_many);
}
