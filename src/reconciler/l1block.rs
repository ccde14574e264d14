//! Raw L1 (UTXO-chain) block parsing.
//!
//! The feed delivers complete serialized blocks. Hashes are double SHA-256
//! emitted in reversed byte order, heights come out of the coinbase script
//! (BIP34), and the transaction decoder handles the legacy layout only; the
//! feed never carries the segregated-witness serialization.

use sha2::{Digest, Sha256};
use thiserror::Error;

pub const HEADER_LEN: usize = 80;

/// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`
const P2PKH_LEN: usize = 25;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum L1ParseError {
    #[error("payload too short for a block header: {0} bytes")]
    TooShort(usize),
    #[error("truncated block at offset {0}")]
    Truncated(usize),
    #[error("oversized varint at offset {0}")]
    VarInt(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct L1Header {
    pub hash: String,
    pub version: i32,
    pub prev_hash: String,
    pub merkle_root: String,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct L1Transaction {
    pub txid: String,
    /// Satoshi values of P2PKH outputs paying the configured target hash.
    pub target_payments: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBlock {
    pub header: L1Header,
    /// BIP34 height from the coinbase script; absent when the script does not
    /// start with a sane push.
    pub height: Option<u64>,
    pub txs: Vec<L1Transaction>,
}

pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

fn reversed_hex(digest: [u8; 32]) -> String {
    let mut bytes = digest;
    bytes.reverse();
    hex::encode(bytes)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], L1ParseError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(L1ParseError::Truncated(self.pos))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32_le(&mut self) -> Result<u32, L1ParseError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64_le(&mut self) -> Result<u64, L1ParseError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    fn varint(&mut self) -> Result<u64, L1ParseError> {
        let at = self.pos;
        let marker = self.take(1)?[0];
        match marker {
            0x00..=0xfc => Ok(marker as u64),
            0xfd => {
                let bytes = self.take(2)?;
                Ok(u16::from_le_bytes([bytes[0], bytes[1]]) as u64)
            }
            0xfe => Ok(self.u32_le()? as u64),
            0xff => {
                let value = self.u64_le()?;
                if value > u32::MAX as u64 * 1024 {
                    return Err(L1ParseError::VarInt(at));
                }
                Ok(value)
            }
        }
    }
}

/// Little-endian height pushed at the front of the coinbase input script.
fn coinbase_height(script: &[u8]) -> Option<u64> {
    let push_len = *script.first()? as usize;
    if push_len == 0 || push_len > 8 || script.len() < 1 + push_len {
        return None;
    }
    let mut height = 0u64;
    for (i, byte) in script[1..1 + push_len].iter().enumerate() {
        height |= (*byte as u64) << (8 * i);
    }
    Some(height)
}

fn p2pkh_hash160(script: &[u8]) -> Option<&[u8]> {
    if script.len() == P2PKH_LEN
        && script[0] == 0x76 // OP_DUP
        && script[1] == 0xa9 // OP_HASH160
        && script[2] == 0x14 // push 20
        && script[23] == 0x88 // OP_EQUALVERIFY
        && script[24] == 0xac
    // OP_CHECKSIG
    {
        Some(&script[3..23])
    } else {
        None
    }
}

/// Parse one raw block. `target` selects the P2PKH outputs whose satoshi
/// value becomes the cross-chain `uid`.
pub fn parse_raw_block(payload: &[u8], target: &[u8; 20]) -> Result<ParsedBlock, L1ParseError> {
    if payload.len() < HEADER_LEN {
        return Err(L1ParseError::TooShort(payload.len()));
    }

    let mut reader = Reader::new(payload);
    let version = reader.u32_le()? as i32;
    let mut prev = [0u8; 32];
    prev.copy_from_slice(reader.take(32)?);
    prev.reverse();
    let mut merkle = [0u8; 32];
    merkle.copy_from_slice(reader.take(32)?);
    merkle.reverse();
    let timestamp = reader.u32_le()?;
    let bits = reader.u32_le()?;
    let nonce = reader.u32_le()?;

    let header = L1Header {
        hash: reversed_hex(double_sha256(&payload[..HEADER_LEN])),
        version,
        prev_hash: hex::encode(prev),
        merkle_root: hex::encode(merkle),
        timestamp,
        bits,
        nonce,
        size_bytes: payload.len(),
    };

    let tx_count = reader.varint()?;
    let mut txs = Vec::with_capacity(tx_count.min(16_384) as usize);
    let mut height = None;

    for tx_index in 0..tx_count {
        let tx_start = reader.pos;
        reader.u32_le()?; // tx version

        let vin_count = reader.varint()?;
        for vin_index in 0..vin_count {
            reader.take(32)?; // previous txid
            reader.u32_le()?; // previous vout index
            let script_len = reader.varint()? as usize;
            let script = reader.take(script_len)?;
            reader.u32_le()?; // sequence
            if tx_index == 0 && vin_index == 0 {
                height = coinbase_height(script);
            }
        }

        let vout_count = reader.varint()?;
        let mut target_payments = Vec::new();
        for _ in 0..vout_count {
            let value = reader.u64_le()?;
            let script_len = reader.varint()? as usize;
            let script = reader.take(script_len)?;
            if p2pkh_hash160(script) == Some(target.as_slice()) {
                target_payments.push(value);
            }
        }

        reader.u32_le()?; // locktime

        txs.push(L1Transaction {
            txid: reversed_hex(double_sha256(&payload[tx_start..reader.pos])),
            target_payments,
        });
    }

    Ok(ParsedBlock {
        header,
        height,
        txs,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

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

    fn coinbase_tx(height: u64) -> Vec<u8> {
        let mut tx = Vec::new();
        tx.extend_from_slice(&1u32.to_le_bytes()); // version
        push_varint(&mut tx, 1); // one input
        tx.extend_from_slice(&[0u8; 32]); // null prevout
        tx.extend_from_slice(&u32::MAX.to_le_bytes());
        let script = vec![0x03, height as u8, (height >> 8) as u8, (height >> 16) as u8];
        push_varint(&mut tx, script.len() as u64);
        tx.extend_from_slice(&script);
        tx.extend_from_slice(&u32::MAX.to_le_bytes()); // sequence
        push_varint(&mut tx, 1); // one output
        tx.extend_from_slice(&5_000_000_000u64.to_le_bytes());
        let reward_script = p2pkh_script(&[0x11; 20]);
        push_varint(&mut tx, reward_script.len() as u64);
        tx.extend_from_slice(&reward_script);
        tx.extend_from_slice(&0u32.to_le_bytes()); // locktime
        tx
    }

    fn payment_tx(value: u64, to: &[u8; 20]) -> Vec<u8> {
        let mut tx = Vec::new();
        tx.extend_from_slice(&1u32.to_le_bytes());
        push_varint(&mut tx, 1);
        tx.extend_from_slice(&[0xabu8; 32]);
        tx.extend_from_slice(&0u32.to_le_bytes());
        push_varint(&mut tx, 2);
        tx.extend_from_slice(&[0x00, 0x00]); // placeholder scriptSig
        tx.extend_from_slice(&0xffff_ffffu32.to_le_bytes());
        push_varint(&mut tx, 2);
        // Output 0: the payment under observation.
        tx.extend_from_slice(&value.to_le_bytes());
        let script = p2pkh_script(to);
        push_varint(&mut tx, script.len() as u64);
        tx.extend_from_slice(&script);
        // Output 1: change to an unrelated key.
        tx.extend_from_slice(&123_456u64.to_le_bytes());
        let change = p2pkh_script(&[0x99; 20]);
        push_varint(&mut tx, change.len() as u64);
        tx.extend_from_slice(&change);
        tx.extend_from_slice(&0u32.to_le_bytes());
        tx
    }

    pub(crate) fn fabricate_block(height: u64, payment_value: u64, target: &[u8; 20]) -> Vec<u8> {
        let mut block = Vec::new();
        block.extend_from_slice(&0x0062_0004u32.to_le_bytes()); // version
        block.extend_from_slice(&[0x22u8; 32]); // prev hash
        block.extend_from_slice(&[0x33u8; 32]); // merkle root
        block.extend_from_slice(&1_700_000_000u32.to_le_bytes()); // timestamp
        block.extend_from_slice(&0x1a01_ab3fu32.to_le_bytes()); // bits
        block.extend_from_slice(&7u32.to_le_bytes()); // nonce
        push_varint(&mut block, 2);
        block.extend_from_slice(&coinbase_tx(height));
        block.extend_from_slice(&payment_tx(payment_value, target));
        block
    }

    #[test]
    fn short_payload_is_rejected() {
        let target = [0u8; 20];
        assert_eq!(
            parse_raw_block(&[0u8; 79], &target),
            Err(L1ParseError::TooShort(79))
        );
    }

    #[test]
    fn genesis_header_hash_matches_the_known_value() {
        // The Bitcoin genesis header, followed by a zero tx count; the hash
        // must come out byte-reversed as every explorer displays it.
        let mut payload = hex::decode(
            "0100000000000000000000000000000000000000000000000000000000000000\
             000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa\
             4b1e5e4a29ab5f49ffff001d1dac2b7c",
        )
        .expect("header hex");
        payload.push(0x00);

        let parsed = parse_raw_block(&payload, &[0u8; 20]).expect("parse");
        assert_eq!(
            parsed.header.hash,
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
        assert_eq!(parsed.header.version, 1);
        assert_eq!(parsed.header.timestamp, 1231006505);
        assert!(parsed.txs.is_empty());
        assert!(parsed.height.is_none());
    }

    #[test]
    fn fabricated_block_yields_height_and_target_payment() {
        let target = [0x42u8; 20];
        let payload = fabricate_block(31_337, 110_000_000, &target);

        let parsed = parse_raw_block(&payload, &target).expect("parse");
        assert_eq!(parsed.height, Some(31_337));
        assert_eq!(parsed.txs.len(), 2);
        assert!(parsed.txs[0].target_payments.is_empty());
        assert_eq!(parsed.txs[1].target_payments, vec![110_000_000]);
        assert_eq!(parsed.header.size_bytes, payload.len());
        assert_eq!(parsed.txs[1].txid.len(), 64);
    }

    #[test]
    fn unrelated_p2pkh_outputs_are_ignored() {
        let target = [0x42u8; 20];
        let other = [0x43u8; 20];
        let payload = fabricate_block(1, 99, &other);

        let parsed = parse_raw_block(&payload, &target).expect("parse");
        assert!(parsed.txs.iter().all(|tx| tx.target_payments.is_empty()));
    }

    #[test]
    fn truncated_tx_section_is_an_error() {
        let target = [0x42u8; 20];
        let mut payload = fabricate_block(1, 99, &target);
        payload.truncate(payload.len() - 10);
        assert!(matches!(
            parse_raw_block(&payload, &target),
            Err(L1ParseError::Truncated(_))
        ));
    }

    #[test]
    fn coinbase_height_rejects_nonsense_pushes() {
        assert_eq!(coinbase_height(&[]), None);
        assert_eq!(coinbase_height(&[0x00]), None);
        assert_eq!(coinbase_height(&[0x09, 1, 2]), None);
        assert_eq!(coinbase_height(&[0x02, 0x39, 0x05]), Some(1337));
    }

    #[test]
    fn txid_matches_double_sha_of_body() {
        let target = [0x42u8; 20];
        let tx = payment_tx(5, &target);
        let expected = reversed_hex(double_sha256(&tx));

        let mut block = vec![0u8; HEADER_LEN];
        push_varint(&mut block, 1);
        block.extend_from_slice(&tx);

        let parsed = parse_raw_block(&block, &target).expect("parse");
        assert_eq!(parsed.txs[0].txid, expected);
    }
}
