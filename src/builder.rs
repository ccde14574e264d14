//! Per-sender transaction queue construction.
//!
//! Transaction `i` is sent by `accounts[i % n]` to `accounts[(i+1) % n]`
//! (where the mode has a receiver). Nonces come from each account's local
//! counter, bumped once per enqueued spec, so a sender's queue is a strictly
//! increasing contiguous run.

use alloy::consensus::TxLegacy;
use alloy::primitives::{Address, Bytes, FixedBytes, TxKind, U256};
use alloy::sol_types::SolCall;

use crate::error::{ConfigError, InvariantError, Result};

alloy::sol! {
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
    }

    interface IERC721Mint {
        function mint(address to, uint256 tokenId) external;
    }

    interface IMoat {
        function withdrawToL1(bytes20 targetHash) external payable;
        event WithdrawalQueued(address indexed sender, bytes20 target, uint256 amount);
    }
}

/// Value moved by each EOA-mode transfer.
pub const EOA_TRANSFER_VALUE_WEI: u64 = 1;
/// Amount moved by each ERC-20 mode transfer.
pub const ERC20_TRANSFER_AMOUNT: u64 = 1;

// Flat gas budgets for the contract-call modes; generous limits beat a
// per-transaction estimate at this volume.
pub const ERC20_CALL_GAS_LIMIT: u64 = 90_000;
pub const ERC721_MINT_GAS_LIMIT: u64 = 150_000;
pub const WITHDRAW_GAS_LIMIT: u64 = 300_000;

#[derive(Debug, Clone)]
pub struct ReadyAccount {
    pub index: u32,
    pub address: Address,
    pub next_nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSpec {
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub nonce: u64,
    pub chain_id: u64,
}

impl TxSpec {
    pub fn to_legacy(&self) -> TxLegacy {
        TxLegacy {
            chain_id: Some(self.chain_id),
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: match self.to {
                Some(addr) => TxKind::Call(addr),
                None => TxKind::Create,
            },
            value: self.value,
            input: self.data.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum BuildMode {
    Eoa,
    Erc20 {
        token: Address,
    },
    Erc721 {
        token: Address,
    },
    Withdraw {
        moat: Address,
        target: FixedBytes<20>,
        min_value: U256,
        uid_divisor: u128,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct GasPlan {
    pub gas_price: u128,
    pub gas_limit: u64,
    pub chain_id: u64,
}

/// Build per-sender queues totalling `num_tx` specs. Account nonce counters
/// advance once per enqueued spec.
pub fn build_queues(
    accounts: &mut [ReadyAccount],
    num_tx: usize,
    mode: &BuildMode,
    gas: GasPlan,
) -> Vec<Vec<TxSpec>> {
    let n = accounts.len();
    let mut queues: Vec<Vec<TxSpec>> = vec![Vec::new(); n];
    if n == 0 || num_tx == 0 {
        return queues;
    }

    let addresses: Vec<Address> = accounts.iter().map(|a| a.address).collect();
    for i in 0..num_tx {
        let sender_slot = i % n;
        let receiver = addresses[(i + 1) % n];
        let (to, value, data) = match mode {
            BuildMode::Eoa => (
                Some(receiver),
                U256::from(EOA_TRANSFER_VALUE_WEI),
                Bytes::new(),
            ),
            BuildMode::Erc20 { token } => {
                let calldata = IERC20::transferCall {
                    to: receiver,
                    amount: U256::from(ERC20_TRANSFER_AMOUNT),
                }
                .abi_encode();
                (Some(*token), U256::ZERO, Bytes::from(calldata))
            }
            BuildMode::Erc721 { token } => {
                let calldata = IERC721Mint::mintCall {
                    to: receiver,
                    tokenId: U256::from(i as u64),
                }
                .abi_encode();
                (Some(*token), U256::ZERO, Bytes::from(calldata))
            }
            BuildMode::Withdraw {
                moat,
                target,
                min_value,
                uid_divisor,
            } => {
                let calldata = IMoat::withdrawToL1Call {
                    targetHash: *target,
                }
                .abi_encode();
                // Encode a per-tx uid into the value so the L1 observer can
                // join the two sides: uid = (value - min_value) / divisor.
                let value = min_value
                    .saturating_add(U256::from(i as u128).saturating_mul(U256::from(*uid_divisor)));
                (Some(*moat), value, Bytes::from(calldata))
            }
        };

        let sender = &mut accounts[sender_slot];
        let nonce = sender.next_nonce;
        sender.next_nonce += 1;
        queues[sender_slot].push(TxSpec {
            from: sender.address,
            to,
            value,
            data,
            gas_limit: gas.gas_limit,
            gas_price: gas.gas_price,
            nonce,
            chain_id: gas.chain_id,
        });
    }

    queues
}

/// Decode a base58check L1 address into the 20-byte hash the moat contract
/// expects (the one-byte version prefix is stripped).
pub fn decode_l1_target(address: &str) -> Result<FixedBytes<20>> {
    let payload = bs58::decode(address.trim())
        .with_check(None)
        .into_vec()
        .map_err(|err| {
            ConfigError::Invalid(format!("target address `{address}` is not base58check: {err}"))
        })?;
    if payload.len() != 21 {
        return Err(ConfigError::Invalid(format!(
            "target address `{address}` decodes to {} bytes, expected 21",
            payload.len()
        ))
        .into());
    }
    Ok(FixedBytes::<20>::from_slice(&payload[1..]))
}

/// Verify that no sender's queue carries a duplicated nonce. Returns the
/// first conflict found, if any.
pub fn audit_duplicate_nonces(queues: &[Vec<TxSpec>]) -> Result<()> {
    for queue in queues {
        let mut seen = std::collections::HashSet::with_capacity(queue.len());
        for spec in queue {
            if !seen.insert(spec.nonce) {
                return Err(InvariantError::NonceConflict {
                    address: format!("{:#x}", spec.from),
                    nonce: spec.nonce,
                }
                .into());
            }
        }
    }
    Ok(())
}
