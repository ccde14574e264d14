//! Deterministic account derivation from the funding mnemonic.
//!
//! Index 0 is the funder; everything above it is a load-bearing sub-account.
//! Derivation follows the standard EVM path `m/44'/60'/0'/0/index`.

use alloy::primitives::Address;
use alloy::signers::local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner};

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone)]
pub struct DerivedAccount {
    pub index: u32,
    pub address: Address,
    pub signer: PrivateKeySigner,
}

pub fn derive(seed: &str, index: u32) -> Result<DerivedAccount> {
    let signer = MnemonicBuilder::<English>::default()
        .phrase(seed.trim())
        .index(index)
        .map_err(|err| ConfigError::BadSeed {
            index,
            reason: err.to_string(),
        })?
        .build()
        .map_err(|err| ConfigError::BadSeed {
            index,
            reason: err.to_string(),
        })?;

    Ok(DerivedAccount {
        index,
        address: signer.address(),
        signer,
    })
}

/// Derive the funder (index 0) plus `count` sub-accounts (indices 1..=count).
pub fn derive_fleet(seed: &str, count: u32) -> Result<(DerivedAccount, Vec<DerivedAccount>)> {
    let funder = derive(seed, 0)?;
    let mut subs = Vec::with_capacity(count as usize);
    for index in 1..=count {
        subs.push(derive(seed, index)?);
    }
    Ok((funder, subs))
}
