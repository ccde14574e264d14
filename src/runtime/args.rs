use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    #[value(name = "EOA")]
    Eoa,
    #[value(name = "ERC20")]
    Erc20,
    #[value(name = "ERC721")]
    Erc721,
    #[value(name = "WITHDRAWAL")]
    Withdrawal,
    #[value(name = "CLEAR_PENDING")]
    ClearPending,
    #[value(name = "GET_PENDING_COUNT")]
    GetPendingCount,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eoa => "EOA",
            Self::Erc20 => "ERC20",
            Self::Erc721 => "ERC721",
            Self::Withdrawal => "WITHDRAWAL",
            Self::ClearPending => "CLEAR_PENDING",
            Self::GetPendingCount => "GET_PENDING_COUNT",
        }
    }

    pub fn needs_mnemonic(self) -> bool {
        !matches!(self, Self::GetPendingCount)
    }
}

/// Stress-test load generator for EVM-compatible chains.
#[derive(Debug, Parser)]
#[command(name = "floodgate", version, about)]
pub struct Args {
    /// JSON-RPC endpoint of the target node
    #[arg(short = 'u', long = "json-rpc")]
    pub json_rpc: String,

    /// Funding mnemonic; account 0 pays for everything
    #[arg(short = 'm', long = "mnemonic")]
    pub mnemonic: Option<String>,

    /// Number of sub-accounts to derive and ready
    #[arg(short = 's', long = "sub-accounts", default_value_t = 10)]
    pub sub_accounts: u32,

    /// Total transactions to build and submit
    #[arg(short = 't', long = "transactions", default_value_t = 2000)]
    pub transactions: usize,

    /// JSON-RPC batch size for submission
    #[arg(short = 'b', long = "batch", default_value_t = 20)]
    pub batch: usize,

    /// Worker cap for balance/funding waves and submission
    #[arg(short = 'c', long = "concurrency", default_value_t = 20)]
    pub concurrency: usize,

    #[arg(long = "mode", value_enum, default_value_t = Mode::Eoa)]
    pub mode: Mode,

    /// Force the gas price to 1 gwei instead of querying the node
    #[arg(long = "fixed-gas-price")]
    pub fixed_gas_price: bool,

    /// Moat contract address (WITHDRAWAL mode)
    #[arg(long = "moat-address")]
    pub moat_address: Option<String>,

    /// Base58check L1 address receiving withdrawals (WITHDRAWAL mode)
    #[arg(long = "target-address")]
    pub target_address: Option<String>,

    /// Account count for CLEAR_PENDING (indices 1..=N)
    #[arg(long = "num-accounts")]
    pub num_accounts: Option<u32>,

    /// First derivation index for CLEAR_PENDING
    #[arg(long = "start-index")]
    pub start_index: Option<u32>,

    /// One past the last derivation index for CLEAR_PENDING
    #[arg(long = "end-index")]
    pub end_index: Option<u32>,

    /// Write the collected statistics as JSON to this path
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

impl Args {
    /// Derivation index range for the CLEAR_PENDING sweep.
    pub fn clear_range(&self) -> std::ops::Range<u32> {
        match (self.start_index, self.end_index) {
            (Some(start), Some(end)) => start..end,
            _ => {
                let count = self.num_accounts.unwrap_or(self.sub_accounts);
                1..count + 1
            }
        }
    }
}
