//! Run orchestration: mode dispatch and the transfer-mode pipeline
//! (distribute, build, sign, submit, collect).

pub mod args;

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;
use tokio::task::JoinSet;

pub use args::{Args, Mode};

use crate::builder::{
    self, BuildMode, GasPlan, ReadyAccount, ERC20_CALL_GAS_LIMIT, ERC721_MINT_GAS_LIMIT,
    WITHDRAW_GAS_LIMIT,
};
use crate::distributor::Distributor;
use crate::error::ConfigError;
use crate::keys::{self, DerivedAccount};
use crate::nonce::NonceBook;
use crate::pending;
use crate::reconciler::{self, ReconcilerConfig, ReconcilerHandle};
use crate::rpc::RpcClient;
use crate::signer;
use crate::stats::{self, StatCollector};
use crate::submitter;
use crate::token::{TokenArtifact, TokenRuntime};
use crate::utils::config;

const GWEI: u128 = 1_000_000_000;
/// Floor value for withdrawal transactions; uid increments stack on top.
const WITHDRAW_MIN_VALUE_WEI: u128 = 1_000_000_000_000;

pub async fn run(args: Args) -> anyhow::Result<()> {
    let client = Arc::new(RpcClient::new(&args.json_rpc)?);

    // Probe connectivity before anything expensive starts.
    let head = client.block_number().await?;
    tracing::info!(endpoint = client.endpoint(), head, "node reachable");

    match args.mode {
        Mode::GetPendingCount => {
            pending::report_pending_count(client).await?;
            Ok(())
        }
        Mode::ClearPending => run_clear_pending(client, &args).await,
        _ => run_load(client, &args).await,
    }
}

fn require_mnemonic(args: &Args) -> anyhow::Result<&str> {
    match args.mnemonic.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        Some(seed) => Ok(seed),
        None => Err(crate::error::FloodError::from(ConfigError::Missing(format!(
            "--mnemonic is required for mode {}",
            args.mode.as_str()
        )))
        .into()),
    }
}

async fn resolve_gas_price(client: &RpcClient, fixed: bool) -> anyhow::Result<u128> {
    if fixed {
        return Ok(GWEI);
    }
    Ok(client.gas_price().await?)
}

async fn run_clear_pending(client: Arc<RpcClient>, args: &Args) -> anyhow::Result<()> {
    let seed = require_mnemonic(args)?;
    let chain_id = client.chain_id().await?;
    let range = args.clear_range();
    tracing::info!(?range, "clearing stuck transactions");
    pending::clear_pending(client, seed, range, args.concurrency, chain_id).await?;
    Ok(())
}

/// Seed each ready account's local nonce counter from the node, in waves.
/// Accounts whose nonce cannot be read are dropped from the run.
async fn init_ready_nonces(
    client: &Arc<RpcClient>,
    ready: &[DerivedAccount],
    concurrency: usize,
) -> Vec<ReadyAccount> {
    let mut out = Vec::with_capacity(ready.len());
    for wave in ready.chunks(concurrency.max(1)) {
        let mut join_set = JoinSet::new();
        for account in wave {
            let client = Arc::clone(client);
            let index = account.index;
            let address = account.address;
            join_set.spawn(async move {
                let nonce = client.get_tx_count(address, "latest").await;
                (index, address, nonce)
            });
        }
        while let Some(outcome) = join_set.join_next().await {
            match outcome {
                Ok((index, address, Ok(next_nonce))) => out.push(ReadyAccount {
                    index,
                    address,
                    next_nonce,
                }),
                Ok((index, _, Err(err))) => {
                    tracing::warn!(account = index, "nonce query failed; dropping: {err}")
                }
                Err(err) => tracing::warn!("nonce query task aborted: {err}"),
            }
        }
    }
    out.sort_by_key(|a| a.index);
    out
}

async fn run_load(client: Arc<RpcClient>, args: &Args) -> anyhow::Result<()> {
    let seed = require_mnemonic(args)?;
    let chain_id = client.chain_id().await?;
    let gas_price = resolve_gas_price(&client, args.fixed_gas_price).await?;
    tracing::info!(
        chain_id,
        gas_price,
        mode = args.mode.as_str(),
        sub_accounts = args.sub_accounts,
        transactions = args.transactions,
        "run starting"
    );

    let (funder, subs) = keys::derive_fleet(seed, args.sub_accounts)?;
    let nonces = NonceBook::new();

    let distributor = Distributor::new(Arc::clone(&client), args.concurrency, chain_id);
    let outcome = distributor
        .ensure_ready(&nonces, &funder, &subs, args.transactions, gas_price)
        .await?;
    if outcome.ready.is_empty() {
        anyhow::bail!("no sub-account is ready; nothing to submit");
    }

    let mut reconciler_handle: Option<ReconcilerHandle> = None;
    let (mode, gas_limit) = match args.mode {
        Mode::Eoa => {
            let base_gas = distributor.estimate_base_gas(&funder).await;
            (BuildMode::Eoa, base_gas)
        }
        Mode::Erc20 => {
            let artifact = TokenArtifact::erc20_from_env()?;
            let runtime = TokenRuntime::new(Arc::clone(&client), args.concurrency, chain_id);
            let token = runtime
                .deploy(&nonces, &funder, &artifact, gas_price)
                .await?;
            runtime
                .fund_token_balances(
                    &nonces,
                    &funder,
                    token,
                    &outcome.ready,
                    args.transactions,
                    gas_price,
                )
                .await?;
            (BuildMode::Erc20 { token }, ERC20_CALL_GAS_LIMIT)
        }
        Mode::Erc721 => {
            let artifact = TokenArtifact::erc721_from_env()?;
            let runtime = TokenRuntime::new(Arc::clone(&client), args.concurrency, chain_id);
            let token = runtime
                .deploy(&nonces, &funder, &artifact, gas_price)
                .await?;
            (BuildMode::Erc721 { token }, ERC721_MINT_GAS_LIMIT)
        }
        Mode::Withdrawal => {
            let moat: Address = args
                .moat_address
                .as_deref()
                .ok_or_else(|| ConfigError::Missing("--moat-address".to_string()))?
                .parse()
                .map_err(|err| {
                    ConfigError::Invalid(format!("--moat-address is not an address: {err}"))
                })?;
            let target = builder::decode_l1_target(
                args.target_address
                    .as_deref()
                    .ok_or_else(|| ConfigError::Missing("--target-address".to_string()))?,
            )?;
            let uid_divisor = config::uid_divisor();
            reconciler_handle = Some(
                reconciler::spawn(
                    Arc::clone(&client),
                    ReconcilerConfig {
                        db_path: config::db_path(),
                        zmq_endpoint: config::doge_zmq_endpoint(),
                        moat,
                        target,
                        uid_divisor,
                    },
                )
                .await?,
            );
            (
                BuildMode::Withdraw {
                    moat,
                    target,
                    min_value: U256::from(WITHDRAW_MIN_VALUE_WEI),
                    uid_divisor,
                },
                WITHDRAW_GAS_LIMIT,
            )
        }
        Mode::ClearPending | Mode::GetPendingCount => unreachable!("dispatched in run()"),
    };

    let mut ready = init_ready_nonces(&client, &outcome.ready, args.concurrency).await;
    if ready.is_empty() {
        anyhow::bail!("every ready account lost its nonce probe; nothing to submit");
    }

    let start_block = client.block_number().await?;
    let queues = builder::build_queues(
        &mut ready,
        args.transactions,
        &mode,
        GasPlan {
            gas_price,
            gas_limit,
            chain_id,
        },
    );
    builder::audit_duplicate_nonces(&queues)?;

    let signers: HashMap<Address, PrivateKeySigner> = outcome
        .ready
        .iter()
        .map(|account| (account.address, account.signer.clone()))
        .collect();
    let signed = signer::sign_queues(&queues, &signers, 0).await?;
    tracing::info!(
        senders = signed.len(),
        total = signed.iter().map(|q| q.len()).sum::<usize>(),
        "signing complete"
    );

    let report = submitter::submit(Arc::clone(&client), &signed, args.concurrency, args.batch).await?;

    let collector = StatCollector::new(Arc::clone(&client));
    let collected = collector.collect(&report.hashes, start_block).await?;

    if let Some(path) = &args.output {
        stats::write_report(path, &collected.report)?;
    }

    if let Some(handle) = reconciler_handle {
        handle.shutdown();
    }

    tracing::info!(
        submitted = report.hashes.len(),
        rejected = report.rejected,
        failed_batches = report.failed_batches,
        mined = collected.found.len(),
        tps = collected.report.tps,
        "run complete: {}/{} transactions mined",
        collected.found.len(),
        collected.total
    );
    Ok(())
}
