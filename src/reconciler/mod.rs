//! Cross-chain withdrawal reconciler.
//!
//! Two run-scoped activities share one embedded store: the L1 raw-block
//! subscriber and the L2 withdrawal follower. Rows join on `uid`, the
//! numeric identifier recoverable from both the L2 withdrawal amount and the
//! matching L1 output value.

pub mod l1block;
pub mod l1feed;
pub mod l2follow;
pub mod store;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use alloy::primitives::{Address, FixedBytes};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::rpc::RpcClient;
use l2follow::L2Follower;
use store::BridgeDb;

pub(crate) fn lock_db(db: &Mutex<BridgeDb>) -> MutexGuard<'_, BridgeDb> {
    match db.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("bridge store lock poisoned; recovering guard state");
            poisoned.into_inner()
        }
    }
}

pub(crate) fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Handle to the two background activities; aborting them ends the
/// reconciler when the run finishes.
pub struct ReconcilerHandle {
    l1: JoinHandle<()>,
    l2: JoinHandle<()>,
}

impl ReconcilerHandle {
    pub fn shutdown(self) {
        self.l1.abort();
        self.l2.abort();
    }
}

pub struct ReconcilerConfig {
    pub db_path: String,
    pub zmq_endpoint: String,
    pub moat: Address,
    pub target: FixedBytes<20>,
    pub uid_divisor: u128,
}

pub async fn spawn(client: Arc<RpcClient>, config: ReconcilerConfig) -> Result<ReconcilerHandle> {
    let db = Arc::new(Mutex::new(BridgeDb::open(&config.db_path)?));
    tracing::info!(path = %config.db_path, "bridge store opened");

    let follower = L2Follower::start(
        Arc::clone(&client),
        Arc::clone(&db),
        config.moat,
        config.uid_divisor,
    )
    .await?;

    let l1 = tokio::spawn(l1feed::run_l1_feed(
        config.zmq_endpoint,
        config.target.0,
        db,
    ));
    let l2 = tokio::spawn(follower.run());
    Ok(ReconcilerHandle { l1, l2 })
}
