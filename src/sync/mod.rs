//! Rendezvous wait tables behind `synchronize`, `broadcast_sync` and
//! `send_to_sync` / `receive_from_sync`.
//!
//! The tables hold no references to the node; the runtime feeds them
//! inbound messages and publishes whatever replies they call for.

pub mod barrier;
pub mod broadcast;
pub mod rendezvous;
pub mod waiter;

use std::collections::BTreeSet;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use tokio::sync::Mutex;

use barrier::BarrierState;
use broadcast::BroadcastTable;
use rendezvous::RendezvousTable;

pub use waiter::Completion;

pub struct SyncCoordinator {
    barrier: Mutex<BarrierState>,
    broadcasts: Mutex<BroadcastTable>,
    rendezvous: Mutex<RendezvousTable>,
    call_counter: AtomicU64,
    rendezvous_timeout: Duration,
}

impl SyncCoordinator {
    pub fn new(rendezvous_timeout: Duration) -> Self {
        Self {
            barrier: Mutex::new(BarrierState::default()),
            broadcasts: Mutex::new(BroadcastTable::default()),
            rendezvous: Mutex::new(RendezvousTable::default()),
            call_counter: AtomicU64::new(0),
            rendezvous_timeout,
        }
    }

    pub fn rendezvous_timeout(&self) -> Duration {
        self.rendezvous_timeout
    }

    /// Release every blocked caller with a non-success outcome.
    pub async fn abort_all(&self) {
        self.abort_barrier().await;
        self.abort_broadcasts().await;
        self.abort_rendezvous().await;
    }

    /// Forget members that left `world`. Returns true when that completes a
    /// barrier this node is collecting as leader.
    pub async fn retain_members(&self, world: &BTreeSet<u64>) -> bool {
        self.retain_broadcast_members(world).await;
        self.retain_barrier_members(world).await
    }
}
