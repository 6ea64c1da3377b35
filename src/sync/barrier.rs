use std::collections::BTreeSet;

use crate::error::{NodeError, Result};
use crate::sync::waiter::{Completion, Outcome, OutcomeRx, Waiter};
use crate::sync::SyncCoordinator;

/// Cluster-wide barrier bookkeeping of one node.
///
/// `active` is set from the moment this node learns about a barrier (its own
/// call or a `Synchronize` from a peer) until `AllSynchronized`. The leader
/// additionally tracks who confirmed.
#[derive(Default)]
pub(crate) struct BarrierState {
    active: bool,
    local_call: Option<Waiter<()>>,
    /// Leader only: members that must confirm, set once collection starts.
    expected: Option<BTreeSet<u64>>,
    confirmations: BTreeSet<u64>,
}

impl BarrierState {
    fn complete_if_covered(&self) -> bool {
        match &self.expected {
            Some(expected) => expected.is_subset(&self.confirmations),
            None => false,
        }
    }
}

impl SyncCoordinator {
    /// Register a local `synchronize` call. Fails while another local call
    /// is outstanding.
    pub(crate) async fn begin_barrier(
        &self,
        callback: Option<Completion<()>>,
    ) -> Result<Option<OutcomeRx<()>>> {
        let mut barrier = self.barrier.lock().await;
        if barrier.local_call.is_some() {
            return Err(NodeError::SyncInProgress);
        }
        let mut waiter = Waiter::new();
        let rx = waiter.attach(callback);
        barrier.local_call = Some(waiter);
        barrier.active = true;
        Ok(rx)
    }

    /// Undo `begin_barrier` when the request could not be sent.
    pub(crate) async fn cancel_barrier(&self) {
        let mut barrier = self.barrier.lock().await;
        barrier.active = false;
        barrier.local_call = None;
    }

    /// A peer announced a barrier.
    pub(crate) async fn barrier_requested(&self) {
        self.barrier.lock().await.active = true;
    }

    /// Leader: start collecting confirmations from `members` (everyone but
    /// the leader). Returns true when the barrier is already satisfied.
    pub(crate) async fn collect_confirmations(&self, members: BTreeSet<u64>) -> bool {
        let mut barrier = self.barrier.lock().await;
        barrier.active = true;
        if barrier.expected.is_none() {
            tracing::debug!(expected = ?members, "Collecting barrier confirmations");
            barrier.expected = Some(members);
        }
        barrier.complete_if_covered()
    }

    /// Leader: record a confirmation. Confirmations arriving before the
    /// request are kept for when collection starts.
    pub(crate) async fn record_confirmation(&self, member: u64) -> bool {
        let mut barrier = self.barrier.lock().await;
        barrier.confirmations.insert(member);
        barrier.complete_if_covered()
    }

    /// `AllSynchronized`: clear the bookkeeping and release the local caller.
    /// Returns whether a barrier was in flight.
    pub(crate) async fn finish_barrier(&self) -> bool {
        let (was_active, waiter) = {
            let mut barrier = self.barrier.lock().await;
            let was_active = std::mem::replace(&mut barrier.active, false);
            barrier.expected = None;
            barrier.confirmations.clear();
            (was_active, barrier.local_call.take())
        };
        if let Some(waiter) = waiter {
            waiter.resolve(Outcome::Done(()));
        }
        was_active
    }

    pub(crate) async fn barrier_in_flight(&self) -> bool {
        self.barrier.lock().await.active
    }

    /// Drop departed members from the expected set. Returns true when that
    /// completes a barrier the leader is collecting.
    pub(crate) async fn retain_barrier_members(&self, world: &BTreeSet<u64>) -> bool {
        let mut barrier = self.barrier.lock().await;
        match barrier.expected.as_mut() {
            Some(expected) => {
                expected.retain(|id| world.contains(id));
                barrier.complete_if_covered()
            }
            None => false,
        }
    }

    pub(crate) async fn abort_barrier(&self) {
        let waiter = {
            let mut barrier = self.barrier.lock().await;
            std::mem::take(&mut *barrier).local_call
        };
        if let Some(waiter) = waiter {
            waiter.resolve(Outcome::Aborted);
        }
    }
}
