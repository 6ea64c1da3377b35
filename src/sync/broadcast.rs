use std::collections::{BTreeSet, HashMap};

use tokio::time::Instant;

use crate::error::{NodeError, Result};
use crate::message::Payload;
use crate::sync::waiter::{resolve_now, Completion, Outcome, OutcomeRx, Waiter};
use crate::sync::SyncCoordinator;

pub(crate) enum BroadcastEntry {
    /// This node is the origin and waits for every acknowledgement of
    /// `round`.
    Sender {
        round: u64,
        payload: Payload,
        pending: BTreeSet<u64>,
        waiter: Waiter<Payload>,
    },
    /// This node waits for the origin's payload. Several local callers
    /// share one entry.
    Receiver { waiter: Waiter<Payload> },
}

/// A round that arrived before any local receiver asked for it. It is not
/// acknowledged until claimed.
struct ParkedRound {
    arrived: Instant,
    round: u64,
    payload: Payload,
}

/// Wait entries keyed by the origin's permanent id.
#[derive(Default)]
pub(crate) struct BroadcastTable {
    entries: HashMap<u64, BroadcastEntry>,
    unclaimed: HashMap<u64, ParkedRound>,
    /// Last round handed to a local receiver, per origin; redeliveries of
    /// it are re-acked.
    claimed: HashMap<u64, u64>,
    next_round: u64,
}

/// What the node must do after a `BroadcastSync` arrived.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// A receiver took the payload; acknowledge the round.
    Acknowledge,
    /// Nobody is waiting yet; the payload is parked unacknowledged.
    Parked,
}

impl SyncCoordinator {
    /// Sender side of `broadcast_sync`. `expected` is every member except
    /// this node. Returns the round number to tag the broadcast with.
    pub(crate) async fn begin_broadcast(
        &self,
        origin: u64,
        payload: Payload,
        expected: BTreeSet<u64>,
        callback: Option<Completion<Payload>>,
    ) -> Result<(Option<OutcomeRx<Payload>>, u64)> {
        let mut table = self.broadcasts.lock().await;
        if matches!(table.entries.get(&origin), Some(BroadcastEntry::Sender { .. })) {
            return Err(NodeError::SyncInProgress);
        }
        table.next_round += 1;
        let round = table.next_round;
        if expected.is_empty() {
            return Ok((resolve_now(callback, payload), round));
        }

        let mut waiter = Waiter::new();
        let rx = waiter.attach(callback);
        tracing::debug!(origin, round, expected = ?expected, "Broadcast sync started");
        table.entries.insert(
            origin,
            BroadcastEntry::Sender {
                round,
                payload,
                pending: expected,
                waiter,
            },
        );
        Ok((rx, round))
    }

    /// Receiver side of `broadcast_sync`: take a parked round of `origin`
    /// younger than the rendezvous timeout, or join (or create) the wait
    /// entry. A claimed round is returned so the caller can acknowledge it.
    pub(crate) async fn join_broadcast(
        &self,
        origin: u64,
        callback: Option<Completion<Payload>>,
    ) -> (Option<OutcomeRx<Payload>>, Option<u64>) {
        let mut table = self.broadcasts.lock().await;
        if let Some(parked) = table.unclaimed.remove(&origin) {
            if parked.arrived.elapsed() < self.rendezvous_timeout {
                table.claimed.insert(origin, parked.round);
                drop(table);
                return (resolve_now(callback, parked.payload), Some(parked.round));
            }
            tracing::debug!(origin, round = parked.round, "Discarding stale broadcast");
        }

        let entry = table
            .entries
            .entry(origin)
            .or_insert_with(|| BroadcastEntry::Receiver {
                waiter: Waiter::new(),
            });
        let rx = match entry {
            BroadcastEntry::Receiver { waiter } | BroadcastEntry::Sender { waiter, .. } => {
                waiter.attach(callback)
            }
        };
        (rx, None)
    }

    /// Round `round` of `origin` arrived.
    pub(crate) async fn broadcast_delivered(
        &self,
        origin: u64,
        round: u64,
        payload: Payload,
    ) -> Delivery {
        let waiter = {
            let mut table = self.broadcasts.lock().await;
            if table.claimed.get(&origin).is_some_and(|&last| round <= last) {
                return Delivery::Acknowledge;
            }
            match table.entries.remove(&origin) {
                Some(BroadcastEntry::Receiver { waiter }) => {
                    table.claimed.insert(origin, round);
                    table.unclaimed.remove(&origin);
                    waiter
                }
                other => {
                    if let Some(sender) = other {
                        table.entries.insert(origin, sender);
                    }
                    let newer = table
                        .unclaimed
                        .get(&origin)
                        .map_or(true, |parked| parked.round <= round);
                    if newer {
                        table.unclaimed.insert(
                            origin,
                            ParkedRound {
                                arrived: Instant::now(),
                                round,
                                payload,
                            },
                        );
                    }
                    return Delivery::Parked;
                }
            }
        };
        tracing::debug!(origin, round, "Broadcast sync received");
        waiter.resolve(Outcome::Done(payload));
        Delivery::Acknowledge
    }

    /// An acknowledgement from `member` for round `round` of `origin`.
    pub(crate) async fn broadcast_acknowledged(&self, origin: u64, round: u64, member: u64) {
        let mut table = self.broadcasts.lock().await;
        let done = match table.entries.get_mut(&origin) {
            Some(BroadcastEntry::Sender {
                round: current,
                pending,
                ..
            }) if *current == round => {
                pending.remove(&member);
                pending.is_empty()
            }
            _ => false,
        };
        if done {
            if let Some(BroadcastEntry::Sender {
                payload, waiter, ..
            }) = table.entries.remove(&origin)
            {
                drop(table);
                tracing::debug!(origin, round, "Broadcast sync acknowledged by all members");
                waiter.resolve(Outcome::Done(payload));
            }
        }
    }

    /// Give up on round `round` of `origin` if it is still collecting
    /// acknowledgements.
    pub(crate) async fn expire_broadcast(&self, origin: u64, round: u64) {
        let waiter = {
            let mut table = self.broadcasts.lock().await;
            let current = matches!(
                table.entries.get(&origin),
                Some(BroadcastEntry::Sender { round: r, .. }) if *r == round
            );
            if !current {
                return;
            }
            match table.entries.remove(&origin) {
                Some(BroadcastEntry::Sender {
                    waiter, pending, ..
                }) => {
                    tracing::debug!(origin, round, missing = ?pending, "Broadcast sync timed out");
                    waiter
                }
                _ => return,
            }
        };
        waiter.resolve(Outcome::TimedOut(self.rendezvous_timeout));
    }

    /// Stop waiting on acknowledgements from members that left the world.
    pub(crate) async fn retain_broadcast_members(&self, world: &BTreeSet<u64>) {
        let finished: Vec<(Payload, Waiter<Payload>)> = {
            let mut table = self.broadcasts.lock().await;
            let done: Vec<u64> = table
                .entries
                .iter_mut()
                .filter_map(|(&origin, entry)| match entry {
                    BroadcastEntry::Sender { pending, .. } => {
                        pending.retain(|id| world.contains(id));
                        pending.is_empty().then_some(origin)
                    }
                    BroadcastEntry::Receiver { .. } => None,
                })
                .collect();
            done.into_iter()
                .filter_map(|origin| match table.entries.remove(&origin) {
                    Some(BroadcastEntry::Sender {
                        payload, waiter, ..
                    }) => Some((payload, waiter)),
                    _ => None,
                })
                .collect()
        };
        for (payload, waiter) in finished {
            waiter.resolve(Outcome::Done(payload));
        }
    }

    pub(crate) async fn abort_broadcasts(&self) {
        let entries: Vec<BroadcastEntry> = {
            let mut table = self.broadcasts.lock().await;
            table.unclaimed.clear();
            table.entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            match entry {
                BroadcastEntry::Sender { waiter, .. } | BroadcastEntry::Receiver { waiter } => {
                    waiter.resolve(Outcome::Aborted)
                }
            }
        }
    }
}
