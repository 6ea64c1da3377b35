use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;

use tokio::time::Instant;

use crate::message::Payload;
use crate::sync::waiter::{resolve_now, Completion, Outcome, OutcomeRx, Waiter};
use crate::sync::SyncCoordinator;

/// A `SendToSync` that arrived before the matching `receive_from_sync`.
struct Parked {
    arrived: Instant,
    call_id: String,
    payload: Payload,
}

#[derive(Default)]
pub(crate) struct RendezvousTable {
    /// Outgoing calls keyed by call id.
    sends: HashMap<String, Waiter<()>>,
    /// Incoming waits keyed by the expected sender, tagged with a generation
    /// so a stale timeout cannot expire a newer wait.
    receives: HashMap<u64, (u64, Waiter<Payload>)>,
    unclaimed: HashMap<u64, VecDeque<Parked>>,
    /// Call ids already handed to a receiver; duplicates are re-acked.
    claimed: HashMap<String, Instant>,
    generation: u64,
}

/// Result of registering a local `receive_from_sync` call.
#[derive(Debug)]
pub(crate) enum ReceiveStart {
    /// A parked payload matched; the caller must acknowledge `call_id`.
    Claimed { call_id: String },
    /// A new wait entry; the caller arms its timeout with this generation.
    Armed { generation: u64 },
    /// Joined an existing wait entry, whose timeout is already running.
    Joined,
}

impl SyncCoordinator {
    /// Unique id of an outgoing `send_to_sync`.
    pub(crate) fn next_call_id(&self, me: u64, dest: u64) -> String {
        let n = self.call_counter.fetch_add(1, Ordering::Relaxed);
        format!("{me}-{dest}-{n}")
    }

    pub(crate) async fn begin_send(
        &self,
        call_id: &str,
        callback: Option<Completion<()>>,
    ) -> Option<OutcomeRx<()>> {
        let mut waiter = Waiter::new();
        let rx = waiter.attach(callback);
        self.rendezvous
            .lock()
            .await
            .sends
            .insert(call_id.to_string(), waiter);
        rx
    }

    pub(crate) async fn send_acknowledged(&self, call_id: &str) {
        let waiter = self.rendezvous.lock().await.sends.remove(call_id);
        if let Some(waiter) = waiter {
            tracing::debug!(call_id, "Send acknowledged");
            waiter.resolve(Outcome::Done(()));
        }
    }

    /// Give up on an outgoing call. No-op once acknowledged.
    pub(crate) async fn expire_send(&self, call_id: &str) {
        let waiter = self.rendezvous.lock().await.sends.remove(call_id);
        if let Some(waiter) = waiter {
            tracing::debug!(call_id, "Send timed out");
            waiter.resolve(Outcome::TimedOut(self.rendezvous_timeout));
        }
    }

    pub(crate) async fn begin_receive(
        &self,
        from: u64,
        callback: Option<Completion<Payload>>,
    ) -> (Option<OutcomeRx<Payload>>, ReceiveStart) {
        let mut table = self.rendezvous.lock().await;

        if let Some(parked) = self.claim_parked(&mut table, from) {
            table.claimed.insert(parked.call_id.clone(), Instant::now());
            drop(table);
            let rx = resolve_now(callback, parked.payload);
            return (
                rx,
                ReceiveStart::Claimed {
                    call_id: parked.call_id,
                },
            );
        }

        if let Some((_, waiter)) = table.receives.get_mut(&from) {
            return (waiter.attach(callback), ReceiveStart::Joined);
        }

        table.generation += 1;
        let generation = table.generation;
        let mut waiter = Waiter::new();
        let rx = waiter.attach(callback);
        table.receives.insert(from, (generation, waiter));
        (rx, ReceiveStart::Armed { generation })
    }

    /// Give up on an incoming wait, if it is still the one armed with
    /// `generation`.
    pub(crate) async fn expire_receive(&self, from: u64, generation: u64) {
        let waiter = {
            let mut table = self.rendezvous.lock().await;
            match table.receives.get(&from) {
                Some((armed, _)) if *armed == generation => {
                    table.receives.remove(&from).map(|(_, waiter)| waiter)
                }
                _ => None,
            }
        };
        if let Some(waiter) = waiter {
            tracing::debug!(from, "Receive timed out");
            waiter.resolve(Outcome::TimedOut(self.rendezvous_timeout));
        }
    }

    /// A `SendToSync` arrived. Returns true when it was handed to a
    /// receiver and must be acknowledged.
    pub(crate) async fn payload_arrived(&self, from: u64, call_id: &str, payload: Payload) -> bool {
        let waiter = {
            let mut table = self.rendezvous.lock().await;
            let now = Instant::now();
            let timeout = self.rendezvous_timeout;
            table
                .claimed
                .retain(|_, at| now.duration_since(*at) < timeout);
            if table.claimed.contains_key(call_id) {
                return true;
            }

            match table.receives.remove(&from) {
                Some((_, waiter)) => {
                    table.claimed.insert(call_id.to_string(), now);
                    waiter
                }
                None => {
                    let queue = table.unclaimed.entry(from).or_default();
                    if !queue.iter().any(|p| p.call_id == call_id) {
                        queue.push_back(Parked {
                            arrived: now,
                            call_id: call_id.to_string(),
                            payload,
                        });
                    }
                    return false;
                }
            }
        };
        tracing::debug!(from, call_id, "Receive matched");
        waiter.resolve(Outcome::Done(payload));
        true
    }

    pub(crate) async fn abort_rendezvous(&self) {
        let (sends, receives) = {
            let mut table = self.rendezvous.lock().await;
            let table = std::mem::take(&mut *table);
            (table.sends, table.receives)
        };
        for (_, waiter) in sends {
            waiter.resolve(Outcome::Aborted);
        }
        for (_, (_, waiter)) in receives {
            waiter.resolve(Outcome::Aborted);
        }
    }

    /// Oldest parked payload from `from` whose sender may still be waiting.
    fn claim_parked(&self, table: &mut RendezvousTable, from: u64) -> Option<Parked> {
        let queue = table.unclaimed.get_mut(&from)?;
        let now = Instant::now();
        let mut found = None;
        while let Some(parked) = queue.pop_front() {
            if now.duration_since(parked.arrived) < self.rendezvous_timeout {
                found = Some(parked);
                break;
            }
        }
        if queue.is_empty() {
            table.unclaimed.remove(&from);
        }
        found
    }
}
