//! Discovery, registration and self-distribution of permanent ids.
//!
//! A fresh node announces itself under its ephemeral id, listens for a
//! while, then either registers with a known leader or, failing that, ranks
//! every node it heard from and adopts its own rank. All bootstrap traffic
//! is sent under the ephemeral id.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::message::Body;
use crate::node::NodeContext;
use crate::raft::state::{rank_mapping, RaftRole, RaftState};

/// Sleep unless cancelled first. Returns false on cancellation.
async fn pause(token: &CancellationToken, ms: u64) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(Duration::from_millis(ms)) => true,
    }
}

impl NodeContext {
    /// The bootstrap phase. `token` is the role timer of the initial
    /// follower: any role change (a heartbeat, a registration response, a
    /// peer's id confirmation) cancels it.
    pub(crate) async fn run_bootstrap(self: Arc<Self>, token: CancellationToken) {
        let ephemeral_id = self.ephemeral_id;
        if self.state.read().await.membership.registered {
            return;
        }

        tracing::info!(ephemeral_id, "Announcing presence");
        self.send_as(ephemeral_id, Body::Alive, None);
        if !pause(&token, self.config.discovery_window_ms).await {
            return;
        }

        let leader = {
            let state = self.state.read().await;
            if state.membership.registered {
                return;
            }
            tracing::debug!(
                ephemeral_id,
                discovered = ?state.membership.discovered,
                leader = ?state.leader_id,
                "Discovery window closed"
            );
            state.leader_id
        };
        let waited = match leader {
            Some(leader) => {
                self.send_as(
                    ephemeral_id,
                    Body::RegistrationRequest { previous_id: None },
                    Some(leader),
                );
                pause(&token, self.config.registration_window_ms).await
            }
            None => pause(&token, self.config.heartbeat_wait_ms).await,
        };
        if !waited {
            return;
        }

        {
            let mut state = self.state.write().await;
            if token.is_cancelled() || state.membership.permanent_id().is_some() {
                return;
            }
            self.self_distribute(&mut state);
        }

        if !pause(&token, self.config.settle_delay_ms).await {
            return;
        }

        let mut state = self.state.write().await;
        if token.is_cancelled() {
            return;
        }
        if state.role() == RaftRole::Follower && state.leader_id.is_none() {
            self.start_candidacy(&mut state);
        } else {
            self.become_follower(&mut state);
        }
    }

    /// Rank every discovered ephemeral id plus our own and adopt our rank.
    pub(crate) fn self_distribute(&self, state: &mut RaftState) {
        let ephemeral_id = self.ephemeral_id;
        let mut ids = state.membership.discovered.clone();
        ids.insert(ephemeral_id);
        let mapping = rank_mapping(&ids);
        let Some(&proposed_id) = mapping.get(&ephemeral_id) else {
            return;
        };

        self.send_as(
            ephemeral_id,
            Body::IdAnnouncement {
                proposed_id,
                ephemeral_id,
            },
            None,
        );
        if state.membership.adopt_mapping(&mapping) {
            self.assume_identity(proposed_id);
            tracing::info!(
                ephemeral_id,
                node_id = proposed_id,
                world = ?state.membership.world,
                "Self-assigned permanent id"
            );
        }
        self.send_as(ephemeral_id, Body::IdConfirmation { mapping }, None);
    }

    /// Ask the known leader for (re)admission, offering the permanent id we
    /// held before, if any.
    pub(crate) fn request_readmission(&self, state: &mut RaftState) {
        let Some(leader) = state.leader_id else {
            return;
        };
        self.send_as(
            self.ephemeral_id,
            Body::RegistrationRequest {
                previous_id: state.membership.permanent_id(),
            },
            Some(leader),
        );
    }

    pub(crate) async fn on_alive(&self, source: u64) {
        let world = {
            let mut state = self.state.write().await;
            state.membership.discovered.insert(source);
            if state.role() != RaftRole::Leader {
                return;
            }
            state.membership.world.clone()
        };
        // Point the newcomer at us
        self.send(Body::WorldInfo { world }, Some(source));
    }

    /// A leader pointing us at itself. Only useful before registration;
    /// registered nodes already track the world through heartbeats.
    pub(crate) async fn on_world_info(&self, source: u64) {
        let mut state = self.state.write().await;
        if state.membership.registered {
            tracing::trace!(node_id = self.rank(), source, "Ignoring world info while registered");
            return;
        }
        if state.leader_id.is_none() {
            tracing::debug!(
                ephemeral_id = self.ephemeral_id,
                leader = source,
                "Learned leader from world info"
            );
            state.leader_id = Some(source);
        }
    }

    pub(crate) async fn on_registration_request(&self, source: u64, previous_id: Option<u64>) {
        let (assigned_id, world) = {
            let mut state = self.state.write().await;
            if state.role() != RaftRole::Leader {
                return;
            }
            match state.membership.register(source, previous_id) {
                Some(id) => (id, state.membership.world.clone()),
                None => {
                    tracing::warn!(
                        node_id = self.rank(),
                        ephemeral_id = source,
                        previous_id = ?previous_id,
                        "Refusing registration, id is taken"
                    );
                    return;
                }
            }
        };

        tracing::info!(
            node_id = self.rank(),
            ephemeral_id = source,
            assigned_id,
            "Registered node"
        );
        self.send(
            Body::RegistrationResponse {
                assigned_id,
                world: world.clone(),
            },
            Some(source),
        );
        self.send(Body::WorldUpdate { world }, None);
    }

    pub(crate) async fn on_registration_response(
        self: &Arc<Self>,
        source: u64,
        timestamp: u64,
        assigned_id: u64,
        world: &BTreeSet<u64>,
    ) {
        let mut state = self.state.write().await;
        if state.membership.registered {
            return;
        }
        if !state.membership.set_permanent_id(assigned_id) {
            tracing::warn!(
                ephemeral_id = self.ephemeral_id,
                assigned_id,
                held = ?state.membership.permanent_id(),
                "Leader offered a different id, ignoring"
            );
            return;
        }
        self.assume_identity(assigned_id);
        state.membership.apply_snapshot(source, timestamp, world);
        state.leader_id = Some(source);
        tracing::info!(
            ephemeral_id = self.ephemeral_id,
            node_id = assigned_id,
            leader = source,
            world = ?state.membership.world,
            "Registered with leader"
        );
        self.become_follower(&mut state);
    }

    pub(crate) async fn on_id_confirmation(self: &Arc<Self>, source: u64, mapping: &BTreeMap<u64, u64>) {
        let mut state = self.state.write().await;
        if state.membership.permanent_id().is_some() {
            return;
        }
        if !state.membership.adopt_mapping(mapping) {
            tracing::debug!(
                ephemeral_id = self.ephemeral_id,
                from = source,
                "Id confirmation does not include us"
            );
            return;
        }
        let Some(assigned_id) = state.membership.permanent_id() else {
            return;
        };
        self.assume_identity(assigned_id);
        tracing::info!(
            ephemeral_id = self.ephemeral_id,
            node_id = assigned_id,
            from = source,
            "Adopted id from peer confirmation"
        );
        self.become_follower(&mut state);
    }

    pub(crate) async fn on_world_update(&self, source: u64, timestamp: u64, world: &BTreeSet<u64>) {
        let world = {
            let mut state = self.state.write().await;
            if !state.membership.registered || state.leader_id != Some(source) {
                return;
            }
            if !state.membership.apply_snapshot(source, timestamp, world) {
                return;
            }
            state.membership.world.clone()
        };
        self.sync.retain_members(&world).await;
    }
}
