//! Role transitions, the election timer and the leader heartbeat cycle.
//!
//! Transitions run under the state write lock and always cancel the
//! outgoing role's tasks before the incoming role spawns its own. Timer
//! tasks hold a `Weak` handle to the node and re-check their cancellation
//! token after taking the lock.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::message::Body;
use crate::node::NodeContext;
use crate::raft::rpc::{
    handle_heartbeat, handle_request_vote, handle_vote_response, HeartbeatOutcome, VoteTally,
};
use crate::raft::state::{RaftRole, RaftState, RoleState};
use crate::raft::timer::election_deadline;

impl NodeContext {
    fn next_election_deadline(&self) -> Instant {
        election_deadline(&self.config)
    }

    /// Enter (or re-enter) Follower with a fresh election deadline.
    pub(crate) fn become_follower(self: &Arc<Self>, state: &mut RaftState) {
        let token = self.rearm_role_timer();
        let previous = state.role();
        state.become_follower(self.next_election_deadline());
        if previous != RaftRole::Follower {
            tracing::info!(
                node_id = self.rank(),
                term = state.current_term,
                from = %previous,
                "Became follower"
            );
        }
        self.spawn_election_timer(token);
    }

    /// Start an election. A node alone in its world wins it on the spot.
    pub(crate) fn start_candidacy(self: &Arc<Self>, state: &mut RaftState) {
        let me = match state.membership.permanent_id() {
            Some(me) if state.membership.registered => me,
            _ => {
                self.become_follower(state);
                return;
            }
        };

        let token = self.rearm_role_timer();
        let term = state.become_candidate(me, self.next_election_deadline());

        if state.membership.others().is_empty() {
            tracing::info!(node_id = me, term, "Alone in the world, taking leadership");
            self.become_leader(state);
            return;
        }

        tracing::info!(node_id = me, term, world = ?state.membership.world, "Starting election");
        self.send(
            Body::RequestVote {
                term,
                candidate_id: me,
            },
            None,
        );
        self.spawn_election_timer(token);
    }

    pub(crate) fn become_leader(self: &Arc<Self>, state: &mut RaftState) {
        let Some(me) = state.membership.permanent_id() else {
            return;
        };
        let token = self.rearm_role_timer();
        state.become_leader(me);
        let term = state.current_term;
        tracing::info!(node_id = me, term, world = ?state.membership.world, "Became leader");

        self.spawn_heartbeat_cycle(token);
        tokio::spawn(self.clone().circulate_token(Uuid::new_v4(), term));
    }

    fn on_election_timeout(self: &Arc<Self>, state: &mut RaftState) {
        match state.role() {
            RaftRole::Follower => {
                if state.membership.permanent_id().is_none() {
                    tracing::info!(
                        node_id = self.rank(),
                        "Election timeout while unregistered, self-distributing ids"
                    );
                    self.self_distribute(state);
                } else if !state.membership.registered {
                    tracing::debug!(
                        node_id = self.rank(),
                        "Election timeout while evicted, waiting for readmission"
                    );
                    self.request_readmission(state);
                    self.become_follower(state);
                    return;
                }
                tracing::info!(
                    node_id = self.rank(),
                    term = state.current_term,
                    "Election timeout, starting election"
                );
                self.start_candidacy(state);
            }
            RaftRole::Candidate => {
                tracing::info!(
                    node_id = self.rank(),
                    term = state.current_term,
                    "Election timed out, retrying"
                );
                self.start_candidacy(state);
            }
            RaftRole::Leader => {}
        }
    }

    fn spawn_election_timer(self: &Arc<Self>, token: CancellationToken) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let deadline = match weak.upgrade() {
                    Some(ctx) => ctx.state.read().await.role.election_deadline(),
                    None => return,
                };
                let Some(deadline) = deadline else {
                    return;
                };

                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep_until(deadline) => {}
                }

                let Some(ctx) = weak.upgrade() else {
                    return;
                };
                let mut state = ctx.state.write().await;
                if token.is_cancelled() {
                    return;
                }
                match state.role.election_deadline() {
                    // Pushed back by a heartbeat or vote while we slept
                    Some(deadline) if deadline > Instant::now() => continue,
                    Some(_) => {
                        ctx.on_election_timeout(&mut state);
                        return;
                    }
                    None => return,
                }
            }
        });
    }

    fn spawn_heartbeat_cycle(self: &Arc<Self>, token: CancellationToken) {
        let weak: Weak<NodeContext> = Arc::downgrade(self);
        let window = Duration::from_millis(self.config.confirmation_window_ms);
        let rest = Duration::from_millis(
            self.config
                .heartbeat_interval_ms
                .saturating_sub(self.config.confirmation_window_ms),
        );

        tokio::spawn(async move {
            loop {
                match weak.upgrade() {
                    Some(ctx) if ctx.open_heartbeat_cycle(&token).await => {}
                    _ => return,
                }
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(window) => {}
                }

                match weak.upgrade() {
                    Some(ctx) if ctx.close_heartbeat_cycle(&token).await => {}
                    _ => return,
                }
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(rest) => {}
                }
            }
        });
    }

    /// Broadcast the heartbeat and open the confirmation window.
    async fn open_heartbeat_cycle(&self, token: &CancellationToken) -> bool {
        let mut state = self.state.write().await;
        if token.is_cancelled() {
            return false;
        }
        let term = state.current_term;
        let world = state.membership.world.clone();
        let others = state.membership.others();
        let RoleState::Leader { heartbeat } = &mut state.role else {
            return false;
        };
        heartbeat.cycle += 1;
        heartbeat.expected = others;
        heartbeat.confirmations.clear();
        heartbeat.window_open = true;
        tracing::trace!(node_id = self.rank(), term, cycle = heartbeat.cycle, "Sending heartbeat");

        self.send(Body::Heartbeat { term, world }, None);
        true
    }

    /// Close the window and evict every member that stayed silent.
    async fn close_heartbeat_cycle(&self, token: &CancellationToken) -> bool {
        let (evicted, world) = {
            let mut state = self.state.write().await;
            if token.is_cancelled() {
                return false;
            }
            let RoleState::Leader { heartbeat } = &mut state.role else {
                return false;
            };
            heartbeat.window_open = false;
            let missing: BTreeSet<u64> = heartbeat
                .expected
                .difference(&heartbeat.confirmations)
                .copied()
                .collect();
            let evicted = state.membership.evict(&missing);
            (evicted, state.membership.world.clone())
        };

        if !evicted.is_empty() {
            tracing::warn!(
                node_id = self.rank(),
                evicted = ?evicted,
                world = ?world,
                "Evicting members that missed the heartbeat confirmation"
            );
            self.send(
                Body::WorldUpdate {
                    world: world.clone(),
                },
                None,
            );
            if self.sync.retain_members(&world).await {
                self.complete_barrier().await;
            }
        }
        true
    }

    pub(crate) async fn on_heartbeat(
        self: &Arc<Self>,
        source: u64,
        timestamp: u64,
        term: u64,
        world: &BTreeSet<u64>,
    ) {
        let mut state = self.state.write().await;

        if !state.membership.registered {
            if term < state.current_term {
                return;
            }
            state.adopt_term(term);
            state.leader_id = Some(source);
            tracing::debug!(node_id = self.rank(), leader = source, term, "Heard a leader, registering");
            self.become_follower(&mut state);
            self.request_readmission(&mut state);
            return;
        }

        let step_down = match handle_heartbeat(&mut state, source, term) {
            HeartbeatOutcome::Stale | HeartbeatOutcome::Ignored => return,
            HeartbeatOutcome::Accepted { step_down } => step_down,
        };
        state.membership.apply_snapshot(source, timestamp, world);

        let me = state.membership.rank();
        if !state.membership.world.contains(&me) {
            tracing::warn!(node_id = me, leader = source, "Dropped from the world, re-registering");
            state.membership.registered = false;
            self.become_follower(&mut state);
            self.request_readmission(&mut state);
            return;
        }

        if step_down {
            tracing::info!(node_id = me, leader = source, term, "Stepping down for leader");
            self.become_follower(&mut state);
        } else {
            state.reset_election_deadline(self.next_election_deadline());
        }
        let world = state.membership.world.clone();
        drop(state);

        self.send(Body::HeartbeatConfirmation { term }, Some(source));
        self.sync.retain_members(&world).await;
    }

    pub(crate) async fn on_heartbeat_confirmation(&self, source: u64, term: u64) {
        let mut state = self.state.write().await;
        let current_term = state.current_term;
        if let RoleState::Leader { heartbeat } = &mut state.role {
            if heartbeat.window_open && term == current_term {
                heartbeat.confirmations.insert(source);
            } else {
                tracing::trace!(source, term, "Ignoring confirmation outside the window");
            }
        }
    }

    pub(crate) async fn on_request_vote(self: &Arc<Self>, source: u64, term: u64, candidate_id: u64) {
        let decision = {
            let mut state = self.state.write().await;
            let me = state.membership.rank();
            let decision = handle_request_vote(&mut state, term, candidate_id, me);
            if decision.step_down {
                tracing::info!(node_id = me, candidate = candidate_id, term, "Stepping down for newer term");
                self.become_follower(&mut state);
            } else if decision.granted {
                state.reset_election_deadline(self.next_election_deadline());
            }
            decision
        };

        self.send(
            Body::VoteResponse {
                term: decision.term,
                granted: decision.granted,
            },
            Some(source),
        );
    }

    pub(crate) async fn on_vote_response(self: &Arc<Self>, source: u64, term: u64, granted: bool) {
        let mut state = self.state.write().await;
        match handle_vote_response(&mut state, source, term, granted) {
            VoteTally::Ignored => {}
            VoteTally::KeepAlive => state.reset_election_deadline(self.next_election_deadline()),
            VoteTally::StepDown => self.become_follower(&mut state),
            VoteTally::Counted { votes, won } => {
                tracing::debug!(node_id = self.rank(), from = source, votes, term, "Received vote");
                if won {
                    self.become_leader(&mut state);
                }
            }
        }
    }
}
