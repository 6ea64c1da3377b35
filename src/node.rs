//! Node runtime: the handle a host application drives, and the shared
//! context every message handler and timer task works on.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::{Bus, MessageHandler};
use crate::clock::LamportClock;
use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::ids::IdGenerator;
use crate::mailbox::{Letter, Mailbox};
use crate::message::{Body, Message, MessageKind, Payload};
use crate::raft::state::{RaftRole, RaftState};
use crate::sync::broadcast::Delivery;
use crate::sync::rendezvous::ReceiveStart;
use crate::sync::waiter::{wait, Completion, OutcomeRx};
use crate::sync::SyncCoordinator;
use crate::token::TokenRing;

/// Point-in-time view of a node, for hosts and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub rank: u64,
    pub ephemeral_id: u64,
    pub role: RaftRole,
    pub term: u64,
    pub leader_id: Option<u64>,
    pub world: BTreeSet<u64>,
    pub registered: bool,
    pub has_token: bool,
}

/// State shared by the host handle, the bus inbox and the timer tasks.
pub(crate) struct NodeContext {
    pub(crate) config: NodeConfig,
    bus: Bus,
    pub(crate) ephemeral_id: u64,
    /// Cached rank, readable without the state lock.
    identity: AtomicU64,
    pub(crate) clock: LamportClock,
    pub(crate) state: RwLock<RaftState>,
    pub(crate) mailbox: Mailbox,
    pub(crate) sync: SyncCoordinator,
    pub(crate) token: TokenRing,
    pub(crate) shutdown: CancellationToken,
    /// Cancels the tasks owned by the current role (or bootstrap phase).
    role_timer: StdMutex<CancellationToken>,
    running: AtomicBool,
    isolated: AtomicBool,
}

impl NodeContext {
    pub(crate) fn rank(&self) -> u64 {
        self.identity.load(Ordering::Acquire)
    }

    pub(crate) fn assume_identity(&self, permanent_id: u64) {
        self.identity.store(permanent_id, Ordering::Release);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn is_isolated(&self) -> bool {
        self.isolated.load(Ordering::Acquire)
    }

    /// Publish `body` under the current rank.
    pub(crate) fn send(&self, body: Body, target: Option<u64>) {
        self.send_as(self.rank(), body, target);
    }

    /// Publish `body` under an explicit source id (bootstrap traffic goes out
    /// under the ephemeral id).
    pub(crate) fn send_as(&self, source: u64, body: Body, target: Option<u64>) {
        if !self.is_running() || self.is_isolated() {
            tracing::trace!(node_id = source, kind = %body.kind(), "Suppressing outbound message");
            return;
        }
        let mut message = Message::new(source, self.clock.tick(), body);
        message.target = target;
        self.bus.publish(message);
    }

    /// Cancel the outgoing role's tasks and hand out the token for the next
    /// role's tasks.
    pub(crate) fn rearm_role_timer(&self) -> CancellationToken {
        let next = self.shutdown.child_token();
        let mut slot = self
            .role_timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *slot, next.clone()).cancel();
        next
    }

    /// Route one inbound message. Runs on its own task.
    pub(crate) async fn dispatch(self: Arc<Self>, message: Message) {
        if !self.is_running() || self.is_isolated() {
            return;
        }

        let (looped_back, addressed) = {
            let state = self.state.read().await;
            let membership = &state.membership;
            (
                membership.is_self(message.source),
                message.target.map_or(true, |t| membership.is_self(t)),
            )
        };
        if looped_back || !addressed {
            return;
        }

        self.clock.observe(message.timestamp);

        if !message.body.is_system() && self.sync.barrier_in_flight().await {
            tracing::trace!(
                node_id = self.rank(),
                source = message.source,
                "Dropping letter while a barrier is in flight"
            );
            return;
        }

        let source = message.source;
        let timestamp = message.timestamp;
        match &message.body {
            Body::Alive => self.on_alive(source).await,
            Body::RegistrationRequest { previous_id } => {
                self.on_registration_request(source, *previous_id).await
            }
            Body::RegistrationResponse { assigned_id, world } => {
                self.on_registration_response(source, timestamp, *assigned_id, world)
                    .await
            }
            Body::IdAnnouncement {
                proposed_id,
                ephemeral_id,
            } => {
                tracing::debug!(
                    node_id = self.rank(),
                    ephemeral_id,
                    proposed_id,
                    "Peer announced self-assigned id"
                );
            }
            Body::IdConfirmation { mapping } => self.on_id_confirmation(source, mapping).await,
            Body::WorldInfo { .. } => self.on_world_info(source).await,
            Body::WorldUpdate { world } => self.on_world_update(source, timestamp, world).await,
            Body::Heartbeat { term, world } => {
                self.on_heartbeat(source, timestamp, *term, world).await
            }
            Body::HeartbeatConfirmation { term } => {
                self.on_heartbeat_confirmation(source, *term).await
            }
            Body::RequestVote { term, candidate_id } => {
                self.on_request_vote(source, *term, *candidate_id).await
            }
            Body::VoteResponse { term, granted } => {
                self.on_vote_response(source, *term, *granted).await
            }
            Body::Synchronize => self.on_synchronize().await,
            Body::SynchronizeConfirmed => self.on_synchronize_confirmed(source).await,
            Body::AllSynchronized => {
                if self.sync.finish_barrier().await {
                    tracing::debug!(node_id = self.rank(), "Barrier released");
                }
            }
            Body::BroadcastSync {
                payload,
                original_sender,
                round,
            } => {
                let delivery = self
                    .sync
                    .broadcast_delivered(*original_sender, *round, payload.clone())
                    .await;
                if delivery == Delivery::Acknowledge {
                    self.send(
                        Body::BroadcastSyncAck {
                            original_sender: *original_sender,
                            round: *round,
                        },
                        Some(source),
                    );
                }
            }
            Body::BroadcastSyncAck {
                original_sender,
                round,
            } => {
                self.sync
                    .broadcast_acknowledged(*original_sender, *round, source)
                    .await
            }
            Body::SendToSync { payload, call_id } => {
                if self
                    .sync
                    .payload_arrived(source, call_id, payload.clone())
                    .await
                {
                    self.send(
                        Body::SendToSyncAck {
                            call_id: call_id.clone(),
                        },
                        Some(source),
                    );
                }
            }
            Body::SendToSyncAck { call_id } => self.sync.send_acknowledged(call_id).await,
            Body::Token { token_id, term } => {
                self.clone().circulate_token(*token_id, *term).await
            }
            Body::Letter { .. } => self.mailbox.push(message.clone()).await,
        }
    }

    /// Permanent id and the other members, or `NotRegistered` / `Stopped`.
    async fn registered_view(&self) -> Result<(u64, RaftRole, Option<u64>, BTreeSet<u64>)> {
        if !self.is_running() {
            return Err(NodeError::Stopped);
        }
        let state = self.state.read().await;
        match state.membership.permanent_id() {
            Some(me) if state.membership.registered => Ok((
                me,
                state.role(),
                state.leader_id,
                state.membership.others(),
            )),
            _ => Err(NodeError::NotRegistered),
        }
    }

    async fn start_barrier(
        self: &Arc<Self>,
        callback: Option<Completion<()>>,
    ) -> Result<Option<OutcomeRx<()>>> {
        let (me, role, leader, others) = self.registered_view().await?;
        let rx = self.sync.begin_barrier(callback).await?;

        if role == RaftRole::Leader {
            self.send(Body::Synchronize, None);
            if self.sync.collect_confirmations(others).await {
                self.complete_barrier().await;
            }
            return Ok(rx);
        }

        let Some(leader) = leader.filter(|&l| l != me) else {
            self.sync.cancel_barrier().await;
            return Err(NodeError::NoLeader);
        };
        tracing::debug!(node_id = me, leader, "Requesting barrier");
        self.send(Body::Synchronize, None);
        self.send(Body::SynchronizeConfirmed, Some(leader));
        Ok(rx)
    }

    async fn on_synchronize(self: &Arc<Self>) {
        let Ok((me, role, leader, others)) = self.registered_view().await else {
            self.sync.barrier_requested().await;
            return;
        };
        if role == RaftRole::Leader {
            if self.sync.collect_confirmations(others).await {
                self.complete_barrier().await;
            }
            return;
        }

        self.sync.barrier_requested().await;
        match leader {
            Some(leader) if leader != me => {
                self.send(Body::SynchronizeConfirmed, Some(leader))
            }
            _ => tracing::debug!(node_id = me, "Barrier requested but no leader known"),
        }
    }

    async fn on_synchronize_confirmed(self: &Arc<Self>, source: u64) {
        let Ok((_, RaftRole::Leader, _, others)) = self.registered_view().await else {
            return;
        };
        self.sync.record_confirmation(source).await;
        if self.sync.collect_confirmations(others).await {
            self.complete_barrier().await;
        }
    }

    /// Leader: every member confirmed.
    pub(crate) async fn complete_barrier(&self) {
        if self.sync.finish_barrier().await {
            tracing::debug!(node_id = self.rank(), "All members synchronized");
            self.send(Body::AllSynchronized, None);
        }
    }

    async fn start_broadcast(
        self: &Arc<Self>,
        payload: Payload,
        origin: u64,
        callback: Option<Completion<Payload>>,
    ) -> Result<Option<OutcomeRx<Payload>>> {
        let (me, _, _, others) = self.registered_view().await?;
        if me != origin {
            let (rx, claimed) = self.sync.join_broadcast(origin, callback).await;
            if let Some(round) = claimed {
                self.send(
                    Body::BroadcastSyncAck {
                        original_sender: origin,
                        round,
                    },
                    Some(origin),
                );
            }
            return Ok(rx);
        }

        let (rx, round) = self
            .sync
            .begin_broadcast(origin, payload.clone(), others, callback)
            .await?;
        self.send(
            Body::BroadcastSync {
                payload,
                original_sender: origin,
                round,
            },
            None,
        );

        let weak = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let timeout = self.sync.rendezvous_timeout();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(ctx) = weak.upgrade() {
                        ctx.sync.expire_broadcast(origin, round).await;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn start_send(
        self: &Arc<Self>,
        payload: Payload,
        dest: u64,
        callback: Option<Completion<()>>,
    ) -> Result<Option<OutcomeRx<()>>> {
        let (me, _, _, _) = self.registered_view().await?;
        let call_id = self.sync.next_call_id(me, dest);
        let rx = self.sync.begin_send(&call_id, callback).await;
        self.send(
            Body::SendToSync {
                payload,
                call_id: call_id.clone(),
            },
            Some(dest),
        );

        let weak = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let timeout = self.sync.rendezvous_timeout();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(ctx) = weak.upgrade() {
                        ctx.sync.expire_send(&call_id).await;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn start_receive(
        self: &Arc<Self>,
        from: u64,
        callback: Option<Completion<Payload>>,
    ) -> Result<Option<OutcomeRx<Payload>>> {
        self.registered_view().await?;
        let (rx, start) = self.sync.begin_receive(from, callback).await;
        match start {
            ReceiveStart::Claimed { call_id } => {
                self.send(Body::SendToSyncAck { call_id }, Some(from));
            }
            ReceiveStart::Armed { generation } => {
                let weak = Arc::downgrade(self);
                let shutdown = self.shutdown.clone();
                let timeout = self.sync.rendezvous_timeout();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(timeout) => {
                            if let Some(ctx) = weak.upgrade() {
                                ctx.sync.expire_receive(from, generation).await;
                            }
                        }
                    }
                });
            }
            ReceiveStart::Joined => {}
        }
        Ok(rx)
    }
}

/// Bus subscription of one node. Holds the context weakly so a dropped
/// runtime is not kept alive by the bus.
struct Inbox {
    ctx: Weak<NodeContext>,
}

impl MessageHandler for Inbox {
    fn deliver(&self, message: Message) {
        let Some(ctx) = self.ctx.upgrade() else {
            return;
        };
        if !ctx.is_running() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(ctx.dispatch(message));
            }
            Err(_) => {
                tracing::warn!(
                    node_id = ctx.rank(),
                    kind = %message.kind(),
                    "Message published outside a tokio runtime, dropping"
                );
            }
        }
    }
}

async fn block_on<T: Clone>(rx: Option<OutcomeRx<T>>) -> Result<T> {
    match rx {
        Some(rx) => wait(rx).await,
        None => Err(NodeError::Internal(
            "blocking call registered without a completion signal".to_string(),
        )),
    }
}

/// Host-side handle of one simulated node.
///
/// The node subscribes to the bus on construction, so runtimes created
/// together observe each other's discovery traffic; [`NodeRuntime::init`]
/// starts the bootstrap protocol.
///
/// Every synchronous primitive comes in two flavours: the plain method
/// blocks until the rendezvous resolves, the `_with` method registers a
/// [`Completion`] and returns at once. Errors detected up front (not
/// registered, call already in flight) are returned directly and the
/// callback is dropped unused.
pub struct NodeRuntime {
    ctx: Arc<NodeContext>,
    subscription: Uuid,
}

impl NodeRuntime {
    pub fn new(config: NodeConfig, bus: Bus, ids: &dyn IdGenerator) -> Result<Self> {
        config.validate()?;
        let ephemeral_id = ids.next_id()?;
        let shutdown = CancellationToken::new();
        let role_timer = StdMutex::new(shutdown.child_token());

        let ctx = Arc::new(NodeContext {
            sync: SyncCoordinator::new(config.rendezvous_timeout()),
            config,
            bus: bus.clone(),
            ephemeral_id,
            identity: AtomicU64::new(ephemeral_id),
            clock: LamportClock::new(),
            state: RwLock::new(RaftState::new(ephemeral_id)),
            mailbox: Mailbox::new(),
            token: TokenRing::new(),
            shutdown,
            role_timer,
            running: AtomicBool::new(true),
            isolated: AtomicBool::new(false),
        });

        let inbox = Arc::new(Inbox {
            ctx: Arc::downgrade(&ctx),
        });
        let subscription = bus.subscribe_all(&MessageKind::ALL, inbox);

        tracing::debug!(ephemeral_id, "Node created");
        Ok(Self { ctx, subscription })
    }

    /// Start discovery and registration.
    pub fn init(&self) -> Result<()> {
        if !self.ctx.is_running() {
            return Err(NodeError::Stopped);
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| NodeError::Internal(format!("init outside a tokio runtime: {e}")))?;
        let token = self.ctx.rearm_role_timer();
        handle.spawn(self.ctx.clone().run_bootstrap(token));
        Ok(())
    }

    /// Stop the node. Every blocked call returns `Err(NodeError::Stopped)`.
    pub async fn stop(&self) {
        if !self.ctx.running.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::info!(node_id = self.ctx.rank(), "Stopping node");
        self.ctx.shutdown.cancel();
        self.ctx.bus.unsubscribe(self.subscription);
        self.ctx.sync.abort_all().await;
    }

    pub fn is_running(&self) -> bool {
        self.ctx.is_running()
    }

    /// Permanent id once assigned, ephemeral id before.
    pub fn rank(&self) -> u64 {
        self.ctx.rank()
    }

    pub fn ephemeral_id(&self) -> u64 {
        self.ctx.ephemeral_id
    }

    pub async fn has_message(&self) -> bool {
        self.ctx.mailbox.has_message().await
    }

    pub async fn take_message(&self) -> Option<Letter> {
        self.ctx.mailbox.take_message().await
    }

    /// Fire-and-forget letter to one node.
    pub fn send_to(&self, payload: Payload, dest: u64) {
        self.ctx.send(Body::Letter { payload }, Some(dest));
    }

    /// Fire-and-forget letter to every node.
    pub fn broadcast(&self, payload: Payload) {
        self.ctx.send(Body::Letter { payload }, None);
    }

    /// Cluster-wide barrier.
    pub async fn synchronize(&self) -> Result<()> {
        block_on(self.ctx.start_barrier(None).await?).await
    }

    pub async fn synchronize_with(&self, callback: Completion<()>) -> Result<()> {
        self.ctx.start_barrier(Some(callback)).await.map(|_| ())
    }

    /// Send (when this node is `origin`) or receive a payload that every
    /// member acknowledges. Resolves with the payload.
    pub async fn broadcast_sync(&self, payload: Payload, origin: u64) -> Result<Payload> {
        block_on(self.ctx.start_broadcast(payload, origin, None).await?).await
    }

    pub async fn broadcast_sync_with(
        &self,
        payload: Payload,
        origin: u64,
        callback: Completion<Payload>,
    ) -> Result<()> {
        self.ctx
            .start_broadcast(payload, origin, Some(callback))
            .await
            .map(|_| ())
    }

    /// Hand `payload` to `dest`, resolving once `dest` received it.
    pub async fn send_to_sync(&self, payload: Payload, dest: u64) -> Result<()> {
        block_on(self.ctx.start_send(payload, dest, None).await?).await
    }

    pub async fn send_to_sync_with(
        &self,
        payload: Payload,
        dest: u64,
        callback: Completion<()>,
    ) -> Result<()> {
        self.ctx
            .start_send(payload, dest, Some(callback))
            .await
            .map(|_| ())
    }

    /// Wait for a `send_to_sync` from `from`.
    pub async fn receive_from_sync(&self, from: u64) -> Result<Payload> {
        block_on(self.ctx.start_receive(from, None).await?).await
    }

    pub async fn receive_from_sync_with(
        &self,
        from: u64,
        callback: Completion<Payload>,
    ) -> Result<()> {
        self.ctx
            .start_receive(from, Some(callback))
            .await
            .map(|_| ())
    }

    /// Block until the circulating token is held here.
    pub async fn request_token(&self) -> Result<()> {
        self.ctx.token.request(&self.ctx.shutdown).await
    }

    pub async fn release_token(&self) {
        self.ctx.token.release().await
    }

    pub async fn has_token(&self) -> bool {
        self.ctx.token.has_token().await
    }

    pub async fn status(&self) -> NodeStatus {
        let has_token = self.ctx.token.has_token().await;
        let state = self.ctx.state.read().await;
        NodeStatus {
            rank: state.membership.rank(),
            ephemeral_id: self.ctx.ephemeral_id,
            role: state.role(),
            term: state.current_term,
            leader_id: state.leader_id,
            world: state.membership.world.clone(),
            registered: state.membership.registered,
            has_token,
        }
    }

    pub async fn role(&self) -> RaftRole {
        self.ctx.state.read().await.role()
    }

    pub async fn current_term(&self) -> u64 {
        self.ctx.state.read().await.current_term
    }

    pub async fn leader_id(&self) -> Option<u64> {
        self.ctx.state.read().await.leader_id
    }

    pub async fn world(&self) -> BTreeSet<u64> {
        self.ctx.state.read().await.membership.world.clone()
    }

    pub async fn is_registered(&self) -> bool {
        self.ctx.state.read().await.membership.registered
    }

    /// Drop all traffic to and from this node without stopping it.
    pub fn isolate(&self) {
        tracing::info!(node_id = self.ctx.rank(), "Isolating node");
        self.ctx.isolated.store(true, Ordering::Release);
    }

    pub fn heal(&self) {
        tracing::info!(node_id = self.ctx.rank(), "Healing node");
        self.ctx.isolated.store(false, Ordering::Release);
    }

    /// How long blocked `send_to_sync` / `receive_from_sync` calls wait.
    pub fn rendezvous_timeout(&self) -> Duration {
        self.ctx.sync.rendezvous_timeout()
    }
}

impl Drop for NodeRuntime {
    fn drop(&mut self) {
        self.ctx.running.store(false, Ordering::Release);
        self.ctx.shutdown.cancel();
        self.ctx.bus.unsubscribe(self.subscription);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequentialIds;
    use serde_json::json;

    fn runtime(bus: &Bus, ids: &SequentialIds) -> NodeRuntime {
        NodeRuntime::new(NodeConfig::scaled(10), bus.clone(), ids).unwrap()
    }

    #[tokio::test]
    async fn new_node_is_unregistered_follower() {
        let bus = Bus::new();
        let node = runtime(&bus, &SequentialIds::starting_at(10_000));
        let status = node.status().await;
        assert_eq!(status.rank, 10_000);
        assert_eq!(status.role, RaftRole::Follower);
        assert!(!status.registered);
        assert!(status.world.is_empty());
        assert_eq!(bus.subscriber_count(MessageKind::Heartbeat), 1);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut config = NodeConfig::scaled(10);
        config.confirmation_window_ms = config.heartbeat_interval_ms;
        let result = NodeRuntime::new(config, Bus::new(), &SequentialIds::starting_at(1));
        assert!(matches!(result, Err(NodeError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn exhausted_id_source_refuses_new_nodes() {
        let bus = Bus::new();
        let ids = crate::ids::RandomIds::new(500, 500);
        let first = NodeRuntime::new(NodeConfig::scaled(10), bus.clone(), &ids).unwrap();
        assert_eq!(first.ephemeral_id(), 500);
        let second = NodeRuntime::new(NodeConfig::scaled(10), bus, &ids);
        assert!(matches!(second, Err(NodeError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn sync_primitives_require_a_permanent_id() {
        let bus = Bus::new();
        let node = runtime(&bus, &SequentialIds::starting_at(10_000));
        assert_eq!(node.synchronize().await, Err(NodeError::NotRegistered));
        assert_eq!(
            node.send_to_sync(json!(1), 2).await,
            Err(NodeError::NotRegistered)
        );
        assert_eq!(
            node.receive_from_sync(2).await,
            Err(NodeError::NotRegistered)
        );
        assert_eq!(
            node.broadcast_sync(json!(1), 1).await,
            Err(NodeError::NotRegistered)
        );
    }

    #[tokio::test]
    async fn stop_unsubscribes_and_is_idempotent() {
        let bus = Bus::new();
        let node = runtime(&bus, &SequentialIds::starting_at(10_000));
        node.stop().await;
        node.stop().await;
        assert!(!node.is_running());
        assert_eq!(bus.subscriber_count(MessageKind::Heartbeat), 0);
        assert_eq!(node.init(), Err(NodeError::Stopped));
    }

    #[tokio::test]
    async fn letters_reach_the_addressed_mailbox_only() {
        let bus = Bus::new();
        let ids = SequentialIds::starting_at(10_000);
        let a = runtime(&bus, &ids);
        let b = runtime(&bus, &ids);
        let c = runtime(&bus, &ids);

        a.send_to(json!("for b"), b.rank());
        for _ in 0..50 {
            if b.has_message().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let letter = b.take_message().await.unwrap();
        assert_eq!(letter.message.source, a.rank());
        assert_eq!(letter.message.body, Body::Letter { payload: json!("for b") });
        assert!(!a.has_message().await);
        assert!(!c.has_message().await);
    }

    #[tokio::test]
    async fn isolated_node_neither_sends_nor_receives() {
        let bus = Bus::new();
        let ids = SequentialIds::starting_at(10_000);
        let a = runtime(&bus, &ids);
        let b = runtime(&bus, &ids);

        b.isolate();
        a.broadcast(json!(1));
        b.broadcast(json!(2));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!a.has_message().await);
        assert!(!b.has_message().await);

        b.heal();
        a.broadcast(json!(3));
        for _ in 0..50 {
            if b.has_message().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(b.has_message().await);
    }
}
