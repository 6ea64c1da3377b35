//! Wire messages exchanged over the [`Bus`](crate::bus::Bus).
//!
//! Every message is a [`Message`] envelope (`source`, Lamport `timestamp`,
//! optional `target`) around a closed [`Body`] enum. A `target` only narrows
//! who should *process* the message: the bus still fans it out to every
//! subscriber of its kind and receivers filter themselves.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Application payload carried by letters and the synchronous primitives.
pub type Payload = Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub source: u64,
    pub timestamp: u64,
    pub target: Option<u64>,
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Body {
    /// Discovery announcement, `source` is the ephemeral id.
    Alive,
    RegistrationRequest {
        /// Permanent id held before an eviction, if any.
        previous_id: Option<u64>,
    },
    RegistrationResponse {
        assigned_id: u64,
        world: BTreeSet<u64>,
    },
    IdAnnouncement {
        proposed_id: u64,
        ephemeral_id: u64,
    },
    IdConfirmation {
        /// ephemeral id -> permanent id
        mapping: BTreeMap<u64, u64>,
    },
    WorldInfo {
        world: BTreeSet<u64>,
    },
    WorldUpdate {
        world: BTreeSet<u64>,
    },
    Heartbeat {
        term: u64,
        world: BTreeSet<u64>,
    },
    HeartbeatConfirmation {
        term: u64,
    },
    RequestVote {
        term: u64,
        candidate_id: u64,
    },
    VoteResponse {
        term: u64,
        granted: bool,
    },
    Synchronize,
    SynchronizeConfirmed,
    AllSynchronized,
    BroadcastSync {
        payload: Payload,
        original_sender: u64,
        /// Per-origin counter; acks and parked copies of an older round
        /// never satisfy a newer one.
        round: u64,
    },
    BroadcastSyncAck {
        original_sender: u64,
        round: u64,
    },
    SendToSync {
        payload: Payload,
        call_id: String,
    },
    SendToSyncAck {
        call_id: String,
    },
    Token {
        token_id: Uuid,
        /// Term of the leader that seeded this token.
        term: u64,
    },
    /// Plain application message, delivered to the mailbox.
    Letter {
        payload: Payload,
    },
}

/// Subscription key on the bus, one per [`Body`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageKind {
    Alive,
    RegistrationRequest,
    RegistrationResponse,
    IdAnnouncement,
    IdConfirmation,
    WorldInfo,
    WorldUpdate,
    Heartbeat,
    HeartbeatConfirmation,
    RequestVote,
    VoteResponse,
    Synchronize,
    SynchronizeConfirmed,
    AllSynchronized,
    BroadcastSync,
    BroadcastSyncAck,
    SendToSync,
    SendToSyncAck,
    Token,
    Letter,
}

impl MessageKind {
    pub const ALL: [MessageKind; 20] = [
        MessageKind::Alive,
        MessageKind::RegistrationRequest,
        MessageKind::RegistrationResponse,
        MessageKind::IdAnnouncement,
        MessageKind::IdConfirmation,
        MessageKind::WorldInfo,
        MessageKind::WorldUpdate,
        MessageKind::Heartbeat,
        MessageKind::HeartbeatConfirmation,
        MessageKind::RequestVote,
        MessageKind::VoteResponse,
        MessageKind::Synchronize,
        MessageKind::SynchronizeConfirmed,
        MessageKind::AllSynchronized,
        MessageKind::BroadcastSync,
        MessageKind::BroadcastSyncAck,
        MessageKind::SendToSync,
        MessageKind::SendToSyncAck,
        MessageKind::Token,
        MessageKind::Letter,
    ];
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

impl Body {
    pub fn kind(&self) -> MessageKind {
        match self {
            Body::Alive => MessageKind::Alive,
            Body::RegistrationRequest { .. } => MessageKind::RegistrationRequest,
            Body::RegistrationResponse { .. } => MessageKind::RegistrationResponse,
            Body::IdAnnouncement { .. } => MessageKind::IdAnnouncement,
            Body::IdConfirmation { .. } => MessageKind::IdConfirmation,
            Body::WorldInfo { .. } => MessageKind::WorldInfo,
            Body::WorldUpdate { .. } => MessageKind::WorldUpdate,
            Body::Heartbeat { .. } => MessageKind::Heartbeat,
            Body::HeartbeatConfirmation { .. } => MessageKind::HeartbeatConfirmation,
            Body::RequestVote { .. } => MessageKind::RequestVote,
            Body::VoteResponse { .. } => MessageKind::VoteResponse,
            Body::Synchronize => MessageKind::Synchronize,
            Body::SynchronizeConfirmed => MessageKind::SynchronizeConfirmed,
            Body::AllSynchronized => MessageKind::AllSynchronized,
            Body::BroadcastSync { .. } => MessageKind::BroadcastSync,
            Body::BroadcastSyncAck { .. } => MessageKind::BroadcastSyncAck,
            Body::SendToSync { .. } => MessageKind::SendToSync,
            Body::SendToSyncAck { .. } => MessageKind::SendToSyncAck,
            Body::Token { .. } => MessageKind::Token,
            Body::Letter { .. } => MessageKind::Letter,
        }
    }

    /// Protocol/system traffic keeps flowing while a barrier is in flight;
    /// only application letters are subject to the barrier drop policy.
    pub fn is_system(&self) -> bool {
        !matches!(self, Body::Letter { .. })
    }
}

impl Message {
    pub fn new(source: u64, timestamp: u64, body: Body) -> Self {
        Self {
            source,
            timestamp,
            target: None,
            body,
        }
    }

    pub fn to(mut self, target: u64) -> Self {
        self.target = Some(target);
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }
}
