//! In-process publish/subscribe transport shared by every simulated node.
//!
//! Delivery is fan-out by [`MessageKind`]: a published message reaches every
//! handler subscribed to its kind, with no ordering or retry guarantee.
//! Handlers must return quickly; the node runtime spawns a task per message.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::message::{Message, MessageKind};

/// Receiver side of a bus subscription.
pub trait MessageHandler: Send + Sync {
    fn deliver(&self, message: Message);
}

#[derive(Clone)]
struct Subscription {
    id: Uuid,
    handler: Arc<dyn MessageHandler>,
}

#[derive(Clone, Default)]
pub struct Bus {
    subscribers: Arc<DashMap<MessageKind, Vec<Subscription>>>,
    published: Arc<AtomicU64>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for one message kind.
    pub fn subscribe(&self, kind: MessageKind, handler: Arc<dyn MessageHandler>) -> Uuid {
        let id = Uuid::new_v4();
        self.add(id, kind, handler);
        id
    }

    /// Register `handler` for several kinds under a single subscription id.
    pub fn subscribe_all(
        &self,
        kinds: &[MessageKind],
        handler: Arc<dyn MessageHandler>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        for &kind in kinds {
            self.add(id, kind, handler.clone());
        }
        id
    }

    fn add(&self, id: Uuid, kind: MessageKind, handler: Arc<dyn MessageHandler>) {
        self.subscribers
            .entry(kind)
            .or_default()
            .push(Subscription { id, handler });
    }

    /// Remove every registration made under `id`.
    pub fn unsubscribe(&self, id: Uuid) {
        for mut entry in self.subscribers.iter_mut() {
            entry.value_mut().retain(|s| s.id != id);
        }
    }

    pub fn publish(&self, message: Message) {
        self.published.fetch_add(1, Ordering::Relaxed);

        // Snapshot the handler list so no shard lock is held during delivery
        let handlers: Vec<Arc<dyn MessageHandler>> = match self.subscribers.get(&message.kind())
        {
            Some(subs) => subs.iter().map(|s| s.handler.clone()).collect(),
            None => return,
        };

        tracing::trace!(
            kind = %message.kind(),
            source = message.source,
            target = ?message.target,
            fanout = handlers.len(),
            "Publishing message"
        );

        for handler in handlers {
            handler.deliver(message.clone());
        }
    }

    /// Total number of messages published so far.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self, kind: MessageKind) -> usize {
        self.subscribers.get(&kind).map(|s| s.len()).unwrap_or(0)
    }
}
