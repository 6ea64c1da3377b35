//! Mutual exclusion by a token circulating over the ascending ring of
//! permanent ids.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{NodeError, Result};
use crate::message::Body;
use crate::node::NodeContext;

#[derive(Debug, Default)]
struct TokenFlags {
    wants: bool,
    has_token: bool,
    /// Highest seeding term seen; tokens from older terms are dropped.
    highest_term: u64,
    passes: u64,
}

pub struct TokenRing {
    flags: Mutex<TokenFlags>,
    granted: watch::Sender<bool>,
    release: watch::Sender<bool>,
}

impl Default for TokenRing {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenRing {
    pub fn new() -> Self {
        Self {
            flags: Mutex::new(TokenFlags::default()),
            granted: watch::channel(false).0,
            release: watch::channel(false).0,
        }
    }

    /// Block until the token is held on behalf of this node.
    pub async fn request(&self, shutdown: &CancellationToken) -> Result<()> {
        let mut granted = {
            let mut flags = self.flags.lock().await;
            flags.wants = true;
            self.granted.subscribe()
        };
        tokio::select! {
            result = granted.wait_for(|held| *held) => {
                result.map(|_| ()).map_err(|_| NodeError::Stopped)
            }
            _ = shutdown.cancelled() => Err(NodeError::Stopped),
        }
    }

    /// Give the token back. A request made right after this waits for the
    /// next lap instead of re-taking the token before it moved on.
    pub async fn release(&self) {
        let mut flags = self.flags.lock().await;
        flags.wants = false;
        self.granted.send_replace(false);
        self.release.send_replace(true);
    }

    /// Take an incoming token. Returns false for a token of an older term.
    pub(crate) async fn accept(&self, term: u64) -> bool {
        let mut flags = self.flags.lock().await;
        if term < flags.highest_term {
            return false;
        }
        flags.highest_term = term;
        flags.has_token = true;
        flags.passes += 1;
        true
    }

    /// Keep the token until it may be passed on: right after `hop_delay`
    /// when nobody here wants it, otherwise once the holder releases it.
    pub(crate) async fn hold(&self, hop_delay: Duration, shutdown: &CancellationToken) -> Result<()> {
        let wanted = self.grant_if_wanted().await;
        if !wanted {
            tokio::select! {
                _ = tokio::time::sleep(hop_delay) => {}
                _ = shutdown.cancelled() => return Err(NodeError::Stopped),
            }
            if !self.grant_if_wanted().await {
                return Ok(());
            }
        }

        let mut released = self.release.subscribe();
        tokio::select! {
            result = released.wait_for(|released| *released) => {
                result.map(|_| ()).map_err(|_| NodeError::Stopped)
            }
            _ = shutdown.cancelled() => Err(NodeError::Stopped),
        }
    }

    async fn grant_if_wanted(&self) -> bool {
        let flags = self.flags.lock().await;
        if flags.wants {
            self.release.send_replace(false);
            self.granted.send_replace(true);
        }
        flags.wants
    }

    pub(crate) async fn hand_off(&self) {
        let mut flags = self.flags.lock().await;
        flags.has_token = false;
        self.granted.send_replace(false);
        self.release.send_replace(false);
    }

    pub async fn has_token(&self) -> bool {
        self.flags.lock().await.has_token
    }

    /// Number of times a token arrived here (or was seeded here).
    pub async fn passes(&self) -> u64 {
        self.flags.lock().await.passes
    }
}

/// Next id after `me` in ascending order, wrapping to the lowest.
pub fn successor(world: &BTreeSet<u64>, me: u64) -> u64 {
    world
        .range(me + 1..)
        .next()
        .or_else(|| world.iter().next())
        .copied()
        .unwrap_or(me)
}

impl NodeContext {
    /// Hold the token and forward it along the ring. A lone member keeps
    /// passing it to itself until someone joins or the node stops.
    pub(crate) async fn circulate_token(self: Arc<Self>, token_id: Uuid, term: u64) {
        loop {
            if !self.token.accept(term).await {
                tracing::trace!(node_id = self.rank(), term, "Dropping token of an older term");
                return;
            }
            let hop_delay = Duration::from_millis(self.config.token_hop_delay_ms);
            if self.token.hold(hop_delay, &self.shutdown).await.is_err() {
                return;
            }

            let next = {
                let state = self.state.read().await;
                state
                    .membership
                    .permanent_id()
                    .map(|me| (me, successor(&state.membership.world, me)))
            };
            self.token.hand_off().await;

            match next {
                Some((me, next)) if next != me => {
                    tracing::trace!(node_id = me, next, token = %token_id, "Passing token");
                    self.send(Body::Token { token_id, term }, Some(next));
                    return;
                }
                Some(_) => continue,
                None => return,
            }
        }
    }
}
