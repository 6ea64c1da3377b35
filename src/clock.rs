use std::sync::atomic::{AtomicU64, Ordering};

/// Per-node Lamport counter.
#[derive(Debug, Default)]
pub struct LamportClock {
    counter: AtomicU64,
}

impl LamportClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock for an outgoing message and return the new value.
    pub fn tick(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Merge a received timestamp: `local = max(local, incoming) + 1`.
    pub fn observe(&self, incoming: u64) -> u64 {
        let previous = self
            .counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |local| {
                Some(local.max(incoming) + 1)
            })
            .unwrap_or_else(|current| current);
        previous.max(incoming) + 1
    }

    pub fn now(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}
