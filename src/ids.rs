use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use rand::Rng;

use crate::error::{NodeError, Result};

/// Source of ephemeral node identifiers, injected into every runtime.
pub trait IdGenerator: Send + Sync {
    /// A fresh id, never one handed out before.
    fn next_id(&self) -> Result<u64>;
}

/// Random ids in an inclusive range; an id is never handed out twice.
pub struct RandomIds {
    min: u64,
    max: u64,
    issued: Mutex<HashSet<u64>>,
}

impl RandomIds {
    pub fn new(min: u64, max: u64) -> Self {
        Self {
            min,
            max,
            issued: Mutex::new(HashSet::new()),
        }
    }
}

impl IdGenerator for RandomIds {
    fn next_id(&self) -> Result<u64> {
        let mut rng = rand::thread_rng();
        let mut issued = self
            .issued
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let span = self.max.saturating_sub(self.min).saturating_add(1);
        if self.max < self.min || issued.len() as u64 >= span {
            return Err(NodeError::InvalidConfig(format!(
                "ephemeral id range {}..={} is exhausted",
                self.min, self.max
            )));
        }
        loop {
            let id = rng.gen_range(self.min..=self.max);
            if issued.insert(id) {
                return Ok(id);
            }
        }
    }
}

/// Deterministic ids, handy for tests.
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> Result<u64> {
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }
}
