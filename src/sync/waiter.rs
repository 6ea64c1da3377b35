use std::time::Duration;

use tokio::sync::watch;

use crate::error::{NodeError, Result};

/// Completion callback for the non-blocking flavour of a primitive. It runs
/// on whichever task resolves the rendezvous and must not block.
pub type Completion<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome<T> {
    Done(T),
    TimedOut(Duration),
    Aborted,
}

impl<T> Outcome<T> {
    fn into_result(self) -> Result<T> {
        match self {
            Outcome::Done(value) => Ok(value),
            Outcome::TimedOut(after) => Err(NodeError::Timeout(after)),
            Outcome::Aborted => Err(NodeError::Stopped),
        }
    }
}

pub(crate) type OutcomeRx<T> = watch::Receiver<Option<Outcome<T>>>;

/// One rendezvous wait entry: a completion signal shared by every blocked
/// caller plus the callbacks registered by non-blocking callers.
pub(crate) struct Waiter<T> {
    tx: watch::Sender<Option<Outcome<T>>>,
    callbacks: Vec<Completion<T>>,
}

impl<T: Clone + Send + Sync + 'static> Waiter<T> {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx,
            callbacks: Vec::new(),
        }
    }

    pub(crate) fn subscribe(&self) -> OutcomeRx<T> {
        self.tx.subscribe()
    }

    pub(crate) fn on_complete(&mut self, callback: Completion<T>) {
        self.callbacks.push(callback);
    }

    /// Register a caller: callbacks are stored, blocking callers get a
    /// receiver to wait on.
    pub(crate) fn attach(&mut self, callback: Option<Completion<T>>) -> Option<OutcomeRx<T>> {
        match callback {
            Some(callback) => {
                self.on_complete(callback);
                None
            }
            None => Some(self.subscribe()),
        }
    }

    pub(crate) fn resolve(self, outcome: Outcome<T>) {
        self.tx.send_replace(Some(outcome.clone()));
        for callback in self.callbacks {
            callback(outcome.clone().into_result());
        }
    }
}

/// Resolve a caller immediately, without a table entry.
pub(crate) fn resolve_now<T: Clone + Send + Sync + 'static>(
    callback: Option<Completion<T>>,
    value: T,
) -> Option<OutcomeRx<T>> {
    let mut waiter = Waiter::new();
    let rx = waiter.attach(callback);
    waiter.resolve(Outcome::Done(value));
    rx
}

/// Block until the rendezvous behind `rx` resolves.
pub(crate) async fn wait<T: Clone>(mut rx: OutcomeRx<T>) -> Result<T> {
    let outcome = match rx.wait_for(|outcome| outcome.is_some()).await {
        Ok(outcome) => outcome.clone(),
        // Sender dropped without resolving
        Err(_) => return Err(NodeError::Stopped),
    };
    outcome.map_or(Err(NodeError::Stopped), Outcome::into_result)
}
