use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::message::Message;

/// An application `Letter` message handed to the host.
#[derive(Debug, Clone)]
pub struct Letter {
    pub message: Message,
    pub received_at: DateTime<Utc>,
}

/// FIFO of messages not consumed by the protocol handlers.
#[derive(Debug, Default)]
pub struct Mailbox {
    letters: Mutex<VecDeque<Letter>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, message: Message) {
        self.letters.lock().await.push_back(Letter {
            message,
            received_at: Utc::now(),
        });
    }

    pub async fn has_message(&self) -> bool {
        !self.letters.lock().await.is_empty()
    }

    /// Pop the oldest letter, if any.
    pub async fn take_message(&self) -> Option<Letter> {
        self.letters.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.letters.lock().await.len()
    }
}
