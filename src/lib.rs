mod bootstrap;
pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod mailbox;
pub mod message;
pub mod node;
pub mod raft;
pub mod shutdown;
pub mod sync;
pub mod token;

pub use bus::{Bus, MessageHandler};
pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use ids::{IdGenerator, RandomIds, SequentialIds};
pub use message::{Body, Message, MessageKind, Payload};
pub use node::{NodeRuntime, NodeStatus};
pub use raft::RaftRole;
pub use sync::Completion;
