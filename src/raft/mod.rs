pub mod node;
pub mod rpc;
pub mod state;
pub mod timer;

pub use state::{Membership, RaftRole, RaftState, RoleState};
