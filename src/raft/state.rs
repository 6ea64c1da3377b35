use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tokio::time::Instant;

/// Raft node role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

impl std::fmt::Display for RaftRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaftRole::Follower => write!(f, "follower"),
            RaftRole::Candidate => write!(f, "candidate"),
            RaftRole::Leader => write!(f, "leader"),
        }
    }
}

/// Per-cycle bookkeeping of a leader's heartbeat.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatCycle {
    pub cycle: u64,
    /// Members expected to confirm this cycle, fixed when it opens.
    pub expected: BTreeSet<u64>,
    /// Confirmations are only collected while the window is open.
    pub window_open: bool,
    pub confirmations: BTreeSet<u64>,
}

/// The active role and the data only that role owns.
#[derive(Debug, Clone)]
pub enum RoleState {
    Follower {
        election_deadline: Instant,
    },
    Candidate {
        term: u64,
        votes_received: BTreeSet<u64>,
        election_deadline: Instant,
    },
    Leader {
        heartbeat: HeartbeatCycle,
    },
}

impl RoleState {
    pub fn role(&self) -> RaftRole {
        match self {
            RoleState::Follower { .. } => RaftRole::Follower,
            RoleState::Candidate { .. } => RaftRole::Candidate,
            RoleState::Leader { .. } => RaftRole::Leader,
        }
    }

    pub fn election_deadline(&self) -> Option<Instant> {
        match self {
            RoleState::Follower { election_deadline }
            | RoleState::Candidate {
                election_deadline, ..
            } => Some(*election_deadline),
            RoleState::Leader { .. } => None,
        }
    }
}

/// Identity and live member set of a node.
///
/// The permanent id is assigned at most once. The world is replaced
/// wholesale by leader-stamped snapshots; a snapshot older (by Lamport
/// timestamp) than the last one adopted from the same leader is ignored.
#[derive(Debug, Clone)]
pub struct Membership {
    pub ephemeral_id: u64,
    permanent_id: Option<u64>,
    pub registered: bool,
    pub world: BTreeSet<u64>,
    /// Ephemeral ids heard through `Alive` during discovery.
    pub discovered: BTreeSet<u64>,
    /// (leader, timestamp) of the last adopted snapshot.
    stamp: Option<(u64, u64)>,
    /// Leader side: ephemeral id -> permanent id handed out.
    registrations: HashMap<u64, u64>,
    next_member_id: u64,
}

impl Membership {
    pub fn new(ephemeral_id: u64) -> Self {
        Self {
            ephemeral_id,
            permanent_id: None,
            registered: false,
            world: BTreeSet::new(),
            discovered: BTreeSet::new(),
            stamp: None,
            registrations: HashMap::new(),
            next_member_id: 1,
        }
    }

    pub fn permanent_id(&self) -> Option<u64> {
        self.permanent_id
    }

    /// Permanent id if assigned, ephemeral id otherwise.
    pub fn rank(&self) -> u64 {
        self.permanent_id.unwrap_or(self.ephemeral_id)
    }

    /// True when `id` is one of this node's identities.
    pub fn is_self(&self, id: u64) -> bool {
        id == self.ephemeral_id || self.permanent_id == Some(id)
    }

    /// Assign the permanent id. Returns false, leaving the state untouched,
    /// when a different id was already assigned.
    pub fn set_permanent_id(&mut self, id: u64) -> bool {
        match self.permanent_id {
            Some(current) if current != id => false,
            _ => {
                self.permanent_id = Some(id);
                self.registered = true;
                self.next_member_id = self.next_member_id.max(id + 1);
                true
            }
        }
    }

    /// Members other than this node.
    pub fn others(&self) -> BTreeSet<u64> {
        self.world
            .iter()
            .copied()
            .filter(|id| Some(*id) != self.permanent_id)
            .collect()
    }

    pub fn majority(&self) -> usize {
        self.world.len() / 2 + 1
    }

    /// Adopt a leader-stamped snapshot.
    pub fn apply_snapshot(&mut self, leader: u64, timestamp: u64, world: &BTreeSet<u64>) -> bool {
        if let Some((stamped_by, stamped_at)) = self.stamp {
            if stamped_by == leader && timestamp < stamped_at {
                return false;
            }
        }
        self.stamp = Some((leader, timestamp));
        self.world = world.clone();
        self.track_ids();
        true
    }

    /// Replace the world without a leader stamp (self-distribution, local
    /// leader changes).
    pub fn set_world(&mut self, world: BTreeSet<u64>) {
        self.world = world;
        self.track_ids();
    }

    /// Adopt the entry for this node from a self-distribution mapping.
    pub fn adopt_mapping(&mut self, mapping: &BTreeMap<u64, u64>) -> bool {
        let Some(&assigned) = mapping.get(&self.ephemeral_id) else {
            return false;
        };
        if !self.set_permanent_id(assigned) {
            return false;
        }
        for (&ephemeral, &permanent) in mapping {
            self.registrations.insert(ephemeral, permanent);
        }
        self.set_world(mapping.values().copied().collect());
        true
    }

    /// Leader side of registration: pick an id for `ephemeral_id` and add it
    /// to the world. Repeated requests from the same ephemeral id get the same
    /// answer. `None` means the request cannot be honoured.
    pub fn register(&mut self, ephemeral_id: u64, previous_id: Option<u64>) -> Option<u64> {
        if let Some(&known) = self.registrations.get(&ephemeral_id) {
            self.world.insert(known);
            return Some(known);
        }

        let id = match previous_id {
            Some(previous) => {
                let owned_elsewhere = self
                    .registrations
                    .iter()
                    .any(|(&eph, &perm)| perm == previous && eph != ephemeral_id);
                if owned_elsewhere || self.world.contains(&previous) {
                    return None;
                }
                previous
            }
            None => {
                let id = self.next_member_id;
                self.next_member_id += 1;
                id
            }
        };

        self.registrations.insert(ephemeral_id, id);
        self.world.insert(id);
        self.track_ids();
        Some(id)
    }

    /// Remove members from the world, returning the ones actually removed.
    pub fn evict(&mut self, missing: &BTreeSet<u64>) -> BTreeSet<u64> {
        let removed: BTreeSet<u64> = missing.intersection(&self.world).copied().collect();
        for id in &removed {
            self.world.remove(id);
        }
        removed
    }

    fn track_ids(&mut self) {
        if let Some(&max) = self.world.iter().next_back() {
            self.next_member_id = self.next_member_id.max(max + 1);
        }
    }
}

/// Deterministic self-distribution: sort the ephemeral ids and hand out
/// 1-based ranks.
pub fn rank_mapping(ephemeral_ids: &BTreeSet<u64>) -> BTreeMap<u64, u64> {
    ephemeral_ids
        .iter()
        .enumerate()
        .map(|(rank, &ephemeral)| (ephemeral, rank as u64 + 1))
        .collect()
}

/// Consensus and membership state of one node.
///
/// ## Election Safety
/// At most one leader per term: a node grants at most one vote per term
/// (`voted_for`), only for a term strictly greater than the one it is in,
/// and a candidate needs `floor(|world| / 2) + 1` votes.
///
/// ## Term monotonicity
/// `current_term` only moves forward through [`RaftState::adopt_term`] and
/// [`RaftState::become_candidate`].
#[derive(Debug)]
pub struct RaftState {
    pub current_term: u64,
    pub voted_for: Option<u64>,
    pub leader_id: Option<u64>,
    pub role: RoleState,
    pub membership: Membership,
}

impl RaftState {
    pub fn new(ephemeral_id: u64) -> Self {
        Self {
            current_term: 0,
            voted_for: None,
            leader_id: None,
            role: RoleState::Follower {
                election_deadline: Instant::now(),
            },
            membership: Membership::new(ephemeral_id),
        }
    }

    pub fn role(&self) -> RaftRole {
        self.role.role()
    }

    /// Move to `term` if it is newer. A new term clears the vote.
    pub fn adopt_term(&mut self, term: u64) -> bool {
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            true
        } else {
            false
        }
    }

    /// Transition to follower state
    pub fn become_follower(&mut self, election_deadline: Instant) {
        self.role = RoleState::Follower { election_deadline };
    }

    /// Transition to candidate state: new term, vote for self.
    pub fn become_candidate(&mut self, my_id: u64, election_deadline: Instant) -> u64 {
        self.current_term += 1;
        self.voted_for = Some(my_id);
        self.leader_id = None;
        self.role = RoleState::Candidate {
            term: self.current_term,
            votes_received: BTreeSet::from([my_id]),
            election_deadline,
        };
        self.current_term
    }

    /// Transition to leader state
    pub fn become_leader(&mut self, my_id: u64) {
        self.leader_id = Some(my_id);
        self.membership.world.insert(my_id);
        self.role = RoleState::Leader {
            heartbeat: HeartbeatCycle::default(),
        };
    }

    /// Push the election deadline of a follower or candidate.
    pub fn reset_election_deadline(&mut self, deadline: Instant) {
        match &mut self.role {
            RoleState::Follower { election_deadline }
            | RoleState::Candidate {
                election_deadline, ..
            } => *election_deadline = deadline,
            RoleState::Leader { .. } => {}
        }
    }
}
