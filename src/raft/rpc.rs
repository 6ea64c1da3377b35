//! Election rules applied to [`RaftState`], independent of timers and the bus.
//!
//! The node runtime calls these under its state lock and acts on the
//! returned decision (publish a reply, re-arm timers, change role).

use crate::raft::state::{RaftRole, RaftState, RoleState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteDecision {
    pub granted: bool,
    /// Term to report back to the candidate.
    pub term: u64,
    /// The request carried a newer term and this node was not a follower.
    pub step_down: bool,
}

/// Handle RequestVote.
///
/// A vote is granted only for a term strictly greater than the current one,
/// and only if no different candidate was voted for in that term. Granting
/// moves this node to the candidate's term.
pub fn handle_request_vote(
    state: &mut RaftState,
    term: u64,
    candidate_id: u64,
    my_id: u64,
) -> VoteDecision {
    let role = state.role();
    let newer = term > state.current_term;
    if newer {
        state.adopt_term(term);
    }

    let granted = newer && state.voted_for.map_or(true, |v| v == candidate_id);
    if granted {
        state.voted_for = Some(candidate_id);
    }

    tracing::debug!(
        node_id = my_id,
        candidate = candidate_id,
        term,
        granted,
        "RequestVote response"
    );

    VoteDecision {
        granted,
        term: state.current_term,
        step_down: newer && role != RaftRole::Follower,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteTally {
    /// Response was stale, for another term, or arrived outside a candidacy.
    Ignored,
    /// A follower saw a grant for its term; its deadline should be pushed.
    KeepAlive,
    /// The response carried a newer term.
    StepDown,
    Counted { votes: usize, won: bool },
}

/// Handle VoteResponse.
pub fn handle_vote_response(
    state: &mut RaftState,
    source: u64,
    term: u64,
    granted: bool,
) -> VoteTally {
    if term > state.current_term {
        let was_follower = state.role() == RaftRole::Follower;
        state.adopt_term(term);
        return if was_follower {
            VoteTally::KeepAlive
        } else {
            VoteTally::StepDown
        };
    }

    // Only members of the current world vote
    if !state.membership.world.contains(&source) {
        return VoteTally::Ignored;
    }

    let majority = state.membership.majority();
    let current_term = state.current_term;
    match &mut state.role {
        RoleState::Candidate {
            term: candidacy,
            votes_received,
            ..
        } if *candidacy == term && term == current_term && granted => {
            votes_received.insert(source);
            let votes = votes_received.len();
            VoteTally::Counted {
                votes,
                won: votes >= majority,
            }
        }
        RoleState::Follower { .. } if granted && term >= current_term => VoteTally::KeepAlive,
        _ => VoteTally::Ignored,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Term older than ours.
    Stale,
    /// A leader ignoring a heartbeat from another leader of the same term.
    Ignored,
    /// The sender is our leader from now on.
    Accepted { step_down: bool },
}

/// Handle Heartbeat.
pub fn handle_heartbeat(state: &mut RaftState, source: u64, term: u64) -> HeartbeatOutcome {
    if term < state.current_term {
        return HeartbeatOutcome::Stale;
    }

    let role = state.role();
    if role == RaftRole::Leader && term == state.current_term {
        return HeartbeatOutcome::Ignored;
    }

    state.adopt_term(term);
    state.leader_id = Some(source);
    HeartbeatOutcome::Accepted {
        step_down: role != RaftRole::Follower,
    }
}
