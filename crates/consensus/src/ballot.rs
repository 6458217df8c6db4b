//! Ballot numbers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A Paxos ballot: (epoch, node_id), ordered lexicographically so ballots
/// from different nodes never compare equal unless identical. The derived
/// `Ord` compares `epoch` first, then `node_id`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Ballot {
    /// Proposal round counter.
    pub epoch: u64,
    /// Node that issued the ballot; breaks epoch ties.
    pub node_id: u32,
}

impl Ballot {
    /// Create a ballot.
    pub fn new(epoch: u64, node_id: u32) -> Self {
        Ballot { epoch, node_id }
    }

    /// A node's starting ballot, below every ballot it will ever issue.
    pub fn initial(node_id: u32) -> Self {
        Ballot { epoch: 0, node_id }
    }
}

impl fmt::Display for Ballot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.epoch, self.node_id)
    }
}
