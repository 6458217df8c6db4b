//! CASPaxos protocol messages.
//!
//! The structs are the future wire surface between proposer and remote
//! acceptors; local rounds pass them by reference without serializing.

use crate::ballot::Ballot;
use serde::{Deserialize, Serialize};

/// Phase 1 request: promise not to accept ballots below `ballot`, and
/// check the CAS precondition against the committed value of `key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prepare {
    /// Proposer's ballot for this round.
    pub ballot: Ballot,
    /// Register key.
    pub key: String,
    /// CAS precondition: when present, the committed value must equal it.
    /// Absent means unconditional.
    pub expected: Option<String>,
    /// Value the proposer intends to commit.
    pub new_value: String,
}

/// Phase 1 success response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promise {
    /// Echoed round ballot.
    pub ballot: Ballot,
    /// Echoed key.
    pub key: String,
    /// The acceptor's committed (ballot, value) for the key, if any.
    pub current: Option<(Ballot, String)>,
    /// The acceptor's highest promised ballot after this prepare.
    pub highest_ballot: Ballot,
}

/// Phase 2 request: commit `value` at `ballot`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Round ballot; rejected when below the acceptor's promise.
    pub ballot: Ballot,
    /// Register key.
    pub key: String,
    /// Value to commit.
    pub value: String,
}

/// Phase 2 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    /// Echoed round ballot.
    pub ballot: Ballot,
    /// Echoed key.
    pub key: String,
    /// False when the acceptor had promised a higher ballot.
    pub success: bool,
}
