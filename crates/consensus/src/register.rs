//! The CASPaxos register: a proposer/acceptor pair running single-decree
//! rounds with compare-and-swap preconditions.
//!
//! The register fronts a key -> string namespace separate from the
//! transactional store, intended for coordination rather than bulk data.
//! The algorithm is written for N replicas; replica transport is not
//! implemented (log shipping lives outside this component), so with an
//! empty replica list the quorum is trivially the local acceptor.

use crate::acceptor::Acceptor;
use crate::ballot::Ballot;
use crate::messages::{Ack, Commit, Prepare, Promise};
use crate::proposer::Proposer;
use thiserror::Error;
use tracing::{debug, warn};

/// Which round phase failed to gather a quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// Phase 1 (prepare/promise).
    Prepare,
    /// Phase 2 (commit/ack).
    Commit,
}

impl std::fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoundPhase::Prepare => write!(f, "prepare"),
            RoundPhase::Commit => write!(f, "commit"),
        }
    }
}

/// Consensus failures surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    /// The instance was opened without a consensus node id.
    #[error("consensus is not enabled on this instance")]
    Disabled,

    /// Phase 1 was rejected: the CAS precondition failed or a higher
    /// ballot has been promised. The register is unchanged.
    #[error("CAS failed for key {key}")]
    CasFailed {
        /// The contested key
        key: String,
    },

    /// Phase 2 was rejected locally at a stale ballot.
    #[error("commit rejected for key {key}")]
    CommitRejected {
        /// The contested key
        key: String,
    },

    /// Too few acceptors answered. A commit-phase quorum loss may leave a
    /// minority of acceptors with the value accepted; that is inherent to
    /// single-decree rounds and no rollback is attempted.
    #[error("{phase} quorum lost: {acks}/{needed} acks")]
    QuorumLost {
        /// Failing phase
        phase: RoundPhase,
        /// Acks gathered
        acks: usize,
        /// Quorum size required
        needed: usize,
    },
}

/// A single-node CASPaxos register.
#[derive(Debug)]
pub struct CasRegister {
    node_id: u32,
    replicas: Vec<String>,
    proposer: Proposer,
    acceptor: Acceptor,
}

impl CasRegister {
    /// Create a register for `node_id`; `replicas` lists the other
    /// acceptors' addresses (quorum math counts self in addition).
    pub fn new(node_id: u32, replicas: Vec<String>) -> Self {
        CasRegister {
            node_id,
            replicas,
            proposer: Proposer::new(node_id),
            acceptor: Acceptor::new(node_id),
        }
    }

    /// The node id this register proposes under.
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// Majority quorum over replicas plus self.
    pub fn quorum_size(&self) -> usize {
        (self.replicas.len() + 1) / 2 + 1
    }

    /// One compare-and-swap round.
    ///
    /// With `expected = None` the write is unconditional; otherwise the
    /// committed value must equal `expected` at prepare time. On a
    /// higher-ballot rejection the proposer's epoch is raised so a retry
    /// can win.
    pub fn cas(
        &self,
        key: &str,
        expected: Option<&str>,
        new_value: &str,
    ) -> Result<(), ConsensusError> {
        let ballot = self.proposer.next_ballot();
        let prepare = Prepare {
            ballot,
            key: key.to_string(),
            expected: expected.map(str::to_string),
            new_value: new_value.to_string(),
        };

        // Phase 1: local acceptor first, then the replica set.
        let Some(local_promise) = self.acceptor.handle_prepare(&prepare) else {
            debug!(key, %ballot, "prepare rejected locally");
            return Err(ConsensusError::CasFailed {
                key: key.to_string(),
            });
        };
        let mut promises = self.broadcast_prepare(&prepare);
        promises.push(local_promise);

        let needed = self.quorum_size();
        if promises.len() < needed {
            warn!(key, acks = promises.len(), needed, "prepare quorum lost");
            return Err(ConsensusError::QuorumLost {
                phase: RoundPhase::Prepare,
                acks: promises.len(),
                needed,
            });
        }
        for promise in &promises {
            if promise.highest_ballot > ballot {
                self.proposer.update_ballot(promise.highest_ballot);
                return Err(ConsensusError::CasFailed {
                    key: key.to_string(),
                });
            }
        }

        // Phase 2.
        let commit = Commit {
            ballot,
            key: key.to_string(),
            value: new_value.to_string(),
        };
        let local_ack = self.acceptor.handle_commit(&commit);
        if !local_ack.success {
            return Err(ConsensusError::CommitRejected {
                key: key.to_string(),
            });
        }
        let mut acks = self.broadcast_commit(&commit);
        acks.push(local_ack);

        let successes = acks.iter().filter(|a| a.success).count();
        if successes < needed {
            warn!(key, acks = successes, needed, "commit quorum lost");
            return Err(ConsensusError::QuorumLost {
                phase: RoundPhase::Commit,
                acks: successes,
                needed,
            });
        }

        debug!(key, %ballot, "CAS round won");
        Ok(())
    }

    /// Unconditional write: CAS with no expected value.
    pub fn set(&self, key: &str, value: &str) -> Result<(), ConsensusError> {
        self.cas(key, None, value)
    }

    /// Conditional delete: the value is tombstoned as an empty string.
    pub fn delete(&self, key: &str, expected: Option<&str>) -> Result<(), ConsensusError> {
        self.cas(key, expected, "")
    }

    /// Local read of the committed value (see `Acceptor::get` for the
    /// linearizability caveat). A deleted key reads back as the empty
    /// string it was tombstoned with.
    pub fn get(&self, key: &str) -> Option<String> {
        self.acceptor.get(key)
    }

    /// Send PREPARE to the replica set. Transport is not implemented;
    /// remote acceptors contribute no promises.
    fn broadcast_prepare(&self, _msg: &Prepare) -> Vec<Promise> {
        Vec::new()
    }

    /// Send COMMIT to the replica set. Transport is not implemented;
    /// remote acceptors contribute no acks.
    fn broadcast_commit(&self, _msg: &Commit) -> Vec<Ack> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_node() -> CasRegister {
        CasRegister::new(1, Vec::new())
    }

    #[test]
    fn test_counter_sequence() {
        let register = single_node();

        register.cas("counter", None, "1").unwrap();
        assert_eq!(register.get("counter"), Some("1".to_string()));

        register.cas("counter", Some("1"), "2").unwrap();
        assert_eq!(register.get("counter"), Some("2".to_string()));

        // Stale expected value: the precondition fails and the value holds.
        let err = register.cas("counter", Some("1"), "3").unwrap_err();
        assert!(matches!(err, ConsensusError::CasFailed { .. }));
        assert_eq!(register.get("counter"), Some("2".to_string()));
    }

    #[test]
    fn test_cas_on_absent_key_with_expectation_fails() {
        let register = single_node();
        let err = register.cas("ghost", Some("x"), "y").unwrap_err();
        assert!(matches!(err, ConsensusError::CasFailed { .. }));
        assert_eq!(register.get("ghost"), None);
    }

    #[test]
    fn test_set_is_unconditional() {
        let register = single_node();
        register.set("k", "a").unwrap();
        register.set("k", "b").unwrap();
        assert_eq!(register.get("k"), Some("b".to_string()));
    }

    #[test]
    fn test_delete_tombstones_empty_string() {
        let register = single_node();
        register.set("k", "v").unwrap();
        register.delete("k", Some("v")).unwrap();
        assert_eq!(register.get("k"), Some(String::new()));

        // Deleting with the wrong witness fails.
        register.set("j", "w").unwrap();
        assert!(register.delete("j", Some("stale")).is_err());
        assert_eq!(register.get("j"), Some("w".to_string()));
    }

    #[test]
    fn test_quorum_sizes() {
        assert_eq!(CasRegister::new(1, vec![]).quorum_size(), 1);
        assert_eq!(
            CasRegister::new(1, vec!["a".into(), "b".into()]).quorum_size(),
            2
        );
        assert_eq!(
            CasRegister::new(1, vec!["a".into(), "b".into(), "c".into(), "d".into()])
                .quorum_size(),
            3
        );
    }

    #[test]
    fn test_quorum_lost_without_transport() {
        // Two replicas are configured but unreachable: quorum needs 2 and
        // only the local acceptor answers.
        let register = CasRegister::new(1, vec!["a".into(), "b".into()]);
        let err = register.set("k", "v").unwrap_err();
        assert!(matches!(
            err,
            ConsensusError::QuorumLost {
                phase: RoundPhase::Prepare,
                acks: 1,
                needed: 2,
            }
        ));
    }

    #[test]
    fn test_successive_rounds_use_higher_ballots() {
        let register = single_node();
        register.set("k", "1").unwrap();
        let after_first = register.acceptor.highest_ballot();
        register.set("k", "2").unwrap();
        assert!(register.acceptor.highest_ballot() > after_first);
    }
}
