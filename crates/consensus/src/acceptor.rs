//! Acceptor state machine.

use crate::ballot::Ballot;
use crate::messages::{Ack, Commit, Prepare, Promise};
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Debug)]
struct AcceptorInner {
    /// Highest ballot promised or accepted; never decreases.
    highest_ballot: Ballot,
    /// Committed register values: key -> (winning ballot, value).
    committed: BTreeMap<String, (Ballot, String)>,
}

/// A single acceptor. Mutexed; safe to share between the local proposer
/// and a future network endpoint.
#[derive(Debug)]
pub struct Acceptor {
    inner: Mutex<AcceptorInner>,
}

impl Acceptor {
    /// Create an acceptor whose initial promise is below every ballot the
    /// node will issue.
    pub fn new(node_id: u32) -> Self {
        Acceptor {
            inner: Mutex::new(AcceptorInner {
                highest_ballot: Ballot::initial(node_id),
                committed: BTreeMap::new(),
            }),
        }
    }

    /// Phase 1. Returns `None` to reject: either the ballot is below the
    /// current promise, or the CAS precondition fails (expected value
    /// present but the key is absent or holds a different value).
    ///
    /// On success the promise is raised to the message's ballot and the
    /// current committed pair is echoed back.
    pub fn handle_prepare(&self, msg: &Prepare) -> Option<Promise> {
        let mut inner = self.inner.lock();

        if msg.ballot < inner.highest_ballot {
            return None;
        }
        inner.highest_ballot = msg.ballot;

        let current = inner.committed.get(&msg.key).cloned();
        if let Some(expected) = &msg.expected {
            match &current {
                None => return None,
                Some((_, value)) if value != expected => return None,
                Some(_) => {}
            }
        }

        Some(Promise {
            ballot: msg.ballot,
            key: msg.key.clone(),
            current,
            highest_ballot: inner.highest_ballot,
        })
    }

    /// Phase 2. A commit below the promised ballot is acked with
    /// `success = false`; otherwise the committed value is overwritten and
    /// its ballot recorded.
    pub fn handle_commit(&self, msg: &Commit) -> Ack {
        let mut inner = self.inner.lock();

        if msg.ballot < inner.highest_ballot {
            return Ack {
                ballot: msg.ballot,
                key: msg.key.clone(),
                success: false,
            };
        }

        inner
            .committed
            .insert(msg.key.clone(), (msg.ballot, msg.value.clone()));
        Ack {
            ballot: msg.ballot,
            key: msg.key.clone(),
            success: true,
        }
    }

    /// Local read of the committed value. Only linearizable when this
    /// acceptor is known to be up to date; a fully-correct linearizable
    /// read would itself run a CAS round with the value unchanged.
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner
            .lock()
            .committed
            .get(key)
            .map(|(_, value)| value.clone())
    }

    /// The highest ballot promised so far.
    pub fn highest_ballot(&self) -> Ballot {
        self.inner.lock().highest_ballot
    }
}
