//! Proposer ballot allocation.

use crate::ballot::Ballot;
use parking_lot::Mutex;

/// Issues strictly increasing ballots for one node and absorbs higher
/// ballots observed in rejections.
#[derive(Debug)]
pub struct Proposer {
    node_id: u32,
    current_epoch: Mutex<u64>,
}

impl Proposer {
    /// Create a proposer; the first ballot issued is (1, node_id).
    pub fn new(node_id: u32) -> Self {
        Proposer {
            node_id,
            current_epoch: Mutex::new(1),
        }
    }

    /// Take the next ballot and advance the epoch.
    pub fn next_ballot(&self) -> Ballot {
        let mut epoch = self.current_epoch.lock();
        let ballot = Ballot::new(*epoch, self.node_id);
        *epoch += 1;
        ballot
    }

    /// Raise the epoch past an observed higher ballot so the next round
    /// can win.
    pub fn update_ballot(&self, observed: Ballot) {
        let mut epoch = self.current_epoch.lock();
        if observed.epoch >= *epoch {
            *epoch = observed.epoch + 1;
        }
    }
}
