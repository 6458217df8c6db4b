//! CASPaxos single-register consensus.
//!
//! A single-decree, CAS-flavored Paxos state machine providing
//! linearizable compare-and-swap over a key -> string namespace:
//! - `ballot`: ordered proposal identifiers
//! - `messages`: the prepare/promise/commit/ack protocol surface
//! - `acceptor` / `proposer`: the two state machines
//! - `register`: the round driver with quorum arithmetic
//!
//! The register coexists with the transactional store rather than
//! replacing it; it is meant for coordination values, not bulk data.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod acceptor;
pub mod ballot;
pub mod messages;
pub mod proposer;
pub mod register;

pub use acceptor::Acceptor;
pub use ballot::Ballot;
pub use messages::{Ack, Commit, Prepare, Promise};
pub use proposer::Proposer;
pub use register::{CasRegister, ConsensusError, RoundPhase};
