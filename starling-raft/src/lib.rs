//! Starling Raft - Byzantine-fault-tolerant Raft consensus.
//!
//! This crate implements the consensus core of Starling: an event-driven
//! state machine that agrees on an ordered log of client-signed commands
//! in the presence of up to `f` Byzantine nodes out of `n >= 3f+1`.
//!
//! The BFT additions over classical Raft:
//!
//! - Every vote is signed; a leader proves its election by attaching the
//!   set of signed votes (a quorum certificate) to its append requests.
//!   Validating that certificate is the **only** way a replica adopts a
//!   new leader.
//! - Votes are **lazy**: a replica records the best candidate it has seen
//!   and externalizes the vote only when its own election timer fires, so
//!   a better candidate arriving within the window can still win.
//! - Client commands carry client signatures; `(client, signature)` keys
//!   a replay map for exactly-once execution, and a signed `Revolution`
//!   message lets a client depose a faulty leader.
//!
//! # Design Principles (`TigerStyle`)
//!
//! - **Pure state machine**: takes events, returns outputs, no I/O
//! - **Deterministic**: all randomness lives in the timer facility
//! - **Testable**: multi-node scenarios run without a network
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod client;
mod config;
mod log;
mod message;
mod state;

pub use client::{RaftClient, RequestId};
pub use config::{byzantine_quorum, RaftConfig};
pub use log::{LogEntry, RaftLog};
pub use message::{
    AppendEntriesRequest, AppendEntriesResponse, Command, CommandResponse, DebugMessage,
    RequestVoteRequest, Revolution, Rpc, RpcSender, SignedVote,
};
pub use state::{RaftEvent, RaftNode, RaftOutput, RaftRole, StateMachine};

/// Consensus protocol limits.
pub mod limits {
    /// Maximum number of entries in a single `AppendEntries` request.
    pub const APPEND_ENTRIES_BATCH_SIZE_MAX: u32 = 1000;

    /// Maximum number of nodes in a cluster.
    pub const CLUSTER_SIZE_MAX: usize = 7;

    /// Maximum number of votes in an election certificate.
    ///
    /// Bounded by the cluster size; a certificate claiming more voters
    /// than the cluster has members is rejected outright.
    pub const ELECTION_CERT_VOTES_MAX: usize = CLUSTER_SIZE_MAX;
}
