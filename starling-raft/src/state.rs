//! BFT Raft state machine implementation.
//!
//! This implements the event-driven consensus core. The node is a pure
//! state machine: it consumes events (verified RPCs and timer
//! expirations) and returns output actions; all I/O is performed by the
//! runtime that drives it.
//!
//! Unlike classical Raft, a replica never adopts a leader or a term from
//! a bare message: leadership is proven by a quorum certificate of
//! signed votes, re-verified by every receiver. Votes themselves are
//! lazy - recorded locally and externalized only when the election timer
//! fires.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use starling_core::{ClientId, LogIndex, NodeId, TermId};
use starling_crypto::{KeyRing, NodeSigner, Signature};
use tracing::{debug, info, warn};

use crate::config::RaftConfig;
use crate::limits::{APPEND_ENTRIES_BATCH_SIZE_MAX, ELECTION_CERT_VOTES_MAX};
use crate::log::{LogEntry, RaftLog};
use crate::message::{
    AppendEntriesRequest, AppendEntriesResponse, Command, CommandResponse, RequestVoteRequest,
    Revolution, Rpc, SignedVote,
};

/// Consensus node role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftRole {
    /// Follower state - passive, responds to RPCs.
    Follower,
    /// Candidate state - actively seeking votes.
    Candidate,
    /// Leader state - handles client requests, replicates log.
    Leader,
}

impl Default for RaftRole {
    fn default() -> Self {
        Self::Follower
    }
}

/// The application state machine commands are applied to.
///
/// `apply` must be deterministic: every replica applies the same commands
/// in the same order and must produce the same results.
pub trait StateMachine {
    /// Applies a committed command and returns its result.
    fn apply(&mut self, command: &Bytes) -> Bytes;
}

/// Events consumed by the state machine.
///
/// RPCs arrive here only after the runtime's crypto gate verified the
/// envelope signature; timer events are enqueued by the timer facility.
#[derive(Debug, Clone)]
pub enum RaftEvent {
    /// A verified RPC from a replica or client.
    Rpc(Rpc),
    /// The election timer fired.
    ElectionTimeout,
    /// The heartbeat timer fired (leaders only act on this).
    HeartbeatTimeout,
}

/// Output actions from the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaftOutput {
    /// Send an RPC to another replica.
    SendMessage {
        /// Destination replica.
        to: NodeId,
        /// The RPC to sign and send.
        rpc: Rpc,
    },
    /// Send a command response to a client.
    RespondToClient {
        /// Destination client.
        client: ClientId,
        /// The response.
        response: CommandResponse,
    },
    /// Reset the election timer with a new random timeout.
    ResetElectionTimer,
    /// Reset the heartbeat timer.
    ResetHeartbeatTimer,
    /// This node became leader.
    BecameLeader,
    /// This node stepped down from leader.
    SteppedDown,
}

/// A BFT Raft consensus node.
///
/// This is a pure state machine - it takes inputs and produces outputs
/// but does not perform I/O itself. This design enables deterministic
/// multi-node testing without a network.
pub struct RaftNode<M> {
    /// Configuration.
    config: RaftConfig,
    /// Our signing key, used for vote bodies and response proofs.
    signer: NodeSigner,
    /// Verifying keys of all replicas and clients.
    keys: KeyRing,
    /// The application state machine.
    machine: M,

    // Consensus state (all replicas).
    /// Current role.
    role: RaftRole,
    /// Current term.
    term: TermId,
    /// Who we voted for in the current term.
    voted_for: Option<NodeId>,
    /// Pending vote, externalized only when the election timer fires.
    lazy_vote: Option<(TermId, NodeId)>,
    /// The leader we currently recognize. Set only by a validated
    /// quorum certificate.
    current_leader: Option<NodeId>,
    /// True after a revolution: drop append requests from the current
    /// leader until a new one proves itself.
    ignore_leader: bool,
    /// The replicated log.
    log: RaftLog,
    /// Index of highest log entry known to be committed.
    commit_index: LogIndex,
    /// Index of highest log entry applied to the state machine.
    last_applied: LogIndex,
    /// Deduplication table: `(client, signature)` of every executed
    /// command maps to its stored result; a revolution key maps to None.
    replay_map: HashMap<(ClientId, Signature), Option<Bytes>>,

    // Volatile state on leaders (reinitialized after election).
    /// For each peer, index of the next log entry to send.
    next_index: HashMap<NodeId, LogIndex>,
    /// For each peer, index of the highest log entry known replicated.
    match_index: HashMap<NodeId, LogIndex>,
    /// Peers that currently accept us as leader.
    convinced: HashSet<NodeId>,
    /// The signed votes that elected us, attached to every append request.
    election_cert: Vec<SignedVote>,

    // Candidate state.
    /// Granted votes received in the current election.
    yes_votes: HashSet<SignedVote>,
    /// Peers from whom a vote is still possible.
    potential_votes: HashSet<NodeId>,
}

impl<M> std::fmt::Debug for RaftNode<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaftNode")
            .field("node_id", &self.config.node_id)
            .field("role", &self.role)
            .field("term", &self.term)
            .field("leader", &self.current_leader)
            .field("log_len", &self.log.len())
            .field("commit_index", &self.commit_index)
            .field("last_applied", &self.last_applied)
            .finish()
    }
}

impl<M: StateMachine> RaftNode<M> {
    /// Creates a new consensus node.
    #[must_use]
    pub fn new(config: RaftConfig, signer: NodeSigner, keys: KeyRing, machine: M) -> Self {
        debug_assert_eq!(signer.node_id(), config.node_id);

        Self {
            config,
            signer,
            keys,
            machine,
            role: RaftRole::Follower,
            term: TermId::new(0),
            voted_for: None,
            lazy_vote: None,
            current_leader: None,
            ignore_leader: false,
            log: RaftLog::new(),
            commit_index: LogIndex::new(0),
            last_applied: LogIndex::new(0),
            replay_map: HashMap::new(),
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            convinced: HashSet::new(),
            election_cert: Vec::new(),
            yes_votes: HashSet::new(),
            potential_votes: HashSet::new(),
        }
    }

    /// Returns this node's ID.
    #[must_use]
    pub const fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    /// Returns the current term.
    #[must_use]
    pub const fn current_term(&self) -> TermId {
        self.term
    }

    /// Returns the current role.
    #[must_use]
    pub const fn role(&self) -> RaftRole {
        self.role
    }

    /// Returns true if this node is the leader.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.role == RaftRole::Leader
    }

    /// Returns the currently recognized leader, if any.
    #[must_use]
    pub const fn leader_id(&self) -> Option<NodeId> {
        self.current_leader
    }

    /// Returns true if a revolution suppressed the current leader.
    #[must_use]
    pub const fn ignores_leader(&self) -> bool {
        self.ignore_leader
    }

    /// Returns the pending lazy vote, if any.
    #[must_use]
    pub const fn lazy_vote(&self) -> Option<(TermId, NodeId)> {
        self.lazy_vote
    }

    /// Returns the commit index.
    #[must_use]
    pub const fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    /// Returns the last applied index.
    #[must_use]
    pub const fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    /// Returns a reference to the log.
    #[must_use]
    pub const fn log(&self) -> &RaftLog {
        &self.log
    }

    /// Returns a reference to the application state machine.
    #[must_use]
    pub const fn machine(&self) -> &M {
        &self.machine
    }

    /// Returns the stored replay entry for a key, if any.
    ///
    /// `Some(Some(result))` = command executed; `Some(None)` = key spent
    /// by a revolution; `None` = never seen.
    #[must_use]
    pub fn replay_entry(&self, client: ClientId, signature: Signature) -> Option<Option<Bytes>> {
        self.replay_map.get(&(client, signature)).cloned()
    }

    /// Handles one event, returning the actions to take.
    pub fn handle_event(&mut self, event: RaftEvent) -> Vec<RaftOutput> {
        let outputs = match event {
            RaftEvent::Rpc(rpc) => self.handle_rpc(rpc),
            RaftEvent::ElectionTimeout => self.handle_election_timeout(),
            RaftEvent::HeartbeatTimeout => self.handle_heartbeat_timeout(),
        };

        // Invariants hold after every event.
        debug_assert!(self.last_applied <= self.commit_index);
        debug_assert!(self.commit_index <= self.log.last_index());

        outputs
    }

    /// Dispatches a verified RPC.
    fn handle_rpc(&mut self, rpc: Rpc) -> Vec<RaftOutput> {
        match rpc {
            Rpc::AppendEntries(req) => self.handle_append_entries(req),
            Rpc::AppendEntriesResponse(resp) => self.handle_append_entries_response(resp),
            Rpc::RequestVote(req) => self.handle_request_vote(req),
            Rpc::RequestVoteResponse(vote) => self.handle_request_vote_response(vote),
            Rpc::Command(cmd) => self.handle_command(cmd),
            Rpc::CommandResponse(_) => {
                // Replicas do not consume command responses; clients do.
                Vec::new()
            }
            Rpc::Revolution(rev) => self.handle_revolution(rev),
            Rpc::Debug(msg) => {
                debug!(from = %msg.node_id, text = %msg.message, "debug message");
                Vec::new()
            }
        }
    }

    /// Handles an election timeout.
    ///
    /// A pending lazy vote is externalized now; otherwise we start an
    /// election.
    fn handle_election_timeout(&mut self) -> Vec<RaftOutput> {
        if self.role == RaftRole::Leader {
            return Vec::new();
        }

        if let Some((vote_term, candidate)) = self.lazy_vote.take() {
            // Commit to the best candidate seen during the window.
            debug_assert!(vote_term >= self.term);
            self.term = vote_term;
            self.voted_for = Some(candidate);
            self.ignore_leader = false;
            self.current_leader = None;
            self.enter_follower();

            info!(term = %vote_term, candidate = %candidate, "externalizing lazy vote");

            let vote = SignedVote::sign(vote_term, candidate, true, &self.signer);
            return vec![
                RaftOutput::SendMessage {
                    to: candidate,
                    rpc: Rpc::RequestVoteResponse(vote),
                },
                RaftOutput::ResetElectionTimer,
            ];
        }

        self.become_candidate()
    }

    /// Handles a heartbeat timeout (leader only).
    fn handle_heartbeat_timeout(&mut self) -> Vec<RaftOutput> {
        if self.role != RaftRole::Leader {
            return Vec::new();
        }

        let mut outputs: Vec<RaftOutput> = self
            .config
            .peers()
            .into_iter()
            .map(|peer| self.append_entries_for(peer))
            .collect();
        outputs.push(RaftOutput::ResetHeartbeatTimer);
        outputs
    }

    // ── AppendEntries ────────────────────────────────────────────────────

    /// Handles an `AppendEntries` request.
    fn handle_append_entries(&mut self, req: AppendEntriesRequest) -> Vec<RaftOutput> {
        let mut outputs = self.check_for_new_leader(&req);

        let old_last = self.log.last_index();

        if self.current_leader == Some(req.leader_id)
            && !self.ignore_leader
            && req.term == self.term
        {
            // A valid append from the recognized leader of our term.
            outputs.push(RaftOutput::ResetElectionTimer);
            self.lazy_vote = None;

            if self.prev_log_entry_matches(req.prev_log_index, req.prev_log_term)
                && entries_are_well_formed(&req)
            {
                // Retain the prefix through prev, then extend. Discarding
                // an agreeing suffix is wasteful but correct.
                self.log.truncate_after(req.prev_log_index);
                let entry_count = req.entries.len() as u64;
                for entry in req.entries {
                    self.log.append(entry);
                }
                let new_last = self.log.last_index();
                debug_assert_eq!(new_last.get(), req.prev_log_index.get() + entry_count);

                outputs.push(self.append_entries_reply(req.leader_id, true, true, new_last));

                let new_commit =
                    LogIndex::new(req.leader_commit.get().min(new_last.get()));
                if new_commit > self.commit_index {
                    self.commit_index = new_commit;
                    outputs.extend(self.apply_entries());
                }
            } else {
                outputs.push(self.append_entries_reply(req.leader_id, true, false, old_last));
            }
        } else if !self.ignore_leader && req.term >= self.term {
            // We do not believe the sender leads this term.
            outputs.push(self.append_entries_reply(req.leader_id, false, false, old_last));
        } else {
            debug!(
                from = %req.leader_id,
                term = %req.term,
                ignoring = self.ignore_leader,
                "dropping append request"
            );
        }

        outputs
    }

    /// Step 1 of append handling: leader recognition.
    ///
    /// Validating the attached quorum certificate is the only path by
    /// which a node adopts a new leader; proofs of quorum are mandatory.
    fn check_for_new_leader(&mut self, req: &AppendEntriesRequest) -> Vec<RaftOutput> {
        if req.term == self.term && self.current_leader == Some(req.leader_id) {
            // Already recognized; skip certificate re-verification.
            return Vec::new();
        }
        if req.term < self.term || req.quorum_votes.is_empty() {
            return Vec::new();
        }
        if !self.valid_election_cert(&req.quorum_votes, req.leader_id, req.term) {
            warn!(
                claimed_leader = %req.leader_id,
                term = %req.term,
                votes = req.quorum_votes.len(),
                "rejecting invalid election certificate"
            );
            return Vec::new();
        }

        info!(leader = %req.leader_id, term = %req.term, "adopting leader with valid certificate");

        let mut outputs = Vec::new();
        if self.role == RaftRole::Leader {
            outputs.push(RaftOutput::SteppedDown);
        }
        self.term = req.term;
        self.voted_for = None;
        self.ignore_leader = false;
        self.current_leader = Some(req.leader_id);
        self.enter_follower();
        outputs
    }

    /// Validates an election certificate for `(leader, term)`.
    ///
    /// Every vote must be a granted vote for exactly this leader and
    /// term, cast and signed by a cluster member; distinct voters must
    /// reach quorum, so duplicated votes cannot inflate the count.
    fn valid_election_cert(&self, votes: &[SignedVote], leader: NodeId, term: TermId) -> bool {
        if votes.len() > ELECTION_CERT_VOTES_MAX {
            return false;
        }

        let mut voters = HashSet::new();
        for vote in votes {
            if !vote.vote_granted || vote.candidate_id != leader || vote.term != term {
                return false;
            }
            if !self.config.is_member(vote.node_id) {
                return false;
            }
            if !vote.verify(&self.keys) {
                return false;
            }
            voters.insert(vote.node_id);
        }

        voters.len() >= self.config.quorum_size
    }

    /// True iff our log contains the leader's claimed predecessor entry.
    ///
    /// `LogIndex(0)` is the position before the first entry and always
    /// matches.
    fn prev_log_entry_matches(&self, prev_index: LogIndex, prev_term: TermId) -> bool {
        if prev_index.get() == 0 {
            return true;
        }
        self.log.get(prev_index).is_some() && self.log.term_at(prev_index) == prev_term
    }

    fn append_entries_reply(
        &self,
        to: NodeId,
        convinced: bool,
        success: bool,
        index: LogIndex,
    ) -> RaftOutput {
        RaftOutput::SendMessage {
            to,
            rpc: Rpc::AppendEntriesResponse(AppendEntriesResponse::new(
                self.term,
                self.config.node_id,
                convinced,
                success,
                index,
            )),
        }
    }

    // ── AppendEntriesResponse ────────────────────────────────────────────

    /// Handles an `AppendEntries` response (leader only).
    fn handle_append_entries_response(&mut self, resp: AppendEntriesResponse) -> Vec<RaftOutput> {
        if self.role != RaftRole::Leader {
            return Vec::new();
        }

        let mut outputs = Vec::new();
        let from = resp.node_id;

        if !resp.convinced && resp.term <= self.term {
            // The peer no longer accepts us; it needs a fresh proof.
            self.convinced.remove(&from);
        }

        if resp.term == self.term {
            if resp.convinced && !resp.success {
                // Log-matching backoff.
                let next = self
                    .next_index
                    .get(&from)
                    .copied()
                    .unwrap_or_else(|| self.log.last_index().next());
                if next.get() > 1 {
                    self.next_index.insert(from, next.prev());
                }
            }
            if resp.convinced && resp.success {
                self.match_index.insert(from, resp.index);
                self.next_index.insert(from, resp.index.next());
                self.convinced.insert(from);
                outputs.extend(self.advance_commit_index());
            }
        }

        if !resp.convinced || !resp.success {
            // Immediate retry; the periodic heartbeat would get there
            // eventually, but this converges in one round trip per step.
            outputs.push(self.append_entries_for(from));
        }

        outputs
    }

    // ── Elections ────────────────────────────────────────────────────────

    /// Handles a `RequestVote` request.
    ///
    /// Votes are lazy: an acceptable candidate is only recorded here; the
    /// vote is transmitted when our election timer fires. Denials are
    /// sent immediately and carry the request's term so the candidate
    /// can match them.
    fn handle_request_vote(&mut self, req: RequestVoteRequest) -> Vec<RaftOutput> {
        if req.term < self.term {
            return vec![self.vote_reply(req.term, req.candidate_id, false)];
        }

        if req.term == self.term {
            if self.voted_for == Some(req.candidate_id) {
                // Idempotent re-grant.
                return vec![self.vote_reply(self.term, req.candidate_id, true)];
            }
            if self.voted_for.is_some() {
                return vec![self.vote_reply(req.term, req.candidate_id, false)];
            }
        }

        // The candidate's log must be at least as up-to-date as ours.
        if !self
            .log
            .candidate_up_to_date(req.last_log_term, req.last_log_index)
        {
            return vec![self.vote_reply(req.term, req.candidate_id, false)];
        }

        // Record the lazy vote, preferring strictly higher terms; ties
        // keep the first candidate seen.
        match self.lazy_vote {
            Some((pending_term, _)) if pending_term >= req.term => {
                debug!(
                    candidate = %req.candidate_id,
                    term = %req.term,
                    pending = %pending_term,
                    "keeping existing lazy vote"
                );
            }
            _ => {
                debug!(candidate = %req.candidate_id, term = %req.term, "recording lazy vote");
                self.lazy_vote = Some((req.term, req.candidate_id));
            }
        }
        Vec::new()
    }

    fn vote_reply(&self, term: TermId, candidate: NodeId, granted: bool) -> RaftOutput {
        RaftOutput::SendMessage {
            to: candidate,
            rpc: Rpc::RequestVoteResponse(SignedVote::sign(term, candidate, granted, &self.signer)),
        }
    }

    /// Handles a vote (candidate only).
    fn handle_request_vote_response(&mut self, vote: SignedVote) -> Vec<RaftOutput> {
        if self.role != RaftRole::Candidate || vote.term != self.term {
            return Vec::new();
        }
        if vote.candidate_id != self.config.node_id || !self.config.is_member(vote.node_id) {
            return Vec::new();
        }
        // The vote body signature will be relayed inside our certificate,
        // so verify it even though the envelope already checked out.
        if !vote.verify(&self.keys) {
            warn!(from = %vote.node_id, "dropping vote with invalid body signature");
            return Vec::new();
        }

        if vote.vote_granted {
            self.yes_votes.insert(vote);
            if self.yes_voter_count() >= self.config.quorum_size {
                return self.become_leader();
            }
        } else {
            self.potential_votes.remove(&vote.node_id);
        }

        Vec::new()
    }

    /// Counts distinct voters among the granted votes.
    fn yes_voter_count(&self) -> usize {
        self.yes_votes
            .iter()
            .map(|v| v.node_id)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Starts an election: increment term, vote for self, solicit votes.
    fn become_candidate(&mut self) -> Vec<RaftOutput> {
        let prev_term = self.term;

        self.term = self.term.next();
        self.role = RaftRole::Candidate;
        self.voted_for = Some(self.config.node_id);
        self.lazy_vote = None;
        self.current_leader = None;
        self.ignore_leader = false;

        // Our own signed vote seeds the certificate-to-be.
        let own_vote = SignedVote::sign(self.term, self.config.node_id, true, &self.signer);
        self.yes_votes.clear();
        self.yes_votes.insert(own_vote);
        self.potential_votes = self.config.peers().into_iter().collect();

        debug_assert_eq!(self.term.get(), prev_term.get() + 1);
        debug_assert_eq!(self.voted_for, Some(self.config.node_id));

        info!(term = %self.term, "starting election");

        let mut outputs = vec![RaftOutput::ResetElectionTimer];
        let (last_log_term, last_log_index) = self.log.last_log_info();
        for peer in self.config.peers() {
            outputs.push(RaftOutput::SendMessage {
                to: peer,
                rpc: Rpc::RequestVote(RequestVoteRequest::new(
                    self.term,
                    self.config.node_id,
                    last_log_index,
                    last_log_term,
                )),
            });
        }

        // A single-node cluster reaches quorum immediately.
        if self.yes_voter_count() >= self.config.quorum_size {
            outputs.extend(self.become_leader());
        }

        outputs
    }

    /// Becomes leader: the accumulated votes become the election
    /// certificate attached to every append request.
    fn become_leader(&mut self) -> Vec<RaftOutput> {
        debug_assert!(self.yes_voter_count() >= self.config.quorum_size);

        self.role = RaftRole::Leader;
        self.current_leader = Some(self.config.node_id);
        self.election_cert = self.yes_votes.drain().collect();
        self.potential_votes.clear();

        let next = self.log.last_index().next();
        self.next_index.clear();
        self.match_index.clear();
        self.convinced.clear();
        for peer in self.config.peers() {
            self.next_index.insert(peer, next);
            self.match_index.insert(peer, LogIndex::new(0));
        }

        info!(term = %self.term, "became leader");

        let mut outputs = vec![RaftOutput::BecameLeader, RaftOutput::ResetHeartbeatTimer];
        for peer in self.config.peers() {
            outputs.push(self.append_entries_for(peer));
        }
        outputs
    }

    /// Clears candidate bookkeeping when returning to follower.
    fn enter_follower(&mut self) {
        self.role = RaftRole::Follower;
        self.yes_votes.clear();
        self.potential_votes.clear();
    }

    // ── Replication ──────────────────────────────────────────────────────

    /// Builds an `AppendEntries` request for one peer (leader only).
    fn append_entries_for(&self, peer: NodeId) -> RaftOutput {
        debug_assert_eq!(self.role, RaftRole::Leader);

        let next = self
            .next_index
            .get(&peer)
            .copied()
            .unwrap_or_else(|| self.log.last_index().next());
        let prev = next.prev();
        let prev_term = self.log.term_at(prev);

        let mut entries = self.log.entries_from(next);
        entries.truncate(APPEND_ENTRIES_BATCH_SIZE_MAX as usize);

        RaftOutput::SendMessage {
            to: peer,
            rpc: Rpc::AppendEntries(AppendEntriesRequest::new(
                self.term,
                self.config.node_id,
                prev,
                prev_term,
                entries,
                self.commit_index,
                self.election_cert.clone(),
            )),
        }
    }

    /// Tries to advance the commit index (leader only).
    ///
    /// Only entries from the current term are candidates; the commit
    /// index moves to the end of the **prefix** of candidates that each
    /// have quorum, not to the highest replicated index, because gaps
    /// would break log matching.
    fn advance_commit_index(&mut self) -> Vec<RaftOutput> {
        debug_assert_eq!(self.role, RaftRole::Leader);

        let prev_commit = self.commit_index;
        let mut new_commit = self.commit_index;

        for n in (self.commit_index.get() + 1)..=self.log.last_index().get() {
            let idx = LogIndex::new(n);
            if self.log.term_at(idx) != self.term {
                continue;
            }

            // The leader itself counts toward quorum.
            let replicas = 1 + self
                .config
                .peers()
                .iter()
                .filter(|peer| {
                    self.match_index
                        .get(peer)
                        .is_some_and(|&match_idx| match_idx >= idx)
                })
                .count();

            if replicas >= self.config.quorum_size {
                new_commit = idx;
            } else {
                break;
            }
        }

        debug_assert!(new_commit >= prev_commit);

        if new_commit > prev_commit {
            self.commit_index = new_commit;
            debug!(commit_index = %new_commit, "commit index advanced");
            self.apply_entries()
        } else {
            Vec::new()
        }
    }

    /// Applies committed entries up to the commit index.
    ///
    /// Each command executes at most once per node: an entry whose replay
    /// key already holds a result is skipped (a duplicate that entered
    /// the log before its first copy applied).
    fn apply_entries(&mut self) -> Vec<RaftOutput> {
        let mut outputs = Vec::new();

        while self.last_applied < self.commit_index {
            let idx = self.last_applied.next();
            let command = self
                .log
                .get(idx)
                .expect("committed entry must exist in log")
                .command
                .clone();
            let key = command.replay_key();

            if matches!(self.replay_map.get(&key), Some(Some(_))) {
                debug!(index = %idx, client = %command.client_id, "skipping duplicate command");
            } else {
                let result = self.machine.apply(&command.entry);
                self.replay_map.insert(key, Some(result.clone()));

                if self.role == RaftRole::Leader {
                    outputs.push(RaftOutput::RespondToClient {
                        client: command.client_id,
                        response: self.build_response(&command, result),
                    });
                }
            }

            self.last_applied = idx;
        }

        debug_assert_eq!(self.last_applied, self.commit_index);
        outputs
    }

    fn build_response(&self, command: &Command, result: Bytes) -> CommandResponse {
        let leader_hint = if self.role == RaftRole::Leader {
            Some(self.config.node_id)
        } else {
            self.current_leader
        };
        CommandResponse::sign(result, leader_hint, command.request_id, &self.signer)
    }

    // ── Client commands ──────────────────────────────────────────────────

    /// Handles a client command.
    fn handle_command(&mut self, cmd: Command) -> Vec<RaftOutput> {
        let key = cmd.replay_key();

        // Replay: answer from the cache without re-executing.
        if let Some(Some(result)) = self.replay_map.get(&key) {
            let result = result.clone();
            debug!(client = %cmd.client_id, request = %cmd.request_id, "replaying cached response");
            return vec![RaftOutput::RespondToClient {
                client: cmd.client_id,
                response: self.build_response(&cmd, result),
            }];
        }

        if self.role == RaftRole::Leader {
            let index = self.log.last_index().next();
            self.log.append(LogEntry::new(self.term, index, cmd));

            let mut outputs: Vec<RaftOutput> = self
                .config
                .peers()
                .into_iter()
                .map(|peer| self.append_entries_for(peer))
                .collect();
            outputs.extend(self.advance_commit_index());
            return outputs;
        }

        if let Some(leader) = self.current_leader {
            // Forward unchanged; the client's signature must survive.
            debug!(client = %cmd.client_id, leader = %leader, "forwarding command to leader");
            return vec![RaftOutput::SendMessage {
                to: leader,
                rpc: Rpc::Command(cmd),
            }];
        }

        debug!(client = %cmd.client_id, "dropping command: no known leader");
        Vec::new()
    }

    // ── Revolution ───────────────────────────────────────────────────────

    /// Handles a client revolution against the current leader.
    fn handle_revolution(&mut self, rev: Revolution) -> Vec<RaftOutput> {
        let key = rev.replay_key();
        if self.replay_map.contains_key(&key) {
            // One-shot: this signed revolution was already spent.
            return Vec::new();
        }

        if self.current_leader == Some(rev.leader_id) {
            warn!(
                client = %rev.client_id,
                leader = %rev.leader_id,
                "revolution: suppressing current leader"
            );
            self.replay_map.insert(key, None);
            self.ignore_leader = true;
        }

        Vec::new()
    }
}

/// Checks the entries of an append request are contiguous after
/// `prev_log_index` with non-decreasing terms. A malformed batch is
/// answered like a log mismatch instead of corrupting the log.
fn entries_are_well_formed(req: &AppendEntriesRequest) -> bool {
    let mut expected = req.prev_log_index;
    let mut last_term = req.prev_log_term;
    for entry in &req.entries {
        expected = expected.next();
        if entry.index != expected || entry.term < last_term || entry.term > req.term {
            return false;
        }
        last_term = entry.term;
    }
    true
}
