//! Consensus RPC message types.
//!
//! Inter-replica RPCs are signed with node keys; `Command` and
//! `Revolution` originate at clients and carry client signatures that
//! must survive forwarding. Each signed type defines its canonical
//! signing bytes next to the type so every replica derives identical
//! bytes, with a four-byte domain tag to prevent cross-type replay.

use bytes::{BufMut, Bytes, BytesMut};
use starling_core::{ClientId, LogIndex, NodeId, TermId};
use starling_crypto::{ClientSigner, KeyRing, NodeSigner, Signature};

use crate::client::RequestId;
use crate::LogEntry;

/// Domain tags for signature payloads.
mod domain {
    pub const VOTE: &[u8; 4] = b"SVOT";
    pub const COMMAND: &[u8; 4] = b"SCMD";
    pub const RESPONSE: &[u8; 4] = b"SRSP";
    pub const REVOLUTION: &[u8; 4] = b"SREV";
}

/// Consensus message types for communication between replicas and clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rpc {
    /// Append entries from leader to followers (also used as heartbeat).
    AppendEntries(AppendEntriesRequest),
    /// Response to append entries.
    AppendEntriesResponse(AppendEntriesResponse),
    /// Request vote from candidate to other nodes.
    RequestVote(RequestVoteRequest),
    /// A signed vote, either solicited or externalized at timeout.
    RequestVoteResponse(SignedVote),
    /// Client command to replicate.
    Command(Command),
    /// Result of a committed client command.
    CommandResponse(CommandResponse),
    /// Client demand to stop recognizing a leader.
    Revolution(Revolution),
    /// Free-form diagnostic message.
    Debug(DebugMessage),
}

/// The identity a received RPC claims to come from.
///
/// The crypto gate looks the matching verifying key up by this identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcSender {
    /// Signed with a replica's node key.
    Node(NodeId),
    /// Signed with a client key.
    Client(ClientId),
}

impl Rpc {
    /// Returns the sender identity embedded in the payload.
    #[must_use]
    pub const fn sender(&self) -> RpcSender {
        match self {
            Self::AppendEntries(r) => RpcSender::Node(r.leader_id),
            Self::AppendEntriesResponse(r) => RpcSender::Node(r.node_id),
            Self::RequestVote(r) => RpcSender::Node(r.candidate_id),
            Self::RequestVoteResponse(v) => RpcSender::Node(v.node_id),
            Self::Command(c) => RpcSender::Client(c.client_id),
            Self::CommandResponse(r) => RpcSender::Node(r.responder_id),
            Self::Revolution(r) => RpcSender::Client(r.client_id),
            Self::Debug(d) => RpcSender::Node(d.node_id),
        }
    }

    /// Returns a short name for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AppendEntries(_) => "append_entries",
            Self::AppendEntriesResponse(_) => "append_entries_response",
            Self::RequestVote(_) => "request_vote",
            Self::RequestVoteResponse(_) => "request_vote_response",
            Self::Command(_) => "command",
            Self::CommandResponse(_) => "command_response",
            Self::Revolution(_) => "revolution",
            Self::Debug(_) => "debug",
        }
    }
}

/// `AppendEntries` RPC request.
///
/// Sent by the leader to replicate log entries and as heartbeat. Carries
/// the quorum certificate that elected the leader: followers adopt a new
/// leader only after re-verifying every vote in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendEntriesRequest {
    /// Leader's term.
    pub term: TermId,
    /// Leader sending this request.
    pub leader_id: NodeId,
    /// Index of log entry immediately preceding new ones (0 = none).
    pub prev_log_index: LogIndex,
    /// Term of `prev_log_index` entry (0 when `prev_log_index` is 0).
    pub prev_log_term: TermId,
    /// Log entries to store (empty for heartbeat).
    pub entries: Vec<LogEntry>,
    /// Leader's commit index.
    pub leader_commit: LogIndex,
    /// The signed votes that elected this leader for this term.
    pub quorum_votes: Vec<SignedVote>,
}

impl AppendEntriesRequest {
    /// Creates a new `AppendEntries` request.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        term: TermId,
        leader_id: NodeId,
        prev_log_index: LogIndex,
        prev_log_term: TermId,
        entries: Vec<LogEntry>,
        leader_commit: LogIndex,
        quorum_votes: Vec<SignedVote>,
    ) -> Self {
        Self {
            term,
            leader_id,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit,
            quorum_votes,
        }
    }

    /// Returns true if this is a heartbeat (no entries).
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `AppendEntries` RPC response.
///
/// The two flags are orthogonal: `convinced` means "I accept you as the
/// leader of your stated term"; `success` means "my log matched and I
/// appended".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendEntriesResponse {
    /// Responder's current term.
    pub term: TermId,
    /// Sender of this response.
    pub node_id: NodeId,
    /// True if the responder accepts the requester as leader of its term.
    pub convinced: bool,
    /// True if the responder's log matched and entries were appended.
    pub success: bool,
    /// The responder's last log index after processing.
    pub index: LogIndex,
}

impl AppendEntriesResponse {
    /// Creates a new `AppendEntries` response.
    #[must_use]
    pub const fn new(
        term: TermId,
        node_id: NodeId,
        convinced: bool,
        success: bool,
        index: LogIndex,
    ) -> Self {
        Self {
            term,
            node_id,
            convinced,
            success,
            index,
        }
    }
}

/// `RequestVote` RPC request.
///
/// Sent by candidates to gather votes during leader election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestVoteRequest {
    /// Candidate's term.
    pub term: TermId,
    /// Candidate requesting the vote.
    pub candidate_id: NodeId,
    /// Index of candidate's last log entry.
    pub last_log_index: LogIndex,
    /// Term of candidate's last log entry.
    pub last_log_term: TermId,
}

impl RequestVoteRequest {
    /// Creates a new `RequestVote` request.
    #[must_use]
    pub const fn new(
        term: TermId,
        candidate_id: NodeId,
        last_log_index: LogIndex,
        last_log_term: TermId,
    ) -> Self {
        Self {
            term,
            candidate_id,
            last_log_index,
            last_log_term,
        }
    }
}

/// A signed vote for a candidate.
///
/// This doubles as the `RequestVoteResponse` RPC and as the element of an
/// election certificate. The signature is over the vote body, so a vote
/// can be relayed inside an `AppendEntries` request and re-verified by
/// any replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignedVote {
    /// The term the vote applies to.
    pub term: TermId,
    /// The candidate voted on.
    pub candidate_id: NodeId,
    /// The voter.
    pub node_id: NodeId,
    /// True if the vote was granted.
    pub vote_granted: bool,
    /// The voter's signature over the vote body.
    pub signature: Signature,
}

impl SignedVote {
    /// Creates and signs a vote with the voter's node key.
    #[must_use]
    pub fn sign(
        term: TermId,
        candidate_id: NodeId,
        vote_granted: bool,
        signer: &NodeSigner,
    ) -> Self {
        let node_id = signer.node_id();
        let body = Self::body(term, candidate_id, node_id, vote_granted);
        Self {
            term,
            candidate_id,
            node_id,
            vote_granted,
            signature: signer.sign(&body),
        }
    }

    /// Verifies the vote body signature against the voter's key.
    #[must_use]
    pub fn verify(&self, keys: &KeyRing) -> bool {
        let body = Self::body(self.term, self.candidate_id, self.node_id, self.vote_granted);
        keys.verify_node(self.node_id, &body, &self.signature)
    }

    /// Canonical signing bytes of a vote body.
    fn body(term: TermId, candidate_id: NodeId, node_id: NodeId, vote_granted: bool) -> Bytes {
        let mut buf = BytesMut::with_capacity(29);
        buf.put_slice(domain::VOTE);
        buf.put_u64_le(term.get());
        buf.put_u64_le(candidate_id.get());
        buf.put_u64_le(node_id.get());
        buf.put_u8(u8::from(vote_granted));
        buf.freeze()
    }
}

/// A client command to replicate.
///
/// `(client_id, signature)` is the unique replay key: a replica that has
/// already executed a command with this key answers from its replay map
/// instead of re-executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The application command payload.
    pub entry: Bytes,
    /// The client that issued the command.
    pub client_id: ClientId,
    /// Client-unique request identifier.
    pub request_id: RequestId,
    /// The client's signature over the command body.
    pub signature: Signature,
}

impl Command {
    /// Creates and signs a command with the client's key.
    #[must_use]
    pub fn sign(entry: Bytes, request_id: RequestId, signer: &ClientSigner) -> Self {
        let client_id = signer.client_id();
        let body = Self::body(&entry, client_id, request_id);
        Self {
            entry,
            client_id,
            request_id,
            signature: signer.sign(&body),
        }
    }

    /// Verifies the command signature against the client's key.
    #[must_use]
    pub fn verify(&self, keys: &KeyRing) -> bool {
        let body = Self::body(&self.entry, self.client_id, self.request_id);
        keys.verify_client(self.client_id, &body, &self.signature)
    }

    /// The replay-map key of this command.
    #[must_use]
    pub const fn replay_key(&self) -> (ClientId, Signature) {
        (self.client_id, self.signature)
    }

    /// Canonical signing bytes of a command body.
    fn body(entry: &Bytes, client_id: ClientId, request_id: RequestId) -> Bytes {
        let mut buf = BytesMut::with_capacity(24 + entry.len());
        buf.put_slice(domain::COMMAND);
        buf.put_u64_le(client_id.get());
        buf.put_u64_le(request_id.sequence);
        // Safe cast: command payloads are bounded well below u32::MAX.
        #[allow(clippy::cast_possible_truncation)]
        buf.put_u32_le(entry.len() as u32);
        buf.put_slice(entry);
        buf.freeze()
    }
}

/// Result of a committed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    /// The application result bytes.
    pub result: Bytes,
    /// Who the responder believes the leader is.
    pub leader_hint: Option<NodeId>,
    /// The replica that produced this response.
    pub responder_id: NodeId,
    /// The request this responds to.
    pub request_id: RequestId,
    /// The responder's signature over the response body.
    pub proof: Signature,
}

impl CommandResponse {
    /// Creates and signs a response with the responder's node key.
    #[must_use]
    pub fn sign(
        result: Bytes,
        leader_hint: Option<NodeId>,
        request_id: RequestId,
        signer: &NodeSigner,
    ) -> Self {
        let responder_id = signer.node_id();
        let body = Self::body(&result, responder_id, request_id);
        Self {
            result,
            leader_hint,
            responder_id,
            request_id,
            proof: signer.sign(&body),
        }
    }

    /// Verifies the response proof against the responder's key.
    #[must_use]
    pub fn verify(&self, keys: &KeyRing) -> bool {
        let body = Self::body(&self.result, self.responder_id, self.request_id);
        keys.verify_node(self.responder_id, &body, &self.proof)
    }

    /// Canonical signing bytes of a response body.
    ///
    /// The leader hint is advisory and excluded, so a cached result can be
    /// re-served with a fresh hint without re-signing the result.
    fn body(result: &Bytes, responder_id: NodeId, request_id: RequestId) -> Bytes {
        let mut buf = BytesMut::with_capacity(32 + result.len());
        buf.put_slice(domain::RESPONSE);
        buf.put_u64_le(responder_id.get());
        buf.put_u64_le(request_id.client_id.get());
        buf.put_u64_le(request_id.sequence);
        // Safe cast: results are bounded well below u32::MAX.
        #[allow(clippy::cast_possible_truncation)]
        buf.put_u32_le(result.len() as u32);
        buf.put_slice(result);
        buf.freeze()
    }
}

/// A client demand to stop recognizing a leader.
///
/// One-shot per `(client_id, signature)`: a replica that honors the
/// revolution records the key in its replay map with no result, so the
/// same signed message cannot depose a future leader again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revolution {
    /// The client demanding revocation.
    pub client_id: ClientId,
    /// The leader to stop recognizing.
    pub leader_id: NodeId,
    /// The client's signature over the revolution body.
    pub signature: Signature,
}

impl Revolution {
    /// Creates and signs a revolution with the client's key.
    #[must_use]
    pub fn sign(leader_id: NodeId, signer: &ClientSigner) -> Self {
        let client_id = signer.client_id();
        let body = Self::body(client_id, leader_id);
        Self {
            client_id,
            leader_id,
            signature: signer.sign(&body),
        }
    }

    /// Verifies the revolution signature against the client's key.
    #[must_use]
    pub fn verify(&self, keys: &KeyRing) -> bool {
        let body = Self::body(self.client_id, self.leader_id);
        keys.verify_client(self.client_id, &body, &self.signature)
    }

    /// The replay-map key of this revolution.
    #[must_use]
    pub const fn replay_key(&self) -> (ClientId, Signature) {
        (self.client_id, self.signature)
    }

    /// Canonical signing bytes of a revolution body.
    fn body(client_id: ClientId, leader_id: NodeId) -> Bytes {
        let mut buf = BytesMut::with_capacity(20);
        buf.put_slice(domain::REVOLUTION);
        buf.put_u64_le(client_id.get());
        buf.put_u64_le(leader_id.get());
        buf.freeze()
    }
}

/// Free-form diagnostic message between replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugMessage {
    /// The sender.
    pub node_id: NodeId,
    /// Diagnostic text.
    pub message: String,
}

impl DebugMessage {
    /// Creates a new diagnostic message.
    #[must_use]
    pub const fn new(node_id: NodeId, message: String) -> Self {
        Self { node_id, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starling_crypto::{ClientSigner, KeyRing, NodeSigner};

    fn test_ring(node_signer: &NodeSigner, client_signer: &ClientSigner) -> KeyRing {
        let mut ring = KeyRing::new();
        ring.add_node_key(node_signer.node_id(), node_signer.public_key());
        ring.add_client_key(client_signer.client_id(), client_signer.public_key());
        ring
    }

    #[test]
    fn test_rpc_sender() {
        let rv = RequestVoteRequest::new(TermId::new(1), NodeId::new(2), LogIndex::new(0), TermId::new(0));
        assert_eq!(Rpc::RequestVote(rv).sender(), RpcSender::Node(NodeId::new(2)));
    }

    #[test]
    fn test_signed_vote_verifies() {
        let signer = NodeSigner::from_seed(NodeId::new(1), &[1; 32]);
        let client = ClientSigner::from_seed(ClientId::new(9), &[9; 32]);
        let ring = test_ring(&signer, &client);

        let vote = SignedVote::sign(TermId::new(3), NodeId::new(2), true, &signer);
        assert!(vote.verify(&ring));
    }

    #[test]
    fn test_tampered_vote_fails() {
        let signer = NodeSigner::from_seed(NodeId::new(1), &[1; 32]);
        let client = ClientSigner::from_seed(ClientId::new(9), &[9; 32]);
        let ring = test_ring(&signer, &client);

        let mut vote = SignedVote::sign(TermId::new(3), NodeId::new(2), true, &signer);
        vote.term = TermId::new(4);
        assert!(!vote.verify(&ring));
    }

    #[test]
    fn test_vote_claiming_other_voter_fails() {
        let signer1 = NodeSigner::from_seed(NodeId::new(1), &[1; 32]);
        let signer2 = NodeSigner::from_seed(NodeId::new(2), &[2; 32]);
        let client = ClientSigner::from_seed(ClientId::new(9), &[9; 32]);
        let mut ring = test_ring(&signer1, &client);
        ring.add_node_key(signer2.node_id(), signer2.public_key());

        // Node 1 signs, but the vote claims node 2 cast it.
        let mut vote = SignedVote::sign(TermId::new(3), NodeId::new(5), true, &signer1);
        vote.node_id = NodeId::new(2);
        assert!(!vote.verify(&ring));
    }

    #[test]
    fn test_command_sign_and_verify() {
        let node = NodeSigner::from_seed(NodeId::new(1), &[1; 32]);
        let client = ClientSigner::from_seed(ClientId::new(9), &[9; 32]);
        let ring = test_ring(&node, &client);

        let request_id = RequestId::new(client.client_id(), 1);
        let cmd = Command::sign(Bytes::from_static(b"set x=1"), request_id, &client);
        assert!(cmd.verify(&ring));
        assert_eq!(cmd.replay_key().0, ClientId::new(9));
    }

    #[test]
    fn test_command_tamper_fails() {
        let node = NodeSigner::from_seed(NodeId::new(1), &[1; 32]);
        let client = ClientSigner::from_seed(ClientId::new(9), &[9; 32]);
        let ring = test_ring(&node, &client);

        let request_id = RequestId::new(client.client_id(), 1);
        let mut cmd = Command::sign(Bytes::from_static(b"set x=1"), request_id, &client);
        cmd.entry = Bytes::from_static(b"set x=2");
        assert!(!cmd.verify(&ring));
    }

    #[test]
    fn test_response_proof_survives_hint_change() {
        let node = NodeSigner::from_seed(NodeId::new(1), &[1; 32]);
        let client = ClientSigner::from_seed(ClientId::new(9), &[9; 32]);
        let ring = test_ring(&node, &client);

        let request_id = RequestId::new(client.client_id(), 1);
        let mut resp = CommandResponse::sign(Bytes::from_static(b"ok"), None, request_id, &node);
        assert!(resp.verify(&ring));

        // The hint is advisory; changing it does not break the proof.
        resp.leader_hint = Some(NodeId::new(1));
        assert!(resp.verify(&ring));
    }

    #[test]
    fn test_revolution_verifies() {
        let node = NodeSigner::from_seed(NodeId::new(1), &[1; 32]);
        let client = ClientSigner::from_seed(ClientId::new(9), &[9; 32]);
        let ring = test_ring(&node, &client);

        let rev = Revolution::sign(NodeId::new(1), &client);
        assert!(rev.verify(&ring));

        let mut forged = rev;
        forged.leader_id = NodeId::new(2);
        assert!(!forged.verify(&ring));
    }

    #[test]
    fn test_command_and_revolution_domains_differ() {
        // A command signature must not double as a revolution signature.
        let client = ClientSigner::from_seed(ClientId::new(9), &[9; 32]);
        let node = NodeSigner::from_seed(NodeId::new(1), &[1; 32]);
        let ring = test_ring(&node, &client);

        let rev = Revolution::sign(NodeId::new(7), &client);
        let cmd = Command {
            entry: Bytes::new(),
            client_id: client.client_id(),
            request_id: RequestId::new(client.client_id(), 7),
            signature: rev.signature,
        };
        assert!(!cmd.verify(&ring));
    }
}
