//! Client-side types and session helper.
//!
//! Clients sign every command with their own key; replicas deduplicate on
//! `(client_id, signature)`, so a client can resend a command verbatim
//! until it gets an answer and the cluster still executes it exactly once.
//!
//! # Request Flow
//!
//! 1. Client creates a signed [`Command`] with a unique [`RequestId`]
//! 2. The command is sent to the cluster (ideally to the leader; followers
//!    forward it with the signature intact)
//! 3. The leader replicates the command and responds once it is committed
//!    and applied
//! 4. The client reads the `leader_hint` from responses to track the
//!    current leader

use bytes::Bytes;
use starling_core::{ClientId, NodeId};
use starling_crypto::ClientSigner;

use crate::message::{Command, CommandResponse, Revolution};

/// Unique identifier for a client request.
///
/// Combines client ID and sequence number to uniquely identify requests
/// across the entire cluster lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId {
    /// Client session identifier.
    pub client_id: ClientId,
    /// Sequence number within the client session.
    pub sequence: u64,
}

impl RequestId {
    /// Creates a new request ID.
    #[must_use]
    pub const fn new(client_id: ClientId, sequence: u64) -> Self {
        Self {
            client_id,
            sequence,
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.client_id, self.sequence)
    }
}

/// Client-side state for interacting with a Starling cluster.
pub struct RaftClient {
    /// Our signing key.
    signer: ClientSigner,
    /// Next sequence number for requests.
    next_sequence: u64,
    /// Known cluster members.
    cluster: Vec<NodeId>,
    /// Last known leader.
    leader: Option<NodeId>,
}

impl std::fmt::Debug for RaftClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaftClient")
            .field("client_id", &self.signer.client_id())
            .field("next_sequence", &self.next_sequence)
            .field("leader", &self.leader)
            .finish()
    }
}

impl RaftClient {
    /// Creates a new client.
    #[must_use]
    pub fn new(signer: ClientSigner, cluster: Vec<NodeId>) -> Self {
        Self {
            signer,
            next_sequence: 1,
            cluster,
            leader: None,
        }
    }

    /// Returns our client ID.
    #[must_use]
    pub const fn client_id(&self) -> ClientId {
        self.signer.client_id()
    }

    /// Creates a new signed command.
    #[must_use]
    pub fn create_command(&mut self, entry: Bytes) -> Command {
        let id = RequestId::new(self.signer.client_id(), self.next_sequence);
        self.next_sequence += 1;
        Command::sign(entry, id, &self.signer)
    }

    /// Creates a signed revolution against the given leader.
    #[must_use]
    pub fn create_revolution(&self, leader_id: NodeId) -> Revolution {
        Revolution::sign(leader_id, &self.signer)
    }

    /// Updates leader knowledge from a response's hint.
    pub fn observe_response(&mut self, response: &CommandResponse) {
        if response.leader_hint.is_some() {
            self.leader = response.leader_hint;
        }
    }

    /// Returns the last known leader.
    #[must_use]
    pub const fn leader(&self) -> Option<NodeId> {
        self.leader
    }

    /// Returns the target node for a request.
    ///
    /// Returns the known leader, or the first cluster member.
    #[must_use]
    pub fn target_node(&self) -> Option<NodeId> {
        self.leader.or_else(|| self.cluster.first().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use starling_crypto::KeyRing;

    fn make_client() -> RaftClient {
        let signer = ClientSigner::from_seed(ClientId::new(42), &[42; 32]);
        RaftClient::new(signer, vec![NodeId::new(1), NodeId::new(2), NodeId::new(3)])
    }

    #[test]
    fn test_request_id_display() {
        let id = RequestId::new(ClientId::new(42), 100);
        assert_eq!(format!("{id}"), "client-42:100");
    }

    #[test]
    fn test_client_creates_sequential_requests() {
        let mut client = make_client();

        let cmd1 = client.create_command(Bytes::from_static(b"cmd1"));
        let cmd2 = client.create_command(Bytes::from_static(b"cmd2"));

        assert_eq!(cmd1.request_id.sequence, 1);
        assert_eq!(cmd2.request_id.sequence, 2);
        assert_eq!(cmd1.client_id, cmd2.client_id);
        // Distinct commands get distinct replay keys.
        assert_ne!(cmd1.replay_key(), cmd2.replay_key());
    }

    #[test]
    fn test_created_commands_verify() {
        let mut client = make_client();
        let signer = ClientSigner::from_seed(ClientId::new(42), &[42; 32]);

        let mut ring = KeyRing::new();
        ring.add_client_key(ClientId::new(42), signer.public_key());

        let cmd = client.create_command(Bytes::from_static(b"payload"));
        assert!(cmd.verify(&ring));
    }

    #[test]
    fn test_client_leader_tracking() {
        let mut client = make_client();
        assert!(client.leader().is_none());
        assert_eq!(client.target_node(), Some(NodeId::new(1)));

        let node_signer = starling_crypto::NodeSigner::from_seed(NodeId::new(2), &[2; 32]);
        let response = crate::message::CommandResponse::sign(
            Bytes::from_static(b"ok"),
            Some(NodeId::new(2)),
            RequestId::new(ClientId::new(42), 1),
            &node_signer,
        );
        client.observe_response(&response);

        assert_eq!(client.leader(), Some(NodeId::new(2)));
        assert_eq!(client.target_node(), Some(NodeId::new(2)));
    }
}
