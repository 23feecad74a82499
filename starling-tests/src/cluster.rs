//! Multi-node test harness.
//!
//! Runs N consensus state machines in-process and routes their outputs
//! through an explicit message queue. Timers are fired by the test, so
//! every interleaving is reproducible; partitions drop messages to and
//! from the named nodes.

use std::collections::{BTreeMap, HashSet, VecDeque};

use bytes::Bytes;
use starling_core::{ClientId, NodeId};
use starling_crypto::{ClientSigner, KeyRing, NodeSigner};
use starling_raft::{
    Command, CommandResponse, RaftConfig, RaftEvent, RaftNode, RaftOutput, Revolution, Rpc,
    StateMachine,
};

/// Upper bound on queue pumping; exceeding it means a message loop.
const PUMP_STEPS_MAX: usize = 10_000;

/// The well-known test client.
pub const TEST_CLIENT: u64 = 9;

/// Records applied commands; result is `r:<payload>`.
#[derive(Debug, Default)]
pub struct RecordingMachine {
    /// Commands applied, in order.
    pub applied: Vec<Bytes>,
}

impl StateMachine for RecordingMachine {
    fn apply(&mut self, command: &Bytes) -> Bytes {
        self.applied.push(command.clone());
        let mut result = b"r:".to_vec();
        result.extend_from_slice(command);
        Bytes::from(result)
    }
}

/// An in-flight message.
struct QueuedMessage {
    from: NodeId,
    to: NodeId,
    rpc: Rpc,
}

/// A cluster of state machines with explicit message routing.
pub struct TestCluster {
    nodes: BTreeMap<NodeId, RaftNode<RecordingMachine>>,
    queue: VecDeque<QueuedMessage>,
    partitioned: HashSet<NodeId>,
    /// Responses addressed to clients, in emission order.
    pub client_responses: Vec<(ClientId, CommandResponse)>,
    client: ClientSigner,
    next_sequence: u64,
}

impl TestCluster {
    /// Creates a cluster of `n` nodes (ids 1..=n) with the given quorum.
    #[must_use]
    pub fn new(n: u64, quorum: usize) -> Self {
        let cluster: Vec<NodeId> = (1..=n).map(NodeId::new).collect();

        let mut keys = KeyRing::new();
        for &id in &cluster {
            keys.add_node_key(id, Self::node_signer(id).public_key());
        }
        let client = ClientSigner::from_seed(ClientId::new(TEST_CLIENT), &[TEST_CLIENT as u8; 32]);
        keys.add_client_key(client.client_id(), client.public_key());

        let nodes = cluster
            .iter()
            .map(|&id| {
                let config = RaftConfig::new(id, cluster.clone()).with_quorum_size(quorum);
                let node = RaftNode::new(
                    config,
                    Self::node_signer(id),
                    keys.clone(),
                    RecordingMachine::default(),
                );
                (id, node)
            })
            .collect();

        Self {
            nodes,
            queue: VecDeque::new(),
            partitioned: HashSet::new(),
            client_responses: Vec::new(),
            client,
            next_sequence: 1,
        }
    }

    fn node_signer(id: NodeId) -> NodeSigner {
        // Safe cast: test node ids stay tiny.
        #[allow(clippy::cast_possible_truncation)]
        let seed = [id.get() as u8; 32];
        NodeSigner::from_seed(id, &seed)
    }

    /// Returns a node by id.
    ///
    /// # Panics
    /// Panics if the node does not exist.
    #[must_use]
    pub fn node(&self, id: u64) -> &RaftNode<RecordingMachine> {
        self.nodes
            .get(&NodeId::new(id))
            .expect("node id out of range")
    }

    /// Cuts a node off: messages to and from it are dropped.
    pub fn partition(&mut self, id: u64) {
        self.partitioned.insert(NodeId::new(id));
    }

    /// Reconnects a node.
    pub fn heal(&mut self, id: u64) {
        self.partitioned.remove(&NodeId::new(id));
    }

    /// Fires a node's election timer.
    pub fn election_timeout(&mut self, id: u64) {
        self.dispatch(NodeId::new(id), RaftEvent::ElectionTimeout);
    }

    /// Fires a node's heartbeat timer.
    pub fn heartbeat_timeout(&mut self, id: u64) {
        self.dispatch(NodeId::new(id), RaftEvent::HeartbeatTimeout);
    }

    /// Signs a fresh client command and delivers it to a node.
    pub fn client_command(&mut self, to: u64, payload: &'static [u8]) -> Command {
        let command = Command::sign(
            Bytes::from_static(payload),
            starling_raft::RequestId::new(self.client.client_id(), self.next_sequence),
            &self.client,
        );
        self.next_sequence += 1;
        self.send_command(to, command.clone());
        command
    }

    /// Delivers an existing signed command to a node (for resends).
    pub fn send_command(&mut self, to: u64, command: Command) {
        self.dispatch(NodeId::new(to), RaftEvent::Rpc(Rpc::Command(command)));
    }

    /// Signs a revolution against `leader` and delivers it to a node.
    pub fn client_revolution(&mut self, to: u64, leader: u64) -> Revolution {
        let revolution = Revolution::sign(NodeId::new(leader), &self.client);
        self.send_revolution(to, revolution);
        revolution
    }

    /// Delivers an existing signed revolution to a node (for resends).
    pub fn send_revolution(&mut self, to: u64, revolution: Revolution) {
        self.dispatch(NodeId::new(to), RaftEvent::Rpc(Rpc::Revolution(revolution)));
    }

    /// Delivers one event to a node and queues the resulting messages.
    ///
    /// Partitions only affect the inter-node queue (see [`Self::pump`]);
    /// timers and client requests reach a partitioned node directly, as
    /// they originate on its side of the cut.
    fn dispatch(&mut self, to: NodeId, event: RaftEvent) {
        let node = self.nodes.get_mut(&to).expect("node id out of range");
        let outputs = node.handle_event(event);

        for output in outputs {
            match output {
                RaftOutput::SendMessage { to: dest, rpc } => {
                    self.queue.push_back(QueuedMessage {
                        from: to,
                        to: dest,
                        rpc,
                    });
                }
                RaftOutput::RespondToClient { client, response } => {
                    self.client_responses.push((client, response));
                }
                // Timer management and role notifications are driven
                // explicitly by the tests.
                RaftOutput::ResetElectionTimer
                | RaftOutput::ResetHeartbeatTimer
                | RaftOutput::BecameLeader
                | RaftOutput::SteppedDown => {}
            }
        }
    }

    /// Delivers queued messages until the network is quiet.
    ///
    /// # Panics
    /// Panics if the cluster keeps generating messages without settling.
    pub fn pump(&mut self) {
        let mut steps = 0;
        while let Some(message) = self.queue.pop_front() {
            steps += 1;
            assert!(steps <= PUMP_STEPS_MAX, "message loop did not settle");

            if self.partitioned.contains(&message.from) || self.partitioned.contains(&message.to) {
                continue;
            }
            self.dispatch(message.to, RaftEvent::Rpc(message.rpc));
        }
    }

    /// Returns ids of current leaders.
    #[must_use]
    pub fn leaders(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.is_leader())
            .map(|(&id, _)| id)
            .collect()
    }

    /// Elects `candidate` by firing its election timer, delivering its
    /// vote requests, then firing every other reachable node's timer so
    /// lazy votes are externalized.
    pub fn elect(&mut self, candidate: u64) {
        self.election_timeout(candidate);
        self.pump();
        let others: Vec<u64> = self
            .nodes
            .keys()
            .map(|id| id.get())
            .filter(|&id| id != candidate)
            .collect();
        for other in others {
            if !self.partitioned.contains(&NodeId::new(other)) {
                self.election_timeout(other);
            }
        }
        self.pump();
        assert!(
            self.node(candidate).is_leader(),
            "node {candidate} failed to win the election"
        );
    }
}
