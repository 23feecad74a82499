//! The per-node event loop.
//!
//! One task owns the consensus state machine and a single event queue.
//! Producers are the transport (inbound frames) and the timer facility;
//! the loop verifies, dispatches, and performs the resulting I/O. The
//! state machine is the only mutator of consensus state, and it handles
//! one event to completion before the next.

use std::sync::Arc;

use bytes::Bytes;
use starling_core::{LogIndex, NodeId, TermId};
use starling_crypto::{KeyRing, NodeSigner};
use starling_raft::{RaftEvent, RaftNode, RaftOutput, RaftRole, Rpc, RpcSender, StateMachine};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::codec::{self, Frame};
use crate::config::{ServerConfig, TimingConfig};
use crate::timers::{TimerKind, TimerManager};
use crate::transport::Transport;

/// Queue depth of the per-node event channel.
const EVENT_QUEUE_DEPTH: usize = 256;

/// Events consumed by the server loop.
#[derive(Debug, Clone)]
pub enum Event {
    /// A raw frame arrived from the transport.
    Inbound(Bytes),
    /// The election timer fired.
    ElectionTimeout,
    /// The heartbeat timer fired.
    HeartbeatTimeout,
    /// Stop the server.
    Shutdown,
}

/// Server errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServerError {
    /// The server's event queue is gone.
    #[error("server unavailable")]
    Unavailable,
}

/// Observable state of a running server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    /// Current role.
    pub role: RaftRole,
    /// Current term.
    pub term: TermId,
    /// Recognized leader, if any.
    pub leader: Option<NodeId>,
    /// Highest committed index.
    pub commit_index: LogIndex,
    /// Highest applied index.
    pub last_applied: LogIndex,
}

/// Handle to interact with a running server.
#[derive(Clone)]
pub struct ServerHandle {
    events: mpsc::Sender<Event>,
    status: watch::Receiver<ServerStatus>,
}

impl ServerHandle {
    /// Enqueues a raw inbound frame, as the transport ingress would.
    ///
    /// # Errors
    /// Returns an error if the server has stopped.
    pub async fn inject(&self, frame: Bytes) -> Result<(), ServerError> {
        self.events
            .send(Event::Inbound(frame))
            .await
            .map_err(|_| ServerError::Unavailable)
    }

    /// Returns the event sender, for wiring into a transport.
    #[must_use]
    pub fn events(&self) -> mpsc::Sender<Event> {
        self.events.clone()
    }

    /// Returns a snapshot of the server's consensus state.
    #[must_use]
    pub fn status(&self) -> ServerStatus {
        self.status.borrow().clone()
    }

    /// Requests the server to shut down.
    ///
    /// # Errors
    /// Returns an error if the server has already stopped.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        self.events
            .send(Event::Shutdown)
            .await
            .map_err(|_| ServerError::Unavailable)
    }
}

/// The consensus server: event loop, crypto gate, and signing sender
/// around a [`RaftNode`].
pub struct RaftServer<M, T> {
    node: RaftNode<M>,
    signer: NodeSigner,
    keys: KeyRing,
    timing: TimingConfig,
    transport: Arc<T>,
    timers: TimerManager,
    events: mpsc::Receiver<Event>,
    status_tx: watch::Sender<ServerStatus>,
}

impl<M: StateMachine, T: Transport> RaftServer<M, T> {
    /// Creates a new server and its handle.
    #[must_use]
    pub fn new(
        config: &ServerConfig,
        signer: NodeSigner,
        keys: KeyRing,
        machine: M,
        transport: Arc<T>,
    ) -> (ServerHandle, Self) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let node = RaftNode::new(config.raft_config(), signer.clone(), keys.clone(), machine);

        let (status_tx, status_rx) = watch::channel(ServerStatus {
            role: node.role(),
            term: node.current_term(),
            leader: node.leader_id(),
            commit_index: node.commit_index(),
            last_applied: node.last_applied(),
        });

        let handle = ServerHandle {
            events: event_tx.clone(),
            status: status_rx,
        };
        let server = Self {
            node,
            signer,
            keys,
            timing: config.timing.clone(),
            transport,
            timers: TimerManager::new(event_tx),
            events: event_rx,
            status_tx,
        };
        (handle, server)
    }

    /// Runs the event loop until shutdown.
    ///
    /// Every replica starts as a follower with an armed election timer;
    /// the loop then processes one event to completion at a time.
    pub async fn run(mut self) {
        info!(node = %self.node.node_id(), "server starting");
        self.timers
            .set_timer(TimerKind::Election, self.timing.random_election_timeout());

        while let Some(event) = self.events.recv().await {
            match event {
                Event::Shutdown => break,
                Event::Inbound(frame) => self.handle_inbound(frame).await,
                Event::ElectionTimeout => {
                    let outputs = self.node.handle_event(RaftEvent::ElectionTimeout);
                    self.process_outputs(outputs).await;
                }
                Event::HeartbeatTimeout => {
                    let outputs = self.node.handle_event(RaftEvent::HeartbeatTimeout);
                    self.process_outputs(outputs).await;
                }
            }
            self.publish_status();
        }

        self.timers.cancel_all();
        info!(node = %self.node.node_id(), "server stopped");
    }

    /// Decodes and verifies an inbound frame, then dispatches it.
    ///
    /// Malformed frames and signature failures are dropped silently
    /// (debug-logged); nothing reaches the state machine unverified.
    async fn handle_inbound(&mut self, frame: Bytes) {
        let frame = match codec::decode_frame(frame) {
            Ok(frame) => frame,
            Err(error) => {
                debug!(%error, "dropping undecodable frame");
                return;
            }
        };

        if !verify_frame(&frame, &self.keys) {
            debug!(kind = frame.rpc.kind(), "dropping frame with bad signature");
            return;
        }

        let outputs = self.node.handle_event(RaftEvent::Rpc(frame.rpc));
        self.process_outputs(outputs).await;
    }

    /// Performs the I/O and timer work the state machine requested.
    async fn process_outputs(&mut self, outputs: Vec<RaftOutput>) {
        for output in outputs {
            match output {
                RaftOutput::SendMessage { to, rpc } => match codec::encode_signed(&rpc, &self.signer) {
                    Ok(frame) => {
                        if let Err(error) = self.transport.send(to, frame).await {
                            warn!(%to, %error, "failed to send to peer");
                        }
                    }
                    Err(error) => warn!(%to, %error, "failed to encode outbound rpc"),
                },
                RaftOutput::RespondToClient { client, response } => {
                    let rpc = Rpc::CommandResponse(response);
                    match codec::encode_signed(&rpc, &self.signer) {
                        Ok(frame) => {
                            if let Err(error) = self.transport.send_to_client(client, frame).await {
                                warn!(%client, %error, "failed to send to client");
                            }
                        }
                        Err(error) => warn!(%client, %error, "failed to encode client response"),
                    }
                }
                RaftOutput::ResetElectionTimer => {
                    self.timers
                        .set_timer(TimerKind::Election, self.timing.random_election_timeout());
                }
                RaftOutput::ResetHeartbeatTimer => {
                    self.timers
                        .set_timer(TimerKind::Heartbeat, self.timing.heartbeat_interval);
                }
                RaftOutput::BecameLeader => {
                    // Leaders run on heartbeats alone.
                    self.timers.cancel_timer(TimerKind::Election);
                    info!(node = %self.node.node_id(), term = %self.node.current_term(), "leadership acquired");
                }
                RaftOutput::SteppedDown => {
                    self.timers.cancel_timer(TimerKind::Heartbeat);
                    self.timers
                        .set_timer(TimerKind::Election, self.timing.random_election_timeout());
                    warn!(node = %self.node.node_id(), "stepped down from leadership");
                }
            }
        }
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(ServerStatus {
            role: self.node.role(),
            term: self.node.current_term(),
            leader: self.node.leader_id(),
            commit_index: self.node.commit_index(),
            last_applied: self.node.last_applied(),
        });
    }
}

/// The crypto gate: every inbound RPC is checked before any state
/// mutation.
///
/// Node-signed RPCs verify the envelope signature over the payload with
/// the sender's node key. Client-originated RPCs verify the client's
/// signature over the message's canonical body, which is what the
/// envelope carries so it survives forwarding.
fn verify_frame(frame: &Frame, keys: &KeyRing) -> bool {
    match &frame.rpc {
        Rpc::Command(cmd) => cmd.verify(keys),
        Rpc::Revolution(rev) => rev.verify(keys),
        rpc => match rpc.sender() {
            RpcSender::Node(node_id) => {
                keys.verify_node(node_id, &frame.payload, &frame.signature)
            }
            RpcSender::Client(_) => false,
        },
    }
}
