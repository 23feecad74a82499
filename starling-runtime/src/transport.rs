//! Transport seam for peer and client communication.
//!
//! The consensus server hands fully framed, signed bytes to a
//! [`Transport`]; how they reach the destination is not its concern.
//! [`ChannelTransport`] delivers frames through in-process channels and
//! backs the multi-node tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use starling_core::{ClientId, NodeId};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::server::Event;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The destination node is not known to this transport.
    #[error("unknown peer: {0}")]
    UnknownPeer(NodeId),

    /// The destination client is not known to this transport.
    #[error("unknown client: {0}")]
    UnknownClient(ClientId),

    /// The destination is no longer receiving.
    #[error("destination closed")]
    Closed,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Trait for sending framed bytes to peers and clients.
///
/// Implementations must be `Send + Sync` for use across async tasks.
/// Sends are best-effort: the protocol retries implicitly through
/// heartbeats and response-driven resends.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a frame to a peer replica.
    ///
    /// # Errors
    /// Returns an error if the peer is unknown or unreachable.
    async fn send(&self, to: NodeId, frame: Bytes) -> TransportResult<()>;

    /// Sends a frame to a client.
    ///
    /// # Errors
    /// Returns an error if the client is unknown or unreachable.
    async fn send_to_client(&self, to: ClientId, frame: Bytes) -> TransportResult<()>;
}

/// In-memory transport delivering frames through channels.
///
/// Peer frames are enqueued as [`Event::Inbound`] on the destination
/// server's event queue; client frames land on a plain byte channel the
/// test (or embedding process) reads.
#[derive(Default)]
pub struct ChannelTransport {
    peers: Mutex<HashMap<NodeId, mpsc::Sender<Event>>>,
    clients: Mutex<HashMap<ClientId, mpsc::Sender<Bytes>>>,
}

impl ChannelTransport {
    /// Creates an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a peer's event queue.
    pub fn register_node(&self, node_id: NodeId, events: mpsc::Sender<Event>) {
        self.peers
            .lock()
            .expect("transport peer table poisoned")
            .insert(node_id, events);
    }

    /// Registers a client's inbox.
    pub fn register_client(&self, client_id: ClientId, inbox: mpsc::Sender<Bytes>) {
        self.clients
            .lock()
            .expect("transport client table poisoned")
            .insert(client_id, inbox);
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, to: NodeId, frame: Bytes) -> TransportResult<()> {
        let tx = self
            .peers
            .lock()
            .expect("transport peer table poisoned")
            .get(&to)
            .cloned()
            .ok_or(TransportError::UnknownPeer(to))?;
        tx.send(Event::Inbound(frame))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn send_to_client(&self, to: ClientId, frame: Bytes) -> TransportResult<()> {
        let tx = self
            .clients
            .lock()
            .expect("transport client table poisoned")
            .get(&to)
            .cloned()
            .ok_or(TransportError::UnknownClient(to))?;
        tx.send(frame).await.map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_peer_frame_becomes_inbound_event() {
        let transport = ChannelTransport::new();
        let (tx, mut rx) = mpsc::channel(4);
        transport.register_node(NodeId::new(1), tx);

        transport
            .send(NodeId::new(1), Bytes::from_static(b"frame"))
            .await
            .expect("send");

        match rx.recv().await {
            Some(Event::Inbound(frame)) => assert_eq!(frame, Bytes::from_static(b"frame")),
            other => panic!("expected inbound event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_peer_is_an_error() {
        let transport = ChannelTransport::new();
        let result = transport.send(NodeId::new(9), Bytes::new()).await;
        assert!(matches!(result, Err(TransportError::UnknownPeer(_))));
    }

    #[tokio::test]
    async fn test_client_delivery() {
        let transport = ChannelTransport::new();
        let (tx, mut rx) = mpsc::channel(4);
        transport.register_client(ClientId::new(7), tx);

        transport
            .send_to_client(ClientId::new(7), Bytes::from_static(b"resp"))
            .await
            .expect("send");

        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"resp")));
    }
}
