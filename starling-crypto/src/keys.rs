//! Signing keys and the cluster key ring.

use std::collections::HashMap;
use std::fmt;

use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use starling_core::{ClientId, NodeId};
use thiserror::Error;

use crate::signature::Signature;

/// Errors constructing keying material.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The bytes do not encode a valid Ed25519 public key.
    #[error("invalid public key")]
    InvalidPublicKey,
}

/// A public (verifying) key.
///
/// Thin wrapper so embedders never touch `ed25519_dalek` types directly.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    /// Creates a public key from its 32-byte compressed representation.
    ///
    /// # Errors
    /// Returns an error if the bytes are not a valid curve point.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, KeyError> {
        let inner = VerifyingKey::from_bytes(bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { inner })
    }

    /// Returns the 32-byte compressed representation.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Verifies `signature` over `message` against this key.
    ///
    /// Uses RFC 8032 strict verification, rejecting non-canonical
    /// signatures to prevent malleability.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.inner
            .verify_strict(message, &(*signature).into())
            .is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.inner.to_bytes();
        write!(f, "pubkey({:02x}{:02x}{:02x}{:02x}..)", b[0], b[1], b[2], b[3])
    }
}

/// A replica's private signing key.
#[derive(Clone)]
pub struct NodeSigner {
    node_id: NodeId,
    inner: SigningKey,
}

// Manual Debug implementation to avoid exposing key material.
impl fmt::Debug for NodeSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSigner")
            .field("node_id", &self.node_id)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl NodeSigner {
    /// Generates a fresh signing key from system randomness.
    #[must_use]
    pub fn generate(node_id: NodeId) -> Self {
        Self {
            node_id,
            inner: SigningKey::generate(&mut OsRng),
        }
    }

    /// Creates a signing key from a 32-byte seed.
    ///
    /// Seeds must be cryptographically random in production; tests use
    /// fixed seeds for determinism.
    #[must_use]
    pub fn from_seed(node_id: NodeId, seed: &[u8; 32]) -> Self {
        Self {
            node_id,
            inner: SigningKey::from_bytes(seed),
        }
    }

    /// Returns the node this key belongs to.
    #[must_use]
    pub const fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Returns the matching public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.inner.verifying_key(),
        }
    }

    /// Signs a message with this node's key.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.inner.sign(message).into()
    }
}

/// A client's private signing key.
#[derive(Clone)]
pub struct ClientSigner {
    client_id: ClientId,
    inner: SigningKey,
}

impl fmt::Debug for ClientSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSigner")
            .field("client_id", &self.client_id)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl ClientSigner {
    /// Generates a fresh signing key from system randomness.
    #[must_use]
    pub fn generate(client_id: ClientId) -> Self {
        Self {
            client_id,
            inner: SigningKey::generate(&mut OsRng),
        }
    }

    /// Creates a signing key from a 32-byte seed.
    #[must_use]
    pub fn from_seed(client_id: ClientId, seed: &[u8; 32]) -> Self {
        Self {
            client_id,
            inner: SigningKey::from_bytes(seed),
        }
    }

    /// Returns the client this key belongs to.
    #[must_use]
    pub const fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Returns the matching public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.inner.verifying_key(),
        }
    }

    /// Signs a message with this client's key.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.inner.sign(message).into()
    }
}

/// The verifying keys of every known replica and client.
///
/// Every inbound RPC is checked against this ring before the consensus
/// core sees it. A sender with no key in the ring cannot be verified, so
/// its messages are dropped.
#[derive(Debug, Default, Clone)]
pub struct KeyRing {
    node_keys: HashMap<NodeId, PublicKey>,
    client_keys: HashMap<ClientId, PublicKey>,
}

impl KeyRing {
    /// Creates an empty key ring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a replica's public key.
    pub fn add_node_key(&mut self, node_id: NodeId, key: PublicKey) {
        self.node_keys.insert(node_id, key);
    }

    /// Registers a client's public key.
    pub fn add_client_key(&mut self, client_id: ClientId, key: PublicKey) {
        self.client_keys.insert(client_id, key);
    }

    /// Returns the number of registered node keys.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.node_keys.len()
    }

    /// Verifies a node-signed message.
    ///
    /// Returns false if the node is unknown or the signature does not
    /// verify; callers drop the message in both cases.
    #[must_use]
    pub fn verify_node(&self, node_id: NodeId, message: &[u8], signature: &Signature) -> bool {
        self.node_keys
            .get(&node_id)
            .is_some_and(|key| key.verify(message, signature))
    }

    /// Verifies a client-signed message.
    #[must_use]
    pub fn verify_client(
        &self,
        client_id: ClientId,
        message: &[u8],
        signature: &Signature,
    ) -> bool {
        self.client_keys
            .get(&client_id)
            .is_some_and(|key| key.verify(message, signature))
    }
}
