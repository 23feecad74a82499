//! Starling Crypto - Ed25519 keying material for Starling replicas and clients.
//!
//! Every RPC between replicas is signed with the sender's node key; every
//! client command carries the client's signature. This crate is the single
//! seam through which the consensus core signs and verifies:
//!
//! - [`NodeSigner`] / [`ClientSigner`]: private signing keys
//! - [`KeyRing`]: the verifying keys of all known replicas and clients
//! - [`Signature`]: opaque 64-byte signature value, hashable so it can key
//!   the replay map and sit in vote sets
//!
//! Verification uses RFC 8032 strict mode, rejecting non-canonical
//! signatures to prevent malleability.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod keys;
mod signature;

pub use keys::{ClientSigner, KeyError, KeyRing, NodeSigner, PublicKey};
pub use signature::Signature;
