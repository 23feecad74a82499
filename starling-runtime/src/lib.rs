//! Starling Runtime - drives a consensus node in production.
//!
//! The consensus core in `starling-raft` is a pure state machine; this
//! crate supplies everything around it:
//!
//! - [`codec`]: the signed binary wire format shared by all replicas
//! - [`timers`]: election/heartbeat timer facility (expirations are
//!   enqueued as events, never invoked inline)
//! - [`transport`]: the seam bytes leave through, with an in-memory
//!   channel implementation for multi-node tests
//! - [`server`]: the per-node event loop - crypto gate on ingress,
//!   dispatch to the state machine, signing sender on egress

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod codec;
mod config;
pub mod server;
pub mod timers;
pub mod transport;

pub use codec::{CodecError, CodecResult, Frame};
pub use config::{ConfigError, ServerConfig, TimingConfig};
pub use server::{Event, RaftServer, ServerHandle, ServerStatus};
pub use timers::{TimerKind, TimerManager};
pub use transport::{ChannelTransport, Transport, TransportError, TransportResult};
