//! Starling Core - Strongly-typed identifiers and limits for Starling.
//!
//! This crate provides the shared vocabulary of the Starling BFT consensus
//! stack. It does NOT provide clock, network, or crypto abstractions -
//! those live in their own crates behind explicit seams.
//!
//! # Design Principles (TigerStyle)
//!
//! - **Strongly-typed IDs**: Prevent mixing up NodeId with ClientId
//! - **Explicit limits**: Every resource has a bounded maximum
//! - **Explicit types**: Use u32/u64, not usize
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod limits;
mod types;

pub use error::{Error, Result};
pub use limits::Limits;
pub use types::{ClientId, LogIndex, NodeId, TermId};

/// Maximum size of a single wire frame in bytes.
///
/// Frames larger than this are rejected by the codec on both ends.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
