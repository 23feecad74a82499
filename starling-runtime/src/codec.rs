//! Message codec for the consensus protocol.
//!
//! This module provides binary serialization for consensus RPCs using a
//! length-prefixed format suitable for any byte transport. Field order
//! and tags must match across all replicas for interop.
//!
//! # Wire Format
//!
//! Each frame is:
//! - 4 bytes: frame length (u32 little-endian, not including this prefix)
//! - 1 byte: message type tag
//! - N bytes: message-specific payload
//! - 64 bytes: Ed25519 signature
//!
//! For node-signed RPCs the signature covers the payload (tag included).
//! For client-originated RPCs (`Command`, `Revolution`) the signature is
//! the client's signature over the message's canonical body, carried in
//! the envelope so it survives forwarding byte-identical.
//!
//! # Message Types
//!
//! - 0: `AppendEntries`
//! - 1: `AppendEntriesResponse`
//! - 2: `RequestVote`
//! - 3: `RequestVoteResponse`
//! - 4: `Command`
//! - 5: `CommandResponse`
//! - 6: `Revolution`
//! - 7: `Debug`

use bytes::{Buf, BufMut, Bytes, BytesMut};
use starling_core::{ClientId, LogIndex, NodeId, TermId, MAX_FRAME_BYTES};
use starling_crypto::{NodeSigner, Signature};
use starling_raft::{
    AppendEntriesRequest, AppendEntriesResponse, Command, CommandResponse, DebugMessage, LogEntry,
    RequestId, RequestVoteRequest, Revolution, Rpc, SignedVote,
};
use thiserror::Error;

/// Message type tags.
const TAG_APPEND_ENTRIES: u8 = 0;
const TAG_APPEND_ENTRIES_RESPONSE: u8 = 1;
const TAG_REQUEST_VOTE: u8 = 2;
const TAG_REQUEST_VOTE_RESPONSE: u8 = 3;
const TAG_COMMAND: u8 = 4;
const TAG_COMMAND_RESPONSE: u8 = 5;
const TAG_REVOLUTION: u8 = 6;
const TAG_DEBUG: u8 = 7;

/// Length of the trailing signature.
const SIGNATURE_BYTES: usize = 64;

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Message exceeds maximum allowed size.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Actual size.
        size: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// Unknown message type tag.
    #[error("unknown message type: {tag}")]
    UnknownMessageType {
        /// The unknown tag value.
        tag: u8,
    },

    /// Insufficient data to decode a message.
    #[error("insufficient data: need {need} bytes, have {have}")]
    InsufficientData {
        /// Bytes needed.
        need: usize,
        /// Bytes available.
        have: usize,
    },

    /// Bytes left over after decoding a complete message.
    #[error("trailing data: {remaining} bytes after message")]
    TrailingData {
        /// Leftover byte count.
        remaining: usize,
    },

    /// A string field was not valid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    /// Only client-originated RPCs carry their own signature.
    #[error("rpc is not client-signed")]
    NotClientSigned,
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// A decoded wire frame.
///
/// `payload` and `signature` are kept alongside the parsed RPC so the
/// crypto gate can verify before any state mutation.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The parsed RPC.
    pub rpc: Rpc,
    /// The raw payload bytes the signature covers (node-signed RPCs).
    pub payload: Bytes,
    /// The envelope signature.
    pub signature: Signature,
}

// ── Encoding ─────────────────────────────────────────────────────────────

/// Encodes an RPC payload (tag byte plus fields, no framing).
///
/// # Errors
/// Returns an error if the payload exceeds the frame limit.
pub fn encode_payload(rpc: &Rpc) -> CodecResult<Bytes> {
    let mut buf = BytesMut::with_capacity(256);

    match rpc {
        Rpc::AppendEntries(req) => {
            buf.put_u8(TAG_APPEND_ENTRIES);
            encode_append_entries(&mut buf, req);
        }
        Rpc::AppendEntriesResponse(resp) => {
            buf.put_u8(TAG_APPEND_ENTRIES_RESPONSE);
            encode_append_entries_response(&mut buf, resp);
        }
        Rpc::RequestVote(req) => {
            buf.put_u8(TAG_REQUEST_VOTE);
            encode_request_vote(&mut buf, req);
        }
        Rpc::RequestVoteResponse(vote) => {
            buf.put_u8(TAG_REQUEST_VOTE_RESPONSE);
            encode_vote(&mut buf, vote);
        }
        Rpc::Command(cmd) => {
            buf.put_u8(TAG_COMMAND);
            encode_command(&mut buf, cmd);
        }
        Rpc::CommandResponse(resp) => {
            buf.put_u8(TAG_COMMAND_RESPONSE);
            encode_command_response(&mut buf, resp);
        }
        Rpc::Revolution(rev) => {
            buf.put_u8(TAG_REVOLUTION);
            encode_revolution(&mut buf, rev);
        }
        Rpc::Debug(msg) => {
            buf.put_u8(TAG_DEBUG);
            encode_debug(&mut buf, msg);
        }
    }

    if buf.len() + SIGNATURE_BYTES + 4 > MAX_FRAME_BYTES {
        return Err(CodecError::MessageTooLarge {
            size: buf.len(),
            max: MAX_FRAME_BYTES,
        });
    }

    Ok(buf.freeze())
}

/// Frames a payload with its envelope signature.
///
/// # Errors
/// Returns an error if the frame exceeds the size limit.
pub fn encode_frame(payload: &Bytes, signature: &Signature) -> CodecResult<Bytes> {
    let frame_len = payload.len() + SIGNATURE_BYTES;
    if frame_len + 4 > MAX_FRAME_BYTES {
        return Err(CodecError::MessageTooLarge {
            size: frame_len,
            max: MAX_FRAME_BYTES,
        });
    }

    let mut buf = BytesMut::with_capacity(4 + frame_len);
    // Safe cast: frame_len is bounded by MAX_FRAME_BYTES which fits in u32.
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u32_le(frame_len as u32);
    buf.put_slice(payload);
    buf.put_slice(signature.as_bytes());
    Ok(buf.freeze())
}

/// Encodes and signs an RPC with the node key.
///
/// Client-originated RPCs keep their embedded client signature instead,
/// so a forwarded command leaves the node byte-identical to how the
/// client signed it.
///
/// # Errors
/// Returns an error if the frame exceeds the size limit.
pub fn encode_signed(rpc: &Rpc, signer: &NodeSigner) -> CodecResult<Bytes> {
    let payload = encode_payload(rpc)?;
    let signature = match rpc {
        Rpc::Command(cmd) => cmd.signature,
        Rpc::Revolution(rev) => rev.signature,
        _ => signer.sign(&payload),
    };
    encode_frame(&payload, &signature)
}

/// Encodes a client-originated RPC using its embedded client signature.
///
/// # Errors
/// Returns an error if the RPC is not client-signed or too large.
pub fn encode_client_signed(rpc: &Rpc) -> CodecResult<Bytes> {
    let signature = match rpc {
        Rpc::Command(cmd) => cmd.signature,
        Rpc::Revolution(rev) => rev.signature,
        _ => return Err(CodecError::NotClientSigned),
    };
    let payload = encode_payload(rpc)?;
    encode_frame(&payload, &signature)
}

fn encode_append_entries(buf: &mut BytesMut, req: &AppendEntriesRequest) {
    buf.put_u64_le(req.term.get());
    buf.put_u64_le(req.leader_id.get());
    buf.put_u64_le(req.prev_log_index.get());
    buf.put_u64_le(req.prev_log_term.get());
    buf.put_u64_le(req.leader_commit.get());

    // Safe cast: entry and vote counts are bounded by protocol limits.
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u32_le(req.entries.len() as u32);
    for entry in &req.entries {
        encode_entry(buf, entry);
    }

    #[allow(clippy::cast_possible_truncation)]
    buf.put_u32_le(req.quorum_votes.len() as u32);
    for vote in &req.quorum_votes {
        encode_vote(buf, vote);
    }
}

fn encode_entry(buf: &mut BytesMut, entry: &LogEntry) {
    buf.put_u64_le(entry.term.get());
    buf.put_u64_le(entry.index.get());
    // Entries carry the full command including the client signature, so
    // replicas can rebuild their replay maps from replicated state.
    encode_command(buf, &entry.command);
    buf.put_slice(entry.command.signature.as_bytes());
}

fn encode_append_entries_response(buf: &mut BytesMut, resp: &AppendEntriesResponse) {
    buf.put_u64_le(resp.term.get());
    buf.put_u64_le(resp.node_id.get());
    buf.put_u8(u8::from(resp.convinced));
    buf.put_u8(u8::from(resp.success));
    buf.put_u64_le(resp.index.get());
}

fn encode_request_vote(buf: &mut BytesMut, req: &RequestVoteRequest) {
    buf.put_u64_le(req.term.get());
    buf.put_u64_le(req.candidate_id.get());
    buf.put_u64_le(req.last_log_index.get());
    buf.put_u64_le(req.last_log_term.get());
}

fn encode_vote(buf: &mut BytesMut, vote: &SignedVote) {
    buf.put_u64_le(vote.term.get());
    buf.put_u64_le(vote.candidate_id.get());
    buf.put_u64_le(vote.node_id.get());
    buf.put_u8(u8::from(vote.vote_granted));
    buf.put_slice(vote.signature.as_bytes());
}

fn encode_command(buf: &mut BytesMut, cmd: &Command) {
    buf.put_u64_le(cmd.client_id.get());
    buf.put_u64_le(cmd.request_id.sequence);
    // Safe cast: command payloads are bounded by the frame limit.
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u32_le(cmd.entry.len() as u32);
    buf.put_slice(&cmd.entry);
}

fn encode_command_response(buf: &mut BytesMut, resp: &CommandResponse) {
    buf.put_u64_le(resp.responder_id.get());
    buf.put_u64_le(resp.request_id.client_id.get());
    buf.put_u64_le(resp.request_id.sequence);
    match resp.leader_hint {
        Some(leader) => {
            buf.put_u8(1);
            buf.put_u64_le(leader.get());
        }
        None => {
            buf.put_u8(0);
            buf.put_u64_le(0);
        }
    }
    // Safe cast: results are bounded by the frame limit.
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u32_le(resp.result.len() as u32);
    buf.put_slice(&resp.result);
    buf.put_slice(resp.proof.as_bytes());
}

fn encode_revolution(buf: &mut BytesMut, rev: &Revolution) {
    buf.put_u64_le(rev.client_id.get());
    buf.put_u64_le(rev.leader_id.get());
}

fn encode_debug(buf: &mut BytesMut, msg: &DebugMessage) {
    buf.put_u64_le(msg.node_id.get());
    // Safe cast: diagnostic strings are bounded by the frame limit.
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u32_le(msg.message.len() as u32);
    buf.put_slice(msg.message.as_bytes());
}

// ── Decoding ─────────────────────────────────────────────────────────────

/// Decodes one complete frame.
///
/// # Errors
/// Returns an error on truncated input, unknown tags, oversized frames,
/// or trailing bytes inside the frame.
pub fn decode_frame(mut buf: Bytes) -> CodecResult<Frame> {
    need(&buf, 4)?;
    let frame_len = buf.get_u32_le() as usize;
    if frame_len + 4 > MAX_FRAME_BYTES {
        return Err(CodecError::MessageTooLarge {
            size: frame_len,
            max: MAX_FRAME_BYTES,
        });
    }
    need(&buf, frame_len)?;
    if frame_len < 1 + SIGNATURE_BYTES {
        return Err(CodecError::InsufficientData {
            need: 1 + SIGNATURE_BYTES,
            have: frame_len,
        });
    }

    let payload = buf.split_to(frame_len - SIGNATURE_BYTES);
    let signature = get_signature(&mut buf)?;
    if !buf.is_empty() {
        return Err(CodecError::TrailingData {
            remaining: buf.remaining(),
        });
    }

    let rpc = decode_payload(payload.clone(), signature)?;
    Ok(Frame {
        rpc,
        payload,
        signature,
    })
}

/// Decodes a payload into an RPC.
///
/// Client-originated RPCs take their signature from the envelope.
fn decode_payload(mut buf: Bytes, envelope_signature: Signature) -> CodecResult<Rpc> {
    need(&buf, 1)?;
    let tag = buf.get_u8();

    let rpc = match tag {
        TAG_APPEND_ENTRIES => Rpc::AppendEntries(decode_append_entries(&mut buf)?),
        TAG_APPEND_ENTRIES_RESPONSE => {
            Rpc::AppendEntriesResponse(decode_append_entries_response(&mut buf)?)
        }
        TAG_REQUEST_VOTE => Rpc::RequestVote(decode_request_vote(&mut buf)?),
        TAG_REQUEST_VOTE_RESPONSE => Rpc::RequestVoteResponse(decode_vote(&mut buf)?),
        TAG_COMMAND => Rpc::Command(decode_command(&mut buf, envelope_signature)?),
        TAG_COMMAND_RESPONSE => Rpc::CommandResponse(decode_command_response(&mut buf)?),
        TAG_REVOLUTION => Rpc::Revolution(decode_revolution(&mut buf, envelope_signature)?),
        TAG_DEBUG => Rpc::Debug(decode_debug(&mut buf)?),
        tag => return Err(CodecError::UnknownMessageType { tag }),
    };

    if !buf.is_empty() {
        return Err(CodecError::TrailingData {
            remaining: buf.remaining(),
        });
    }
    Ok(rpc)
}

fn decode_append_entries(buf: &mut Bytes) -> CodecResult<AppendEntriesRequest> {
    need(buf, 44)?;
    let term = TermId::new(buf.get_u64_le());
    let leader_id = NodeId::new(buf.get_u64_le());
    let prev_log_index = LogIndex::new(buf.get_u64_le());
    let prev_log_term = TermId::new(buf.get_u64_le());
    let leader_commit = LogIndex::new(buf.get_u64_le());

    let entry_count = buf.get_u32_le() as usize;
    let mut entries = Vec::with_capacity(entry_count.min(1024));
    for _ in 0..entry_count {
        entries.push(decode_entry(buf)?);
    }

    need(buf, 4)?;
    let vote_count = buf.get_u32_le() as usize;
    let mut quorum_votes = Vec::with_capacity(vote_count.min(16));
    for _ in 0..vote_count {
        quorum_votes.push(decode_vote(buf)?);
    }

    Ok(AppendEntriesRequest::new(
        term,
        leader_id,
        prev_log_index,
        prev_log_term,
        entries,
        leader_commit,
        quorum_votes,
    ))
}

fn decode_entry(buf: &mut Bytes) -> CodecResult<LogEntry> {
    need(buf, 16)?;
    let term = TermId::new(buf.get_u64_le());
    let index = LogIndex::new(buf.get_u64_le());
    let mut command = decode_command(buf, Signature::from_bytes([0; 64]))?;
    command.signature = get_signature(buf)?;
    Ok(LogEntry::new(term, index, command))
}

fn decode_append_entries_response(buf: &mut Bytes) -> CodecResult<AppendEntriesResponse> {
    need(buf, 26)?;
    let term = TermId::new(buf.get_u64_le());
    let node_id = NodeId::new(buf.get_u64_le());
    let convinced = buf.get_u8() != 0;
    let success = buf.get_u8() != 0;
    let index = LogIndex::new(buf.get_u64_le());
    Ok(AppendEntriesResponse::new(
        term, node_id, convinced, success, index,
    ))
}

fn decode_request_vote(buf: &mut Bytes) -> CodecResult<RequestVoteRequest> {
    need(buf, 32)?;
    let term = TermId::new(buf.get_u64_le());
    let candidate_id = NodeId::new(buf.get_u64_le());
    let last_log_index = LogIndex::new(buf.get_u64_le());
    let last_log_term = TermId::new(buf.get_u64_le());
    Ok(RequestVoteRequest::new(
        term,
        candidate_id,
        last_log_index,
        last_log_term,
    ))
}

fn decode_vote(buf: &mut Bytes) -> CodecResult<SignedVote> {
    need(buf, 25 + SIGNATURE_BYTES)?;
    let term = TermId::new(buf.get_u64_le());
    let candidate_id = NodeId::new(buf.get_u64_le());
    let node_id = NodeId::new(buf.get_u64_le());
    let vote_granted = buf.get_u8() != 0;
    let signature = get_signature(buf)?;
    Ok(SignedVote {
        term,
        candidate_id,
        node_id,
        vote_granted,
        signature,
    })
}

fn decode_command(buf: &mut Bytes, signature: Signature) -> CodecResult<Command> {
    need(buf, 20)?;
    let client_id = ClientId::new(buf.get_u64_le());
    let sequence = buf.get_u64_le();
    let entry = get_bytes(buf)?;
    Ok(Command {
        entry,
        client_id,
        request_id: RequestId::new(client_id, sequence),
        signature,
    })
}

fn decode_command_response(buf: &mut Bytes) -> CodecResult<CommandResponse> {
    need(buf, 37)?;
    let responder_id = NodeId::new(buf.get_u64_le());
    let client_id = ClientId::new(buf.get_u64_le());
    let sequence = buf.get_u64_le();
    let has_hint = buf.get_u8() != 0;
    let hint = buf.get_u64_le();
    let result = get_bytes(buf)?;
    let proof = get_signature(buf)?;
    Ok(CommandResponse {
        result,
        leader_hint: has_hint.then_some(NodeId::new(hint)),
        responder_id,
        request_id: RequestId::new(client_id, sequence),
        proof,
    })
}

fn decode_revolution(buf: &mut Bytes, signature: Signature) -> CodecResult<Revolution> {
    need(buf, 16)?;
    let client_id = ClientId::new(buf.get_u64_le());
    let leader_id = NodeId::new(buf.get_u64_le());
    Ok(Revolution {
        client_id,
        leader_id,
        signature,
    })
}

fn decode_debug(buf: &mut Bytes) -> CodecResult<DebugMessage> {
    need(buf, 12)?;
    let node_id = NodeId::new(buf.get_u64_le());
    let text = get_bytes(buf)?;
    let message = String::from_utf8(text.to_vec()).map_err(|_| CodecError::InvalidUtf8)?;
    Ok(DebugMessage::new(node_id, message))
}

// ── Primitives ───────────────────────────────────────────────────────────

fn need(buf: &Bytes, need: usize) -> CodecResult<()> {
    if buf.remaining() < need {
        return Err(CodecError::InsufficientData {
            need,
            have: buf.remaining(),
        });
    }
    Ok(())
}

fn get_bytes(buf: &mut Bytes) -> CodecResult<Bytes> {
    need(buf, 4)?;
    let len = buf.get_u32_le() as usize;
    need(buf, len)?;
    Ok(buf.split_to(len))
}

fn get_signature(buf: &mut Bytes) -> CodecResult<Signature> {
    need(buf, SIGNATURE_BYTES)?;
    let mut bytes = [0u8; SIGNATURE_BYTES];
    buf.copy_to_slice(&mut bytes);
    Ok(Signature::from_bytes(bytes))
}


// Property-based tests
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_signature() -> impl Strategy<Value = Signature> {
        prop::array::uniform32(any::<u8>()).prop_map(|half| {
            let mut bytes = [0u8; 64];
            bytes[..32].copy_from_slice(&half);
            bytes[32..].copy_from_slice(&half);
            Signature::from_bytes(bytes)
        })
    }

    fn arb_command() -> impl Strategy<Value = Command> {
        (
            prop::collection::vec(any::<u8>(), 0..256),
            any::<u64>(),
            any::<u64>(),
            arb_signature(),
        )
            .prop_map(|(entry, client, sequence, signature)| Command {
                entry: Bytes::from(entry),
                client_id: ClientId::new(client),
                request_id: RequestId::new(ClientId::new(client), sequence),
                signature,
            })
    }

    fn arb_entry() -> impl Strategy<Value = LogEntry> {
        (any::<u64>(), any::<u64>(), arb_command())
            .prop_map(|(term, index, command)| {
                LogEntry::new(TermId::new(term), LogIndex::new(index), command)
            })
    }

    fn arb_vote() -> impl Strategy<Value = SignedVote> {
        (any::<u64>(), any::<u64>(), any::<u64>(), any::<bool>(), arb_signature()).prop_map(
            |(term, candidate, node, granted, signature)| SignedVote {
                term: TermId::new(term),
                candidate_id: NodeId::new(candidate),
                node_id: NodeId::new(node),
                vote_granted: granted,
                signature,
            },
        )
    }

    proptest! {
        /// Property: append requests of any shape round-trip exactly.
        #[test]
        fn prop_append_entries_roundtrip(
            term in any::<u64>(),
            leader in any::<u64>(),
            prev_index in any::<u64>(),
            prev_term in any::<u64>(),
            commit in any::<u64>(),
            entries in prop::collection::vec(arb_entry(), 0..8),
            votes in prop::collection::vec(arb_vote(), 0..5),
            sig in arb_signature(),
        ) {
            let rpc = Rpc::AppendEntries(AppendEntriesRequest::new(
                TermId::new(term),
                NodeId::new(leader),
                LogIndex::new(prev_index),
                TermId::new(prev_term),
                entries,
                LogIndex::new(commit),
                votes,
            ));
            let payload = encode_payload(&rpc).expect("encode");
            let frame = encode_frame(&payload, &sig).expect("frame");
            let decoded = decode_frame(frame).expect("decode");
            prop_assert_eq!(decoded.signature, sig);
            prop_assert_eq!(decoded.rpc, rpc);
        }

        /// Property: commands round-trip through the client framing.
        #[test]
        fn prop_command_roundtrip(cmd in arb_command()) {
            let encoded = encode_client_signed(&Rpc::Command(cmd.clone())).expect("encode");
            let decoded = decode_frame(encoded).expect("decode");
            prop_assert_eq!(decoded.rpc, Rpc::Command(cmd));
        }

        /// Property: arbitrary byte soup never panics the decoder.
        #[test]
        fn prop_decoder_is_total(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
            let _ = decode_frame(Bytes::from(bytes));
        }
    }
}
