// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Constants of the UA-TCP framing layer.

/// Message type of chunks carrying regular service messages.
pub const CHUNK_MESSAGE: &[u8] = b"MSG";
/// Message type of chunks carrying an `OpenSecureChannel` request or response.
pub const OPEN_SECURE_CHANNEL_MESSAGE: &[u8] = b"OPN";
/// Message type of chunks carrying a `CloseSecureChannel` request.
pub const CLOSE_SECURE_CHANNEL_MESSAGE: &[u8] = b"CLO";

/// Chunk type of an intermediate chunk.
pub const CHUNK_INTERMEDIATE: u8 = b'C';
/// Chunk type of the final chunk of a message.
pub const CHUNK_FINAL: u8 = b'F';
/// Chunk type of a final chunk that aborts the message being assembled.
pub const CHUNK_FINAL_ERROR: u8 = b'A';

/// The minimum size in bytes that a chunk buffer is allowed to be by the specification.
pub const MIN_CHUNK_SIZE: usize = 8196;

/// Bytes of the chunk header the framer peeks before it knows the full chunk size:
/// message type, chunk type and the message size itself.
pub const CHUNK_PEEK_SIZE: usize = 8;
