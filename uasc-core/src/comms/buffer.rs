// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! The send buffer holds outgoing messages as chunks until security has been applied to
//! them, then drains the secured bytes into the transport.
//!
//! Securing a chunk may involve RSA work, so it is not done here; the owner pops raw
//! chunks with [SendBuffer::next_chunk], secures them wherever is appropriate, and pushes
//! the result back with [SendBuffer::queue_secured].

use std::collections::VecDeque;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use uasc_types::Error;

use crate::messages::Message;

use super::{chunker::Chunker, message_chunk::MessageChunk, secure_channel::SecureChannel};

/// Outgoing message buffer for a single transport.
pub struct SendBuffer {
    /// Bytes with security applied, ready to be written to the stream.
    buffer: BytesMut,
    /// Chunks not yet secured.
    chunks: VecDeque<MessageChunk>,
    /// The sequence number of the last chunk written.
    last_sent_sequence_number: u32,
    /// The negotiated size of a send chunk.
    pub send_buffer_size: usize,
    /// The negotiated maximum size of a whole message, 0 for no limit.
    pub max_message_size: usize,
    /// The negotiated maximum number of chunks per message, 0 for no limit.
    pub max_chunk_count: usize,
}

impl SendBuffer {
    /// Create a send buffer with the negotiated limits.
    pub fn new(
        send_buffer_size: usize,
        max_message_size: usize,
        max_chunk_count: usize,
    ) -> SendBuffer {
        SendBuffer {
            // Secured chunks can outgrow the plaintext chunk size through padding,
            // signature and RSA block expansion, so size for the worst case.
            buffer: BytesMut::with_capacity(2 * send_buffer_size),
            chunks: VecDeque::new(),
            last_sent_sequence_number: 0,
            send_buffer_size,
            max_message_size,
            max_chunk_count,
        }
    }

    /// Encode a message into chunks and queue them for securing and sending.
    /// Returns the request id the message was written under.
    pub fn write(
        &mut self,
        request_id: u32,
        message: impl Message,
        secure_channel: &SecureChannel,
    ) -> Result<u32, Error> {
        let chunks = Chunker::encode(
            self.last_sent_sequence_number + 1,
            request_id,
            self.max_message_size,
            self.send_buffer_size,
            secure_channel,
            &message,
        )?;
        self.last_sent_sequence_number += chunks.len() as u32;
        self.chunks.extend(chunks);
        Ok(request_id)
    }

    /// Pop the next chunk waiting for security to be applied.
    pub fn next_chunk(&mut self) -> Option<MessageChunk> {
        self.chunks.pop_front()
    }

    /// Append a secured chunk's bytes, making them readable.
    pub fn queue_secured(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// `true` when secured bytes are waiting to be written to the stream.
    pub fn can_read(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Write the secured bytes to the stream.
    pub async fn read_into_async<W: AsyncWrite + Unpin>(
        &mut self,
        write: &mut W,
    ) -> std::io::Result<()> {
        while self.buffer.has_remaining() {
            write.write_buf(&mut self.buffer).await?;
        }
        write.flush().await
    }
}
