// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Turns messages into chunk sequences and chunk sequences back into messages.

use std::io::Read;
use std::ops::Range;

use log::trace;

use uasc_types::{
    status_code::StatusCode, Error, NodeId, SimpleBinaryDecodable, SimpleBinaryEncodable,
};

use crate::{
    comms::{
        message_chunk::{MessageChunk, MessageIsFinalType},
        secure_channel::SecureChannel,
    },
    messages::{CodecRegistry, Message},
};

/// Reads the concatenated bodies of a chunk sequence without copying them into one
/// buffer first. The body ranges are located up front; the reader then just walks them.
struct ChunkBodyReader<'a> {
    chunks: &'a [MessageChunk],
    bodies: Vec<Range<usize>>,
    chunk_index: usize,
    pos: usize,
}

impl Read for ChunkBodyReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let Some(range) = self.bodies.get(self.chunk_index) else {
                return Ok(0);
            };
            let body = &self.chunks[self.chunk_index].data[range.clone()];
            if self.pos < body.len() {
                let n = buf.len().min(body.len() - self.pos);
                buf[..n].copy_from_slice(&body[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            // This body is exhausted, step into the next chunk
            self.chunk_index += 1;
            self.pos = 0;
        }
    }
}

/// The Chunker is responsible for turning messages into chunks and chunks into messages.
pub struct Chunker;

impl Chunker {
    /// Check that every chunk of a message carries the channel's id, that sequence
    /// numbers start at or after `starting_sequence_number` and increase by one per
    /// chunk, and that all chunks repeat the first chunk's request id.
    ///
    /// Returns the sequence number of the last chunk.
    pub fn validate_chunks(
        starting_sequence_number: u32,
        secure_channel: &SecureChannel,
        chunks: &[MessageChunk],
    ) -> Result<u32, Error> {
        let channel_id = secure_channel.secure_channel_id();

        let first = chunks
            .first()
            .ok_or_else(|| {
                Error::new(StatusCode::BadUnexpectedError, "Message contained no chunks")
            })?
            .chunk_info(secure_channel)?;
        let request_id = first.sequence_header.request_id;
        let first_sequence_number = first.sequence_header.sequence_number;
        trace!("Validating message starting at sequence {first_sequence_number}");
        if first_sequence_number < starting_sequence_number {
            return Err(Error::new(
                StatusCode::BadSequenceNumberInvalid,
                format!(
                    "Message starts at sequence number {}, expected at least {}",
                    first_sequence_number, starting_sequence_number
                ),
            ));
        }

        let mut expected_sequence_number = first_sequence_number;
        for chunk in chunks {
            let info = chunk.chunk_info(secure_channel)?;
            if channel_id != 0 && info.message_header.secure_channel_id != channel_id {
                return Err(Error::new(
                    StatusCode::BadSecureChannelIdInvalid,
                    format!(
                        "Chunk carries channel id {}, this channel is {}",
                        info.message_header.secure_channel_id, channel_id
                    ),
                ));
            }
            if info.sequence_header.sequence_number != expected_sequence_number {
                return Err(Error::new(
                    StatusCode::BadSequenceNumberInvalid,
                    format!(
                        "Chunk carries sequence number {}, expected {}",
                        info.sequence_header.sequence_number, expected_sequence_number
                    ),
                ));
            }
            if info.sequence_header.request_id != request_id {
                return Err(Error::new(
                    StatusCode::BadSequenceNumberInvalid,
                    format!(
                        "Chunk switched from request id {} to {} mid-message",
                        request_id, info.sequence_header.request_id
                    ),
                ));
            }
            expected_sequence_number += 1;
        }
        Ok(expected_sequence_number - 1)
    }

    /// Serialize a message: the id of its type followed by its body.
    fn serialize(message: &impl Message) -> Result<Vec<u8>, Error> {
        let type_id = message.type_id();
        let mut payload = Vec::with_capacity(type_id.byte_len() + message.byte_len());
        type_id.encode(&mut payload)?;
        message.encode(&mut payload)?;
        Ok(payload)
    }

    /// Encode a message into one or more chunks, numbered from `sequence_number`.
    ///
    /// A `max_chunk_size` of 0 disables splitting; a `max_message_size` of 0 disables
    /// the whole-message size check.
    pub fn encode(
        sequence_number: u32,
        request_id: u32,
        max_message_size: usize,
        max_chunk_size: usize,
        secure_channel: &SecureChannel,
        message: &impl Message,
    ) -> Result<Vec<MessageChunk>, Error> {
        let request_handle = message.request_handle();
        let handle = (request_handle > 0).then_some(request_handle);
        let message_type = message.message_type();

        let payload =
            Self::serialize(message).map_err(|e| e.with_context(Some(request_id), handle))?;

        if max_message_size > 0 && payload.len() > max_message_size {
            // A client reports its oversized request, a server its oversized response
            let status = if secure_channel.is_client_role() {
                StatusCode::BadRequestTooLarge
            } else {
                StatusCode::BadResponseTooLarge
            };
            return Err(Error::new(
                status,
                format!(
                    "Message of {} bytes exceeds the {} byte message limit",
                    payload.len(),
                    max_message_size
                ),
            )
            .with_context(Some(request_id), handle));
        }

        let body_capacity = if max_chunk_size > 0 {
            MessageChunk::max_body_size(message_type, secure_channel, max_chunk_size).map_err(
                |_| {
                    Error::new(
                        StatusCode::BadTcpInternalError,
                        format!("Chunk size {} leaves no room for a message", max_chunk_size),
                    )
                    .with_context(Some(request_id), handle)
                },
            )?
        } else {
            payload.len()
        };

        let bodies = payload.chunks(body_capacity);
        let chunk_count = bodies.len();
        trace!("Message splits into {chunk_count} chunks of at most {body_capacity} body bytes");

        let mut chunks = Vec::with_capacity(chunk_count);
        for (index, body) in bodies.enumerate() {
            let is_final = if index + 1 == chunk_count {
                MessageIsFinalType::Final
            } else {
                MessageIsFinalType::Intermediate
            };
            chunks.push(MessageChunk::new(
                sequence_number + index as u32,
                request_id,
                message_type,
                is_final,
                secure_channel,
                body,
            )?);
        }
        Ok(chunks)
    }

    /// Reassemble a message from its decrypted chunks and decode it through the codec
    /// registry.
    pub fn decode<T>(
        chunks: &[MessageChunk],
        secure_channel: &SecureChannel,
        codecs: &CodecRegistry<T>,
    ) -> Result<T, Error> {
        let mut bodies = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let info = chunk.chunk_info(secure_channel)?;
            let expected = if index + 1 == chunks.len() {
                MessageIsFinalType::Final
            } else {
                MessageIsFinalType::Intermediate
            };
            if info.message_header.is_final != expected {
                return Err(Error::decoding(
                    "Only the last chunk of a message may be marked final",
                ));
            }
            bodies.push(info.body_range());
        }

        let mut stream = ChunkBodyReader {
            chunks,
            bodies,
            chunk_index: 0,
            pos: 0,
        };
        let decoding_options = secure_channel.decoding_options();

        // The message body starts with the id of its data type
        let type_id = NodeId::decode(&mut stream, &decoding_options)?;
        codecs.decode(&type_id, &mut stream, &decoding_options)
    }
}
