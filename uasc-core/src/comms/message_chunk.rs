// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Message chunks: the framed units a message travels in, possibly signed and encrypted,
//! and the parsed view of their headers.

use std::io::Cursor;
use std::ops::Range;

use uasc_types::{
    read_u32, read_u8, status_code::StatusCode, write_u32, write_u8, DecodingOptions,
    EncodingResult, Error, SimpleBinaryDecodable, SimpleBinaryEncodable,
};

use super::{
    secure_channel::SecureChannel,
    security_header::{SecurityHeader, SequenceHeader},
    tcp_types::{
        CHUNK_FINAL, CHUNK_FINAL_ERROR, CHUNK_INTERMEDIATE, CHUNK_MESSAGE,
        CLOSE_SECURE_CHANNEL_MESSAGE, MIN_CHUNK_SIZE, OPEN_SECURE_CHANNEL_MESSAGE,
    },
};

/// Bytes of the fixed chunk header: message type, chunk type, message size, channel id.
pub const MESSAGE_CHUNK_HEADER_SIZE: usize = 3 + 1 + 4 + 4;

/// Byte offset of the message size within the fixed chunk header.
pub const MESSAGE_SIZE_OFFSET: usize = 3 + 1;

/// What a chunk carries: handshake, channel teardown, or regular traffic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageChunkType {
    /// A chunk of a regular service message.
    Message,
    /// A chunk of an `OpenSecureChannel` message.
    OpenSecureChannel,
    /// A chunk of a `CloseSecureChannel` message.
    CloseSecureChannel,
}

impl MessageChunkType {
    /// `true` for `OpenSecureChannel` chunks.
    pub fn is_open_secure_channel(&self) -> bool {
        *self == MessageChunkType::OpenSecureChannel
    }

    /// The three ASCII bytes this type puts on the wire.
    pub fn wire_code(&self) -> &'static [u8] {
        match self {
            MessageChunkType::Message => CHUNK_MESSAGE,
            MessageChunkType::OpenSecureChannel => OPEN_SECURE_CHANNEL_MESSAGE,
            MessageChunkType::CloseSecureChannel => CLOSE_SECURE_CHANNEL_MESSAGE,
        }
    }

    /// Parse the three ASCII bytes at the head of a chunk.
    pub fn from_wire_code(code: &[u8]) -> Result<MessageChunkType, Error> {
        match code {
            CHUNK_MESSAGE => Ok(MessageChunkType::Message),
            OPEN_SECURE_CHANNEL_MESSAGE => Ok(MessageChunkType::OpenSecureChannel),
            CLOSE_SECURE_CHANNEL_MESSAGE => Ok(MessageChunkType::CloseSecureChannel),
            other => Err(Error::new(
                StatusCode::BadTcpMessageTypeInvalid,
                format!("Message type {:?} is invalid", other),
            )),
        }
    }
}

/// Whether a chunk continues, completes or aborts the message it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageIsFinalType {
    /// More chunks of this message follow.
    Intermediate,
    /// The message is complete with this chunk.
    Final,
    /// The sender abandoned the message; everything received for it is discarded.
    FinalError,
}

impl MessageIsFinalType {
    /// The ASCII byte this flag puts on the wire.
    pub fn wire_code(&self) -> u8 {
        match self {
            MessageIsFinalType::Intermediate => CHUNK_INTERMEDIATE,
            MessageIsFinalType::Final => CHUNK_FINAL,
            MessageIsFinalType::FinalError => CHUNK_FINAL_ERROR,
        }
    }

    /// Parse the chunk type byte.
    pub fn from_wire_code(code: u8) -> Result<MessageIsFinalType, Error> {
        match code {
            CHUNK_INTERMEDIATE => Ok(MessageIsFinalType::Intermediate),
            CHUNK_FINAL => Ok(MessageIsFinalType::Final),
            CHUNK_FINAL_ERROR => Ok(MessageIsFinalType::FinalError),
            other => Err(Error::new(
                StatusCode::BadTcpMessageTypeInvalid,
                format!("Chunk type {} is invalid", other),
            )),
        }
    }
}

/// The fixed header every chunk starts with.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageChunkHeader {
    /// What the chunk carries.
    pub message_type: MessageChunkType,
    /// Whether the chunk continues, completes or aborts its message.
    pub is_final: MessageIsFinalType,
    /// Size of the whole chunk in bytes, this header included.
    pub message_size: u32,
    /// Id of the secure channel the chunk belongs to, 0 while none exists.
    pub secure_channel_id: u32,
}

impl SimpleBinaryEncodable for MessageChunkHeader {
    fn byte_len(&self) -> usize {
        MESSAGE_CHUNK_HEADER_SIZE
    }

    fn encode<S: std::io::Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        stream
            .write_all(self.message_type.wire_code())
            .map_err(Error::encoding)?;
        write_u8(stream, self.is_final.wire_code())?;
        write_u32(stream, self.message_size)?;
        write_u32(stream, self.secure_channel_id)
    }
}

impl SimpleBinaryDecodable for MessageChunkHeader {
    fn decode<S: std::io::Read + ?Sized>(
        stream: &mut S,
        _: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let mut type_code = [0u8; 3];
        stream.read_exact(&mut type_code).map_err(Error::decoding)?;
        let message_type = MessageChunkType::from_wire_code(&type_code)?;
        let is_final = MessageIsFinalType::from_wire_code(read_u8(stream)?)?;
        Ok(MessageChunkHeader {
            message_type,
            is_final,
            message_size: read_u32(stream)?,
            secure_channel_id: read_u32(stream)?,
        })
    }
}

/// Error returned when a negotiated chunk size is below what the protocol permits.
#[derive(Debug)]
pub struct InsufficientChunkSize;

/// One framed unit of a message: the fixed header, a security header, a sequence header
/// and the body, plus padding and signature once security has been applied.
#[derive(Debug, Clone)]
pub struct MessageChunk {
    /// The chunk exactly as it sits on the wire, headers included.
    pub data: Vec<u8>,
}

impl MessageChunk {
    /// Assemble an unsecured chunk around `body`. Padding and signature space is added
    /// later, when security is applied.
    pub fn new(
        sequence_number: u32,
        request_id: u32,
        message_type: MessageChunkType,
        is_final: MessageIsFinalType,
        secure_channel: &SecureChannel,
        body: &[u8],
    ) -> EncodingResult<MessageChunk> {
        let security_header = secure_channel.make_security_header(message_type);
        let sequence_header = SequenceHeader {
            sequence_number,
            request_id,
        };

        let message_size = MESSAGE_CHUNK_HEADER_SIZE
            + security_header.byte_len()
            + sequence_header.byte_len()
            + body.len();
        let header = MessageChunkHeader {
            message_type,
            is_final,
            message_size: message_size as u32,
            secure_channel_id: secure_channel.secure_channel_id(),
        };

        let mut data = Vec::with_capacity(message_size);
        header.encode(&mut data)?;
        security_header.encode(&mut data)?;
        sequence_header.encode(&mut data)?;
        data.extend_from_slice(body);
        debug_assert_eq!(data.len(), message_size);

        Ok(MessageChunk { data })
    }

    /// The most body bytes that fit in a chunk of `max_chunk_size` once headers,
    /// signature and the minimum padding have taken their share.
    ///
    /// When the chunk will be encrypted its secured portion must be a whole number of
    /// cipher blocks, so the chunk size is first rounded down to the block size. The
    /// remainder after subtracting the overhead is the usable body capacity.
    pub fn max_body_size(
        message_type: MessageChunkType,
        secure_channel: &SecureChannel,
        max_chunk_size: usize,
    ) -> Result<usize, InsufficientChunkSize> {
        if max_chunk_size < MIN_CHUNK_SIZE {
            log::error!(
                "Chunk size {} is under the {} byte minimum",
                max_chunk_size,
                MIN_CHUNK_SIZE
            );
            return Err(InsufficientChunkSize);
        }

        let security_header = secure_channel.make_security_header(message_type);
        let header_size = MESSAGE_CHUNK_HEADER_SIZE + security_header.byte_len() + 8;
        let signature_size = secure_channel.signature_size(&security_header);

        let (aligned_chunk_size, minimum_padding) =
            match secure_channel.padding_params(&security_header, signature_size, message_type) {
                Some(p) => (
                    max_chunk_size - max_chunk_size % p.plain_block_size,
                    p.minimum_padding,
                ),
                None => (max_chunk_size, 0),
            };

        Ok(aligned_chunk_size - header_size - signature_size - minimum_padding)
    }

    /// Parse the fixed header at the head of the chunk.
    pub fn message_header(
        &self,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<MessageChunkHeader> {
        MessageChunkHeader::decode(&mut Cursor::new(&self.data), decoding_options)
    }

    /// `true` if the chunk belongs to an `OpenSecureChannel` message.
    pub fn is_open_secure_channel(&self, decoding_options: &DecodingOptions) -> bool {
        self.message_header(decoding_options)
            .map(|h| h.message_type.is_open_secure_channel())
            .unwrap_or(false)
    }

    /// Parse all headers of the chunk. Meaningless on an encrypted chunk; remove
    /// security first.
    pub fn chunk_info(&self, secure_channel: &SecureChannel) -> EncodingResult<ChunkInfo> {
        ChunkInfo::new(self, secure_channel)
    }

    /// Offset of the first secured byte, i.e. of the sequence header.
    pub(crate) fn encrypted_data_offset(
        &self,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<usize> {
        let mut stream = Cursor::new(&self.data);
        let header = MessageChunkHeader::decode(&mut stream, decoding_options)?;
        SecurityHeader::decode_from_stream(
            &mut stream,
            header.message_type.is_open_secure_channel(),
            decoding_options,
        )?;
        Ok(stream.position() as usize)
    }
}

/// The parsed headers of one decrypted chunk, with the location of its body.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkInfo {
    /// The fixed chunk header.
    pub message_header: MessageChunkHeader,
    /// The security header, in whichever form the message type dictates.
    pub security_header: SecurityHeader,
    /// The sequence header.
    pub sequence_header: SequenceHeader,
    /// Offset of the body within the chunk data.
    pub body_offset: usize,
    /// Length of the body.
    pub body_length: usize,
}

impl ChunkInfo {
    /// Parse the headers of `chunk`; everything after them is the body.
    pub fn new(chunk: &MessageChunk, secure_channel: &SecureChannel) -> EncodingResult<ChunkInfo> {
        let decoding_options = secure_channel.decoding_options();
        let mut stream = Cursor::new(&chunk.data);

        let message_header = MessageChunkHeader::decode(&mut stream, &decoding_options)?;
        let security_header = SecurityHeader::decode_from_stream(
            &mut stream,
            message_header.message_type.is_open_secure_channel(),
            &decoding_options,
        )?;
        let sequence_header = SequenceHeader::decode(&mut stream, &decoding_options)?;

        let body_offset = stream.position() as usize;
        Ok(ChunkInfo {
            message_header,
            security_header,
            sequence_header,
            body_offset,
            body_length: chunk.data.len() - body_offset,
        })
    }

    /// The body's position within the chunk data.
    pub fn body_range(&self) -> Range<usize> {
        self.body_offset..self.body_offset + self.body_length
    }
}
