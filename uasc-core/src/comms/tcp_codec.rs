// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! The chunk framer. Consumes the incoming byte stream and emits whole chunks.
//!
//! The framer peeks the first 8 bytes of each chunk, message type, chunk type and message
//! size, and waits until the whole chunk is readable before slicing it off. Partial chunks
//! stay in the transport's buffer; nothing is copied until a chunk is complete.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use uasc_types::{status_code::StatusCode, DecodingOptions, Error};

use super::{
    message_chunk::{
        MessageChunk, MessageChunkType, MessageIsFinalType, MESSAGE_CHUNK_HEADER_SIZE,
    },
    tcp_types::CHUNK_PEEK_SIZE,
};

/// Codec for the UA-TCP framing, producing one [MessageChunk] at a time.
pub struct TcpCodec {
    decoding_options: DecodingOptions,
}

impl TcpCodec {
    /// Create a codec enforcing the limits in the decoding options.
    pub fn new(decoding_options: DecodingOptions) -> TcpCodec {
        TcpCodec { decoding_options }
    }
}

impl Decoder for TcpCodec {
    type Item = MessageChunk;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<MessageChunk>, Error> {
        if src.len() < CHUNK_PEEK_SIZE {
            return Ok(None);
        }

        // Validate the fixed part of the header before trusting the message size
        MessageChunkType::from_wire_code(&src[0..3])?;
        MessageIsFinalType::from_wire_code(src[3])?;

        let message_size = (&src[4..8]).get_u32_le() as usize;
        if message_size < MESSAGE_CHUNK_HEADER_SIZE {
            return Err(Error::new(
                StatusCode::BadTcpInternalError,
                format!("Message size {} is too small for any chunk", message_size),
            ));
        }
        if self.decoding_options.max_message_size > 0
            && message_size > self.decoding_options.max_message_size
        {
            return Err(Error::new(
                StatusCode::BadTcpMessageTooLarge,
                format!(
                    "Message size {} exceeds receive limit {}",
                    message_size, self.decoding_options.max_message_size
                ),
            ));
        }

        // Wait for the whole chunk
        if src.len() < message_size {
            src.reserve(message_size - src.len());
            return Ok(None);
        }

        let data = src.split_to(message_size).to_vec();
        Ok(Some(MessageChunk { data }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::tcp_types::{CHUNK_FINAL, CHUNK_INTERMEDIATE, CHUNK_MESSAGE, OPEN_SECURE_CHANNEL_MESSAGE};

    fn chunk_bytes(message_type: &[u8], chunk_type: u8, body: &[u8]) -> Vec<u8> {
        let message_size = (MESSAGE_CHUNK_HEADER_SIZE + body.len()) as u32;
        let mut data = Vec::new();
        data.extend_from_slice(message_type);
        data.push(chunk_type);
        data.extend_from_slice(&message_size.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(body);
        data
    }

    #[test]
    fn partial_chunk_yields_nothing() {
        let mut codec = TcpCodec::new(DecodingOptions::test());
        let bytes = chunk_bytes(OPEN_SECURE_CHANNEL_MESSAGE, CHUNK_FINAL, &[1, 2, 3, 4]);

        // Not even the peekable header
        let mut buf = BytesMut::from(&bytes[..5]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        // Header, but not the full message size
        let mut buf = BytesMut::from(&bytes[..bytes.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        // The partial chunk stays buffered
        assert_eq!(buf.len(), bytes.len() - 1);

        let mut buf = BytesMut::from(&bytes[..]);
        let chunk = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(chunk.data, bytes);
        assert!(buf.is_empty());
    }

    #[test]
    fn two_chunks_in_one_read() {
        let mut codec = TcpCodec::new(DecodingOptions::test());
        let first = chunk_bytes(OPEN_SECURE_CHANNEL_MESSAGE, CHUNK_INTERMEDIATE, &[1; 8]);
        let second = chunk_bytes(OPEN_SECURE_CHANNEL_MESSAGE, CHUNK_FINAL, &[2; 4]);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&first);
        buf.extend_from_slice(&second);

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().data, first);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().data, second);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn unknown_message_type_fails() {
        let mut codec = TcpCodec::new(DecodingOptions::test());
        let mut buf = BytesMut::from(&chunk_bytes(b"XXX", CHUNK_FINAL, &[])[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.status(), StatusCode::BadTcpMessageTypeInvalid);
    }

    #[test]
    fn oversized_message_fails() {
        let options = DecodingOptions {
            max_message_size: 64,
            ..DecodingOptions::test()
        };
        let mut codec = TcpCodec::new(options);
        let mut buf = BytesMut::from(&chunk_bytes(CHUNK_MESSAGE, CHUNK_FINAL, &[0; 100])[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.status(), StatusCode::BadTcpMessageTooLarge);
    }
}
