// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

use std::io::{Read, Write};

use uasc_types::{
    CloseSecureChannelRequest, DecodingOptions, EncodingResult, NodeId, ObjectId,
    OpenSecureChannelRequest, SimpleBinaryDecodable, SimpleBinaryEncodable,
};

use crate::comms::message_chunk::MessageChunkType;

use super::Message;

/// The requests a handshake handler can receive.
#[derive(Debug, PartialEq, Clone)]
pub enum RequestMessage {
    /// An `OpenSecureChannel` issue or renewal.
    OpenSecureChannel(Box<OpenSecureChannelRequest>),
    /// A `CloseSecureChannel`.
    CloseSecureChannel(Box<CloseSecureChannelRequest>),
}

impl From<OpenSecureChannelRequest> for RequestMessage {
    fn from(value: OpenSecureChannelRequest) -> Self {
        Self::OpenSecureChannel(Box::new(value))
    }
}

impl From<CloseSecureChannelRequest> for RequestMessage {
    fn from(value: CloseSecureChannelRequest) -> Self {
        Self::CloseSecureChannel(Box::new(value))
    }
}

impl SimpleBinaryEncodable for RequestMessage {
    fn byte_len(&self) -> usize {
        match self {
            Self::OpenSecureChannel(value) => value.byte_len(),
            Self::CloseSecureChannel(value) => value.byte_len(),
        }
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        match self {
            Self::OpenSecureChannel(value) => value.encode(stream),
            Self::CloseSecureChannel(value) => value.encode(stream),
        }
    }
}

impl Message for RequestMessage {
    fn request_handle(&self) -> u32 {
        match self {
            Self::OpenSecureChannel(value) => value.request_header.request_handle,
            Self::CloseSecureChannel(value) => value.request_header.request_handle,
        }
    }

    fn message_type(&self) -> MessageChunkType {
        match self {
            Self::OpenSecureChannel(_) => MessageChunkType::OpenSecureChannel,
            Self::CloseSecureChannel(_) => MessageChunkType::CloseSecureChannel,
        }
    }

    fn type_id(&self) -> NodeId {
        match self {
            Self::OpenSecureChannel(_) => {
                ObjectId::OpenSecureChannelRequest_Encoding_DefaultBinary.into()
            }
            Self::CloseSecureChannel(_) => {
                ObjectId::CloseSecureChannelRequest_Encoding_DefaultBinary.into()
            }
        }
    }
}

pub(super) fn decode_open_secure_channel(
    stream: &mut dyn Read,
    decoding_options: &DecodingOptions,
) -> EncodingResult<RequestMessage> {
    Ok(OpenSecureChannelRequest::decode(stream, decoding_options)?.into())
}

pub(super) fn decode_close_secure_channel(
    stream: &mut dyn Read,
    decoding_options: &DecodingOptions,
) -> EncodingResult<RequestMessage> {
    Ok(CloseSecureChannelRequest::decode(stream, decoding_options)?.into())
}
