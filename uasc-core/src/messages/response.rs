// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

use std::io::{Read, Write};

use uasc_types::{
    CloseSecureChannelResponse, DecodingOptions, EncodingResult, NodeId, ObjectId,
    OpenSecureChannelResponse, SimpleBinaryDecodable, SimpleBinaryEncodable,
};

use crate::comms::message_chunk::MessageChunkType;

use super::Message;

/// The responses a handshake handler can produce.
#[derive(Debug, PartialEq, Clone)]
pub enum ResponseMessage {
    /// The reply to an `OpenSecureChannel` issue or renewal.
    OpenSecureChannel(Box<OpenSecureChannelResponse>),
    /// The reply to a `CloseSecureChannel`. Never sent on the wire, the channel just closes.
    CloseSecureChannel(Box<CloseSecureChannelResponse>),
}

impl From<OpenSecureChannelResponse> for ResponseMessage {
    fn from(value: OpenSecureChannelResponse) -> Self {
        Self::OpenSecureChannel(Box::new(value))
    }
}

impl From<CloseSecureChannelResponse> for ResponseMessage {
    fn from(value: CloseSecureChannelResponse) -> Self {
        Self::CloseSecureChannel(Box::new(value))
    }
}

impl SimpleBinaryEncodable for ResponseMessage {
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

impl Message for ResponseMessage {
    fn request_handle(&self) -> u32 {
        match self {
            Self::OpenSecureChannel(value) => value.response_header.request_handle,
            Self::CloseSecureChannel(value) => value.response_header.request_handle,
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
                ObjectId::OpenSecureChannelResponse_Encoding_DefaultBinary.into()
            }
            Self::CloseSecureChannel(_) => {
                ObjectId::CloseSecureChannelResponse_Encoding_DefaultBinary.into()
            }
        }
    }
}

pub(super) fn decode_open_secure_channel(
    stream: &mut dyn Read,
    decoding_options: &DecodingOptions,
) -> EncodingResult<ResponseMessage> {
    Ok(OpenSecureChannelResponse::decode(stream, decoding_options)?.into())
}

pub(super) fn decode_close_secure_channel(
    stream: &mut dyn Read,
    decoding_options: &DecodingOptions,
) -> EncodingResult<ResponseMessage> {
    Ok(CloseSecureChannelResponse::decode(stream, decoding_options)?.into())
}
