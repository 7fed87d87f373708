// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Message enums for the handshake services and the codec registry that decodes them.
//!
//! The registry is built by the composing program at startup and threaded into whatever
//! drives decoding, so there is no process-wide table of codecs and no hidden registration
//! order to worry about.

use std::collections::HashMap;
use std::io::Read;

use uasc_types::{
    status_code::StatusCode, DecodingOptions, EncodingResult, Error, NodeId, ObjectId,
    SimpleBinaryEncodable,
};

mod request;
mod response;

pub use request::RequestMessage;
pub use response::ResponseMessage;

use crate::comms::message_chunk::MessageChunkType;

/// A service message that can be carried inside message chunks.
pub trait Message: SimpleBinaryEncodable {
    /// The request handle from the message's request or response header.
    fn request_handle(&self) -> u32;

    /// The chunk message type the message travels under.
    fn message_type(&self) -> MessageChunkType;

    /// The id of the message's binary encoding, prefixed to the encoded body.
    fn type_id(&self) -> NodeId;
}

/// Decoder for one message type.
type DecodeFn<T> = fn(&mut dyn Read, &DecodingOptions) -> EncodingResult<T>;

/// An explicit table of message decoders keyed by type id. Constructed by the composing
/// program and passed to the orchestrator as a dependency.
pub struct CodecRegistry<T> {
    decoders: HashMap<u32, DecodeFn<T>>,
}

impl<T> Default for CodecRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CodecRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> CodecRegistry<T> {
        CodecRegistry {
            decoders: HashMap::new(),
        }
    }

    /// Register a decoder for the message type with the given object id.
    pub fn register(&mut self, object_id: ObjectId, decoder: DecodeFn<T>) {
        self.decoders.insert(object_id as u32, decoder);
    }

    /// Decode a message by the node id read from the head of the message body.
    pub fn decode<S: Read>(
        &self,
        node_id: &NodeId,
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<T> {
        if node_id.namespace != 0 {
            return Err(Error::new(
                StatusCode::BadTcpMessageTypeInvalid,
                format!("Message type id {} is not in namespace 0", node_id),
            ));
        }
        let Some(decoder) = self.decoders.get(&node_id.identifier) else {
            return Err(Error::new(
                StatusCode::BadTcpMessageTypeInvalid,
                format!("No codec is registered for message type {}", node_id),
            ));
        };
        decoder(stream, decoding_options)
    }
}

impl CodecRegistry<RequestMessage> {
    /// The registry a server needs to terminate the secure channel handshake.
    pub fn server_handshake() -> CodecRegistry<RequestMessage> {
        let mut registry = CodecRegistry::new();
        registry.register(
            ObjectId::OpenSecureChannelRequest_Encoding_DefaultBinary,
            request::decode_open_secure_channel,
        );
        registry.register(
            ObjectId::CloseSecureChannelRequest_Encoding_DefaultBinary,
            request::decode_close_secure_channel,
        );
        registry
    }
}

impl CodecRegistry<ResponseMessage> {
    /// The registry a client needs to read the server's handshake responses.
    pub fn client_handshake() -> CodecRegistry<ResponseMessage> {
        let mut registry = CodecRegistry::new();
        registry.register(
            ObjectId::OpenSecureChannelResponse_Encoding_DefaultBinary,
            response::decode_open_secure_channel,
        );
        registry.register(
            ObjectId::CloseSecureChannelResponse_Encoding_DefaultBinary,
            response::decode_close_secure_channel,
        );
        registry
    }
}
