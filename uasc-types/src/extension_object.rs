// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Contains `ExtensionObject`, kept in its raw binary form.
//!
//! Service headers reserve space for vendor extensions through this type. The handshake never
//! interprets a body, so the payload is carried as opaque bytes rather than going through a
//! type registry.

use std::io::{Read, Write};

use crate::{
    byte_string::ByteString,
    encoding::{
        read_u8, write_u8, DecodingOptions, EncodingResult, Error, SimpleBinaryDecodable,
        SimpleBinaryEncodable,
    },
    node_id::NodeId,
};

/// A structure carried as its encoding id plus an uninterpreted binary body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtensionObject {
    /// The id of the data type of the body.
    pub node_id: NodeId,
    /// The binary body, `None` when the object carries no body.
    pub body: Option<Vec<u8>>,
}

impl ExtensionObject {
    /// An extension object with no body and a null type id.
    pub fn null() -> ExtensionObject {
        ExtensionObject::default()
    }

    /// Test if the object has neither type id nor body.
    pub fn is_null(&self) -> bool {
        self.node_id.is_null() && self.body.is_none()
    }
}

impl SimpleBinaryEncodable for ExtensionObject {
    fn byte_len(&self) -> usize {
        let mut size = self.node_id.byte_len() + 1;
        if let Some(body) = &self.body {
            size += 4 + body.len();
        }
        size
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        self.node_id.encode(stream)?;
        match &self.body {
            None => write_u8(stream, 0x0u8),
            Some(body) => {
                write_u8(stream, 0x1u8)?;
                ByteString::from(body).encode(stream)
            }
        }
    }
}

impl SimpleBinaryDecodable for ExtensionObject {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let node_id = NodeId::decode(stream, decoding_options)?;
        let encoding = read_u8(stream)?;
        let body = match encoding {
            0x0 => None,
            // Binary and XML bodies both carry a length-prefixed blob
            0x1 | 0x2 => {
                let body = ByteString::decode(stream, decoding_options)?;
                body.value
            }
            r => {
                return Err(Error::decoding(format!(
                    "Invalid extension object encoding {r}"
                )));
            }
        };
        Ok(ExtensionObject { node_id, body })
    }
}
