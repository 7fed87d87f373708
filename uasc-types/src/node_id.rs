// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Contains the implementation of `NodeId` and the object ids of the handshake messages.
//!
//! Only numeric identifiers are represented. The handshake never carries string, GUID or
//! opaque node ids, so those encodings are rejected at decode time.

use std::{
    fmt,
    io::{Read, Write},
};

use crate::encoding::{
    read_u16, read_u32, read_u8, write_u16, write_u32, write_u8, DecodingOptions, EncodingResult,
    Error, SimpleBinaryDecodable, SimpleBinaryEncodable,
};

/// Object ids of the service messages this stack understands, from the OPC UA object table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum ObjectId {
    /// OpenSecureChannelRequest binary encoding id.
    OpenSecureChannelRequest_Encoding_DefaultBinary = 446,
    /// OpenSecureChannelResponse binary encoding id.
    OpenSecureChannelResponse_Encoding_DefaultBinary = 449,
    /// CloseSecureChannelRequest binary encoding id.
    CloseSecureChannelRequest_Encoding_DefaultBinary = 452,
    /// CloseSecureChannelResponse binary encoding id.
    CloseSecureChannelResponse_Encoding_DefaultBinary = 455,
}

impl TryFrom<u32> for ObjectId {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            446 => Ok(ObjectId::OpenSecureChannelRequest_Encoding_DefaultBinary),
            449 => Ok(ObjectId::OpenSecureChannelResponse_Encoding_DefaultBinary),
            452 => Ok(ObjectId::CloseSecureChannelRequest_Encoding_DefaultBinary),
            455 => Ok(ObjectId::CloseSecureChannelResponse_Encoding_DefaultBinary),
            _ => Err(()),
        }
    }
}

/// An identifier for a node in the address space of an OPC UA server. Here it only ever names
/// the data type of an encoded message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct NodeId {
    /// The index of the namespace the identifier belongs to.
    pub namespace: u16,
    /// The numeric identifier within that namespace.
    pub identifier: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};i={}", self.namespace, self.identifier)
        } else {
            write!(f, "i={}", self.identifier)
        }
    }
}

impl From<ObjectId> for NodeId {
    fn from(value: ObjectId) -> Self {
        NodeId::new(0, value as u32)
    }
}

impl SimpleBinaryEncodable for NodeId {
    fn byte_len(&self) -> usize {
        if self.namespace == 0 && self.identifier <= u8::MAX as u32 {
            2
        } else if self.namespace <= u8::MAX as u16 && self.identifier <= u16::MAX as u32 {
            4
        } else {
            7
        }
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        // Two byte, four byte and full numeric forms, whichever is smallest.
        if self.namespace == 0 && self.identifier <= u8::MAX as u32 {
            write_u8(stream, 0x0u8)?;
            write_u8(stream, self.identifier as u8)
        } else if self.namespace <= u8::MAX as u16 && self.identifier <= u16::MAX as u32 {
            write_u8(stream, 0x1u8)?;
            write_u8(stream, self.namespace as u8)?;
            write_u16(stream, self.identifier as u16)
        } else {
            write_u8(stream, 0x2u8)?;
            write_u16(stream, self.namespace)?;
            write_u32(stream, self.identifier)
        }
    }
}

impl SimpleBinaryDecodable for NodeId {
    fn decode<S: Read + ?Sized>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        let encoding = read_u8(stream)?;
        match encoding {
            0x0 => {
                let identifier = read_u8(stream)? as u32;
                Ok(NodeId::new(0, identifier))
            }
            0x1 => {
                let namespace = read_u8(stream)? as u16;
                let identifier = read_u16(stream)? as u32;
                Ok(NodeId::new(namespace, identifier))
            }
            0x2 => {
                let namespace = read_u16(stream)?;
                let identifier = read_u32(stream)?;
                Ok(NodeId::new(namespace, identifier))
            }
            r => Err(Error::decoding(format!(
                "Unsupported node id data encoding {r}"
            ))),
        }
    }
}

impl NodeId {
    /// Create a new numeric node id.
    pub fn new(namespace: u16, identifier: u32) -> NodeId {
        NodeId {
            namespace,
            identifier,
        }
    }

    /// The null node id, `ns=0;i=0`.
    pub fn null() -> NodeId {
        NodeId::default()
    }

    /// Test if the node id is null.
    pub fn is_null(&self) -> bool {
        self.namespace == 0 && self.identifier == 0
    }

    /// Interpret the node id as one of the known message object ids.
    pub fn as_object_id(&self) -> Result<ObjectId, ()> {
        if self.namespace != 0 {
            return Err(());
        }
        ObjectId::try_from(self.identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(id: NodeId, expected_len: usize) {
        let encoded = id.encode_to_vec();
        assert_eq!(encoded.len(), expected_len);
        assert_eq!(id.byte_len(), expected_len);
        let decoded =
            NodeId::decode(&mut Cursor::new(encoded), &DecodingOptions::test()).unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn node_id_forms() {
        round_trip(NodeId::new(0, 255), 2);
        round_trip(NodeId::new(0, 446), 4);
        round_trip(NodeId::new(2, 70000), 7);
    }

    #[test]
    fn node_id_object_id() {
        let id: NodeId = ObjectId::OpenSecureChannelRequest_Encoding_DefaultBinary.into();
        assert_eq!(id.identifier, 446);
        assert_eq!(
            id.as_object_id().unwrap(),
            ObjectId::OpenSecureChannelRequest_Encoding_DefaultBinary
        );
        assert!(NodeId::new(1, 446).as_object_id().is_err());
    }
}
