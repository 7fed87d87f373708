// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

#![warn(missing_docs)]

//! Wire primitives for the UA Secure Conversation stack: the OPC UA binary encoding traits,
//! the built-in types the secure channel handshake needs, its service types, and typed status
//! codes. Everything here is plain data; framing and cryptography live in the core and crypto
//! crates.

pub mod byte_string;
pub mod constants;
pub mod date_time;
pub mod diagnostics;
pub mod encoding;
pub mod extension_object;
pub mod node_id;
pub mod request_header;
pub mod response_header;
pub mod service_types;
pub mod status_code;
pub mod string;

pub use byte_string::ByteString;
pub use date_time::DateTime;
pub use diagnostics::{DiagnosticBits, DiagnosticInfo};
pub use encoding::{
    read_i32, read_i64, read_u16, read_u32, read_u8, write_i32, write_i64, write_u16, write_u32,
    write_u8, DecodingOptions, EncodingResult, Error, SimpleBinaryDecodable,
    SimpleBinaryEncodable,
};
pub use extension_object::ExtensionObject;
pub use node_id::{NodeId, ObjectId};
pub use request_header::RequestHeader;
pub use response_header::ResponseHeader;
pub use service_types::{
    ChannelSecurityToken, CloseSecureChannelRequest, CloseSecureChannelResponse,
    MessageSecurityMode, OpenSecureChannelRequest, OpenSecureChannelResponse,
    SecurityTokenRequestType,
};
pub use status_code::StatusCode;
pub use string::UAString;
