// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Message header for requests.

use std::io::{Read, Write};

use crate::{
    date_time::DateTime,
    diagnostics::DiagnosticBits,
    encoding::{
        read_u32, write_u32, DecodingOptions, EncodingResult, SimpleBinaryDecodable,
        SimpleBinaryEncodable,
    },
    extension_object::ExtensionObject,
    node_id::NodeId,
    string::UAString,
};

/// The `RequestHeader` contains information common to every request from a client to the
/// server. For secure channel services only the request handle matters; the rest of the
/// fields travel across the wire unused.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestHeader {
    /// Session authentication token, always null below the session layer.
    pub authentication_token: NodeId,
    /// The time the client sent the request, for diagnostics and logging only.
    pub timestamp: DateTime,
    /// Client-assigned handle for the request, echoed back in the response.
    pub request_handle: u32,
    /// The vendor diagnostics the client would like returned.
    pub return_diagnostics: DiagnosticBits,
    /// Identifies the client's audit log entry for this request, empty when unused.
    pub audit_entry_id: UAString,
    /// Client-side timeout for the call in milliseconds, 0 for none.
    pub timeout_hint: u32,
    /// Reserved extension point, ignored when not understood.
    pub additional_header: ExtensionObject,
}

impl SimpleBinaryEncodable for RequestHeader {
    fn byte_len(&self) -> usize {
        self.authentication_token.byte_len()
            + self.timestamp.byte_len()
            + 4 // request_handle
            + 4 // return_diagnostics
            + self.audit_entry_id.byte_len()
            + 4 // timeout_hint
            + self.additional_header.byte_len()
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        self.authentication_token.encode(stream)?;
        self.timestamp.encode(stream)?;
        write_u32(stream, self.request_handle)?;
        write_u32(stream, self.return_diagnostics.bits())?;
        self.audit_entry_id.encode(stream)?;
        write_u32(stream, self.timeout_hint)?;
        self.additional_header.encode(stream)
    }
}

impl SimpleBinaryDecodable for RequestHeader {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let authentication_token = NodeId::decode(stream, decoding_options)?;
        let timestamp = DateTime::decode(stream, decoding_options)?;
        let request_handle = read_u32(stream)?;
        // The handle is known from here on; a failure in the remaining fields carries it
        Self::decode_tail(stream, decoding_options, authentication_token, timestamp, request_handle)
            .map_err(|e| e.with_request_handle(request_handle))
    }
}

impl RequestHeader {
    fn decode_tail<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
        authentication_token: NodeId,
        timestamp: DateTime,
        request_handle: u32,
    ) -> EncodingResult<Self> {
        Ok(RequestHeader {
            authentication_token,
            timestamp,
            request_handle,
            return_diagnostics: DiagnosticBits::from_bits_truncate(read_u32(stream)?),
            audit_entry_id: UAString::decode(stream, decoding_options)?,
            timeout_hint: read_u32(stream)?,
            additional_header: ExtensionObject::decode(stream, decoding_options)?,
        })
    }

    /// Create a new request header.
    pub fn new(timestamp: DateTime, request_handle: u32) -> RequestHeader {
        RequestHeader {
            timestamp,
            request_handle,
            ..Default::default()
        }
    }

    /// Create a new dummy request header.
    pub fn dummy() -> RequestHeader {
        RequestHeader::new(DateTime::now(), 1)
    }
}
