// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Message header for responses.

use std::io::{Read, Write};

use crate::{
    date_time::DateTime,
    diagnostics::DiagnosticInfo,
    encoding::{
        read_i32, read_u32, write_i32, write_u32, DecodingOptions, EncodingResult, Error,
        SimpleBinaryDecodable, SimpleBinaryEncodable,
    },
    extension_object::ExtensionObject,
    status_code::StatusCode,
    string::UAString,
};

/// The `ResponseHeader` contains information common to every response from server to
/// client: the echoed request handle, a timestamp, and the overall service result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseHeader {
    /// When the response was produced.
    pub timestamp: DateTime,
    /// Handle of the request this message is responding to.
    pub request_handle: u32,
    /// Status of the service call as a whole.
    pub service_result: StatusCode,
    /// Requested diagnostics, empty unless the client asked for them.
    pub service_diagnostics: DiagnosticInfo,
    /// String table referenced by the diagnostics.
    pub string_table: Option<Vec<UAString>>,
    /// Reserved extension point, ignored when not understood.
    pub additional_header: ExtensionObject,
}

impl SimpleBinaryEncodable for ResponseHeader {
    fn byte_len(&self) -> usize {
        let table_len: usize = self
            .string_table
            .iter()
            .flatten()
            .map(SimpleBinaryEncodable::byte_len)
            .sum();
        self.timestamp.byte_len()
            + 4 // request_handle
            + self.service_result.byte_len()
            + self.service_diagnostics.byte_len()
            + 4 // string table length prefix
            + table_len
            + self.additional_header.byte_len()
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        self.timestamp.encode(stream)?;
        write_u32(stream, self.request_handle)?;
        self.service_result.encode(stream)?;
        self.service_diagnostics.encode(stream)?;
        match &self.string_table {
            None => write_i32(stream, -1)?,
            Some(table) => {
                write_i32(stream, table.len() as i32)?;
                for value in table {
                    value.encode(stream)?;
                }
            }
        }
        self.additional_header.encode(stream)
    }
}

impl SimpleBinaryDecodable for ResponseHeader {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let timestamp = DateTime::decode(stream, decoding_options)?;
        let request_handle = read_u32(stream)?;
        // The handle is known from here on; a failure in the remaining fields carries it
        Self::decode_tail(stream, decoding_options, timestamp, request_handle)
            .map_err(|e| e.with_request_handle(request_handle))
    }
}

impl ResponseHeader {
    fn decode_tail<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
        timestamp: DateTime,
        request_handle: u32,
    ) -> EncodingResult<Self> {
        let service_result = StatusCode::decode(stream, decoding_options)?;
        let service_diagnostics = DiagnosticInfo::decode(stream, decoding_options)?;
        let string_table = Self::decode_string_table(stream, decoding_options)?;
        let additional_header = ExtensionObject::decode(stream, decoding_options)?;
        Ok(ResponseHeader {
            timestamp,
            request_handle,
            service_result,
            service_diagnostics,
            string_table,
            additional_header,
        })
    }

    fn decode_string_table<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Option<Vec<UAString>>> {
        let length = read_i32(stream)?;
        match length {
            -1 => Ok(None),
            len if len < -1 => Err(Error::decoding("String table length is negative")),
            len if len as usize > decoding_options.max_array_length => {
                Err(Error::decoding(format!(
                    "String table of {} entries exceeds the limit of {}",
                    len, decoding_options.max_array_length
                )))
            }
            len => (0..len)
                .map(|_| UAString::decode(stream, decoding_options))
                .collect::<EncodingResult<Vec<_>>>()
                .map(Some),
        }
    }

    /// Create a new response header with status `Good`.
    pub fn new_good(request_handle: u32) -> ResponseHeader {
        ResponseHeader::new_service_result(request_handle, StatusCode::Good)
    }

    /// Create a new response header with given status, timestamped now.
    pub fn new_service_result(request_handle: u32, service_result: StatusCode) -> ResponseHeader {
        ResponseHeader {
            timestamp: DateTime::now(),
            request_handle,
            service_result,
            ..Default::default()
        }
    }
}
