// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Contains `DiagnosticBits` and `DiagnosticInfo` as they appear in service headers.

use std::io::{Read, Write};

use bitflags::bitflags;

use crate::{
    encoding::{
        read_i32, read_u8, write_i32, write_u8, DecodingOptions, EncodingResult,
        SimpleBinaryDecodable, SimpleBinaryEncodable,
    },
    status_code::StatusCode,
    string::UAString,
};

bitflags! {
    /// Bits requesting the diagnostics a client would like returned with a response.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct DiagnosticBits: u32 {
        /// ServiceLevel / SymbolicId
        const SERVICE_LEVEL_SYMBOLIC_ID = 0x0000_0001;
        /// ServiceLevel / LocalizedText
        const SERVICE_LEVEL_LOCALIZED_TEXT = 0x0000_0002;
        /// ServiceLevel / AdditionalInfo
        const SERVICE_LEVEL_ADDITIONAL_INFO = 0x0000_0004;
        /// ServiceLevel / Inner StatusCode
        const SERVICE_LEVEL_LOCALIZED_INNER_STATUS_CODE = 0x0000_0008;
        /// ServiceLevel / Inner Diagnostics
        const SERVICE_LEVEL_LOCALIZED_INNER_DIAGNOSTICS = 0x0000_0010;
        /// OperationLevel / SymbolicId
        const OPERATIONAL_LEVEL_SYMBOLIC_ID = 0x0000_0020;
        /// OperationLevel / LocalizedText
        const OPERATIONAL_LEVEL_LOCALIZED_TEXT = 0x0000_0040;
        /// OperationLevel / AdditionalInfo
        const OPERATIONAL_LEVEL_ADDITIONAL_INFO = 0x0000_0080;
        /// OperationLevel / Inner StatusCode
        const OPERATIONAL_LEVEL_INNER_STATUS_CODE = 0x0000_0100;
        /// OperationLevel / Inner Diagnostics
        const OPERATIONAL_LEVEL_INNER_DIAGNOSTICS = 0x0000_0200;
    }
}

impl Default for DiagnosticBits {
    fn default() -> Self {
        DiagnosticBits::empty()
    }
}

mod mask {
    pub const HAS_SYMBOLIC_ID: u8 = 0x01;
    pub const HAS_NAMESPACE: u8 = 0x02;
    pub const HAS_LOCALIZED_TEXT: u8 = 0x04;
    pub const HAS_LOCALE: u8 = 0x08;
    pub const HAS_ADDITIONAL_INFO: u8 = 0x10;
    pub const HAS_INNER_STATUS_CODE: u8 = 0x20;
    pub const HAS_INNER_DIAGNOSTIC_INFO: u8 = 0x40;
}

/// Diagnostic information for a service result. The handshake only ever produces the empty
/// form, a single zero mask byte, but other forms decode correctly.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiagnosticInfo {
    /// Index into a string table of a vendor-specific symbolic id.
    pub symbolic_id: Option<i32>,
    /// Index into a string table of the namespace of the symbolic id.
    pub namespace_uri: Option<i32>,
    /// Index into a string table of the locale of the localized text.
    pub locale: Option<i32>,
    /// Index into a string table of a vendor-specific localized text.
    pub localized_text: Option<i32>,
    /// Vendor-specific diagnostic information.
    pub additional_info: Option<UAString>,
    /// Status code from an inner operation.
    pub inner_status_code: Option<StatusCode>,
    /// Diagnostics from an inner operation.
    pub inner_diagnostic_info: Option<Box<DiagnosticInfo>>,
}

impl DiagnosticInfo {
    /// The null diagnostic info, encoding to a single zero byte.
    pub fn null() -> DiagnosticInfo {
        DiagnosticInfo::default()
    }

    fn encoding_mask(&self) -> u8 {
        let mut encoding_mask = 0;
        if self.symbolic_id.is_some() {
            encoding_mask |= mask::HAS_SYMBOLIC_ID;
        }
        if self.namespace_uri.is_some() {
            encoding_mask |= mask::HAS_NAMESPACE;
        }
        if self.localized_text.is_some() {
            encoding_mask |= mask::HAS_LOCALIZED_TEXT;
        }
        if self.locale.is_some() {
            encoding_mask |= mask::HAS_LOCALE;
        }
        if self.additional_info.is_some() {
            encoding_mask |= mask::HAS_ADDITIONAL_INFO;
        }
        if self.inner_status_code.is_some() {
            encoding_mask |= mask::HAS_INNER_STATUS_CODE;
        }
        if self.inner_diagnostic_info.is_some() {
            encoding_mask |= mask::HAS_INNER_DIAGNOSTIC_INFO;
        }
        encoding_mask
    }
}

impl SimpleBinaryEncodable for DiagnosticInfo {
    fn byte_len(&self) -> usize {
        let mut size: usize = 1;
        size += self.symbolic_id.map_or(0, |_| 4);
        size += self.namespace_uri.map_or(0, |_| 4);
        size += self.locale.map_or(0, |_| 4);
        size += self.localized_text.map_or(0, |_| 4);
        size += self
            .additional_info
            .as_ref()
            .map_or(0, SimpleBinaryEncodable::byte_len);
        size += self.inner_status_code.map_or(0, |_| 4);
        size += self
            .inner_diagnostic_info
            .as_ref()
            .map_or(0, |d| d.byte_len());
        size
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_u8(stream, self.encoding_mask())?;
        if let Some(v) = self.symbolic_id {
            write_i32(stream, v)?;
        }
        if let Some(v) = self.namespace_uri {
            write_i32(stream, v)?;
        }
        if let Some(v) = self.locale {
            write_i32(stream, v)?;
        }
        if let Some(v) = self.localized_text {
            write_i32(stream, v)?;
        }
        if let Some(v) = &self.additional_info {
            v.encode(stream)?;
        }
        if let Some(v) = self.inner_status_code {
            v.encode(stream)?;
        }
        if let Some(v) = &self.inner_diagnostic_info {
            v.encode(stream)?;
        }
        Ok(())
    }
}

impl SimpleBinaryDecodable for DiagnosticInfo {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let encoding_mask = read_u8(stream)?;
        let mut diagnostic_info = DiagnosticInfo::null();
        if encoding_mask & mask::HAS_SYMBOLIC_ID != 0 {
            diagnostic_info.symbolic_id = Some(read_i32(stream)?);
        }
        if encoding_mask & mask::HAS_NAMESPACE != 0 {
            diagnostic_info.namespace_uri = Some(read_i32(stream)?);
        }
        if encoding_mask & mask::HAS_LOCALE != 0 {
            diagnostic_info.locale = Some(read_i32(stream)?);
        }
        if encoding_mask & mask::HAS_LOCALIZED_TEXT != 0 {
            diagnostic_info.localized_text = Some(read_i32(stream)?);
        }
        if encoding_mask & mask::HAS_ADDITIONAL_INFO != 0 {
            diagnostic_info.additional_info = Some(UAString::decode(stream, decoding_options)?);
        }
        if encoding_mask & mask::HAS_INNER_STATUS_CODE != 0 {
            diagnostic_info.inner_status_code = Some(StatusCode::decode(stream, decoding_options)?);
        }
        if encoding_mask & mask::HAS_INNER_DIAGNOSTIC_INFO != 0 {
            diagnostic_info.inner_diagnostic_info = Some(Box::new(DiagnosticInfo::decode(
                stream,
                decoding_options,
            )?));
        }
        Ok(diagnostic_info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn diagnostic_info_null() {
        let d = DiagnosticInfo::null();
        assert_eq!(d.byte_len(), 1);
        assert_eq!(d.encode_to_vec(), vec![0u8]);
    }

    #[test]
    fn diagnostic_info_round_trip() {
        let d = DiagnosticInfo {
            symbolic_id: Some(2),
            additional_info: Some(UAString::from("extra")),
            inner_status_code: Some(StatusCode::BadSecurityChecksFailed),
            ..Default::default()
        };
        let encoded = d.encode_to_vec();
        assert_eq!(encoded.len(), d.byte_len());
        let decoded =
            DiagnosticInfo::decode(&mut Cursor::new(encoded), &DecodingOptions::test()).unwrap();
        assert_eq!(decoded, d);
    }
}
