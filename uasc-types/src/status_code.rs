// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Typed OPC UA status codes. Only the subset relevant to transport and secure channel
//! establishment is represented by name; any other numeric code decodes to its raw value.

use std::{
    fmt,
    io::{Read, Write},
};

use crate::encoding::{
    read_u32, write_u32, DecodingOptions, EncodingResult, SimpleBinaryDecodable,
    SimpleBinaryEncodable,
};

macro_rules! status_codes {
    ($($name:ident = $value:literal, $doc:literal;)*) => {
        /// A 32-bit OPC UA status code. The top byte carries severity, `Good` is zero.
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        pub enum StatusCode {
            $(
                #[doc = $doc]
                $name,
            )*
            /// A code this stack has no name for, kept verbatim.
            Unrecognized(u32),
        }

        impl StatusCode {
            /// The raw numeric value of the code.
            pub fn bits(&self) -> u32 {
                match self {
                    $( StatusCode::$name => $value, )*
                    StatusCode::Unrecognized(v) => *v,
                }
            }

            /// Look up a status code from its numeric value.
            pub fn from_bits(value: u32) -> StatusCode {
                match value {
                    $( $value => StatusCode::$name, )*
                    v => StatusCode::Unrecognized(v),
                }
            }

            /// The symbolic name, as it appears in the OPC UA status code table.
            pub fn name(&self) -> &'static str {
                match self {
                    $( StatusCode::$name => stringify!($name), )*
                    StatusCode::Unrecognized(_) => "Unrecognized",
                }
            }
        }
    };
}

status_codes! {
    Good = 0x0000_0000, "The operation succeeded.";
    BadUnexpectedError = 0x8001_0000, "An unexpected error occurred.";
    BadInternalError = 0x8002_0000, "An internal error occurred as a result of a programming or configuration error.";
    BadCommunicationError = 0x8005_0000, "A low level communication error occurred.";
    BadEncodingError = 0x8006_0000, "Encoding halted because of invalid data in the objects being serialized.";
    BadDecodingError = 0x8007_0000, "Decoding halted because of invalid data in the stream.";
    BadEncodingLimitsExceeded = 0x8008_0000, "The message encoding/decoding limits imposed by the stack have been exceeded.";
    BadTimeout = 0x800A_0000, "The operation timed out.";
    BadServerHalted = 0x800E_0000, "The server has stopped and cannot process any requests.";
    BadCertificateInvalid = 0x8012_0000, "The certificate provided as a parameter is not valid.";
    BadSecurityChecksFailed = 0x8013_0000, "An error occurred verifying security.";
    BadSecureChannelIdInvalid = 0x8022_0000, "The specified secure channel is no longer valid.";
    BadNonceInvalid = 0x8024_0000, "The nonce does appear to be not a random value or it is not the correct length.";
    BadSecurityModeRejected = 0x8054_0000, "The security mode does not meet the requirements set by the server.";
    BadSecurityPolicyRejected = 0x8055_0000, "The security policy does not meet the requirements set by the server.";
    BadNoValidCertificates = 0x8059_0000, "The operation could not be completed because no valid certificates were found.";
    BadTcpServerTooBusy = 0x807D_0000, "The server cannot process the request because it is too busy.";
    BadTcpMessageTypeInvalid = 0x807E_0000, "The type of the message specified in the header is invalid.";
    BadTcpSecureChannelUnknown = 0x807F_0000, "The SecureChannelId and/or TokenId are not currently in use.";
    BadTcpMessageTooLarge = 0x8080_0000, "The size of the message chunk specified in the header is too large.";
    BadTcpNotEnoughResources = 0x8081_0000, "There are not enough resources to process the request.";
    BadTcpInternalError = 0x8082_0000, "An internal error occurred.";
    BadTcpEndpointUrlInvalid = 0x8083_0000, "The server does not recognize the QueryString specified.";
    BadSecureChannelClosed = 0x8086_0000, "The secure channel has been closed.";
    BadSecureChannelTokenUnknown = 0x8087_0000, "The token has expired or is not recognized.";
    BadSequenceNumberInvalid = 0x8088_0000, "The sequence number is not valid.";
    BadProtocolVersionUnsupported = 0x8089_0000, "The applications do not have compatible protocol versions.";
    BadConnectionClosed = 0x80AE_0000, "The network connection has been closed.";
    BadInvalidState = 0x80AF_0000, "The operation cannot be completed because the object is closed, uninitialized or in some other invalid state.";
    BadRequestTooLarge = 0x80B8_0000, "The request message size exceeds limits set by the server.";
    BadResponseTooLarge = 0x80B9_0000, "The response message size exceeds limits set by the client.";
}

impl StatusCode {
    /// `true` if the severity bits indicate success.
    pub fn is_good(&self) -> bool {
        self.bits() & 0xC000_0000 == 0
    }

    /// `true` if the severity bits indicate failure.
    pub fn is_bad(&self) -> bool {
        self.bits() & 0x8000_0000 != 0
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        StatusCode::Good
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::Unrecognized(v) => write!(f, "StatusCode({:#010X})", v),
            other => write!(f, "{}", other.name()),
        }
    }
}

impl From<StatusCode> for std::io::Error {
    fn from(value: StatusCode) -> Self {
        std::io::Error::new(std::io::ErrorKind::Other, value.to_string())
    }
}

impl SimpleBinaryEncodable for StatusCode {
    fn byte_len(&self) -> usize {
        4
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_u32(stream, self.bits())
    }
}

impl SimpleBinaryDecodable for StatusCode {
    fn decode<S: Read + ?Sized>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        Ok(StatusCode::from_bits(read_u32(stream)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_bits_round_trip() {
        for code in [
            StatusCode::Good,
            StatusCode::BadSecurityChecksFailed,
            StatusCode::BadTcpMessageTypeInvalid,
            StatusCode::BadTcpMessageTooLarge,
            StatusCode::BadTcpSecureChannelUnknown,
        ] {
            assert_eq!(code, StatusCode::from_bits(code.bits()));
        }
        assert_eq!(
            StatusCode::Unrecognized(0x8111_0000),
            StatusCode::from_bits(0x8111_0000)
        );
    }

    #[test]
    fn status_code_severity() {
        assert!(StatusCode::Good.is_good());
        assert!(!StatusCode::Good.is_bad());
        assert!(StatusCode::BadSecurityChecksFailed.is_bad());
        assert!(!StatusCode::BadSecurityChecksFailed.is_good());
    }
}
