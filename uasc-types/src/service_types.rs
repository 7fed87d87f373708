// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! The service types of the secure channel handshake: `OpenSecureChannelRequest` / `Response`,
//! `CloseSecureChannelRequest` / `Response` and their component enumerations.

use std::{
    fmt,
    io::{Read, Write},
};

use crate::{
    byte_string::ByteString,
    date_time::DateTime,
    encoding::{
        read_i32, read_u32, write_i32, write_u32, DecodingOptions, EncodingResult, Error,
        SimpleBinaryDecodable, SimpleBinaryEncodable,
    },
    request_header::RequestHeader,
    response_header::ResponseHeader,
};

/// Whether an `OpenSecureChannel` request issues a new channel or renews an existing one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SecurityTokenRequestType {
    /// Creates a new security token for a new secure channel.
    Issue = 0,
    /// Creates a new security token for an existing secure channel.
    Renew = 1,
}

impl SimpleBinaryEncodable for SecurityTokenRequestType {
    fn byte_len(&self) -> usize {
        4
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_i32(stream, *self as i32)
    }
}

impl SimpleBinaryDecodable for SecurityTokenRequestType {
    fn decode<S: Read + ?Sized>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        match read_i32(stream)? {
            0 => Ok(SecurityTokenRequestType::Issue),
            1 => Ok(SecurityTokenRequestType::Renew),
            r => Err(Error::decoding(format!(
                "Invalid security token request type {r}"
            ))),
        }
    }
}

/// The level of protection applied to symmetric messages on an established channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MessageSecurityMode {
    /// An invalid or unknown mode.
    Invalid = 0,
    /// No security applied.
    None = 1,
    /// All messages are signed.
    Sign = 2,
    /// All messages are signed and encrypted.
    SignAndEncrypt = 3,
}

impl fmt::Display for MessageSecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageSecurityMode::Invalid => "Invalid",
            MessageSecurityMode::None => "None",
            MessageSecurityMode::Sign => "Sign",
            MessageSecurityMode::SignAndEncrypt => "SignAndEncrypt",
        };
        write!(f, "{}", name)
    }
}

impl From<i32> for MessageSecurityMode {
    fn from(value: i32) -> Self {
        match value {
            1 => MessageSecurityMode::None,
            2 => MessageSecurityMode::Sign,
            3 => MessageSecurityMode::SignAndEncrypt,
            _ => MessageSecurityMode::Invalid,
        }
    }
}

impl SimpleBinaryEncodable for MessageSecurityMode {
    fn byte_len(&self) -> usize {
        4
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_i32(stream, *self as i32)
    }
}

impl SimpleBinaryDecodable for MessageSecurityMode {
    fn decode<S: Read + ?Sized>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        // Out-of-range values map to Invalid rather than failing the decode; the
        // server rejects them with a proper status code later.
        Ok(MessageSecurityMode::from(read_i32(stream)?))
    }
}

/// A security token names one key epoch of a secure channel. The pair
/// `(channel_id, token_id)` is unique for the lifetime of the server.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct ChannelSecurityToken {
    /// Id of the secure channel this token belongs to.
    pub channel_id: u32,
    /// Id of this token, unique per server process.
    pub token_id: u32,
    /// When the token was created.
    pub created_at: DateTime,
    /// The lifetime granted by the server, in milliseconds.
    pub revised_lifetime: u32,
}

impl SimpleBinaryEncodable for ChannelSecurityToken {
    fn byte_len(&self) -> usize {
        4 + 4 + self.created_at.byte_len() + 4
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_u32(stream, self.channel_id)?;
        write_u32(stream, self.token_id)?;
        self.created_at.encode(stream)?;
        write_u32(stream, self.revised_lifetime)
    }
}

impl SimpleBinaryDecodable for ChannelSecurityToken {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let channel_id = read_u32(stream)?;
        let token_id = read_u32(stream)?;
        let created_at = DateTime::decode(stream, decoding_options)?;
        let revised_lifetime = read_u32(stream)?;
        Ok(ChannelSecurityToken {
            channel_id,
            token_id,
            created_at,
            revised_lifetime,
        })
    }
}

/// Asks the server to open a new secure channel or renew the keys of an existing one.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenSecureChannelRequest {
    /// Common request header.
    pub request_header: RequestHeader,
    /// The UA-TCP protocol version the client implements.
    pub client_protocol_version: u32,
    /// Issue or renew.
    pub request_type: SecurityTokenRequestType,
    /// The security mode requested for the channel.
    pub security_mode: MessageSecurityMode,
    /// The client's contribution to key derivation. Length is fixed by the security policy.
    pub client_nonce: ByteString,
    /// The token lifetime the client would like, in milliseconds.
    pub requested_lifetime: u32,
}

impl SimpleBinaryEncodable for OpenSecureChannelRequest {
    fn byte_len(&self) -> usize {
        let mut size: usize = 0;
        size += self.request_header.byte_len();
        size += 4; // client_protocol_version
        size += self.request_type.byte_len();
        size += self.security_mode.byte_len();
        size += self.client_nonce.byte_len();
        size += 4; // requested_lifetime
        size
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        self.request_header.encode(stream)?;
        write_u32(stream, self.client_protocol_version)?;
        self.request_type.encode(stream)?;
        self.security_mode.encode(stream)?;
        self.client_nonce.encode(stream)?;
        write_u32(stream, self.requested_lifetime)
    }
}

impl SimpleBinaryDecodable for OpenSecureChannelRequest {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let request_header = RequestHeader::decode(stream, decoding_options)?;
        let request_handle = request_header.request_handle;
        (|| {
            let client_protocol_version = read_u32(stream)?;
            let request_type = SecurityTokenRequestType::decode(stream, decoding_options)?;
            let security_mode = MessageSecurityMode::decode(stream, decoding_options)?;
            let client_nonce = ByteString::decode(stream, decoding_options)?;
            let requested_lifetime = read_u32(stream)?;
            Ok(OpenSecureChannelRequest {
                request_header,
                client_protocol_version,
                request_type,
                security_mode,
                client_nonce,
                requested_lifetime,
            })
        })()
        .map_err(|e: Error| e.with_request_handle(request_handle))
    }
}

/// The server's reply to a successful `OpenSecureChannelRequest`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenSecureChannelResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
    /// The UA-TCP protocol version the server implements.
    pub server_protocol_version: u32,
    /// The token minted for the new key epoch.
    pub security_token: ChannelSecurityToken,
    /// The server's contribution to key derivation.
    pub server_nonce: ByteString,
}

impl SimpleBinaryEncodable for OpenSecureChannelResponse {
    fn byte_len(&self) -> usize {
        let mut size: usize = 0;
        size += self.response_header.byte_len();
        size += 4; // server_protocol_version
        size += self.security_token.byte_len();
        size += self.server_nonce.byte_len();
        size
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        self.response_header.encode(stream)?;
        write_u32(stream, self.server_protocol_version)?;
        self.security_token.encode(stream)?;
        self.server_nonce.encode(stream)
    }
}

impl SimpleBinaryDecodable for OpenSecureChannelResponse {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let response_header = ResponseHeader::decode(stream, decoding_options)?;
        let server_protocol_version = read_u32(stream)?;
        let security_token = ChannelSecurityToken::decode(stream, decoding_options)?;
        let server_nonce = ByteString::decode(stream, decoding_options)?;
        Ok(OpenSecureChannelResponse {
            response_header,
            server_protocol_version,
            security_token,
            server_nonce,
        })
    }
}

/// Asks the server to terminate a secure channel. The server never replies on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseSecureChannelRequest {
    /// Common request header.
    pub request_header: RequestHeader,
}

impl SimpleBinaryEncodable for CloseSecureChannelRequest {
    fn byte_len(&self) -> usize {
        self.request_header.byte_len()
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        self.request_header.encode(stream)
    }
}

impl SimpleBinaryDecodable for CloseSecureChannelRequest {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let request_header = RequestHeader::decode(stream, decoding_options)?;
        Ok(CloseSecureChannelRequest { request_header })
    }
}

/// The reply to a `CloseSecureChannelRequest`. Defined for completeness; the protocol closes
/// the connection without sending it.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseSecureChannelResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
}

impl SimpleBinaryEncodable for CloseSecureChannelResponse {
    fn byte_len(&self) -> usize {
        self.response_header.byte_len()
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        self.response_header.encode(stream)
    }
}

impl SimpleBinaryDecodable for CloseSecureChannelResponse {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let response_header = ResponseHeader::decode(stream, decoding_options)?;
        Ok(CloseSecureChannelResponse { response_header })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn open_secure_channel_request_round_trip() {
        let request = OpenSecureChannelRequest {
            request_header: RequestHeader::new(DateTime::now(), 99),
            client_protocol_version: 0,
            request_type: SecurityTokenRequestType::Issue,
            security_mode: MessageSecurityMode::SignAndEncrypt,
            client_nonce: ByteString::from(vec![1u8; 32]),
            requested_lifetime: 300_000,
        };
        let encoded = request.encode_to_vec();
        assert_eq!(encoded.len(), request.byte_len());
        let decoded = OpenSecureChannelRequest::decode(
            &mut Cursor::new(encoded),
            &DecodingOptions::test(),
        )
        .unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn open_secure_channel_response_round_trip() {
        let response = OpenSecureChannelResponse {
            response_header: ResponseHeader::new_good(99),
            server_protocol_version: 0,
            security_token: ChannelSecurityToken {
                channel_id: 4,
                token_id: 1,
                created_at: DateTime::now(),
                revised_lifetime: 300_000,
            },
            server_nonce: ByteString::from(vec![2u8; 32]),
        };
        let encoded = response.encode_to_vec();
        assert_eq!(encoded.len(), response.byte_len());
        let decoded = OpenSecureChannelResponse::decode(
            &mut Cursor::new(encoded),
            &DecodingOptions::test(),
        )
        .unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn security_mode_decode_invalid() {
        let mut stream = Cursor::new(17i32.encode_to_vec());
        let mode = MessageSecurityMode::decode(&mut stream, &DecodingOptions::test()).unwrap();
        assert_eq!(mode, MessageSecurityMode::Invalid);
    }

    #[test]
    fn request_type_decode_invalid() {
        let mut stream = Cursor::new(2i32.encode_to_vec());
        assert!(SecurityTokenRequestType::decode(&mut stream, &DecodingOptions::test()).is_err());
    }
}
