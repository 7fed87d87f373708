// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! The security headers carried by message chunks, and the sequence header that follows
//! them.
//!
//! `OpenSecureChannel` chunks carry the asymmetric form, naming the policy and the
//! certificates securing the handshake; it is the identity of the handshake in progress
//! and must repeat byte for byte on every chunk of one message. Established traffic
//! carries the symmetric form, a single token id naming the key epoch.

use std::io::{Read, Write};

use uasc_types::{
    constants, read_u32, status_code::StatusCode, write_u32, ByteString, DecodingOptions,
    EncodingResult, Error, SimpleBinaryDecodable, SimpleBinaryEncodable, UAString,
};

use uasc_crypto::{SecurityPolicy, Thumbprint, X509};

/// The security header of a chunk, in whichever of its two forms the message type
/// dictates.
#[derive(Debug, Clone, PartialEq)]
pub enum SecurityHeader {
    /// The handshake form, securing `OpenSecureChannel` messages.
    Asymmetric(AsymmetricSecurityHeader),
    /// The established-traffic form, securing everything else.
    Symmetric(SymmetricSecurityHeader),
}

impl SimpleBinaryEncodable for SecurityHeader {
    fn byte_len(&self) -> usize {
        match self {
            SecurityHeader::Asymmetric(h) => h.byte_len(),
            SecurityHeader::Symmetric(h) => h.byte_len(),
        }
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        match self {
            SecurityHeader::Asymmetric(h) => h.encode(stream),
            SecurityHeader::Symmetric(h) => h.encode(stream),
        }
    }
}

impl SecurityHeader {
    /// Decode whichever header form the message type dictates. The form is not encoded
    /// in the header itself, so this type has no `SimpleBinaryDecodable` impl.
    pub fn decode_from_stream<S: Read + ?Sized>(
        stream: &mut S,
        is_open_secure_channel: bool,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        if is_open_secure_channel {
            let header = AsymmetricSecurityHeader::decode(stream, decoding_options)?;
            // Reject unknown policies right where the URI enters the stack
            header.resolved_policy()?;
            Ok(SecurityHeader::Asymmetric(header))
        } else {
            SymmetricSecurityHeader::decode(stream, decoding_options).map(SecurityHeader::Symmetric)
        }
    }
}

/// Names the key epoch securing a symmetric chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct SymmetricSecurityHeader {
    /// Security token ID.
    pub token_id: u32,
}

impl SimpleBinaryEncodable for SymmetricSecurityHeader {
    fn byte_len(&self) -> usize {
        4
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_u32(stream, self.token_id)
    }
}

impl SimpleBinaryDecodable for SymmetricSecurityHeader {
    fn decode<S: Read + ?Sized>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        Ok(SymmetricSecurityHeader {
            token_id: read_u32(stream)?,
        })
    }
}

/// The asymmetric security header: the policy URI, the sender's certificate, and the
/// thumbprint of the receiver certificate the sender encrypted against.
#[derive(Debug, Clone, PartialEq)]
pub struct AsymmetricSecurityHeader {
    /// URI of the security policy in force for the handshake.
    pub security_policy_uri: UAString,
    /// DER certificate of the sender, null under the `None` policy.
    pub sender_certificate: ByteString,
    /// SHA-1 thumbprint of the receiver certificate, null under the `None` policy.
    pub receiver_certificate_thumbprint: ByteString,
}

impl SimpleBinaryEncodable for AsymmetricSecurityHeader {
    fn byte_len(&self) -> usize {
        self.security_policy_uri.byte_len()
            + self.sender_certificate.byte_len()
            + self.receiver_certificate_thumbprint.byte_len()
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        self.security_policy_uri.encode(stream)?;
        self.sender_certificate.encode(stream)?;
        self.receiver_certificate_thumbprint.encode(stream)
    }
}

impl SimpleBinaryDecodable for AsymmetricSecurityHeader {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let security_policy_uri = UAString::decode(stream, decoding_options)?;

        // Each field is validated as it comes off the wire
        let sender_certificate = ByteString::decode(stream, decoding_options)?;
        let certificate_len = sender_certificate.as_ref().len();
        if certificate_len >= constants::MAX_CERTIFICATE_LENGTH {
            return Err(Error::new(
                StatusCode::BadEncodingLimitsExceeded,
                format!(
                    "Sender certificate of {} bytes exceeds the {} byte certificate limit",
                    certificate_len,
                    constants::MAX_CERTIFICATE_LENGTH
                ),
            ));
        }

        let receiver_certificate_thumbprint = ByteString::decode(stream, decoding_options)?;
        let thumbprint_len = receiver_certificate_thumbprint.as_ref().len();
        if !receiver_certificate_thumbprint.is_null_or_empty()
            && thumbprint_len != Thumbprint::THUMBPRINT_SIZE
        {
            return Err(Error::decoding(format!(
                "Receiver certificate thumbprint must be {} bytes, got {}",
                Thumbprint::THUMBPRINT_SIZE,
                thumbprint_len,
            )));
        }

        Ok(AsymmetricSecurityHeader {
            security_policy_uri,
            sender_certificate,
            receiver_certificate_thumbprint,
        })
    }
}

impl AsymmetricSecurityHeader {
    /// The header used under the `None` policy: the policy URI with no certificates.
    pub fn none() -> AsymmetricSecurityHeader {
        AsymmetricSecurityHeader {
            security_policy_uri: UAString::from(SecurityPolicy::None.to_uri()),
            sender_certificate: ByteString::null(),
            receiver_certificate_thumbprint: ByteString::null(),
        }
    }

    /// A header announcing `security_policy`, signed by the holder of
    /// `sender_certificate` and encrypted against the certificate the thumbprint names.
    pub fn new(
        security_policy: SecurityPolicy,
        sender_certificate: &X509,
        receiver_certificate_thumbprint: ByteString,
    ) -> AsymmetricSecurityHeader {
        AsymmetricSecurityHeader {
            security_policy_uri: UAString::from(security_policy.to_uri()),
            sender_certificate: sender_certificate.as_byte_string(),
            receiver_certificate_thumbprint,
        }
    }

    /// The security policy the URI names. A null URI means no security; an URI this
    /// stack has no implementation for is an error.
    pub fn resolved_policy(&self) -> Result<SecurityPolicy, Error> {
        if self.security_policy_uri.is_null() {
            return Ok(SecurityPolicy::None);
        }
        let policy = SecurityPolicy::from_uri(self.security_policy_uri.as_ref());
        if policy == SecurityPolicy::Unknown {
            return Err(Error::new(
                StatusCode::BadSecurityPolicyRejected,
                format!(
                    "Security policy \"{}\" is not supported",
                    self.security_policy_uri
                ),
            ));
        }
        Ok(policy)
    }
}

/// The sequence header that follows the security header: the chunk's position in the
/// stream and the request it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceHeader {
    /// Sequence number of the chunk.
    pub sequence_number: u32,
    /// ID of the request this chunk is part of.
    pub request_id: u32,
}

impl SimpleBinaryEncodable for SequenceHeader {
    fn byte_len(&self) -> usize {
        8
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_u32(stream, self.sequence_number)?;
        write_u32(stream, self.request_id)
    }
}

impl SimpleBinaryDecodable for SequenceHeader {
    fn decode<S: Read + ?Sized>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        Ok(SequenceHeader {
            sequence_number: read_u32(stream)?,
            request_id: read_u32(stream)?,
        })
    }
}
