// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! The secure channel: negotiated policy and mode, certificates, nonces, and the live key
//! epochs, together with the application and removal of message security on chunks.
//!
//! Chunk security follows the layout fixed by the protocol. Everything from the sequence
//! header to the end of the chunk is the secured region; it is padded to the cipher block
//! size, signed from the start of the chunk, and then encrypted:
//!
//! ```text
//! | chunk header | security header | sequence header | body | padding | signature |
//! |<-------------- signed ------------------------------------------>|
//!                                  |<-------------- encrypted ------------------->|
//! ```

use std::{io::Cursor, sync::Arc};

use log::{error, trace};

use uasc_crypto::{random, CertificateStore, KeySize, PrivateKey, SecurityPolicy, X509};
use uasc_types::{
    status_code::StatusCode, ByteString, ChannelSecurityToken, DecodingOptions, Error,
    MessageSecurityMode, SimpleBinaryDecodable,
};

use super::{
    message_chunk::{MessageChunk, MessageChunkHeader, MessageChunkType, MESSAGE_SIZE_OFFSET},
    security_header::{AsymmetricSecurityHeader, SecurityHeader, SymmetricSecurityHeader},
};

#[derive(Debug, PartialEq)]
/// Role of an application in OPC UA communication.
pub enum Role {
    /// Role is unknown.
    Unknown,
    /// Role is client.
    Client,
    /// Role is server.
    Server,
}

/// The symmetric secrets protecting one direction of traffic: signing key, encryption key
/// and initialization vector, in the lengths fixed by the security policy.
#[derive(Debug, Clone)]
pub struct SecuritySecrets {
    /// Key for the symmetric signature.
    pub signing_key: Vec<u8>,
    /// Key for the symmetric cipher.
    pub encryption_key: uasc_crypto::AesKey,
    /// Initialization vector of the symmetric cipher.
    pub initialization_vector: Vec<u8>,
}

impl From<(Vec<u8>, uasc_crypto::AesKey, Vec<u8>)> for SecuritySecrets {
    fn from(value: (Vec<u8>, uasc_crypto::AesKey, Vec<u8>)) -> Self {
        SecuritySecrets {
            signing_key: value.0,
            encryption_key: value.1,
            initialization_vector: value.2,
        }
    }
}

#[derive(Debug, Clone)]
struct EpochKeys {
    /// Secures messages this side sends.
    local: SecuritySecrets,
    /// Verifies and decrypts messages the peer sends.
    remote: SecuritySecrets,
}

/// One key epoch of a channel: a security token and the keys derived for it. Policy `None`
/// epochs track the token without any key material.
#[derive(Debug, Clone)]
pub struct KeyEpoch {
    /// The token identifying this epoch.
    pub token: ChannelSecurityToken,
    keys: Option<EpochKeys>,
}

impl KeyEpoch {
    /// The secrets securing messages this side sends, if the policy derives any.
    pub fn local_secrets(&self) -> Option<&SecuritySecrets> {
        self.keys.as_ref().map(|k| &k.local)
    }

    /// The secrets securing messages the peer sends, if the policy derives any.
    pub fn remote_secrets(&self) -> Option<&SecuritySecrets> {
        self.keys.as_ref().map(|k| &k.remote)
    }
}

/// The key epochs of a secure channel. `previous` is only populated in the overlap window
/// after a renewal, while in-flight messages may still arrive under the superseded token,
/// and is discarded once the first symmetric message under the new token is seen.
#[derive(Debug, Clone)]
pub struct ChannelSecurity {
    current: KeyEpoch,
    previous: Option<KeyEpoch>,
}

impl ChannelSecurity {
    fn new(current: KeyEpoch) -> ChannelSecurity {
        ChannelSecurity {
            current,
            previous: None,
        }
    }

    fn renew(&mut self, epoch: KeyEpoch) {
        // The superseded epoch moves into the overlap slot. A second renewal before the
        // last token was ever used replaces it; previous always trails current.
        self.previous = Some(std::mem::replace(&mut self.current, epoch));
    }

    /// Drop the previous epoch once a symmetric message arrives under the current token.
    pub fn activate(&mut self, token_id: u32) {
        if token_id == self.current.token.token_id {
            self.previous = None;
        }
    }

    /// The epoch a symmetric security header refers to, if it is still valid.
    pub fn epoch_for_token(&self, token_id: u32) -> Option<&KeyEpoch> {
        if token_id == self.current.token.token_id {
            Some(&self.current)
        } else {
            self.previous
                .as_ref()
                .filter(|e| e.token.token_id == token_id)
        }
    }

    /// The current epoch.
    pub fn current(&self) -> &KeyEpoch {
        &self.current
    }

    /// The previous epoch, present only during a renewal overlap.
    pub fn previous(&self) -> Option<&KeyEpoch> {
        self.previous.as_ref()
    }
}

/// Cipher block size and padding-field width governing one chunk's padding.
pub(crate) struct PaddingParams {
    /// The block size the secured region must be a multiple of.
    pub plain_block_size: usize,
    /// Bytes taken by the padding size field itself, 1 or 2.
    pub minimum_padding: usize,
}

/// Holds all of the security information related to a connection: negotiated policy and
/// mode, certificates, nonces and the live key epochs.
#[derive(Debug)]
pub struct SecureChannel {
    /// The side of the secure channel that this role belongs to, client or server
    role: Role,
    /// The security policy for the connection, None or Encryption/Signing settings
    security_policy: SecurityPolicy,
    /// The security mode for the connection, None, Sign, SignAndEncrypt
    security_mode: MessageSecurityMode,
    /// Secure channel id
    secure_channel_id: u32,
    /// Store of the key pairs this application may present, looked up by thumbprint
    certificate_store: Option<Arc<CertificateStore>>,
    /// Our certificate, resolved from the store
    cert: Option<X509>,
    /// Our private key, resolved from the store
    private_key: Option<PrivateKey>,
    /// Their certificate
    remote_cert: Option<X509>,
    /// Their nonce provided by open secure channel
    remote_nonce: Vec<u8>,
    /// Our nonce generated while handling open secure channel
    local_nonce: Vec<u8>,
    /// The live key epochs, populated on issue
    security: Option<ChannelSecurity>,
    /// Id of the transport the channel is bound to
    transport_id: Option<u64>,
    /// Decoding options
    decoding_options: DecodingOptions,
}

impl SecureChannel {
    /// Create a new secure channel with the given certificate store and role.
    pub fn new(
        role: Role,
        certificate_store: Arc<CertificateStore>,
        decoding_options: DecodingOptions,
    ) -> SecureChannel {
        let cert = Some(certificate_store.own_cert().clone());
        let private_key = Some(certificate_store.own_private_key().clone());
        SecureChannel {
            role,
            security_policy: SecurityPolicy::None,
            security_mode: MessageSecurityMode::None,
            secure_channel_id: 0,
            certificate_store: Some(certificate_store),
            cert,
            private_key,
            remote_cert: None,
            remote_nonce: Vec::new(),
            local_nonce: Vec::new(),
            security: None,
            transport_id: None,
            decoding_options,
        }
    }

    /// For testing purposes only
    #[cfg(test)]
    pub fn new_no_certificate_store() -> SecureChannel {
        SecureChannel {
            role: Role::Unknown,
            security_policy: SecurityPolicy::None,
            security_mode: MessageSecurityMode::None,
            secure_channel_id: 0,
            certificate_store: None,
            cert: None,
            private_key: None,
            remote_cert: None,
            remote_nonce: Vec::new(),
            local_nonce: Vec::new(),
            security: None,
            transport_id: None,
            decoding_options: DecodingOptions::test(),
        }
    }

    /// Return `true` if this channel is for a client.
    pub fn is_client_role(&self) -> bool {
        self.role == Role::Client
    }

    /// Set the remote certificate.
    pub fn set_remote_cert(&mut self, remote_cert: Option<X509>) {
        self.remote_cert = remote_cert;
    }

    /// Get the remote certificate.
    pub fn remote_cert(&self) -> Option<X509> {
        self.remote_cert.clone()
    }

    /// Get the application security mode.
    pub fn security_mode(&self) -> MessageSecurityMode {
        self.security_mode
    }

    /// Set the application security mode.
    pub fn set_security_mode(&mut self, security_mode: MessageSecurityMode) {
        self.security_mode = security_mode;
    }

    /// Get the application security policy.
    pub fn security_policy(&self) -> SecurityPolicy {
        self.security_policy
    }

    /// Set the application security policy.
    pub fn set_security_policy(&mut self, security_policy: SecurityPolicy) {
        self.security_policy = security_policy;
    }

    /// Set the ID of the secure channel, this is chosen by the server.
    pub fn set_secure_channel_id(&mut self, secure_channel_id: u32) {
        self.secure_channel_id = secure_channel_id;
    }

    /// Get the ID of the secure channel on the server.
    pub fn secure_channel_id(&self) -> u32 {
        self.secure_channel_id
    }

    /// Get the ID of the active token, 0 before any token was issued.
    pub fn token_id(&self) -> u32 {
        self.security
            .as_ref()
            .map(|s| s.current().token.token_id)
            .unwrap_or(0)
    }

    /// The live key epochs, present once a token was issued.
    pub fn security(&self) -> Option<&ChannelSecurity> {
        self.security.as_ref()
    }

    /// Bind the channel to a transport. A channel has exactly one bound transport at any instant.
    pub fn bind_transport(&mut self, transport_id: u64) {
        self.transport_id = Some(transport_id);
    }

    /// The id of the bound transport.
    pub fn transport_id(&self) -> Option<u64> {
        self.transport_id
    }

    /// Test whether the channel is bound to the given transport.
    pub fn is_bound_to_transport(&self, transport_id: u64) -> bool {
        self.transport_id == Some(transport_id)
    }

    /// Get the decoding options.
    pub fn decoding_options(&self) -> DecodingOptions {
        self.decoding_options.clone()
    }

    /// The security header for an outgoing chunk of `message_type`: the asymmetric form
    /// for handshake chunks, the current token id for everything else.
    pub(crate) fn make_security_header(&self, message_type: MessageChunkType) -> SecurityHeader {
        if !message_type.is_open_secure_channel() {
            return SecurityHeader::Symmetric(SymmetricSecurityHeader {
                token_id: self.token_id(),
            });
        }
        if self.security_policy == SecurityPolicy::None {
            return SecurityHeader::Asymmetric(AsymmetricSecurityHeader::none());
        }
        let receiver_certificate_thumbprint = self
            .remote_cert
            .as_ref()
            .map(|c| c.thumbprint().as_byte_string())
            .unwrap_or_default();
        SecurityHeader::Asymmetric(AsymmetricSecurityHeader::new(
            self.security_policy,
            self.cert
                .as_ref()
                .expect("A secured channel always has a certificate"),
            receiver_certificate_thumbprint,
        ))
    }

    /// Creates a nonce for the connection. The nonce should be the same size as the symmetric key
    pub fn create_random_nonce(&mut self) {
        self.local_nonce
            .resize(self.security_policy.secure_channel_nonce_length(), 0);
        random::bytes(&mut self.local_nonce);
    }

    /// Sets the remote certificate from a byte string, rejecting malformed certificates.
    pub fn set_remote_cert_from_byte_string(
        &mut self,
        remote_cert: &ByteString,
    ) -> Result<(), Error> {
        self.remote_cert = if remote_cert.is_null() {
            None
        } else {
            Some(X509::from_byte_string(remote_cert)?)
        };
        Ok(())
    }

    /// Set their nonce which should be the same length as the symmetric key.
    pub fn set_remote_nonce_from_byte_string(
        &mut self,
        remote_nonce: &ByteString,
    ) -> Result<(), Error> {
        let expected_len = self.security_policy.secure_channel_nonce_length();
        match &remote_nonce.value {
            Some(nonce) if self.security_policy == SecurityPolicy::None => {
                self.remote_nonce = nonce.clone();
                Ok(())
            }
            Some(nonce) if nonce.len() == expected_len => {
                self.remote_nonce = nonce.clone();
                Ok(())
            }
            Some(nonce) => Err(Error::new(
                StatusCode::BadNonceInvalid,
                format!(
                    "Remote nonce is {} bytes, policy {} requires {}",
                    nonce.len(),
                    self.security_policy,
                    expected_len
                ),
            )),
            None if self.security_policy == SecurityPolicy::None => Ok(()),
            None => Err(Error::new(
                StatusCode::BadNonceInvalid,
                "Remote nonce is missing",
            )),
        }
    }

    /// Get the local nonce.
    pub fn local_nonce(&self) -> &[u8] {
        &self.local_nonce
    }

    /// Get the local nonce as a byte string.
    pub fn local_nonce_as_byte_string(&self) -> ByteString {
        if self.local_nonce.is_empty() {
            ByteString::null()
        } else {
            ByteString::from(&self.local_nonce)
        }
    }

    /// Set the remote nonce.
    pub fn set_remote_nonce(&mut self, remote_nonce: &[u8]) {
        self.remote_nonce = remote_nonce.to_vec();
    }

    /// Part 6, 6.7.5. Derive the keys of one epoch from the nonces exchanged in the
    /// `OpenSecureChannel` call.
    ///
    /// | Key | Secret | Seed |
    /// |---|---|---|
    /// | Remote keys | local nonce | remote nonce |
    /// | Local keys | remote nonce | local nonce |
    ///
    /// The remote keys secure messages the peer sends, the local keys messages this side sends.
    fn derive_epoch(&self, token: ChannelSecurityToken) -> Result<KeyEpoch, Error> {
        let keys = if self.security_policy == SecurityPolicy::None {
            None
        } else {
            let remote = self
                .security_policy
                .make_secure_channel_keys(&self.local_nonce, &self.remote_nonce)?;
            let local = self
                .security_policy
                .make_secure_channel_keys(&self.remote_nonce, &self.local_nonce)?;
            trace!("Derived keys for token {}", token.token_id);
            Some(EpochKeys {
                local: local.into(),
                remote: remote.into(),
            })
        };
        Ok(KeyEpoch { token, keys })
    }

    /// Derive keys and install the first epoch of the channel.
    pub fn issue_token(&mut self, token: ChannelSecurityToken) -> Result<(), Error> {
        let epoch = self.derive_epoch(token)?;
        self.security = Some(ChannelSecurity::new(epoch));
        Ok(())
    }

    /// Derive keys for a renewal. The superseded epoch stays available for in-flight
    /// messages until the new token is activated.
    pub fn renew_token(&mut self, token: ChannelSecurityToken) -> Result<(), Error> {
        let epoch = self.derive_epoch(token)?;
        match self.security.as_mut() {
            Some(security) => {
                security.renew(epoch);
                Ok(())
            }
            None => Err(Error::new(
                StatusCode::BadInvalidState,
                "Cannot renew a channel that never issued a token",
            )),
        }
    }

    /// The size of the signature a chunk with this security header carries.
    pub(crate) fn signature_size(&self, security_header: &SecurityHeader) -> usize {
        match security_header {
            // Symmetric signatures are HMACs of the policy's digest size
            SecurityHeader::Symmetric(_) => self.security_policy.symmetric_signature_size(),
            // Asymmetric signatures are the size of the signer's RSA key
            SecurityHeader::Asymmetric(h) if h.sender_certificate.is_null() => 0,
            SecurityHeader::Asymmetric(h) => X509::from_byte_string(&h.sender_certificate)
                .and_then(|cert| cert.public_key())
                .map(|key| key.size())
                .unwrap_or(0),
        }
    }

    // RSA keys above 2048 bits can need padding sizes beyond a byte, which widens the
    // padding size field to two bytes
    fn padding_field_width(key_length: usize) -> usize {
        if key_length > 256 {
            2
        } else {
            1
        }
    }

    /// The padding geometry for a chunk with this security header, `None` when the chunk
    /// will not be encrypted. Handshake chunks are always encrypted under a real policy;
    /// other chunks only in SignAndEncrypt mode.
    pub(crate) fn padding_params(
        &self,
        security_header: &SecurityHeader,
        signature_size: usize,
        message_type: MessageChunkType,
    ) -> Option<PaddingParams> {
        if self.security_policy == SecurityPolicy::None {
            return None;
        }
        if !message_type.is_open_secure_channel()
            && self.security_mode != MessageSecurityMode::SignAndEncrypt
        {
            return None;
        }

        match security_header {
            SecurityHeader::Symmetric(_) => Some(PaddingParams {
                plain_block_size: self.security_policy.plain_block_size(),
                minimum_padding: Self::padding_field_width(signature_size),
            }),
            SecurityHeader::Asymmetric(_) => {
                // The peer's RSA key sets both the block size and the field width
                let Some(key) = self.remote_cert.as_ref().and_then(|c| c.public_key().ok())
                else {
                    error!("No remote certificate, an encrypted chunk cannot be produced");
                    return None;
                };
                let rsa_padding = self.security_policy.asymmetric_encryption_padding();
                Some(PaddingParams {
                    plain_block_size: key.plain_text_block_size(rsa_padding),
                    minimum_padding: Self::padding_field_width(key.size()),
                })
            }
        }
    }

    /// Total padding for a secured region of `body_size` bytes, as
    /// `(padding with its size field, size field width)`. Zero when nothing is encrypted.
    fn padding_size(
        &self,
        security_header: &SecurityHeader,
        body_size: usize,
        signature_size: usize,
        message_type: MessageChunkType,
    ) -> (usize, usize) {
        let Some(params) = self.padding_params(security_header, signature_size, message_type)
        else {
            return (0, 0);
        };
        // The secured region is sequence header, body, padding and signature; pad it
        // up to the next whole cipher block
        let unpadded = 8 + body_size + signature_size + params.minimum_padding;
        let fill = (params.plain_block_size - unpadded % params.plain_block_size)
            % params.plain_block_size;
        (params.minimum_padding + fill, params.minimum_padding)
    }

    fn write_message_size(data: &mut [u8], message_size: usize) {
        data[MESSAGE_SIZE_OFFSET..MESSAGE_SIZE_OFFSET + 4]
            .copy_from_slice(&(message_size as u32).to_le_bytes());
    }

    /// Rewrite the header's message size and cut the buffer down to it.
    fn finish_message(mut data: Vec<u8>, message_size: usize) -> Vec<u8> {
        Self::write_message_size(&mut data, message_size);
        data.truncate(message_size);
        data
    }

    /// Append padding and signature space to an unsecured chunk, updating its header to
    /// the padded size.
    ///
    /// The padding size field counts the filler bytes before it, and every filler byte
    /// repeats the field's low byte, which lets the receiver validate the padding after
    /// decryption.
    fn pad_and_reserve_signature(&self, chunk: &MessageChunk) -> Result<Vec<u8>, Error> {
        let info = chunk.chunk_info(self)?;
        let signature_size = self.signature_size(&info.security_header);
        let (padding, field_width) = self.padding_size(
            &info.security_header,
            info.body_length,
            signature_size,
            info.message_header.message_type,
        );

        let mut data = chunk.data.clone();
        data.reserve(padding + signature_size);
        match field_width {
            2 => {
                let fill_count = padding - 2;
                data.extend(std::iter::repeat((fill_count & 0xff) as u8).take(padding - 1));
                data.push((fill_count >> 8) as u8);
            }
            1 => {
                let fill_count = padding - 1;
                data.extend(std::iter::repeat(fill_count as u8).take(padding));
            }
            _ => {}
        }
        // Signature space is zeroed here and filled in when the chunk is signed
        data.resize(data.len() + signature_size, 0);

        let message_size = data.len();
        Self::write_message_size(&mut data, message_size);
        Ok(data)
    }

    fn securing_active(&self) -> bool {
        self.security_policy != SecurityPolicy::None
            && matches!(
                self.security_mode,
                MessageSecurityMode::Sign | MessageSecurityMode::SignAndEncrypt
            )
    }

    /// Secure an outgoing chunk into `dst`, returning the secured size. Without an
    /// active policy and mode the chunk is passed through untouched.
    pub fn apply_security(
        &self,
        message_chunk: &MessageChunk,
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        if !self.securing_active() {
            let size = message_chunk.data.len();
            if dst.len() < size {
                return Err(Error::new(
                    StatusCode::BadEncodingLimitsExceeded,
                    format!(
                        "Chunk of {} bytes does not fit the {} byte output buffer",
                        size,
                        dst.len()
                    ),
                ));
            }
            dst[..size].copy_from_slice(&message_chunk.data);
            return Ok(size);
        }

        let secured_offset = message_chunk.encrypted_data_offset(&self.decoding_options)?;
        let plain = self.pad_and_reserve_signature(message_chunk)?;
        if dst.len() < plain.len() {
            return Err(Error::new(
                StatusCode::BadEncodingLimitsExceeded,
                format!(
                    "Padded chunk of {} bytes does not fit the {} byte output buffer",
                    plain.len(),
                    dst.len()
                ),
            ));
        }

        if message_chunk.is_open_secure_channel(&self.decoding_options) {
            self.secure_asymmetric(plain, secured_offset, dst)
        } else {
            self.secure_symmetric(plain, secured_offset, dst)
        }
    }

    /// Sign with the local private key, encrypt with the peer's public key. Used for
    /// handshake chunks, whatever the security mode.
    fn secure_asymmetric(
        &self,
        mut plain: Vec<u8>,
        secured_offset: usize,
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        let signing_key = self.private_key.as_ref().ok_or_else(|| {
            Error::new(
                StatusCode::BadSecurityChecksFailed,
                "Cannot sign chunk, no private key",
            )
        })?;
        let encryption_key = self
            .remote_cert
            .as_ref()
            .ok_or_else(|| {
                Error::new(
                    StatusCode::BadSecurityChecksFailed,
                    "Cannot encrypt chunk, no remote certificate",
                )
            })?
            .public_key()?;

        // RSA encryption grows the secured region, and the header is part of the signed
        // bytes, so the final size must be in the header before signing
        let rsa_padding = self.security_policy.asymmetric_encryption_padding();
        let cipher_len =
            encryption_key.calculate_cipher_text_size(plain.len() - secured_offset, rsa_padding);
        Self::write_message_size(&mut plain, secured_offset + cipher_len);

        let signature_offset = plain.len() - signing_key.size();
        let mut signature = vec![0u8; signing_key.size()];
        self.security_policy
            .asymmetric_sign(signing_key, &plain[..signature_offset], &mut signature)?;
        plain[signature_offset..].copy_from_slice(&signature);

        dst[..secured_offset].copy_from_slice(&plain[..secured_offset]);
        let written = self.security_policy.asymmetric_encrypt(
            &encryption_key,
            &plain[secured_offset..],
            &mut dst[secured_offset..],
        )?;
        if written != cipher_len {
            return Err(Error::new(
                StatusCode::BadUnexpectedError,
                format!("Encrypted {} bytes, calculated {}", written, cipher_len),
            ));
        }
        Ok(secured_offset + written)
    }

    /// Sign, and in SignAndEncrypt mode also encrypt, with the current epoch's keys.
    fn secure_symmetric(
        &self,
        mut plain: Vec<u8>,
        secured_offset: usize,
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        let secrets = self.current_epoch_secrets()?;

        let signature_offset = plain.len() - self.security_policy.symmetric_signature_size();
        let mut signature = vec![0u8; self.security_policy.symmetric_signature_size()];
        self.security_policy.symmetric_sign(
            &secrets.signing_key,
            &plain[..signature_offset],
            &mut signature,
        )?;
        plain[signature_offset..].copy_from_slice(&signature);

        match self.security_mode {
            MessageSecurityMode::Sign => {
                dst[..plain.len()].copy_from_slice(&plain);
                Ok(plain.len())
            }
            MessageSecurityMode::SignAndEncrypt => {
                dst[..secured_offset].copy_from_slice(&plain[..secured_offset]);
                let written = self.security_policy.symmetric_encrypt(
                    &secrets.encryption_key,
                    &secrets.initialization_vector,
                    &plain[secured_offset..],
                    &mut dst[secured_offset..],
                )?;
                Ok(secured_offset + written)
            }
            mode => Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                format!("Cannot secure a chunk in mode {}", mode),
            )),
        }
    }

    /// Verify and strip the security of an incoming chunk, returning the plaintext chunk.
    ///
    /// Handshake chunks resolve their policy from the asymmetric header and the local key
    /// pair from the receiver certificate thumbprint; other chunks are handled under the
    /// epoch their token id names.
    pub fn verify_and_remove_security(&mut self, src: &[u8]) -> Result<MessageChunk, Error> {
        let decoding_options = self.decoding_options.clone();
        let mut stream = Cursor::new(&src);
        let header = MessageChunkHeader::decode(&mut stream, &decoding_options)?;
        if header.message_size as usize != src.len() {
            return Err(Error::new(
                StatusCode::BadUnexpectedError,
                format!(
                    "Header says {} bytes, buffer holds {}",
                    header.message_size,
                    src.len()
                ),
            ));
        }
        let security_header = SecurityHeader::decode_from_stream(
            &mut stream,
            header.message_type.is_open_secure_channel(),
            &decoding_options,
        )?;
        let secured_offset = stream.position() as usize;

        let data = match security_header {
            SecurityHeader::Asymmetric(h) => {
                self.remove_asymmetric_security(src, &h, secured_offset)?
            }
            SecurityHeader::Symmetric(h) => {
                self.remove_symmetric_security(src, h.token_id, secured_offset)?
            }
        };
        Ok(MessageChunk { data })
    }

    /// Decrypt with the local private key, verify the signature with the sender's
    /// certificate, strip padding and signature.
    fn remove_asymmetric_security(
        &mut self,
        src: &[u8],
        security_header: &AsymmetricSecurityHeader,
        secured_offset: usize,
    ) -> Result<Vec<u8>, Error> {
        let policy = security_header.resolved_policy()?;
        if policy == SecurityPolicy::None {
            return Ok(src.to_vec());
        }
        // The policy of the channel is whatever the handshake header announces; a
        // renewal that switches policies is caught by the orchestrator
        self.security_policy = policy;

        // Handshake chunks are always signed and encrypted under a real policy, even in
        // Sign mode. The sender certificate is only checked for being the signer here;
        // trust decisions happen elsewhere.
        if security_header.sender_certificate.is_null() {
            return Err(Error::new(
                StatusCode::BadCertificateInvalid,
                "Sender certificate is null",
            ));
        }
        let sender_certificate = X509::from_byte_string(&security_header.sender_certificate)?;
        let verification_key = sender_certificate.public_key()?;
        self.resolve_key_pair(&security_header.receiver_certificate_thumbprint)?;
        let private_key = self.private_key.as_ref().ok_or_else(|| {
            Error::new(
                StatusCode::BadSecurityChecksFailed,
                "Cannot decrypt chunk, no private key",
            )
        })?;

        // Decrypt the secured region; the decrypted bytes land behind a copy of the
        // plaintext headers and are shorter than the cipher text
        let mut plain = vec![0u8; src.len()];
        plain[..secured_offset].copy_from_slice(&src[..secured_offset]);
        let decrypted_size = policy.asymmetric_decrypt(
            private_key,
            &src[secured_offset..],
            &mut plain[secured_offset..],
        )?;
        let plain_end = secured_offset + decrypted_size;

        let signature_size = verification_key.size();
        if decrypted_size < signature_size {
            return Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                format!(
                    "Decrypted region of {} bytes cannot hold a {} byte signature",
                    decrypted_size, signature_size
                ),
            ));
        }
        let signature_offset = plain_end - signature_size;
        policy.asymmetric_verify_signature(
            &verification_key,
            &plain[..signature_offset],
            &plain[signature_offset..plain_end],
        )?;

        // The width of the padding size field follows the receiving key, i.e. ours
        let receiver_key_size = self
            .cert
            .as_ref()
            .and_then(|c| c.public_key().ok())
            .map(|k| k.size())
            .unwrap_or(signature_size);
        let content_end = self.strip_padding(&plain, receiver_key_size, signature_offset)?;
        Ok(Self::finish_message(plain, content_end))
    }

    /// Verify, and in SignAndEncrypt mode decrypt, under the epoch `token_id` names.
    /// Receiving a message under the current token ends a renewal overlap.
    fn remove_symmetric_security(
        &mut self,
        src: &[u8],
        token_id: u32,
        secured_offset: usize,
    ) -> Result<Vec<u8>, Error> {
        if self.security_mode == MessageSecurityMode::Invalid {
            return Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                "Message security mode is invalid",
            ));
        }
        if !self.securing_active() {
            return Ok(src.to_vec());
        }

        let signature_size = self.security_policy.symmetric_signature_size();
        if src.len() < secured_offset + signature_size {
            return Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                format!("Chunk of {} bytes cannot carry a signature", src.len()),
            ));
        }

        let data = {
            let secrets = self.remote_secrets_for_token(token_id)?;
            match self.security_mode {
                MessageSecurityMode::Sign => {
                    let signature_offset = src.len() - signature_size;
                    self.security_policy.symmetric_verify_signature(
                        &secrets.signing_key,
                        &src[..signature_offset],
                        &src[signature_offset..],
                    )?;
                    Self::finish_message(src.to_vec(), signature_offset)
                }
                _ => {
                    // SignAndEncrypt: decrypt, verify the signature inside, strip padding
                    let mut plain = vec![0u8; src.len()];
                    plain[..secured_offset].copy_from_slice(&src[..secured_offset]);
                    let decrypted_size = self.security_policy.symmetric_decrypt(
                        &secrets.encryption_key,
                        &secrets.initialization_vector,
                        &src[secured_offset..],
                        &mut plain[secured_offset..],
                    )?;
                    let plain_end = secured_offset + decrypted_size;

                    let signature_offset = plain_end - signature_size;
                    self.security_policy.symmetric_verify_signature(
                        &secrets.signing_key,
                        &plain[..signature_offset],
                        &plain[signature_offset..plain_end],
                    )?;

                    let content_end = self.strip_padding(
                        &plain,
                        secrets.encryption_key.key_length(),
                        signature_offset,
                    )?;
                    Self::finish_message(plain, content_end)
                }
            }
        };

        if let Some(security) = self.security.as_mut() {
            security.activate(token_id);
        }
        Ok(data)
    }

    /// Resolve the local certificate and private key named by a receiver thumbprint.
    fn resolve_key_pair(&mut self, receiver_thumbprint: &ByteString) -> Result<(), Error> {
        let Some(certificate_store) = self.certificate_store.as_ref() else {
            return Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                "No certificate store to resolve the receiver thumbprint against",
            ));
        };
        let (cert, private_key) = certificate_store.key_pair_for_thumbprint(receiver_thumbprint)?;
        self.cert = Some(cert.clone());
        self.private_key = Some(private_key.clone());
        Ok(())
    }

    /// Validate the padding that ends at `padding_end` and return where the message
    /// content before it stops.
    ///
    /// The size field counts the filler bytes before it and every filler repeats the
    /// field's low byte; `key_size` decides whether the field is one or two bytes wide.
    fn strip_padding(
        &self,
        data: &[u8],
        key_size: usize,
        padding_end: usize,
    ) -> Result<usize, Error> {
        let field_width = Self::padding_field_width(key_size);
        let bad_padding = |detail: String| Error::new(StatusCode::BadSecurityChecksFailed, detail);

        if padding_end < field_width {
            return Err(bad_padding(format!(
                "No room for a {} byte padding size field",
                field_width
            )));
        }
        let fill_count = if field_width == 2 {
            ((data[padding_end - 1] as usize) << 8) | data[padding_end - 2] as usize
        } else {
            data[padding_end - 1] as usize
        };
        let padding_start = padding_end
            .checked_sub(fill_count + field_width)
            .ok_or_else(|| bad_padding(format!("Padding of {} bytes exceeds the message", fill_count)))?;

        // Filler bytes, plus the low size byte itself, must all repeat the low byte
        let fill_byte = (fill_count & 0xff) as u8;
        let fill_region = &data[padding_start..padding_end - (field_width - 1)];
        if let Some(offset) = fill_region.iter().position(|b| *b != fill_byte) {
            return Err(bad_padding(format!(
                "Padding byte at offset {} is {:#04x}, expected {:#04x}",
                padding_start + offset,
                fill_region[offset],
                fill_byte
            )));
        }
        Ok(padding_start)
    }

    fn current_epoch_secrets(&self) -> Result<&SecuritySecrets, Error> {
        self.security
            .as_ref()
            .and_then(|s| s.current().local_secrets())
            .ok_or_else(|| {
                Error::new(
                    StatusCode::BadSecureChannelClosed,
                    "Missing symmetric keys for the current token",
                )
            })
    }

    fn remote_secrets_for_token(&self, token_id: u32) -> Result<&SecuritySecrets, Error> {
        self.security
            .as_ref()
            .and_then(|s| s.epoch_for_token(token_id))
            .and_then(|e| e.remote_secrets())
            .ok_or_else(|| {
                Error::new(
                    StatusCode::BadSecureChannelTokenUnknown,
                    format!("Token {} names no live key epoch", token_id),
                )
            })
    }
}
