// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! The handshake orchestrator. Drives the per-connection channel state machine through
//! `OpenSecureChannel` issue and renewal, and closes channels on `CloseSecureChannel`.
//!
//! The orchestrator never holds a strong reference to its channel between messages; it
//! keeps the channel id and looks the channel up in the registry per use, so an expiry
//! firing between messages is observed as the channel being gone.

use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;

use uasc_core::{
    comms::{
        message_chunk::MessageChunk, secure_channel::SecureChannel,
        security_header::AsymmetricSecurityHeader,
    },
    messages::{CodecRegistry, RequestMessage, ResponseMessage},
};
use uasc_crypto::SecurityPolicy;
use uasc_types::{
    status_code::StatusCode, ChannelSecurityToken, DateTime, Error, MessageSecurityMode,
    OpenSecureChannelRequest, OpenSecureChannelResponse, ResponseHeader,
    SecurityTokenRequestType,
};

use crate::{
    config::ServerConfig,
    crypto_queue::CryptoWorkPool,
    registry::SecureChannelRegistry,
};

/// The UA-TCP protocol version this server implements.
pub const SERVER_PROTOCOL_VERSION: u32 = 0;

/// State of the channel bound to one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No secure channel exists yet.
    Unsecured,
    /// A first `OpenSecureChannel` is being processed.
    HandshakePending,
    /// A token is live and symmetric traffic may flow.
    Secured,
    /// A renewal is being processed; the old epoch is still valid.
    RenewPending,
    /// The channel is gone; the connection is about to close.
    Closed,
}

/// The result of a successful `OpenSecureChannel` exchange.
pub struct OpenOutcome {
    /// The response to write to the transport.
    pub response: ResponseMessage,
    /// The request id the response must be sent under.
    pub request_id: u32,
    /// The last sequence number consumed from the incoming stream.
    pub last_sequence_number: u32,
    /// `true` when this was the first issue and the symmetric handler must be
    /// installed in front of the handshake handler.
    pub install_handler: bool,
    /// The id of the channel the token was issued or renewed for.
    pub channel_id: u32,
}

/// Per-connection handshake driver.
pub struct HandshakeHandler {
    registry: SecureChannelRegistry,
    codecs: Arc<CodecRegistry<RequestMessage>>,
    crypto: CryptoWorkPool,
    config: ServerConfig,
    transport_id: u64,
    state: ChannelState,
    channel_id: Option<u32>,
    handler_installed: bool,
}

impl HandshakeHandler {
    /// Create the handler for one connection.
    pub fn new(
        registry: SecureChannelRegistry,
        codecs: Arc<CodecRegistry<RequestMessage>>,
        crypto: CryptoWorkPool,
        config: ServerConfig,
        transport_id: u64,
    ) -> HandshakeHandler {
        HandshakeHandler {
            registry,
            codecs,
            crypto,
            config,
            transport_id,
            state: ChannelState::Unsecured,
            channel_id: None,
            handler_installed: false,
        }
    }

    /// The current state of the connection's channel.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// The id of the channel bound to this connection, once one was issued.
    pub fn channel_id(&self) -> Option<u32> {
        self.channel_id
    }

    /// Drive an `OpenSecureChannel` message through the state machine.
    pub async fn handle_open_secure_channel(
        &mut self,
        secure_channel_id: u32,
        security_header: &AsymmetricSecurityHeader,
        chunks: Vec<MessageChunk>,
        expected_sequence_number: u32,
    ) -> Result<OpenOutcome, Error> {
        if self.state == ChannelState::Closed {
            return Err(Error::new(
                StatusCode::BadSecureChannelClosed,
                "OpenSecureChannel on a closed connection",
            ));
        }

        // Resolve the channel the chunk header addresses. Id zero allocates a fresh
        // channel; anything else must name a live channel bound to this very transport.
        let (channel_id, channel, newly_allocated) = if secure_channel_id == 0 {
            if self.channel_id.is_some() {
                // A renewal with id 0 names nothing; so does a second issue
                return Err(Error::new(
                    StatusCode::BadTcpSecureChannelUnknown,
                    "Secure channel id 0 on a connection that already has a channel",
                ));
            }
            let (channel_id, channel) = self.registry.open();
            channel.lock().bind_transport(self.transport_id);
            (channel_id, channel, true)
        } else {
            let Some(channel) = self.registry.get(secure_channel_id) else {
                return Err(Error::new(
                    StatusCode::BadTcpSecureChannelUnknown,
                    format!("Secure channel {} is not known", secure_channel_id),
                ));
            };
            // A renewal must arrive on the transport the channel is bound to,
            // before anything is decrypted on its behalf
            if !channel.lock().is_bound_to_transport(self.transport_id) {
                return Err(Error::new(
                    StatusCode::BadSecurityChecksFailed,
                    format!(
                        "Secure channel {} is bound to another transport",
                        secure_channel_id
                    ),
                ));
            }
            (secure_channel_id, channel, false)
        };

        self.state = if newly_allocated {
            ChannelState::HandshakePending
        } else {
            ChannelState::RenewPending
        };

        let result = self
            .drive_open(
                channel_id,
                &channel,
                newly_allocated,
                security_header,
                chunks,
                expected_sequence_number,
            )
            .await;

        match result {
            Ok(outcome) => {
                self.state = ChannelState::Secured;
                self.channel_id = Some(channel_id);
                Ok(outcome)
            }
            Err(e) => {
                // No partial state survives a failure: a channel allocated for this
                // handshake is removed again
                if newly_allocated {
                    self.registry.close(channel_id);
                }
                self.state = ChannelState::Closed;
                Err(e)
            }
        }
    }

    async fn drive_open(
        &mut self,
        channel_id: u32,
        channel: &Arc<Mutex<SecureChannel>>,
        is_issue: bool,
        security_header: &AsymmetricSecurityHeader,
        chunks: Vec<MessageChunk>,
        expected_sequence_number: u32,
    ) -> Result<OpenOutcome, Error> {
        let prior_policy = channel.lock().security_policy();

        let decoded = self
            .crypto
            .decode_message(
                Arc::clone(channel),
                Arc::clone(&self.codecs),
                chunks,
                expected_sequence_number,
            )
            .await?;

        let request_id = decoded.request_id;
        let RequestMessage::OpenSecureChannel(request) = decoded.message else {
            return Err(Error::new(
                StatusCode::BadTcpMessageTypeInvalid,
                "OPN message did not carry an OpenSecureChannelRequest",
            )
            .with_request_id(request_id));
        };
        let request_handle = request.request_header.request_handle;

        let result = if is_issue {
            self.issue(channel_id, channel, security_header, &request)
        } else {
            self.renew(channel_id, channel, security_header, prior_policy, &request)
        };

        match result {
            Ok(response) => Ok(OpenOutcome {
                response: ResponseMessage::from(response),
                request_id,
                last_sequence_number: decoded.last_sequence_number,
                install_handler: is_issue && !self.handler_installed,
                channel_id,
            }),
            Err(e) => Err(e.with_context(Some(request_id), Some(request_handle))),
        }
    }

    fn validate_protocol_version(&self, request: &OpenSecureChannelRequest) -> Result<(), Error> {
        if request.client_protocol_version > SERVER_PROTOCOL_VERSION {
            return Err(Error::new(
                StatusCode::BadProtocolVersionUnsupported,
                format!(
                    "Client protocol version {} is unsupported",
                    request.client_protocol_version
                ),
            ));
        }
        Ok(())
    }

    fn mint_token(&self, channel_id: u32, requested_lifetime: u32) -> ChannelSecurityToken {
        ChannelSecurityToken {
            channel_id,
            token_id: self.registry.next_token_id(),
            created_at: DateTime::now(),
            revised_lifetime: self.config.revise_lifetime(requested_lifetime),
        }
    }

    fn issue(
        &self,
        channel_id: u32,
        channel: &Arc<Mutex<SecureChannel>>,
        security_header: &AsymmetricSecurityHeader,
        request: &OpenSecureChannelRequest,
    ) -> Result<OpenSecureChannelResponse, Error> {
        self.validate_protocol_version(request)?;
        if request.request_type != SecurityTokenRequestType::Issue {
            return Err(Error::new(
                StatusCode::BadTcpSecureChannelUnknown,
                "Renewal addressed to secure channel id 0",
            ));
        }

        let mut channel = channel.lock();

        // The decode resolved the security policy from the asymmetric header; the
        // requested mode has to be consistent with it
        let security_policy = channel.security_policy();
        let mode_is_valid = match request.security_mode {
            MessageSecurityMode::None => security_policy == SecurityPolicy::None,
            MessageSecurityMode::Sign | MessageSecurityMode::SignAndEncrypt => {
                security_policy != SecurityPolicy::None
            }
            MessageSecurityMode::Invalid => false,
        };
        if !mode_is_valid {
            return Err(Error::new(
                StatusCode::BadSecurityModeRejected,
                format!(
                    "Security mode {} is invalid for policy {}",
                    request.security_mode, security_policy
                ),
            ));
        }
        // The channel adopts its registry id now; the request's chunks carried id 0,
        // the response's chunks carry the allocated id
        channel.set_secure_channel_id(channel_id);
        channel.set_security_mode(request.security_mode);

        if security_policy != SecurityPolicy::None {
            channel.set_remote_cert_from_byte_string(&security_header.sender_certificate)?;
        }
        channel.set_remote_nonce_from_byte_string(&request.client_nonce)?;
        channel.create_random_nonce();

        let token = self.mint_token(channel_id, request.requested_lifetime);
        channel.issue_token(token)?;
        let server_nonce = channel.local_nonce_as_byte_string();
        drop(channel);

        self.registry
            .issued_or_renewed(channel_id, token.token_id, token.revised_lifetime);

        info!(
            "Issued secure channel {} with token {} and policy {}",
            channel_id, token.token_id, security_policy
        );

        Ok(OpenSecureChannelResponse {
            response_header: ResponseHeader::new_good(request.request_header.request_handle),
            server_protocol_version: SERVER_PROTOCOL_VERSION,
            security_token: token,
            server_nonce,
        })
    }

    fn renew(
        &self,
        channel_id: u32,
        channel: &Arc<Mutex<SecureChannel>>,
        security_header: &AsymmetricSecurityHeader,
        prior_policy: SecurityPolicy,
        request: &OpenSecureChannelRequest,
    ) -> Result<OpenSecureChannelResponse, Error> {
        self.validate_protocol_version(request)?;
        if request.request_type != SecurityTokenRequestType::Renew {
            return Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                "Issue addressed to an existing secure channel",
            ));
        }

        let mut channel = channel.lock();

        // The sender certificate must be byte-equal to the one the channel was issued
        // with, and neither mode nor policy may change across a renewal
        let stored_cert = channel.remote_cert();
        let cert_matches = match &stored_cert {
            None => security_header.sender_certificate.is_null(),
            Some(cert) => cert.as_der() == security_header.sender_certificate.as_ref(),
        };
        if !cert_matches {
            return Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                "Renewal sender certificate differs from the channel's certificate",
            ));
        }
        if request.security_mode != channel.security_mode() {
            return Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                format!(
                    "Renewal requests security mode {}, channel has {}",
                    request.security_mode,
                    channel.security_mode()
                ),
            ));
        }
        if channel.security_policy() != prior_policy {
            return Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                format!(
                    "Renewal requests security policy {}, channel has {}",
                    channel.security_policy(),
                    prior_policy
                ),
            ));
        }

        channel.set_remote_nonce_from_byte_string(&request.client_nonce)?;
        channel.create_random_nonce();

        let token = self.mint_token(channel_id, request.requested_lifetime);
        channel.renew_token(token)?;
        let server_nonce = channel.local_nonce_as_byte_string();
        drop(channel);

        self.registry
            .issued_or_renewed(channel_id, token.token_id, token.revised_lifetime);

        debug!(
            "Renewed secure channel {} with token {}",
            channel_id, token.token_id
        );

        Ok(OpenSecureChannelResponse {
            response_header: ResponseHeader::new_good(request.request_header.request_handle),
            server_protocol_version: SERVER_PROTOCOL_VERSION,
            security_token: token,
            server_nonce,
        })
    }

    /// Mark the symmetric handler as installed so later issues never reinstall it.
    pub fn set_handler_installed(&mut self) {
        self.handler_installed = true;
    }

    /// Handle a `CloseSecureChannel` message. Terminal: the channel is removed and the
    /// connection closes, no response is sent and no error is raised to the peer.
    pub async fn handle_close_secure_channel(
        &mut self,
        chunks: Vec<MessageChunk>,
        expected_sequence_number: u32,
    ) -> ChannelState {
        if let Some(channel_id) = self.channel_id.take() {
            if let Some(channel) = self.registry.get(channel_id) {
                // Honor message security on the close request, but a close that fails
                // its checks still closes the channel
                if let Err(e) = self
                    .crypto
                    .decode_message(
                        channel,
                        Arc::clone(&self.codecs),
                        chunks,
                        expected_sequence_number,
                    )
                    .await
                {
                    debug!(
                        "CloseSecureChannel on channel {} failed to decode: {}",
                        channel_id, e
                    );
                }
            }
            self.registry.close(channel_id);
            info!("Secure channel {} closed by request", channel_id);
        }
        self.state = ChannelState::Closed;
        self.state
    }

    /// The transport is gone: release the channel and all its resources.
    pub fn handle_transport_closed(&mut self) {
        if let Some(channel_id) = self.channel_id.take() {
            if self.registry.close(channel_id) {
                debug!(
                    "Secure channel {} released on transport close",
                    channel_id
                );
            }
        }
        self.state = ChannelState::Closed;
    }
}

impl Drop for HandshakeHandler {
    fn drop(&mut self) {
        // The connection task may be aborted between messages; the channel must not
        // outlive its transport
        if self.channel_id.is_some() {
            self.handle_transport_closed();
        }
    }
}
