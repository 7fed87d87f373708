// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! The per-connection transport loop: frames incoming bytes into chunks, accumulates the
//! chunks of one message, hands complete messages to the handshake handler or the
//! installed symmetric handler, and drains responses back to the stream.

use std::{
    io::Cursor,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use futures::StreamExt;
use log::{debug, error, trace};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_util::codec::FramedRead;

use uasc_core::{
    comms::{
        buffer::SendBuffer,
        message_chunk::{MessageChunk, MessageChunkHeader, MessageChunkType, MessageIsFinalType},
        security_header::AsymmetricSecurityHeader,
        tcp_codec::TcpCodec,
    },
    messages::{CodecRegistry, RequestMessage, ResponseMessage},
};
use uasc_types::{
    status_code::StatusCode, DecodingOptions, Error, SimpleBinaryDecodable,
};

use crate::{
    config::ServerConfig,
    crypto_queue::CryptoWorkPool,
    handshake::HandshakeHandler,
    pipeline::{MessageHandler, MessageHandlerFactory},
    registry::SecureChannelRegistry,
};

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

enum ChunkOutcome {
    Continue,
    Closed,
}

/// A server connection terminating the secure channel handshake.
pub struct SecureChannelTransport<S> {
    read: FramedRead<ReadHalf<S>, TcpCodec>,
    write: WriteHalf<S>,
    send_buffer: SendBuffer,
    handshake: HandshakeHandler,
    registry: SecureChannelRegistry,
    crypto: CryptoWorkPool,
    handler_factory: Arc<dyn MessageHandlerFactory>,
    /// Installed in front of the handshake handler on the first issue; consulted first
    /// for all MSG traffic from then on.
    symmetric_handler: Option<Box<dyn MessageHandler>>,
    /// Chunks accumulated for the message currently being received.
    pending_chunks: Vec<MessageChunk>,
    /// The asymmetric header of the first pending OPN chunk; every following chunk of
    /// the message must match it.
    pending_header: Option<AsymmetricSecurityHeader>,
    /// Last decoded sequence number.
    last_received_sequence_number: u32,
    decoding_options: DecodingOptions,
}

impl<S> SecureChannelTransport<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Wrap a connected stream. The transport takes over the stream entirely.
    pub fn new(
        stream: S,
        config: ServerConfig,
        registry: SecureChannelRegistry,
        codecs: Arc<CodecRegistry<RequestMessage>>,
        crypto: CryptoWorkPool,
        handler_factory: Arc<dyn MessageHandlerFactory>,
    ) -> SecureChannelTransport<S> {
        let transport_id = NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed);
        let decoding_options = config.decoding_options();
        let (read, write) = tokio::io::split(stream);
        let read = FramedRead::new(read, TcpCodec::new(decoding_options.clone()));
        let send_buffer = SendBuffer::new(
            config.send_buffer_size,
            config.max_message_size,
            config.max_chunk_count,
        );
        let handshake = HandshakeHandler::new(
            registry.clone(),
            codecs,
            crypto.clone(),
            config,
            transport_id,
        );
        SecureChannelTransport {
            read,
            write,
            send_buffer,
            handshake,
            registry,
            crypto,
            handler_factory,
            symmetric_handler: None,
            pending_chunks: Vec::new(),
            pending_header: None,
            last_received_sequence_number: 0,
            decoding_options,
        }
    }

    /// Run the connection until the peer closes its channel, the stream ends, or a
    /// failure closes the transport. Returns the status the connection ended with.
    pub async fn run(mut self) -> StatusCode {
        loop {
            let Some(incoming) = self.read.next().await else {
                trace!("Transport stream ended");
                self.cancel();
                return StatusCode::BadConnectionClosed;
            };
            let chunk = match incoming {
                Ok(chunk) => chunk,
                Err(e) => {
                    let status = self.log_failure(e);
                    self.cancel();
                    return status;
                }
            };
            match self.process_chunk(chunk).await {
                Ok(ChunkOutcome::Continue) => {}
                Ok(ChunkOutcome::Closed) => {
                    self.cancel();
                    return StatusCode::Good;
                }
                Err(e) => {
                    let status = self.log_failure(e);
                    self.cancel();
                    return status;
                }
            }
        }
    }

    async fn process_chunk(&mut self, chunk: MessageChunk) -> Result<ChunkOutcome, Error> {
        let header = chunk.message_header(&self.decoding_options)?;

        if header.is_final == MessageIsFinalType::FinalError {
            // An abort discards everything accumulated for the current message; reading
            // continues with the next chunk starting a fresh message
            debug!("Received an abort chunk, discarding the pending message");
            self.pending_chunks.clear();
            self.pending_header = None;
            return Ok(ChunkOutcome::Continue);
        }

        self.validate_against_pending(&chunk, &header)?;
        self.pending_chunks.push(chunk);

        if self.send_buffer.max_chunk_count > 0
            && self.pending_chunks.len() > self.send_buffer.max_chunk_count
        {
            return Err(Error::new(
                StatusCode::BadTcpMessageTooLarge,
                format!(
                    "Message has more than {} chunks, exceeding negotiated limits",
                    self.send_buffer.max_chunk_count
                ),
            ));
        }

        if header.is_final == MessageIsFinalType::Intermediate {
            return Ok(ChunkOutcome::Continue);
        }

        // The message is complete
        let chunks = std::mem::take(&mut self.pending_chunks);
        let security_header = self.pending_header.take();
        let expected_sequence_number = self.last_received_sequence_number + 1;

        match header.message_type {
            MessageChunkType::OpenSecureChannel => {
                let Some(security_header) = security_header else {
                    return Err(Error::new(
                        StatusCode::BadUnexpectedError,
                        "OPN message lost its security header",
                    ));
                };
                let outcome = self
                    .handshake
                    .handle_open_secure_channel(
                        header.secure_channel_id,
                        &security_header,
                        chunks,
                        expected_sequence_number,
                    )
                    .await?;
                self.last_received_sequence_number = outcome.last_sequence_number;
                self.send_response(outcome.channel_id, outcome.request_id, outcome.response)
                    .await?;
                if outcome.install_handler {
                    self.symmetric_handler =
                        Some(self.handler_factory.create(outcome.channel_id));
                    self.handshake.set_handler_installed();
                }
                Ok(ChunkOutcome::Continue)
            }
            MessageChunkType::CloseSecureChannel => {
                // Terminal by design: the channel closes and the connection ends without
                // a response, it never falls through to the unexpected-type failure
                self.handshake
                    .handle_close_secure_channel(chunks, expected_sequence_number)
                    .await;
                Ok(ChunkOutcome::Closed)
            }
            MessageChunkType::Message => {
                let Some(handler) = self.symmetric_handler.as_mut() else {
                    return Err(Error::new(
                        StatusCode::BadTcpMessageTypeInvalid,
                        "MSG message before any secure channel was established",
                    ));
                };
                let channel_id = header.secure_channel_id;
                let Some(channel) = self.registry.get(channel_id) else {
                    return Err(Error::new(
                        StatusCode::BadTcpSecureChannelUnknown,
                        format!("MSG message for unknown secure channel {}", channel_id),
                    ));
                };
                handler.handle_message(&channel, chunks)?;
                Ok(ChunkOutcome::Continue)
            }
        }
    }

    /// Enforce the cross-chunk invariants while a message accumulates: constant message
    /// type and channel id, and for OPN messages a byte-equal asymmetric security header.
    fn validate_against_pending(
        &mut self,
        chunk: &MessageChunk,
        header: &MessageChunkHeader,
    ) -> Result<(), Error> {
        if let Some(first) = self.pending_chunks.first() {
            let first_header = first.message_header(&self.decoding_options)?;
            if first_header.message_type != header.message_type {
                return Err(Error::new(
                    StatusCode::BadTcpMessageTypeInvalid,
                    "Message type changed between chunks of one message",
                ));
            }
            if first_header.secure_channel_id != header.secure_channel_id {
                return Err(Error::new(
                    StatusCode::BadSecurityChecksFailed,
                    "Secure channel id changed between chunks of one message",
                ));
            }
        }

        if header.message_type == MessageChunkType::OpenSecureChannel {
            let security_header = Self::read_asymmetric_header(chunk, &self.decoding_options)?;
            match &self.pending_header {
                None => self.pending_header = Some(security_header),
                Some(first) => {
                    if *first != security_header {
                        return Err(Error::new(
                            StatusCode::BadSecurityChecksFailed,
                            "Asymmetric security header changed between chunks of one message",
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn read_asymmetric_header(
        chunk: &MessageChunk,
        decoding_options: &DecodingOptions,
    ) -> Result<AsymmetricSecurityHeader, Error> {
        let mut stream = Cursor::new(&chunk.data);
        MessageChunkHeader::decode(&mut stream, decoding_options)?;
        AsymmetricSecurityHeader::decode(&mut stream, decoding_options)
    }

    async fn send_response(
        &mut self,
        channel_id: u32,
        request_id: u32,
        response: ResponseMessage,
    ) -> Result<(), Error> {
        let Some(channel) = self.registry.get(channel_id) else {
            return Err(Error::new(
                StatusCode::BadTcpSecureChannelUnknown,
                format!("Channel {} vanished before its response was sent", channel_id),
            ));
        };
        {
            let channel = channel.lock();
            self.send_buffer.write(request_id, response, &channel)?;
        }
        // Securing a chunk involves RSA work during the handshake, so it runs on the
        // crypto pool, one chunk at a time to preserve ordering
        while let Some(chunk) = self.send_buffer.next_chunk() {
            let secured = self
                .crypto
                .secure_chunk(
                    Arc::clone(&channel),
                    chunk,
                    2 * self.send_buffer.send_buffer_size,
                )
                .await
                .map_err(|e| e.with_request_id(request_id))?;
            self.send_buffer.queue_secured(&secured);
        }
        self.send_buffer
            .read_into_async(&mut self.write)
            .await
            .map_err(|e| {
                Error::new(
                    StatusCode::BadCommunicationError,
                    format!("Failed to write response: {e}"),
                )
            })?;
        trace!("Wrote response for request {} on channel {}", request_id, channel_id);
        Ok(())
    }

    fn log_failure(&self, e: Error) -> StatusCode {
        match (self.handshake.channel_id(), e.request_id()) {
            (Some(channel_id), Some(request_id)) => error!(
                "Closing transport, channel {} request {}: {}",
                channel_id, request_id, e
            ),
            (Some(channel_id), None) => {
                error!("Closing transport, channel {}: {}", channel_id, e)
            }
            (None, Some(request_id)) => {
                error!("Closing transport, request {}: {}", request_id, e)
            }
            (None, None) => error!("Closing transport: {}", e),
        }
        e.status()
    }

    /// Release everything the connection accumulated: pending chunks, the header
    /// reference, the installed handler and the channel itself. A crypto job still in
    /// flight has its result discarded when it completes.
    fn cancel(&mut self) {
        self.pending_chunks.clear();
        self.pending_header = None;
        self.symmetric_handler = None;
        self.handshake.handle_transport_closed();
    }
}
