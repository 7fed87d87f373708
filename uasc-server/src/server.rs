// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Composition root for the secure channel server: owns the registry, the crypto pool,
//! the codec registry and the symmetric handler factory, and attaches transports to
//! connected streams.

use std::sync::Arc;

use log::{debug, error, info};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use uasc_core::messages::{CodecRegistry, RequestMessage};
use uasc_crypto::CertificateStore;

use crate::{
    config::ServerConfig,
    crypto_queue::CryptoWorkPool,
    pipeline::MessageHandlerFactory,
    registry::SecureChannelRegistry,
    transport::SecureChannelTransport,
};

/// The secure channel server. One of these exists per server process; transports are
/// attached to it as clients connect.
pub struct SecureChannelServer {
    config: ServerConfig,
    registry: SecureChannelRegistry,
    codecs: Arc<CodecRegistry<RequestMessage>>,
    crypto: CryptoWorkPool,
    handler_factory: Arc<dyn MessageHandlerFactory>,
}

impl SecureChannelServer {
    /// Create a server. The codec registry is constructed by the caller and threaded
    /// through to everything that decodes messages.
    pub fn new(
        config: ServerConfig,
        certificate_store: Arc<CertificateStore>,
        codecs: CodecRegistry<RequestMessage>,
        handler_factory: Arc<dyn MessageHandlerFactory>,
    ) -> SecureChannelServer {
        let registry =
            SecureChannelRegistry::new(certificate_store, config.decoding_options());
        let crypto = CryptoWorkPool::new(config.crypto_workers);
        SecureChannelServer {
            config,
            registry,
            codecs: Arc::new(codecs),
            crypto,
            handler_factory,
        }
    }

    /// The channel registry of this server.
    pub fn registry(&self) -> &SecureChannelRegistry {
        &self.registry
    }

    /// Attach a transport to a connected stream. The caller drives the returned
    /// transport, usually on its own task.
    pub fn attach<S>(&self, stream: S) -> SecureChannelTransport<S>
    where
        S: AsyncRead + AsyncWrite,
    {
        SecureChannelTransport::new(
            stream,
            self.config.clone(),
            self.registry.clone(),
            Arc::clone(&self.codecs),
            self.crypto.clone(),
            Arc::clone(&self.handler_factory),
        )
    }

    /// Accept connections until the token is cancelled, spawning a transport per
    /// connection.
    pub async fn run_on(self: Arc<Self>, listener: TcpListener, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Secure channel server halted");
                    return;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            debug!("Accepted connection from {}", addr);
                            let transport = self.attach(stream);
                            tokio::spawn(async move {
                                let status = transport.run().await;
                                debug!("Connection from {} ended with {}", addr, status);
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            return;
                        }
                    }
                }
            }
        }
    }
}
