// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

#![warn(missing_docs)]

//! Server-side secure channel establishment for UA secure conversation: the channel
//! registry, the per-connection handshake state machine and orchestrator, the crypto
//! work pool and the transport loop tying them together.
//!
//! The crates below this one do the heavy lifting; this one owns the policy decisions:
//! who may renew a channel, how long tokens live, and when a transport must be closed.

pub mod config;
pub mod crypto_queue;
pub mod handshake;
pub mod pipeline;
pub mod registry;
pub mod server;
pub mod transport;

pub use config::{Config, ConfigError, ServerConfig};
pub use crypto_queue::{CryptoWorkPool, DecodedRequest};
pub use handshake::{ChannelState, HandshakeHandler, OpenOutcome, SERVER_PROTOCOL_VERSION};
pub use pipeline::{MessageHandler, MessageHandlerFactory};
pub use registry::SecureChannelRegistry;
pub use server::SecureChannelServer;
pub use transport::SecureChannelTransport;
