// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! The seam between channel establishment and regular traffic.
//!
//! When the first `OpenSecureChannel` issue succeeds, the transport installs a message
//! handler in front of the handshake handler. From then on `MSG` traffic goes to that
//! handler and never reaches the handshake code again; renewals do not reinstall it.

use parking_lot::Mutex;
use std::sync::Arc;

use uasc_core::comms::{message_chunk::MessageChunk, secure_channel::SecureChannel};
use uasc_types::Error;

/// Handler for symmetric message traffic on an established channel.
///
/// Implementations own their symmetric decode, including consulting both key epochs of
/// the channel during a renewal overlap.
pub trait MessageHandler: Send {
    /// Handle the accumulated chunks of one complete `MSG` message. The chunks still
    /// carry their message security.
    fn handle_message(
        &mut self,
        channel: &Arc<Mutex<SecureChannel>>,
        chunks: Vec<MessageChunk>,
    ) -> Result<(), Error>;
}

/// Creates the symmetric handler for a channel when its first token is issued.
pub trait MessageHandlerFactory: Send + Sync {
    /// Create the handler that takes over symmetric traffic on the channel.
    fn create(&self, channel_id: u32) -> Box<dyn MessageHandler>;
}
