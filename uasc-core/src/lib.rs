// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

#![warn(missing_docs)]

//! The UASC core module holds the functionality common to both ends of a UA secure
//! conversation: message chunking, the secure channel with its key epochs, and the
//! handshake message types.

pub mod comms;

#[cfg(test)]
pub(crate) mod tests;

pub mod messages;
pub use messages::{CodecRegistry, Message, RequestMessage, ResponseMessage};
