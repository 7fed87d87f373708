// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Contains constants used by the stack for the purpose of default limits.

/// Default maximum size of a message in bytes.
pub const MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

/// Default maximum number of chunks in a message.
pub const MAX_CHUNK_COUNT: usize = 64;

/// Default maximum length in bytes of a string.
pub const MAX_STRING_LENGTH: usize = 65535;

/// Default maximum length in bytes of a byte string.
pub const MAX_BYTE_STRING_LENGTH: usize = 65535;

/// Default maximum number of elements of an array.
pub const MAX_ARRAY_LENGTH: usize = 1000;

/// Maximum size of a DER certificate the stack will accept.
pub const MAX_CERTIFICATE_LENGTH: usize = 32767;
