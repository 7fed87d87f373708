// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Cryptographically strong random data, used for nonces and test material.

use rand::RngCore;

use uasc_types::ByteString;

/// Overwrite `dst` with random bytes from the system CSPRNG.
pub fn bytes(dst: &mut [u8]) {
    rand::thread_rng().fill_bytes(dst);
}

/// A byte string of `len` random bytes, e.g. a fresh nonce.
pub fn byte_string(len: usize) -> ByteString {
    let mut data = vec![0u8; len];
    bytes(&mut data);
    ByteString::from(data)
}
