// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Hashing functions used for producing and verifying digital signatures and for
//! the P_SHA pseudo-random function of the key derivation.

use hmac::{digest::KeyInit, Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

use uasc_types::{status_code::StatusCode, Error};

/// Size in bytes of a SHA-1 digest.
pub const SHA1_SIZE: usize = 20;
/// Size in bytes of a SHA-256 digest.
pub const SHA256_SIZE: usize = 32;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

fn hmac_round<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut mac = <M as Mac>::new_from_slice(key)
        .map_err(|e| Error::new(StatusCode::BadSecurityChecksFailed, e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// The P_SHA pseudo-random function from OPC UA Part 6. Generates `length` bytes from a secret
/// and a seed:
///
/// ```text
/// P_SHA(secret, seed) = HMAC(secret, A(1) + seed) + HMAC(secret, A(2) + seed) + ...
/// A(0) = seed, A(n) = HMAC(secret, A(n - 1))
/// ```
fn p_hash<M: Mac + KeyInit>(secret: &[u8], seed: &[u8], length: usize) -> Result<Vec<u8>, Error> {
    let mut result = Vec::with_capacity(length);
    let mut a = hmac_round::<M>(secret, seed)?;
    while result.len() < length {
        let mut input = a.clone();
        input.extend_from_slice(seed);
        result.extend_from_slice(&hmac_round::<M>(secret, &input)?);
        a = hmac_round::<M>(secret, &a)?;
    }
    result.truncate(length);
    Ok(result)
}

/// P_SHA1 key generation.
pub fn p_sha1(secret: &[u8], seed: &[u8], length: usize) -> Result<Vec<u8>, Error> {
    p_hash::<HmacSha1>(secret, seed, length)
}

/// P_SHA256 key generation.
pub fn p_sha256(secret: &[u8], seed: &[u8], length: usize) -> Result<Vec<u8>, Error> {
    p_hash::<HmacSha256>(secret, seed, length)
}

/// Produce an HMAC-SHA1 signature of `data` into `signature`.
pub fn hmac_sha1(key: &[u8], data: &[u8], signature: &mut [u8]) -> Result<(), Error> {
    if signature.len() != SHA1_SIZE {
        return Err(Error::new(
            StatusCode::BadSecurityChecksFailed,
            format!("Signature buffer is invalid length {}", signature.len()),
        ));
    }
    signature.copy_from_slice(&hmac_round::<HmacSha1>(key, data)?);
    Ok(())
}

/// Produce an HMAC-SHA256 signature of `data` into `signature`.
pub fn hmac_sha256(key: &[u8], data: &[u8], signature: &mut [u8]) -> Result<(), Error> {
    if signature.len() != SHA256_SIZE {
        return Err(Error::new(
            StatusCode::BadSecurityChecksFailed,
            format!("Signature buffer is invalid length {}", signature.len()),
        ));
    }
    signature.copy_from_slice(&hmac_round::<HmacSha256>(key, data)?);
    Ok(())
}

fn verify_hmac<M: Mac + KeyInit>(key: &[u8], data: &[u8], signature: &[u8]) -> bool {
    let Ok(mut mac) = <M as Mac>::new_from_slice(key) else {
        return false;
    };
    mac.update(data);
    // Constant time comparison happens inside verify_slice
    mac.verify_slice(signature).is_ok()
}

/// Verify an HMAC-SHA1 signature.
pub fn verify_hmac_sha1(key: &[u8], data: &[u8], signature: &[u8]) -> bool {
    verify_hmac::<HmacSha1>(key, data, signature)
}

/// Verify an HMAC-SHA256 signature.
pub fn verify_hmac_sha256(key: &[u8], data: &[u8], signature: &[u8]) -> bool {
    verify_hmac::<HmacSha256>(key, data, signature)
}
