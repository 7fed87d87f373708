// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Security policy is the symmetric, asymmetric encryption / decryption + signing / verification
//! algorithms associated with a string that identifies the policy on the wire.

use std::fmt;
use std::str::FromStr;

use log::error;

use uasc_types::{status_code::StatusCode, Error};

use crate::{
    aeskey::AesKey,
    hash,
    pkey::{KeySize, PrivateKey, PublicKey, RsaPadding},
};

// Policy URIs as they appear in the asymmetric security header.
const SECURITY_POLICY_NONE_URI: &str = "http://opcfoundation.org/UA/SecurityPolicy#None";
const SECURITY_POLICY_BASIC_128_RSA_15_URI: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Basic128Rsa15";
const SECURITY_POLICY_BASIC_256_URI: &str = "http://opcfoundation.org/UA/SecurityPolicy#Basic256";
const SECURITY_POLICY_BASIC_256_SHA_256_URI: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256";
const SECURITY_POLICY_AES_128_SHA_256_RSA_OAEP_URI: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep";
const SECURITY_POLICY_AES_256_SHA_256_RSA_PSS_URI: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss";

// Short names used in configuration.
const SECURITY_POLICY_NONE: &str = "None";
const SECURITY_POLICY_BASIC_128_RSA_15: &str = "Basic128Rsa15";
const SECURITY_POLICY_BASIC_256: &str = "Basic256";
const SECURITY_POLICY_BASIC_256_SHA_256: &str = "Basic256Sha256";
const SECURITY_POLICY_AES_128_SHA_256_RSA_OAEP: &str = "Aes128Sha256RsaOaep";
const SECURITY_POLICY_AES_256_SHA_256_RSA_PSS: &str = "Aes256Sha256RsaPss";

/// SecurityPolicy implies what encryption and signing algorithms and their relevant key strengths
/// are used during an encrypted session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SecurityPolicy {
    /// A policy the stack does not know. Always rejected.
    Unknown,
    /// No security at all.
    None,
    /// AES-128-CBC with RSA PKCS#1 v1.5 asymmetric operations and SHA-1 signatures. Deprecated
    /// by the OPC UA specification, kept for interoperability.
    Basic128Rsa15,
    /// AES-256-CBC with RSA-OAEP asymmetric encryption and SHA-1 signatures. Deprecated, kept
    /// for interoperability.
    Basic256,
    /// AES-256-CBC with RSA-OAEP asymmetric encryption and SHA-256 signatures.
    Basic256Sha256,
    /// AES-128-CBC with RSA-OAEP asymmetric encryption and SHA-256 signatures.
    Aes128Sha256RsaOaep,
    /// AES-256-CBC with RSA-OAEP (SHA-256) asymmetric encryption and RSA-PSS signatures.
    Aes256Sha256RsaPss,
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SecurityPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            SECURITY_POLICY_NONE => SecurityPolicy::None,
            SECURITY_POLICY_BASIC_128_RSA_15 => SecurityPolicy::Basic128Rsa15,
            SECURITY_POLICY_BASIC_256 => SecurityPolicy::Basic256,
            SECURITY_POLICY_BASIC_256_SHA_256 => SecurityPolicy::Basic256Sha256,
            SECURITY_POLICY_AES_128_SHA_256_RSA_OAEP => SecurityPolicy::Aes128Sha256RsaOaep,
            SECURITY_POLICY_AES_256_SHA_256_RSA_PSS => SecurityPolicy::Aes256Sha256RsaPss,
            _ => {
                error!("Specified security policy \"{}\" is not recognized", s);
                SecurityPolicy::Unknown
            }
        })
    }
}

impl SecurityPolicy {
    /// The short name of the policy.
    pub fn name(&self) -> &'static str {
        match self {
            SecurityPolicy::None => SECURITY_POLICY_NONE,
            SecurityPolicy::Basic128Rsa15 => SECURITY_POLICY_BASIC_128_RSA_15,
            SecurityPolicy::Basic256 => SECURITY_POLICY_BASIC_256,
            SecurityPolicy::Basic256Sha256 => SECURITY_POLICY_BASIC_256_SHA_256,
            SecurityPolicy::Aes128Sha256RsaOaep => SECURITY_POLICY_AES_128_SHA_256_RSA_OAEP,
            SecurityPolicy::Aes256Sha256RsaPss => SECURITY_POLICY_AES_256_SHA_256_RSA_PSS,
            SecurityPolicy::Unknown => "Unknown",
        }
    }

    /// The URI of the policy as carried in asymmetric security headers.
    pub fn to_uri(&self) -> &'static str {
        match self {
            SecurityPolicy::None => SECURITY_POLICY_NONE_URI,
            SecurityPolicy::Basic128Rsa15 => SECURITY_POLICY_BASIC_128_RSA_15_URI,
            SecurityPolicy::Basic256 => SECURITY_POLICY_BASIC_256_URI,
            SecurityPolicy::Basic256Sha256 => SECURITY_POLICY_BASIC_256_SHA_256_URI,
            SecurityPolicy::Aes128Sha256RsaOaep => SECURITY_POLICY_AES_128_SHA_256_RSA_OAEP_URI,
            SecurityPolicy::Aes256Sha256RsaPss => SECURITY_POLICY_AES_256_SHA_256_RSA_PSS_URI,
            SecurityPolicy::Unknown => {
                panic!("Can't turn an unknown policy into a uri");
            }
        }
    }

    /// Look up a policy from the URI in a security header. Unmatched URIs yield `Unknown`.
    pub fn from_uri(uri: &str) -> SecurityPolicy {
        match uri {
            SECURITY_POLICY_NONE_URI => SecurityPolicy::None,
            SECURITY_POLICY_BASIC_128_RSA_15_URI => SecurityPolicy::Basic128Rsa15,
            SECURITY_POLICY_BASIC_256_URI => SecurityPolicy::Basic256,
            SECURITY_POLICY_BASIC_256_SHA_256_URI => SecurityPolicy::Basic256Sha256,
            SECURITY_POLICY_AES_128_SHA_256_RSA_OAEP_URI => SecurityPolicy::Aes128Sha256RsaOaep,
            SECURITY_POLICY_AES_256_SHA_256_RSA_PSS_URI => SecurityPolicy::Aes256Sha256RsaPss,
            _ => {
                error!(
                    "Specified security policy uri \"{}\" is not recognized",
                    uri
                );
                SecurityPolicy::Unknown
            }
        }
    }

    /// `true` for any policy this stack can actually perform cryptography for.
    pub fn is_supported(&self) -> bool {
        !matches!(self, SecurityPolicy::Unknown)
    }

    /// `true` for policies the specification has deprecated.
    pub fn is_deprecated(&self) -> bool {
        // Since 1.04 because SHA-1 is no longer considered safe
        matches!(
            self,
            SecurityPolicy::Basic128Rsa15 | SecurityPolicy::Basic256
        )
    }

    /// Size in bytes of a symmetric message signature under this policy.
    pub fn symmetric_signature_size(&self) -> usize {
        match self {
            SecurityPolicy::Basic128Rsa15 | SecurityPolicy::Basic256 => hash::SHA1_SIZE,
            SecurityPolicy::Basic256Sha256
            | SecurityPolicy::Aes128Sha256RsaOaep
            | SecurityPolicy::Aes256Sha256RsaPss => hash::SHA256_SIZE,
            _ => 0,
        }
    }

    /// Size in bytes of the derived symmetric signing key.
    pub fn derived_signature_key_size(&self) -> usize {
        match self {
            SecurityPolicy::Basic128Rsa15 => 16,
            SecurityPolicy::Basic256 => 24,
            SecurityPolicy::Basic256Sha256
            | SecurityPolicy::Aes128Sha256RsaOaep
            | SecurityPolicy::Aes256Sha256RsaPss => 32,
            _ => 0,
        }
    }

    /// Size in bytes of the derived symmetric encryption key.
    pub fn derived_encryption_key_size(&self) -> usize {
        match self {
            SecurityPolicy::Basic128Rsa15 | SecurityPolicy::Aes128Sha256RsaOaep => 16,
            SecurityPolicy::Basic256
            | SecurityPolicy::Basic256Sha256
            | SecurityPolicy::Aes256Sha256RsaPss => 32,
            _ => 0,
        }
    }

    /// Plaintext block size of the symmetric cipher, which is also the IV length.
    pub fn plain_block_size(&self) -> usize {
        match self {
            SecurityPolicy::Basic128Rsa15
            | SecurityPolicy::Basic256
            | SecurityPolicy::Basic256Sha256
            | SecurityPolicy::Aes128Sha256RsaOaep
            | SecurityPolicy::Aes256Sha256RsaPss => 16,
            _ => 0,
        }
    }

    /// The length of nonce exchanged in an `OpenSecureChannel`. The same as the symmetric
    /// encryption key length, except for the legacy Basic128Rsa15.
    pub fn secure_channel_nonce_length(&self) -> usize {
        match self {
            SecurityPolicy::Basic128Rsa15 => 16,
            SecurityPolicy::Basic256
            | SecurityPolicy::Basic256Sha256
            | SecurityPolicy::Aes128Sha256RsaOaep
            | SecurityPolicy::Aes256Sha256RsaPss => 32,
            _ => 0,
        }
    }

    /// The RSA padding scheme applied to `OpenSecureChannel` bodies.
    pub fn asymmetric_encryption_padding(&self) -> RsaPadding {
        match self {
            SecurityPolicy::Basic128Rsa15 => RsaPadding::Pkcs1,
            SecurityPolicy::Basic256
            | SecurityPolicy::Basic256Sha256
            | SecurityPolicy::Aes128Sha256RsaOaep => RsaPadding::OaepSha1,
            SecurityPolicy::Aes256Sha256RsaPss => RsaPadding::OaepSha256,
            _ => {
                panic!("Unsupported policy");
            }
        }
    }

    /// The pseudo random function of the policy, producing `length` bytes from a secret and seed.
    pub fn prf(&self, secret: &[u8], seed: &[u8], length: usize) -> Result<Vec<u8>, Error> {
        match self {
            SecurityPolicy::Basic128Rsa15 | SecurityPolicy::Basic256 => {
                hash::p_sha1(secret, seed, length)
            }
            SecurityPolicy::Basic256Sha256
            | SecurityPolicy::Aes128Sha256RsaOaep
            | SecurityPolicy::Aes256Sha256RsaPss => hash::p_sha256(secret, seed, length),
            _ => Err(Error::new(
                StatusCode::BadSecurityPolicyRejected,
                "Policy has no pseudo random function",
            )),
        }
    }

    /// Part 6, 6.7.5. Derive the keys securing one direction of symmetric traffic from the
    /// nonces exchanged in the `OpenSecureChannel` call:
    ///
    /// | Key | Secret | Seed | Offset |
    /// |---|---|---|---|
    /// | SigningKey | remote nonce | local nonce | 0 |
    /// | EncryptingKey | remote nonce | local nonce | SigningKeyLength |
    /// | InitializationVector | remote nonce | local nonce | SigningKeyLength + EncryptingKeyLength |
    ///
    /// The caller orders the nonces: `(remote, local)` yields the keys securing messages the
    /// local side sends, `(local, remote)` the keys securing what the peer sends.
    pub fn make_secure_channel_keys(
        &self,
        secret: &[u8],
        seed: &[u8],
    ) -> Result<(Vec<u8>, AesKey, Vec<u8>), Error> {
        // Work out the length of stuff
        let signing_key_length = self.derived_signature_key_size();
        let (encrypting_key_length, encrypting_block_size) =
            (self.derived_encryption_key_size(), self.plain_block_size());

        let total = signing_key_length + encrypting_key_length + encrypting_block_size;
        let bytes = self.prf(secret, seed, total)?;

        let signing_key = bytes[..signing_key_length].to_vec();
        let encrypting_key =
            AesKey::new(&bytes[signing_key_length..signing_key_length + encrypting_key_length]);
        let iv = bytes[signing_key_length + encrypting_key_length..].to_vec();
        Ok((signing_key, encrypting_key, iv))
    }

    /// Sign `data` with the policy's asymmetric signature algorithm, writing into `signature`.
    /// Returns the signature size.
    pub fn asymmetric_sign(
        &self,
        signing_key: &PrivateKey,
        data: &[u8],
        signature: &mut [u8],
    ) -> Result<usize, Error> {
        match self {
            SecurityPolicy::Basic128Rsa15 | SecurityPolicy::Basic256 => {
                signing_key.sign_sha1(data, signature)
            }
            SecurityPolicy::Basic256Sha256 | SecurityPolicy::Aes128Sha256RsaOaep => {
                signing_key.sign_sha256(data, signature)
            }
            SecurityPolicy::Aes256Sha256RsaPss => signing_key.sign_sha256_pss(data, signature),
            _ => Err(Error::new(
                StatusCode::BadSecurityPolicyRejected,
                "Policy cannot sign",
            )),
        }
    }

    /// Verify an asymmetric signature over `data` with the peer's public key.
    pub fn asymmetric_verify_signature(
        &self,
        verification_key: &PublicKey,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), Error> {
        match self {
            SecurityPolicy::Basic128Rsa15 | SecurityPolicy::Basic256 => {
                verification_key.verify_sha1(data, signature)
            }
            SecurityPolicy::Basic256Sha256 | SecurityPolicy::Aes128Sha256RsaOaep => {
                verification_key.verify_sha256(data, signature)
            }
            SecurityPolicy::Aes256Sha256RsaPss => {
                verification_key.verify_sha256_pss(data, signature)
            }
            _ => Err(Error::new(
                StatusCode::BadSecurityPolicyRejected,
                "Policy cannot verify signatures",
            )),
        }
    }

    /// Encrypt `src` with the peer's public key under the policy's padding. Returns the
    /// cipher text size written to `dst`.
    pub fn asymmetric_encrypt(
        &self,
        encryption_key: &PublicKey,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        encryption_key.encrypt(self.asymmetric_encryption_padding(), src, dst)
    }

    /// Decrypt `src` with the local private key under the policy's padding. Returns the
    /// plaintext size written to `dst`.
    pub fn asymmetric_decrypt(
        &self,
        decryption_key: &PrivateKey,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        decryption_key.decrypt(self.asymmetric_encryption_padding(), src, dst)
    }

    /// Produce a symmetric signature of `data` into `signature` with a derived signing key.
    pub fn symmetric_sign(
        &self,
        key: &[u8],
        data: &[u8],
        signature: &mut [u8],
    ) -> Result<(), Error> {
        match self {
            SecurityPolicy::Basic128Rsa15 | SecurityPolicy::Basic256 => {
                hash::hmac_sha1(key, data, signature)
            }
            SecurityPolicy::Basic256Sha256
            | SecurityPolicy::Aes128Sha256RsaOaep
            | SecurityPolicy::Aes256Sha256RsaPss => hash::hmac_sha256(key, data, signature),
            _ => Err(Error::new(
                StatusCode::BadSecurityPolicyRejected,
                "Policy cannot sign",
            )),
        }
    }

    /// Verify a symmetric signature over `data`.
    pub fn symmetric_verify_signature(
        &self,
        key: &[u8],
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), Error> {
        let verified = match self {
            SecurityPolicy::Basic128Rsa15 | SecurityPolicy::Basic256 => {
                hash::verify_hmac_sha1(key, data, signature)
            }
            SecurityPolicy::Basic256Sha256
            | SecurityPolicy::Aes128Sha256RsaOaep
            | SecurityPolicy::Aes256Sha256RsaPss => hash::verify_hmac_sha256(key, data, signature),
            _ => false,
        };
        if verified {
            Ok(())
        } else {
            Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                "Signature verification failed",
            ))
        }
    }

    /// Encrypt `src` with a derived symmetric key and IV.
    pub fn symmetric_encrypt(
        &self,
        key: &AesKey,
        iv: &[u8],
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        key.encrypt(src, iv, dst)
    }

    /// Decrypt `src` with a derived symmetric key and IV.
    pub fn symmetric_decrypt(
        &self,
        key: &AesKey,
        iv: &[u8],
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        key.decrypt(src, iv, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_uri_round_trip() {
        for policy in [
            SecurityPolicy::None,
            SecurityPolicy::Basic128Rsa15,
            SecurityPolicy::Basic256,
            SecurityPolicy::Basic256Sha256,
            SecurityPolicy::Aes128Sha256RsaOaep,
            SecurityPolicy::Aes256Sha256RsaPss,
        ] {
            assert_eq!(SecurityPolicy::from_uri(policy.to_uri()), policy);
            assert_eq!(SecurityPolicy::from_str(policy.name()).unwrap(), policy);
        }
        assert_eq!(
            SecurityPolicy::from_uri("http://opcfoundation.org/UA/SecurityPolicy#Nonsense"),
            SecurityPolicy::Unknown
        );
    }

    #[test]
    fn derived_key_lengths() {
        // Lengths from the policy definitions in the OPC UA specification
        let policy = SecurityPolicy::Basic256Sha256;
        let (signing_key, encryption_key, iv) = policy
            .make_secure_channel_keys(&[1u8; 32], &[2u8; 32])
            .unwrap();
        assert_eq!(signing_key.len(), 32);
        assert_eq!(encryption_key.value().len(), 32);
        assert_eq!(iv.len(), 16);

        let policy = SecurityPolicy::Basic128Rsa15;
        let (signing_key, encryption_key, iv) = policy
            .make_secure_channel_keys(&[1u8; 16], &[2u8; 16])
            .unwrap();
        assert_eq!(signing_key.len(), 16);
        assert_eq!(encryption_key.value().len(), 16);
        assert_eq!(iv.len(), 16);
    }

    #[test]
    fn derive_keys_deterministic() {
        let policy = SecurityPolicy::Basic256Sha256;
        let a = policy.make_secure_channel_keys(&[1u8; 32], &[2u8; 32]).unwrap();
        let b = policy.make_secure_channel_keys(&[1u8; 32], &[2u8; 32]).unwrap();
        assert_eq!(a.0, b.0);
        assert_eq!(a.1.value(), b.1.value());
        assert_eq!(a.2, b.2);
        // Swapping the nonce order produces the other direction's keys
        let c = policy.make_secure_channel_keys(&[2u8; 32], &[1u8; 32]).unwrap();
        assert_ne!(a.0, c.0);
    }

    #[test]
    fn symmetric_sign_and_verify() {
        let policy = SecurityPolicy::Basic256Sha256;
        let key = [3u8; 32];
        let mut signature = vec![0u8; policy.symmetric_signature_size()];
        policy.symmetric_sign(&key, b"data", &mut signature).unwrap();
        policy
            .symmetric_verify_signature(&key, b"data", &signature)
            .unwrap();
        let err = policy
            .symmetric_verify_signature(&key, b"tampered", &signature)
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BadSecurityChecksFailed);
    }
}
