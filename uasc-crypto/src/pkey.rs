// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Asymmetric encryption and signing with RSA key pairs.
//!
//! RSA operates on single blocks no larger than the key modulus, so encryption and decryption
//! here loop over the input in block-sized pieces. The plaintext block size depends on the
//! padding scheme in use.

use rsa::{
    pkcs8::{DecodePrivateKey, EncodePrivateKey},
    signature::{RandomizedSigner, SignatureEncoding, Signer, Verifier},
    traits::PublicKeyParts,
    Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey,
};
use sha1::Sha1;
use sha2::Sha256;

use uasc_types::{status_code::StatusCode, Error};

/// The padding scheme applied to RSA encrypted blocks.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RsaPadding {
    /// PKCS#1 v1.5.
    Pkcs1,
    /// OAEP with SHA-1 as the mask generation hash.
    OaepSha1,
    /// OAEP with SHA-256 as the mask generation hash.
    OaepSha256,
}

impl RsaPadding {
    /// Bytes of each cipher block consumed by the padding.
    pub fn overhead(&self) -> usize {
        match self {
            RsaPadding::Pkcs1 => 11,
            RsaPadding::OaepSha1 => 42,
            RsaPadding::OaepSha256 => 66,
        }
    }
}

/// Functions common to any sized RSA key.
pub trait KeySize {
    /// Length of the key modulus in bits.
    fn bit_length(&self) -> usize;

    /// Length of the key modulus in bytes. This is the size of a signature and of one
    /// cipher text block.
    fn size(&self) -> usize {
        self.bit_length() / 8
    }

    /// Number of plaintext bytes that fit in one encrypted block under `padding`.
    fn plain_text_block_size(&self, padding: RsaPadding) -> usize {
        self.size() - padding.overhead()
    }

    /// Size of one cipher text block.
    fn cipher_text_block_size(&self) -> usize {
        self.size()
    }

    /// Total cipher text size for `data_size` bytes of plaintext under `padding`.
    fn calculate_cipher_text_size(&self, data_size: usize, padding: RsaPadding) -> usize {
        let plain_text_block_size = self.plain_text_block_size(padding);
        let blocks = data_size.div_ceil(plain_text_block_size);
        blocks * self.cipher_text_block_size()
    }
}

fn crypt_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::new(
        StatusCode::BadSecurityChecksFailed,
        format!("{context}: {e}"),
    )
}

/// An RSA private key with its derived public half.
#[derive(Debug, Clone)]
pub struct PrivateKey {
    key: RsaPrivateKey,
}

impl KeySize for PrivateKey {
    fn bit_length(&self) -> usize {
        self.key.n().bits()
    }
}

impl PrivateKey {
    /// Generate a fresh private key of the given bit length.
    pub fn new(bit_length: usize) -> Result<PrivateKey, Error> {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, bit_length)
            .map_err(|e| crypt_error("Cannot create private key", e))?;
        Ok(PrivateKey { key })
    }

    /// Read a private key from PKCS#8 PEM.
    pub fn from_pem(pem: &str) -> Result<PrivateKey, Error> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| crypt_error("Cannot parse private key", e))?;
        Ok(PrivateKey { key })
    }

    /// Write the private key as PKCS#8 PEM.
    pub fn to_pem(&self) -> Result<String, Error> {
        Ok(self
            .key
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|e| crypt_error("Cannot serialize private key", e))?
            .to_string())
    }

    /// The matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            key: self.key.to_public_key(),
        }
    }

    pub(crate) fn inner(&self) -> &RsaPrivateKey {
        &self.key
    }

    /// RSA-SHA1 PKCS#1 v1.5 signature of `data` into `signature`. Returns the signature size.
    pub fn sign_sha1(&self, data: &[u8], signature: &mut [u8]) -> Result<usize, Error> {
        let signing_key = rsa::pkcs1v15::SigningKey::<Sha1>::new(self.key.clone());
        let sig = signing_key.sign(data).to_vec();
        Self::copy_signature(sig, signature)
    }

    /// RSA-SHA256 PKCS#1 v1.5 signature of `data` into `signature`. Returns the signature size.
    pub fn sign_sha256(&self, data: &[u8], signature: &mut [u8]) -> Result<usize, Error> {
        let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new(self.key.clone());
        let sig = signing_key.sign(data).to_vec();
        Self::copy_signature(sig, signature)
    }

    /// RSA-PSS-SHA256 signature of `data` into `signature`. Returns the signature size.
    pub fn sign_sha256_pss(&self, data: &[u8], signature: &mut [u8]) -> Result<usize, Error> {
        let signing_key = rsa::pss::SigningKey::<Sha256>::new(self.key.clone());
        let mut rng = rand::thread_rng();
        let sig = signing_key.sign_with_rng(&mut rng, data).to_vec();
        Self::copy_signature(sig, signature)
    }

    fn copy_signature(sig: Vec<u8>, signature: &mut [u8]) -> Result<usize, Error> {
        if signature.len() != sig.len() {
            return Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                format!(
                    "Signature buffer length {} does not match signature length {}",
                    signature.len(),
                    sig.len()
                ),
            ));
        }
        signature.copy_from_slice(&sig);
        Ok(sig.len())
    }

    /// Decrypt `src` block by block into `dst`, returning the plaintext size.
    pub fn decrypt(&self, padding: RsaPadding, src: &[u8], dst: &mut [u8]) -> Result<usize, Error> {
        let cipher_text_block_size = self.cipher_text_block_size();
        if src.len() % cipher_text_block_size != 0 {
            return Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                format!(
                    "Cipher text length {} is not a multiple of the block size {}",
                    src.len(),
                    cipher_text_block_size
                ),
            ));
        }
        let mut dst_offset = 0;
        for block in src.chunks(cipher_text_block_size) {
            let plain_text = match padding {
                RsaPadding::Pkcs1 => self.key.decrypt(Pkcs1v15Encrypt, block),
                RsaPadding::OaepSha1 => self.key.decrypt(Oaep::new::<Sha1>(), block),
                RsaPadding::OaepSha256 => self.key.decrypt(Oaep::new::<Sha256>(), block),
            }
            .map_err(|e| crypt_error("Decryption failed", e))?;
            if dst_offset + plain_text.len() > dst.len() {
                return Err(Error::new(
                    StatusCode::BadSecurityChecksFailed,
                    "Decrypted data exceeds the destination buffer",
                ));
            }
            dst[dst_offset..dst_offset + plain_text.len()].copy_from_slice(&plain_text);
            dst_offset += plain_text.len();
        }
        Ok(dst_offset)
    }
}

/// An RSA public key, extracted from a certificate or derived from a private key.
#[derive(Debug, Clone, PartialEq)]
pub struct PublicKey {
    key: RsaPublicKey,
}

impl KeySize for PublicKey {
    fn bit_length(&self) -> usize {
        self.key.n().bits()
    }
}

impl PublicKey {
    pub(crate) fn from_inner(key: RsaPublicKey) -> PublicKey {
        PublicKey { key }
    }

    pub(crate) fn inner(&self) -> &RsaPublicKey {
        &self.key
    }

    /// Verify an RSA-SHA1 PKCS#1 v1.5 signature.
    pub fn verify_sha1(&self, data: &[u8], signature: &[u8]) -> Result<(), Error> {
        let verifying_key = rsa::pkcs1v15::VerifyingKey::<Sha1>::new(self.key.clone());
        let signature = rsa::pkcs1v15::Signature::try_from(signature)
            .map_err(|e| crypt_error("Malformed signature", e))?;
        verifying_key
            .verify(data, &signature)
            .map_err(|e| crypt_error("Signature verification failed", e))
    }

    /// Verify an RSA-SHA256 PKCS#1 v1.5 signature.
    pub fn verify_sha256(&self, data: &[u8], signature: &[u8]) -> Result<(), Error> {
        let verifying_key = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(self.key.clone());
        let signature = rsa::pkcs1v15::Signature::try_from(signature)
            .map_err(|e| crypt_error("Malformed signature", e))?;
        verifying_key
            .verify(data, &signature)
            .map_err(|e| crypt_error("Signature verification failed", e))
    }

    /// Verify an RSA-PSS-SHA256 signature.
    pub fn verify_sha256_pss(&self, data: &[u8], signature: &[u8]) -> Result<(), Error> {
        let verifying_key = rsa::pss::VerifyingKey::<Sha256>::new(self.key.clone());
        let signature = rsa::pss::Signature::try_from(signature)
            .map_err(|e| crypt_error("Malformed signature", e))?;
        verifying_key
            .verify(data, &signature)
            .map_err(|e| crypt_error("Signature verification failed", e))
    }

    /// Encrypt `src` block by block into `dst`, returning the cipher text size.
    pub fn encrypt(&self, padding: RsaPadding, src: &[u8], dst: &mut [u8]) -> Result<usize, Error> {
        let plain_text_block_size = self.plain_text_block_size(padding);
        let cipher_text_block_size = self.cipher_text_block_size();
        let mut rng = rand::thread_rng();
        let mut dst_offset = 0;
        for block in src.chunks(plain_text_block_size) {
            let cipher_text = match padding {
                RsaPadding::Pkcs1 => self.key.encrypt(&mut rng, Pkcs1v15Encrypt, block),
                RsaPadding::OaepSha1 => self.key.encrypt(&mut rng, Oaep::new::<Sha1>(), block),
                RsaPadding::OaepSha256 => self.key.encrypt(&mut rng, Oaep::new::<Sha256>(), block),
            }
            .map_err(|e| crypt_error("Encryption failed", e))?;
            debug_assert_eq!(cipher_text.len(), cipher_text_block_size);
            if dst_offset + cipher_text.len() > dst.len() {
                return Err(Error::new(
                    StatusCode::BadSecurityChecksFailed,
                    "Encrypted data exceeds the destination buffer",
                ));
            }
            dst[dst_offset..dst_offset + cipher_text.len()].copy_from_slice(&cipher_text);
            dst_offset += cipher_text.len();
        }
        Ok(dst_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> PrivateKey {
        PrivateKey::new(2048).unwrap()
    }

    #[test]
    fn key_sizes() {
        let key = test_key();
        assert_eq!(key.size(), 256);
        assert_eq!(key.cipher_text_block_size(), 256);
        assert_eq!(key.plain_text_block_size(RsaPadding::Pkcs1), 245);
        assert_eq!(key.plain_text_block_size(RsaPadding::OaepSha1), 214);
        assert_eq!(key.plain_text_block_size(RsaPadding::OaepSha256), 190);
        // A single byte requires a full cipher block, a full block plus one requires two
        assert_eq!(key.calculate_cipher_text_size(1, RsaPadding::OaepSha1), 256);
        assert_eq!(
            key.calculate_cipher_text_size(215, RsaPadding::OaepSha1),
            512
        );
    }

    #[test]
    fn encrypt_decrypt_multi_block() {
        let key = test_key();
        let public_key = key.public_key();
        for padding in [RsaPadding::Pkcs1, RsaPadding::OaepSha1, RsaPadding::OaepSha256] {
            let plain_text = vec![0x5Au8; 300];
            let cipher_len = key.calculate_cipher_text_size(plain_text.len(), padding);
            let mut cipher_text = vec![0u8; cipher_len];
            let written = public_key
                .encrypt(padding, &plain_text, &mut cipher_text)
                .unwrap();
            assert_eq!(written, cipher_len);
            let mut decrypted = vec![0u8; cipher_len];
            let read = key.decrypt(padding, &cipher_text, &mut decrypted).unwrap();
            assert_eq!(&decrypted[..read], &plain_text[..]);
        }
    }

    #[test]
    fn sign_verify() {
        let key = test_key();
        let public_key = key.public_key();
        let data = b"message to sign";
        let mut signature = vec![0u8; key.size()];

        key.sign_sha1(data, &mut signature).unwrap();
        public_key.verify_sha1(data, &signature).unwrap();
        assert!(public_key.verify_sha1(b"other", &signature).is_err());

        key.sign_sha256(data, &mut signature).unwrap();
        public_key.verify_sha256(data, &signature).unwrap();

        key.sign_sha256_pss(data, &mut signature).unwrap();
        public_key.verify_sha256_pss(data, &signature).unwrap();
        assert!(public_key.verify_sha256(data, &signature).is_err());
    }
}
