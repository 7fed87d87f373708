// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Symmetric encryption / decryption wrapper.
//!
//! All supported security policies encrypt symmetric traffic with AES-CBC; they differ
//! only in key length. The key length therefore selects the cipher here, and inputs must
//! arrive already padded to whole cipher blocks.

use aes::cipher::{
    block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};

use uasc_types::{status_code::StatusCode, Error};

/// AES operates on 16 byte blocks regardless of key length. The IV is one block.
pub const AES_BLOCK_SIZE: usize = 16;

const AES128_KEY_SIZE: usize = 16;
const AES256_KEY_SIZE: usize = 32;

type EncryptResult = Result<usize, Error>;

fn cipher_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::new(
        StatusCode::BadUnexpectedError,
        format!("{context}: {e}"),
    )
}

fn cbc_encrypt<C>(key: &[u8], iv: &[u8], src: &[u8], dst: &mut [u8]) -> EncryptResult
where
    C: BlockEncryptMut + KeyIvInit,
{
    C::new_from_slices(key, iv)
        .map_err(|e| cipher_error("Bad key or IV", e))?
        .encrypt_padded_b2b_mut::<NoPadding>(src, dst)
        .map_err(|e| cipher_error("Encryption failed", e))?;
    Ok(src.len())
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], src: &[u8], dst: &mut [u8]) -> EncryptResult
where
    C: BlockDecryptMut + KeyIvInit,
{
    C::new_from_slices(key, iv)
        .map_err(|e| cipher_error("Bad key or IV", e))?
        .decrypt_padded_b2b_mut::<NoPadding>(src, dst)
        .map_err(|e| cipher_error("Decryption failed", e))?;
    Ok(src.len())
}

/// An AES-CBC key derived for one direction of a secure channel.
#[derive(Debug, Clone)]
pub struct AesKey {
    value: Vec<u8>,
}

impl AesKey {
    /// Wrap raw key material. The length decides between AES-128 and AES-256; anything
    /// else is rejected when the key is used.
    pub fn new(value: &[u8]) -> AesKey {
        AesKey {
            value: value.to_vec(),
        }
    }

    /// The raw key material.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// The cipher block size, which is also the IV length.
    pub fn block_size(&self) -> usize {
        AES_BLOCK_SIZE
    }

    /// The IV length of the cipher.
    pub fn iv_length(&self) -> usize {
        AES_BLOCK_SIZE
    }

    /// The key length in bytes.
    pub fn key_length(&self) -> usize {
        self.value.len()
    }

    fn check_args(&self, src: &[u8], iv: &[u8], dst: &[u8]) -> Result<(), Error> {
        if src.len() % AES_BLOCK_SIZE != 0 {
            Err(Error::new(
                StatusCode::BadUnexpectedError,
                format!(
                    "Input of {} bytes is not padded to the {} byte cipher block",
                    src.len(),
                    AES_BLOCK_SIZE
                ),
            ))
        } else if iv.len() != AES_BLOCK_SIZE {
            Err(Error::new(
                StatusCode::BadUnexpectedError,
                format!("IV must be {} bytes, got {}", AES_BLOCK_SIZE, iv.len()),
            ))
        } else if dst.len() < src.len() {
            Err(Error::new(
                StatusCode::BadUnexpectedError,
                format!(
                    "Output buffer of {} bytes cannot hold {} bytes",
                    dst.len(),
                    src.len()
                ),
            ))
        } else {
            Ok(())
        }
    }

    /// Encrypt whole blocks of `src` into `dst`.
    pub fn encrypt(&self, src: &[u8], iv: &[u8], dst: &mut [u8]) -> EncryptResult {
        self.check_args(src, iv, dst)?;
        match self.value.len() {
            AES128_KEY_SIZE => cbc_encrypt::<cbc::Encryptor<aes::Aes128>>(&self.value, iv, src, dst),
            AES256_KEY_SIZE => cbc_encrypt::<cbc::Encryptor<aes::Aes256>>(&self.value, iv, src, dst),
            n => Err(cipher_error("Unusable key", format!("{n} byte key"))),
        }
    }

    /// Decrypt whole blocks of `src` into `dst`. The IV is derived alongside the key
    /// when the secure channel opens.
    pub fn decrypt(&self, src: &[u8], iv: &[u8], dst: &mut [u8]) -> EncryptResult {
        self.check_args(src, iv, dst)?;
        match self.value.len() {
            AES128_KEY_SIZE => cbc_decrypt::<cbc::Decryptor<aes::Aes128>>(&self.value, iv, src, dst),
            AES256_KEY_SIZE => cbc_decrypt::<cbc::Decryptor<aes::Aes256>>(&self.value, iv, src, dst),
            n => Err(cipher_error("Unusable key", format!("{n} byte key"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes_round_trip() {
        for key_size in [AES128_KEY_SIZE, AES256_KEY_SIZE] {
            let key = AesKey::new(&vec![1u8; key_size]);
            let iv = [9u8; AES_BLOCK_SIZE];
            let plain_text = [0x42u8; 64];

            let mut cipher_text = vec![0u8; plain_text.len()];
            let size = key.encrypt(&plain_text, &iv, &mut cipher_text).unwrap();
            assert_eq!(size, plain_text.len());
            assert_ne!(&cipher_text[..size], &plain_text[..]);

            let mut decrypted = vec![0u8; size];
            let size = key.decrypt(&cipher_text[..size], &iv, &mut decrypted).unwrap();
            assert_eq!(&decrypted[..size], &plain_text[..]);
        }
    }

    #[test]
    fn aes_unpadded_input_rejected() {
        let key = AesKey::new(&[1u8; AES128_KEY_SIZE]);
        let iv = [0u8; AES_BLOCK_SIZE];
        let mut dst = vec![0u8; 64];
        assert!(key.encrypt(&[0u8; 15], &iv, &mut dst).is_err());
    }

    #[test]
    fn aes_odd_key_length_rejected() {
        let key = AesKey::new(&[1u8; 20]);
        let iv = [0u8; AES_BLOCK_SIZE];
        let mut dst = vec![0u8; 16];
        assert!(key.encrypt(&[0u8; 16], &iv, &mut dst).is_err());
    }
}
