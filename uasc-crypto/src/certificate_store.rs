// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! The certificate store holds the server's application certificates and private keys,
//! indexed by thumbprint. The receiver certificate thumbprint of an incoming
//! `OpenSecureChannel` selects which key pair decrypts the message.

use std::collections::HashMap;

use uasc_types::{status_code::StatusCode, ByteString, Error};

use crate::{
    pkey::PrivateKey,
    x509::{Thumbprint, X509},
};

/// An in-memory store of application certificates and their private keys.
#[derive(Debug)]
pub struct CertificateStore {
    /// All key pairs, by certificate thumbprint.
    certs: HashMap<Thumbprint, (X509, PrivateKey)>,
    /// Thumbprint of the default application certificate.
    own_thumbprint: Thumbprint,
}

impl CertificateStore {
    /// Create a store holding the given application certificate and key.
    pub fn new(cert: X509, private_key: PrivateKey) -> CertificateStore {
        let own_thumbprint = cert.thumbprint();
        let mut certs = HashMap::new();
        certs.insert(own_thumbprint.clone(), (cert, private_key));
        CertificateStore {
            certs,
            own_thumbprint,
        }
    }

    /// Create a store around a freshly generated key pair and self-signed certificate.
    pub fn new_self_signed(common_name: &str, bit_length: usize) -> Result<CertificateStore, Error> {
        let private_key = PrivateKey::new(bit_length)?;
        let cert = X509::self_signed(&private_key, common_name)?;
        Ok(CertificateStore::new(cert, private_key))
    }

    /// Add another key pair to the store.
    pub fn insert(&mut self, cert: X509, private_key: PrivateKey) {
        self.certs.insert(cert.thumbprint(), (cert, private_key));
    }

    /// The default application certificate.
    pub fn own_cert(&self) -> &X509 {
        &self.certs[&self.own_thumbprint].0
    }

    /// The private key of the default application certificate.
    pub fn own_private_key(&self) -> &PrivateKey {
        &self.certs[&self.own_thumbprint].1
    }

    /// Find the key pair named by a receiver certificate thumbprint from a security header.
    /// A null thumbprint selects the default application certificate.
    pub fn key_pair_for_thumbprint(
        &self,
        thumbprint: &ByteString,
    ) -> Result<&(X509, PrivateKey), Error> {
        if thumbprint.is_null_or_empty() {
            return Ok(&self.certs[&self.own_thumbprint]);
        }
        let value = thumbprint.as_ref();
        if value.len() != Thumbprint::THUMBPRINT_SIZE {
            return Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                format!("Receiver thumbprint has invalid length {}", value.len()),
            ));
        }
        let mut key = [0u8; Thumbprint::THUMBPRINT_SIZE];
        key.copy_from_slice(value);
        self.certs.get(&Thumbprint::from_bytes(key)).ok_or_else(|| {
            Error::new(
                StatusCode::BadNoValidCertificates,
                "Supplied thumbprint does not match any certificate in the store",
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_thumbprint() {
        let store = CertificateStore::new_self_signed("UASC test", 2048).unwrap();
        let thumbprint = store.own_cert().thumbprint().as_byte_string();
        let (cert, _key) = store.key_pair_for_thumbprint(&thumbprint).unwrap();
        assert_eq!(cert, store.own_cert());

        // Null thumbprint falls back to the application certificate
        let (cert, _key) = store.key_pair_for_thumbprint(&ByteString::null()).unwrap();
        assert_eq!(cert, store.own_cert());
    }

    #[test]
    fn unknown_thumbprint_rejected() {
        let store = CertificateStore::new_self_signed("UASC test", 2048).unwrap();
        let err = store
            .key_pair_for_thumbprint(&ByteString::from(vec![0u8; 20]))
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BadNoValidCertificates);

        let err = store
            .key_pair_for_thumbprint(&ByteString::from(vec![0u8; 7]))
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BadSecurityChecksFailed);
    }
}
