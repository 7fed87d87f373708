// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! X.509 certificate handling: parsing DER certificates received from peers, extracting their
//! public keys, computing thumbprints, and producing self-signed application certificates.

use std::str::FromStr;

use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use sha1::{Digest, Sha1};
use x509_cert::{
    builder::{Builder, CertificateBuilder, Profile},
    der::{Decode, Encode},
    name::Name,
    serial_number::SerialNumber,
    spki::SubjectPublicKeyInfoOwned,
    time::Validity,
    Certificate,
};

use uasc_types::{status_code::StatusCode, ByteString, Error};

use crate::pkey::{PrivateKey, PublicKey};

/// The SHA-1 digest of a DER certificate, used as a compact certificate identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Thumbprint {
    value: [u8; Thumbprint::THUMBPRINT_SIZE],
}

impl Thumbprint {
    /// Thumbprints are SHA-1 digests, always 20 bytes.
    pub const THUMBPRINT_SIZE: usize = 20;

    /// Compute the thumbprint of a DER certificate.
    pub fn new(der: &[u8]) -> Thumbprint {
        let digest = Sha1::digest(der);
        let mut value = [0u8; Self::THUMBPRINT_SIZE];
        value.copy_from_slice(&digest);
        Thumbprint { value }
    }

    /// Construct a thumbprint from digest bytes received on the wire.
    pub fn from_bytes(value: [u8; Thumbprint::THUMBPRINT_SIZE]) -> Thumbprint {
        Thumbprint { value }
    }

    /// The raw digest bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// The thumbprint as a byte string for use in a security header.
    pub fn as_byte_string(&self) -> ByteString {
        ByteString::from(&self.value)
    }
}

/// An X.509 certificate kept in its DER form alongside the parsed structure.
#[derive(Debug, Clone)]
pub struct X509 {
    der: Vec<u8>,
    certificate: Certificate,
}

impl PartialEq for X509 {
    fn eq(&self, other: &Self) -> bool {
        // Identity is the DER bytes; two certificates that differ in any byte are different
        self.der == other.der
    }
}

impl X509 {
    /// Parse a certificate from DER bytes.
    pub fn from_der(der: &[u8]) -> Result<X509, Error> {
        let certificate = Certificate::from_der(der).map_err(|e| {
            Error::new(
                StatusCode::BadCertificateInvalid,
                format!("Certificate is not valid DER: {e}"),
            )
        })?;
        Ok(X509 {
            der: der.to_vec(),
            certificate,
        })
    }

    /// Parse a certificate from a byte string, as received in a security header.
    pub fn from_byte_string(value: &ByteString) -> Result<X509, Error> {
        if value.is_null_or_empty() {
            return Err(Error::new(
                StatusCode::BadCertificateInvalid,
                "Certificate byte string is null or empty",
            ));
        }
        Self::from_der(value.as_ref())
    }

    /// Create a self-signed certificate for the supplied key pair. Used for application
    /// certificates in stores created programmatically and in tests.
    pub fn self_signed(private_key: &PrivateKey, common_name: &str) -> Result<X509, Error> {
        let cert_error =
            |e: &dyn std::fmt::Display| Error::new(StatusCode::BadCertificateInvalid, e.to_string());

        let subject = Name::from_str(&format!("CN={common_name}")).map_err(|e| cert_error(&e))?;
        let profile = Profile::Leaf {
            issuer: subject.clone(),
            enable_key_agreement: false,
            enable_key_encipherment: true,
            include_subject_key_identifier: true,
        };
        let serial_number = SerialNumber::from(1u32);
        let validity = Validity::from_now(std::time::Duration::from_secs(365 * 24 * 60 * 60))
            .map_err(|e| cert_error(&e))?;
        let public_key_der = private_key
            .public_key()
            .inner()
            .to_public_key_der()
            .map_err(|e| cert_error(&e))?;
        let spki =
            SubjectPublicKeyInfoOwned::try_from(public_key_der.as_bytes()).map_err(|e| cert_error(&e))?;

        let signer =
            rsa::pkcs1v15::SigningKey::<sha2::Sha256>::new(private_key.inner().clone());
        let builder =
            CertificateBuilder::new(profile, serial_number, validity, subject, spki, &signer)
                .map_err(|e| cert_error(&e))?;
        let certificate = builder
            .build::<rsa::pkcs1v15::Signature>()
            .map_err(|e| cert_error(&e))?;
        let der = certificate.to_der().map_err(|e| cert_error(&e))?;
        Ok(X509 { der, certificate })
    }

    /// The DER bytes of the certificate.
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    /// The certificate as a byte string for use in a security header.
    pub fn as_byte_string(&self) -> ByteString {
        ByteString::from(&self.der)
    }

    /// The SHA-1 thumbprint of the certificate.
    pub fn thumbprint(&self) -> Thumbprint {
        Thumbprint::new(&self.der)
    }

    /// Extract the RSA public key from the certificate.
    pub fn public_key(&self) -> Result<PublicKey, Error> {
        let spki_der = self
            .certificate
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| {
                Error::new(
                    StatusCode::BadCertificateInvalid,
                    format!("Cannot re-encode subject public key info: {e}"),
                )
            })?;
        let key = rsa::RsaPublicKey::from_public_key_der(&spki_der).map_err(|e| {
            Error::new(
                StatusCode::BadCertificateInvalid,
                format!("Certificate public key is not RSA: {e}"),
            )
        })?;
        Ok(PublicKey::from_inner(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkey::KeySize;

    #[test]
    fn self_signed_round_trip() {
        let key = PrivateKey::new(2048).unwrap();
        let cert = X509::self_signed(&key, "UASC test").unwrap();
        let reparsed = X509::from_byte_string(&cert.as_byte_string()).unwrap();
        assert_eq!(cert, reparsed);

        let public_key = reparsed.public_key().unwrap();
        assert_eq!(public_key.size(), key.size());
        assert_eq!(public_key, key.public_key());
    }

    #[test]
    fn thumbprint_size_and_stability() {
        let key = PrivateKey::new(2048).unwrap();
        let cert = X509::self_signed(&key, "UASC test").unwrap();
        let thumbprint = cert.thumbprint();
        assert_eq!(thumbprint.value().len(), Thumbprint::THUMBPRINT_SIZE);
        assert_eq!(thumbprint, cert.thumbprint());
    }

    #[test]
    fn malformed_certificate_rejected() {
        let err = X509::from_der(&[1, 2, 3]).unwrap_err();
        assert_eq!(err.status(), StatusCode::BadCertificateInvalid);
        let err = X509::from_byte_string(&ByteString::null()).unwrap_err();
        assert_eq!(err.status(), StatusCode::BadCertificateInvalid);
    }
}
