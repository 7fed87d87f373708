// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

#![warn(missing_docs)]

//! Cryptography for the UA Secure Conversation stack: security policies and their algorithm
//! suites, RSA key pairs, AES symmetric keys, X.509 certificate handling and the P_SHA key
//! derivation used when opening or renewing a secure channel.

pub mod aeskey;
pub mod certificate_store;
pub mod hash;
pub mod pkey;
pub mod random;
pub mod security_policy;
pub mod x509;

pub use aeskey::AesKey;
pub use certificate_store::CertificateStore;
pub use pkey::{KeySize, PrivateKey, PublicKey, RsaPadding};
pub use security_policy::SecurityPolicy;
pub use x509::{Thumbprint, X509};
