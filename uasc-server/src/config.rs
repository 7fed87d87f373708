// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Server configuration: secure channel lifetimes, transport limits and the size of the
//! crypto worker pool.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use uasc_core::comms::tcp_types::MIN_CHUNK_SIZE;
use uasc_types::DecodingOptions;

/// Error returned from saving or loading config objects.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration is invalid, with a list of validation errors.
    #[error("Configuration is invalid: {0:?}")]
    ConfigInvalid(Vec<String>),
    /// Reading or writing the file failed.
    #[error("Configuration I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to serialize or deserialize the config object.
    #[error("Configuration YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A trait that handles the loading / saving and validity of configuration information.
pub trait Config: serde::Serialize {
    /// Save the configuration object to a file.
    fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Err(e) = self.validate() {
            return Err(ConfigError::ConfigInvalid(e));
        }
        let s = serde_yaml::to_string(&self)?;
        let mut f = File::create(path)?;
        f.write_all(s.as_bytes())?;
        Ok(())
    }

    /// Load the configuration object from the given path.
    fn load<A>(path: &Path) -> Result<A, ConfigError>
    where
        for<'de> A: Config + serde::Deserialize<'de>,
    {
        let mut f = File::open(path)?;
        let mut s = String::new();
        f.read_to_string(&mut s)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate the config struct, returning a list of validation errors if it fails.
    fn validate(&self) -> Result<(), Vec<String>>;
}

/// Configuration of the secure channel server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Maximum lifetime granted to a security token, in milliseconds.
    pub secure_channel_lifetime_ms: u32,
    /// Lifetime floor, requests below this are revised up, in milliseconds.
    pub min_secure_channel_lifetime_ms: u32,
    /// Size of the receive buffer, the largest chunk the server will accept.
    pub receive_buffer_size: usize,
    /// Size of the send buffer, the largest chunk the server will emit.
    pub send_buffer_size: usize,
    /// Maximum size of a whole message, 0 for no limit.
    pub max_message_size: usize,
    /// Maximum number of chunks in a message, 0 for no limit.
    pub max_chunk_count: usize,
    /// Number of workers securing and unsecuring chunks.
    pub crypto_workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            secure_channel_lifetime_ms: 300_000,
            min_secure_channel_lifetime_ms: 1_000,
            receive_buffer_size: 65_535,
            send_buffer_size: 65_535,
            max_message_size: 2 * 1024 * 1024,
            max_chunk_count: 64,
            crypto_workers: 4,
        }
    }
}

impl Config for ServerConfig {
    fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.receive_buffer_size < MIN_CHUNK_SIZE {
            errors.push(format!(
                "receive_buffer_size must be at least {}",
                MIN_CHUNK_SIZE
            ));
        }
        if self.send_buffer_size < MIN_CHUNK_SIZE {
            errors.push(format!(
                "send_buffer_size must be at least {}",
                MIN_CHUNK_SIZE
            ));
        }
        if self.secure_channel_lifetime_ms < self.min_secure_channel_lifetime_ms {
            errors.push(
                "secure_channel_lifetime_ms is smaller than min_secure_channel_lifetime_ms"
                    .to_string(),
            );
        }
        if self.crypto_workers == 0 {
            errors.push("crypto_workers must be at least 1".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl ServerConfig {
    /// The decoding options implied by the configured limits.
    pub fn decoding_options(&self) -> DecodingOptions {
        DecodingOptions {
            max_message_size: self.receive_buffer_size,
            max_chunk_count: self.max_chunk_count,
            ..DecodingOptions::default()
        }
    }

    /// Clamp a requested token lifetime to the configured bounds.
    pub fn revise_lifetime(&self, requested_lifetime: u32) -> u32 {
        if requested_lifetime == 0 || requested_lifetime > self.secure_channel_lifetime_ms {
            self.secure_channel_lifetime_ms
        } else if requested_lifetime < self.min_secure_channel_lifetime_ms {
            self.min_secure_channel_lifetime_ms
        } else {
            requested_lifetime
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn undersized_buffers_rejected() {
        let config = ServerConfig {
            receive_buffer_size: 128,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn lifetime_revision() {
        let config = ServerConfig::default();
        assert_eq!(config.revise_lifetime(0), 300_000);
        assert_eq!(config.revise_lifetime(600_000), 300_000);
        assert_eq!(config.revise_lifetime(10), 1_000);
        assert_eq!(config.revise_lifetime(60_000), 60_000);
    }
}
