// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! The process-wide table of live secure channels.
//!
//! The registry owns every channel by id; everything else refers to channels by id and
//! looks them up here per use, so channel, transport and handler never hold strong
//! references to each other. Channel and token id counters are monotonic for the lifetime
//! of the process.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{debug, info};
use parking_lot::{Mutex, RwLock};

use uasc_core::comms::secure_channel::{Role, SecureChannel};
use uasc_crypto::CertificateStore;
use uasc_types::DecodingOptions;

struct RegistryInner {
    channels: RwLock<HashMap<u32, Arc<Mutex<SecureChannel>>>>,
    next_channel_id: AtomicU32,
    next_token_id: AtomicU32,
    certificate_store: Arc<CertificateStore>,
    decoding_options: DecodingOptions,
}

/// Registry of live secure channels, shared by every connection of a server.
#[derive(Clone)]
pub struct SecureChannelRegistry {
    inner: Arc<RegistryInner>,
}

impl SecureChannelRegistry {
    /// Create an empty registry. Channels created through it share the certificate store
    /// and decoding options.
    pub fn new(
        certificate_store: Arc<CertificateStore>,
        decoding_options: DecodingOptions,
    ) -> SecureChannelRegistry {
        SecureChannelRegistry {
            inner: Arc::new(RegistryInner {
                channels: RwLock::new(HashMap::new()),
                next_channel_id: AtomicU32::new(1),
                next_token_id: AtomicU32::new(1),
                certificate_store: Arc::clone(&certificate_store),
                decoding_options,
            }),
        }
    }

    /// Allocate a channel id and insert a fresh channel for it. The channel itself keeps
    /// id 0 until a token is issued; the chunks of the first `OpenSecureChannel` carry
    /// id 0 and have to validate against it.
    pub fn open(&self) -> (u32, Arc<Mutex<SecureChannel>>) {
        let channel_id = self.inner.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let channel = SecureChannel::new(
            Role::Server,
            Arc::clone(&self.inner.certificate_store),
            self.inner.decoding_options.clone(),
        );
        let channel = Arc::new(Mutex::new(channel));
        self.inner
            .channels
            .write()
            .insert(channel_id, Arc::clone(&channel));
        debug!("Opened secure channel {}", channel_id);
        (channel_id, channel)
    }

    /// Look up a live channel.
    pub fn get(&self, channel_id: u32) -> Option<Arc<Mutex<SecureChannel>>> {
        self.inner.channels.read().get(&channel_id).cloned()
    }

    /// Remove a channel, releasing all its resources. Returns `true` if it was live.
    pub fn close(&self, channel_id: u32) -> bool {
        let removed = self.inner.channels.write().remove(&channel_id).is_some();
        if removed {
            info!("Closed secure channel {}", channel_id);
        }
        removed
    }

    /// Allocate a token id. Token ids are never reused within a server process.
    pub fn next_token_id(&self) -> u32 {
        self.inner.next_token_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of live channels.
    pub fn len(&self) -> usize {
        self.inner.channels.read().len()
    }

    /// `true` when no channels are live.
    pub fn is_empty(&self) -> bool {
        self.inner.channels.read().is_empty()
    }

    /// Schedule the lifetime watchdog for a token that was just issued or renewed. When the
    /// timer fires and the channel still runs under the same token, it expired without
    /// renewal and the channel is closed. A renewal in the meantime changes the current
    /// token id, which makes the fired timer a no-op; that comparison resolves the race
    /// between the timer source and renewals.
    pub fn issued_or_renewed(&self, channel_id: u32, token_id: u32, lifetime_ms: u32) {
        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(lifetime_ms as u64)).await;
            let Some(channel) = registry.get(channel_id) else {
                return;
            };
            let current_token_id = channel.lock().token_id();
            if current_token_id == token_id {
                info!(
                    "Secure channel {} token {} expired without renewal, closing channel",
                    channel_id, token_id
                );
                registry.close(channel_id);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> SecureChannelRegistry {
        let store = Arc::new(CertificateStore::new_self_signed("UASC test", 2048).unwrap());
        SecureChannelRegistry::new(store, DecodingOptions::test())
    }

    #[test]
    fn ids_are_monotonic() {
        let registry = test_registry();
        let (first, _) = registry.open();
        let (second, _) = registry.open();
        assert!(second > first);
        assert_eq!(registry.len(), 2);

        let t1 = registry.next_token_id();
        let t2 = registry.next_token_id();
        assert!(t2 > t1);
    }

    #[test]
    fn open_get_close() {
        let registry = test_registry();
        let (id, channel) = registry.open();
        // The channel adopts its id when the first token is issued
        assert_eq!(channel.lock().secure_channel_id(), 0);
        assert_eq!(channel.lock().token_id(), 0);
        assert!(registry.get(id).is_some());
        assert!(registry.close(id));
        assert!(registry.get(id).is_none());
        assert!(!registry.close(id));
    }

    #[tokio::test]
    async fn expiry_closes_channel_unless_renewed() {
        let registry = test_registry();
        let (id, _channel) = registry.open();
        registry.issued_or_renewed(id, 1, 50);
        tokio::time::sleep(Duration::from_millis(200)).await;
        // Channel had no token, token id 0 != 1, so the watchdog is a no-op
        assert!(registry.get(id).is_some());

        // Schedule a watchdog for the actual current token id, as issue does
        registry.issued_or_renewed(id, 0, 50);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(registry.get(id).is_none());
    }
}
