//! Storage change notifications.

use crate::client::ClientCache;
use crate::config::CONFIG_KEY;
use std::sync::Arc;

/// Drops the cached handle when the configuration key changes.
///
/// The host's change-notification mechanism calls [`InvalidationHook::invalidate`]
/// with the storage key that changed. Only [`CONFIG_KEY`] triggers a reset.
#[derive(Debug, Clone)]
pub struct InvalidationHook {
    cache: Arc<ClientCache>,
}

impl InvalidationHook {
    /// Creates a hook for the given cache.
    pub fn new(cache: Arc<ClientCache>) -> Self {
        Self { cache }
    }

    /// Handles a change notification; returns true if the cache was reset.
    pub async fn invalidate(&self, key: &str) -> bool {
        if key != CONFIG_KEY {
            tracing::trace!(key, "Ignoring change notification");
            return false;
        }
        tracing::debug!(key, "Configuration changed, invalidating cached handle");
        self.cache.reset().await;
        true
    }
}
