//! Short-lived provider tokens obtained lazily and shared by every request
//! of an adapter.

use std::sync::Arc;

use async_trait::async_trait;
use wharf_registry::auth::{Token, TokenCache};
use wharf_registry::RegistryError;

const SCOPE: &str = "provider";

/// Issues a fresh provider token, e.g. by logging in.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Calls the provider.
    async fn issue(&self) -> Result<Token, RegistryError>;
}

/// A token fetched on first use and kept until the earlier of the
/// provider's expiry and one hour. Concurrent callers during a refresh wait
/// for it instead of issuing their own.
pub struct LazyToken {
    source: Arc<dyn TokenSource>,
    cache: TokenCache,
}

impl std::fmt::Debug for LazyToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyToken").finish_non_exhaustive()
    }
}

impl LazyToken {
    /// Wraps `source`.
    #[must_use]
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            cache: TokenCache::new(),
        }
    }

    /// Returns the live token, issuing one if needed.
    ///
    /// # Errors
    ///
    /// Returns the error of the token source.
    pub async fn get(&self) -> Result<String, RegistryError> {
        let source = Arc::clone(&self.source);
        self.cache
            .get_or_refresh(SCOPE, || async move { source.issue().await })
            .await
    }

    /// Forgets the token, e.g. after the provider rejected it.
    pub async fn invalidate(&self) {
        self.cache.invalidate(SCOPE).await;
    }
}
