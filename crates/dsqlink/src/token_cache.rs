//! Thread-safe caching of IAM auth tokens

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use dsqlink_core::Result;

use crate::token::TokenSigner;


/// Fraction of a token's lifetime treated as the refresh buffer: entries are
/// regenerated once 80% of their validity window has elapsed, so a token is
/// never served from the last 20%.
pub const REFRESH_BUFFER_PERCENTAGE: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    host: String,
    region: String,
    user: String,
    duration: Duration,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    issued_at: Instant,
    expires_at: Instant,
}

impl CachedToken {
    fn is_expiring_soon(&self, now: Instant, buffer_percentage: f64) -> bool {
        let lifetime = self.expires_at - self.issued_at;
        let buffer = lifetime.mul_f64(buffer_percentage);
        now > self.expires_at - buffer
    }
}

/// Cache of auth tokens keyed by (host, region, user, duration).
///
/// The whole lookup-or-refresh sequence runs inside one exclusive critical
/// section, including the signing round trip. Refreshes for different keys
/// therefore serialize; with an exclusive lock a read fast path or
/// double-checked locking would buy nothing, so neither exists.
pub struct TokenCache {
    entries: Mutex<HashMap<CacheKey, CachedToken>>,
    signer: Arc<dyn TokenSigner>,
}

impl TokenCache {
    /// Create a cache around a signer with pre-resolved credentials.
    pub fn new(signer: Arc<dyn TokenSigner>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            signer,
        }
    }

    /// Return a valid token, minting a new one when the key is absent or the
    /// cached entry has entered its refresh buffer. Signing failures
    /// propagate; retrying is the caller's concern.
    pub async fn get_token(
        &self,
        host: &str,
        region: &str,
        user: &str,
        duration: Duration,
    ) -> Result<String> {
        let key = CacheKey {
            host: host.to_string(),
            region: region.to_string(),
            user: user.to_string(),
            duration,
        };

        let mut entries = self.entries.lock().await;

        if let Some(cached) = entries.get(&key) {
            if !cached.is_expiring_soon(Instant::now(), REFRESH_BUFFER_PERCENTAGE) {
                tracing::debug!(host = %host, user = %user, "token cache hit");
                return Ok(cached.token.clone());
            }
        }

        tracing::debug!(host = %host, user = %user, "refreshing auth token");
        let token = self
            .signer
            .generate_token(host, region, user, duration)
            .await?;

        let now = Instant::now();
        entries.insert(
            key,
            CachedToken {
                token: token.clone(),
                issued_at: now,
                expires_at: now + duration,
            },
        );

        Ok(token)
    }

    /// Evict every entry, e.g. after credential rotation. The next
    /// `get_token` for any key mints a fresh token.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Number of cached entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
