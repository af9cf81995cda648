//! Cache abstraction, key namespace, and effect side-channel
//!
//! The evaluation core never talks to the cache mid-computation. It
//! returns pure results plus a list of [`CacheEffect`]s; applying them is
//! best-effort via [`apply_effects`], which logs failures and never
//! propagates them. This keeps evaluation correctness independent of
//! cache availability.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

/// Cache error types. Always non-fatal to callers of [`apply_effects`].
#[derive(Debug, Error)]
pub enum CacheError {
    /// A non-overwriting `set` would have changed an existing value.
    ///
    /// This detects cache key collisions from bugs, not intentional
    /// refresh; refreshes pass `overwrite = true`.
    #[error("cache key conflict on '{0}'")]
    Conflict(String),

    /// Backend failure (connection, serialization, ...).
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Key-value cache with TTL.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Get a value by key, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError>;

    /// Set a value with a TTL in seconds.
    ///
    /// Without `overwrite`, a write that would change an existing live
    /// value is rejected with [`CacheError::Conflict`]. Re-setting the
    /// identical value is allowed and refreshes the TTL.
    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl_secs: u64,
        overwrite: bool,
    ) -> Result<(), CacheError>;

    /// Delete a key.
    async fn del(&self, key: &str) -> Result<(), CacheError>;

    /// Delete every key starting with `prefix`.
    async fn del_pattern(&self, prefix: &str) -> Result<(), CacheError>;
}

/// Cache key builders for the engine's namespace.
pub mod keys {
    use uuid::Uuid;

    /// `service.<org>.<name>`
    pub fn service(organization_id: Uuid, name: &str) -> String {
        format!("service.{organization_id}.{name}")
    }

    /// `pricing.id.<id>`
    pub fn pricing_id(id: &str) -> String {
        format!("pricing.id.{id}")
    }

    /// `pricing.url.<url>`
    pub fn pricing_url(url: &str) -> String {
        format!("pricing.url.{url}")
    }

    /// `features.<user>.eval`
    pub fn user_eval(user_id: &str) -> String {
        format!("features.{user_id}.eval")
    }

    /// `features.<user>.eval.<feature>`
    pub fn feature_eval(user_id: &str, feature: &str) -> String {
        format!("features.{user_id}.eval.{feature}")
    }

    /// `contracts.<user>`
    pub fn contract(user_id: &str) -> String {
        format!("contracts.{user_id}")
    }
}

/// A deferred cache mutation produced by pure evaluation code.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEffect {
    /// Store a value.
    Set {
        /// Cache key.
        key: String,
        /// Value to store.
        value: serde_json::Value,
        /// TTL in seconds.
        ttl_secs: u64,
        /// Whether to replace an existing different value.
        overwrite: bool,
    },
    /// Delete a key.
    Del {
        /// Cache key.
        key: String,
    },
    /// Delete a key prefix.
    DelPattern {
        /// Key prefix (the trailing `*` is implied).
        prefix: String,
    },
}

/// Apply cache effects best-effort.
///
/// Failures are logged and swallowed; a cache-write failure must never
/// fail the evaluation that produced it.
pub async fn apply_effects(cache: &dyn Cache, effects: Vec<CacheEffect>) {
    for effect in effects {
        let result = match &effect {
            CacheEffect::Set {
                key,
                value,
                ttl_secs,
                overwrite,
            } => cache.set(key, value.clone(), *ttl_secs, *overwrite).await,
            CacheEffect::Del { key } => cache.del(key).await,
            CacheEffect::DelPattern { prefix } => cache.del_pattern(prefix).await,
        };

        if let Err(err) = result {
            warn!("cache effect failed, ignoring: {err}");
        }
    }
}

struct Entry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// In-memory cache with per-entry expiry.
///
/// Suitable for single-process deployments and tests; production
/// deployments wire an external key-value store behind the same trait.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache").finish()
    }
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl_secs: u64,
        overwrite: bool,
    ) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;

        if !overwrite {
            if let Some(existing) = entries.get(key) {
                if existing.expires_at > Instant::now() && existing.value != value {
                    return Err(CacheError::Conflict(key.to_string()));
                }
            }
        }

        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn del_pattern(&self, prefix: &str) -> Result<(), CacheError> {
        self.entries
            .write()
            .await
            .retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}
