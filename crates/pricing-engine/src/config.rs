//! Resolver configuration
//!
//! Configuration is loaded from environment variables with defaults
//! suitable for local development.

use std::time::Duration;

/// Configuration for pricing resolution.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Deadline for a single remote pricing fetch, in milliseconds.
    pub fetch_timeout_ms: u64,

    /// Concurrency window for fan-out across contracted services.
    pub fetch_concurrency: usize,

    /// TTL for cached pricing documents, in seconds.
    pub cache_ttl_secs: u64,

    /// Whether to verify TLS certificates. Remote pricing hosts commonly
    /// use self-signed certificates, so this defaults to off.
    pub verify_tls: bool,

    /// API key sent as a bearer token on outbound pricing fetches.
    pub api_key: Option<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 5_000,
            fetch_concurrency: 8,
            cache_ttl_secs: 3_600,
            verify_tls: false,
            api_key: None,
        }
    }
}

impl ResolverConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PRICING_FETCH_TIMEOUT_MS`: remote fetch deadline (default: 5000)
    /// - `PRICING_FETCH_CONCURRENCY`: fan-out window (default: 8)
    /// - `PRICING_CACHE_TTL_SECS`: pricing cache TTL (default: 3600)
    /// - `PRICING_VERIFY_TLS`: verify TLS certificates (default: false)
    /// - `PRICING_API_KEY`: bearer token for outbound fetches
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            fetch_timeout_ms: std::env::var("PRICING_FETCH_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.fetch_timeout_ms),
            fetch_concurrency: std::env::var("PRICING_FETCH_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.fetch_concurrency),
            cache_ttl_secs: std::env::var("PRICING_CACHE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.cache_ttl_secs),
            verify_tls: std::env::var("PRICING_VERIFY_TLS")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(default.verify_tls),
            api_key: std::env::var("PRICING_API_KEY").ok(),
        }
    }

    /// Remote fetch deadline as a `Duration`.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}
