//! Pricing resolution
//!
//! Resolves `(service, version)` pairs to concrete pricing documents:
//! cache first, then the repository for id-backed locators or an
//! authenticated outbound fetch for url-backed ones. Remote fetches are
//! bounded by a fixed deadline and, when resolving a whole contract,
//! fanned out with a capped concurrency window.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use pricing_core::{Contract, Pricing, PricingLocator, Service};

use crate::cache::{keys, Cache};
use crate::config::ResolverConfig;
use crate::error::{EngineError, EngineResult};
use crate::store::ServiceStore;

/// Resolves contracted services to their pricing documents.
pub struct PricingResolver {
    services: Arc<dyn ServiceStore>,
    cache: Arc<dyn Cache>,
    client: reqwest::Client,
    config: ResolverConfig,
}

impl std::fmt::Debug for PricingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricingResolver")
            .field("config", &self.config)
            .finish()
    }
}

impl PricingResolver {
    /// Create a resolver.
    ///
    /// The HTTP client carries the configured fetch deadline and, unless
    /// TLS verification is enabled, tolerates self-signed certificates.
    pub fn new(
        services: Arc<dyn ServiceStore>,
        cache: Arc<dyn Cache>,
        config: ResolverConfig,
    ) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout())
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|err| EngineError::Store(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            services,
            cache,
            client,
            config,
        })
    }

    /// Look up a service record, via the cache when possible.
    pub async fn service(&self, organization_id: Uuid, name: &str) -> EngineResult<Service> {
        let key = keys::service(organization_id, name);

        if let Ok(Some(cached)) = self.cache.get(&key).await {
            if let Ok(service) = serde_json::from_value::<Service>(cached) {
                return Ok(service);
            }
        }

        let service = self
            .services
            .find_by_name(organization_id, name)
            .await
            .map_err(|err| EngineError::Store(err.to_string()))?
            .ok_or_else(|| EngineError::ServiceNotFound(name.to_string()))?;

        if let Ok(value) = serde_json::to_value(&service) {
            if let Err(err) = self
                .cache
                .set(&key, value, self.config.cache_ttl_secs, true)
                .await
            {
                warn!("service cache write failed, ignoring: {err}");
            }
        }

        Ok(service)
    }

    /// Resolve one pricing version of a service.
    #[instrument(skip(self), fields(service = %service_name, version = %version))]
    pub async fn resolve(
        &self,
        organization_id: Uuid,
        service_name: &str,
        version: &str,
    ) -> EngineResult<Pricing> {
        let service = self.service(organization_id, service_name).await?;
        let locator = service
            .locator(version)
            .ok_or_else(|| EngineError::PricingNotFound {
                service: service_name.to_string(),
                version: version.to_string(),
            })?;
        self.resolve_locator(service_name, version, locator).await
    }

    /// Resolve a pricing through its locator.
    pub async fn resolve_locator(
        &self,
        service_name: &str,
        version: &str,
        locator: &PricingLocator,
    ) -> EngineResult<Pricing> {
        let cache_key = match locator {
            PricingLocator::Id(id) => keys::pricing_id(id),
            PricingLocator::Url(url) => keys::pricing_url(url),
        };

        if let Ok(Some(cached)) = self.cache.get(&cache_key).await {
            if let Ok(pricing) = serde_json::from_value::<Pricing>(cached) {
                debug!("pricing cache hit");
                return Ok(pricing);
            }
        }

        let pricing = match locator {
            PricingLocator::Id(id) => self
                .services
                .find_pricing_by_id(id)
                .await
                .map_err(|err| EngineError::Store(err.to_string()))?
                .ok_or_else(|| EngineError::PricingNotFound {
                    service: service_name.to_string(),
                    version: version.to_string(),
                })?,
            PricingLocator::Url(url) => self.fetch_remote(url).await?,
        };

        pricing.validate()?;

        // Best-effort cache populate; a failure here never fails resolution.
        if let Ok(value) = serde_json::to_value(&pricing) {
            if let Err(err) = self
                .cache
                .set(&cache_key, value, self.config.cache_ttl_secs, true)
                .await
            {
                warn!("pricing cache write failed, ignoring: {err}");
            }
        }

        Ok(pricing)
    }

    /// Fetch and parse a url-backed pricing document.
    #[instrument(skip(self))]
    async fn fetch_remote(&self, url: &str) -> EngineResult<Pricing> {
        debug!("fetching remote pricing");

        let mut request = self.client.get(url);
        if let Some(api_key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = request.send().await.map_err(|err| {
            let reason = if err.is_timeout() {
                format!("timed out after {}ms", self.config.fetch_timeout_ms)
            } else {
                err.to_string()
            };
            EngineError::RemoteFetch {
                url: url.to_string(),
                reason,
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::RemoteFetch {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        let body = response.text().await.map_err(|err| EngineError::RemoteFetch {
            url: url.to_string(),
            reason: err.to_string(),
        })?;

        // Pricing documents are YAML; JSON is valid YAML so both parse here.
        serde_yaml::from_str::<Pricing>(&body)
            .map_err(|err| EngineError::Validation(format!("malformed pricing document: {err}")))
    }

    /// Resolve every contracted service of a contract.
    ///
    /// Fan-out is capped at the configured concurrency window and joins
    /// fail-fast: one unresolvable service fails the whole resolution, so
    /// a feature set is never computed from an incomplete service set.
    #[instrument(skip(self, contract), fields(user = %contract.user_id))]
    pub async fn resolve_contracted(
        &self,
        contract: &Contract,
    ) -> EngineResult<BTreeMap<String, Pricing>> {
        let organization_id = contract.organization_id;

        let resolved: Vec<(String, Pricing)> =
            stream::iter(contract.contracted_services.iter().map(|(service, version)| {
                let service = service.clone();
                let version = version.clone();
                async move {
                    let pricing = self
                        .resolve(organization_id, &service, &version)
                        .await?;
                    Ok::<_, EngineError>((service, pricing))
                }
            }))
            .buffer_unordered(self.config.fetch_concurrency.max(1))
            .try_collect()
            .await?;

        Ok(resolved.into_iter().collect())
    }
}
