//! Contract novation
//!
//! Rewrites subscriptions in bulk when a pricing version is archived or a
//! service is removed. Each novation snapshots the previous subscription
//! into the contract's history, migrates affected contracts onto the
//! fallback subscription (or off the service entirely), and persists the
//! whole batch all-or-nothing: a short write count fails the operation.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use pricing_core::{Contract, Pricing, Subscription, UsageLevel};
use pricing_events::{EventSink, PricingEvent, PricingEventKind};

use crate::cache::{apply_effects, keys, Cache, CacheEffect};
use crate::error::{EngineError, EngineResult};
use crate::resolver::PricingResolver;
use crate::store::{ContractFilter, ContractStore, ServiceStore};

/// Where affected contracts land after their pricing version is archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackSubscription {
    /// Target pricing version (must be active).
    pub pricing_version: String,

    /// Target plan, if any.
    #[serde(default)]
    pub plan: Option<String>,

    /// Target add-on quantities.
    #[serde(default)]
    pub add_ons: BTreeMap<String, u32>,
}

/// Performs bulk contract novation for pricing lifecycle operations.
pub struct NovationEngine {
    services: Arc<dyn ServiceStore>,
    contracts: Arc<dyn ContractStore>,
    cache: Arc<dyn Cache>,
    resolver: Arc<PricingResolver>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for NovationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NovationEngine").finish()
    }
}

impl NovationEngine {
    /// Create a novation engine over the given collaborators.
    pub fn new(
        services: Arc<dyn ServiceStore>,
        contracts: Arc<dyn ContractStore>,
        cache: Arc<dyn Cache>,
        resolver: Arc<PricingResolver>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            services,
            contracts,
            cache,
            resolver,
            events,
        }
    }

    /// Archive a pricing version, novating affected contracts onto a
    /// fallback subscription.
    ///
    /// The fallback is required whenever contracts reference the version
    /// or it is the service's only active pricing; it must point at a
    /// different, active version, and its plan and add-ons must exist in
    /// the target pricing. Any failure leaves the active set unchanged.
    /// Returns the number of contracts novated.
    #[instrument(skip(self, fallback), fields(service = %service_name, version = %version))]
    pub async fn archive_pricing(
        &self,
        organization_id: Uuid,
        service_name: &str,
        version: &str,
        fallback: Option<FallbackSubscription>,
    ) -> EngineResult<usize> {
        let mut service = self
            .services
            .find_by_name(organization_id, service_name)
            .await
            .map_err(|err| EngineError::Store(err.to_string()))?
            .ok_or_else(|| EngineError::ServiceNotFound(service_name.to_string()))?;

        if !service.is_active(version) {
            return Err(EngineError::PricingNotFound {
                service: service_name.to_string(),
                version: version.to_string(),
            });
        }

        let affected = self
            .contracts
            .find_by_filters(&ContractFilter {
                organization_id: Some(organization_id),
                service_name: Some(service_name.to_string()),
                pricing_version: Some(version.to_string()),
            })
            .await
            .map_err(|err| EngineError::Store(err.to_string()))?;

        let last_active = service.active_pricings.len() == 1;
        if fallback.is_none() && (last_active || !affected.is_empty()) {
            return Err(EngineError::Validation(format!(
                "archiving '{version}' of '{service_name}' requires a fallback subscription"
            )));
        }

        let target = match &fallback {
            Some(fallback) => Some(
                self.validated_fallback(organization_id, service_name, version, &service, fallback)
                    .await?,
            ),
            None => None,
        };

        let now = Utc::now();
        let count = affected.len();
        if let (Some((fallback, pricing)), false) = (&target, affected.is_empty()) {
            let migrated: Vec<Contract> = affected
                .into_iter()
                .map(|mut contract| {
                    let subscription = novated_subscription(&contract, service_name, fallback);
                    contract.novate(subscription, now, None, None);
                    regenerate_usage_levels(&mut contract, service_name, pricing, now);
                    contract
                })
                .collect();

            self.persist_batch(migrated, count).await?;
        }

        service
            .archive_version(version)
            .map_err(|err| EngineError::Validation(err.to_string()))?;
        self.services
            .update(service)
            .await
            .map_err(|err| EngineError::Store(err.to_string()))?;

        self.invalidate_service(organization_id, service_name).await;
        info!(count, "pricing version archived");

        self.events
            .emit(PricingEvent::new(
                PricingEventKind::PricingArchived,
                organization_id,
                service_name,
                json!({ "version": version, "novated": count }),
            ))
            .await;

        Ok(count)
    }

    /// Remove a service, stripping it from every contract.
    ///
    /// Contracts left with no services are force-disabled. The batch
    /// persists all-or-nothing; the service is marked disabled afterwards.
    /// Returns the number of contracts touched.
    #[instrument(skip(self), fields(service = %service_name))]
    pub async fn remove_service(
        &self,
        organization_id: Uuid,
        service_name: &str,
    ) -> EngineResult<usize> {
        let mut service = self
            .services
            .find_by_name(organization_id, service_name)
            .await
            .map_err(|err| EngineError::Store(err.to_string()))?
            .ok_or_else(|| EngineError::ServiceNotFound(service_name.to_string()))?;

        let affected = self
            .contracts
            .find_by_filters(&ContractFilter {
                organization_id: Some(organization_id),
                service_name: Some(service_name.to_string()),
                pricing_version: None,
            })
            .await
            .map_err(|err| EngineError::Store(err.to_string()))?;

        let now = Utc::now();
        let count = affected.len();
        let stripped: Vec<Contract> = affected
            .into_iter()
            .map(|mut contract| {
                let mut subscription = contract.subscription();
                subscription.contracted_services.remove(service_name);
                subscription.subscription_plans.remove(service_name);
                subscription.subscription_add_ons.remove(service_name);

                contract.novate(subscription, now, None, None);
                if contract.contracted_services.is_empty() {
                    contract.force_disable(now);
                }
                contract
            })
            .collect();

        self.persist_batch(stripped, count).await?;

        service.disabled = true;
        self.services
            .update(service)
            .await
            .map_err(|err| EngineError::Store(err.to_string()))?;

        self.invalidate_service(organization_id, service_name).await;
        info!(count, "service removed");

        self.events
            .emit(PricingEvent::new(
                PricingEventKind::ServiceDisabled,
                organization_id,
                service_name,
                json!({ "novated": count }),
            ))
            .await;

        Ok(count)
    }

    /// Validate a fallback against the service's active versions and the
    /// target pricing document.
    async fn validated_fallback(
        &self,
        organization_id: Uuid,
        service_name: &str,
        archiving: &str,
        service: &pricing_core::Service,
        fallback: &FallbackSubscription,
    ) -> EngineResult<(FallbackSubscription, Pricing)> {
        if fallback.pricing_version == archiving {
            return Err(EngineError::InvalidSubscription(format!(
                "fallback cannot target the version being archived ('{archiving}')"
            )));
        }
        if !service.is_active(&fallback.pricing_version) {
            return Err(EngineError::InvalidSubscription(format!(
                "fallback version '{}' is not active on '{service_name}'",
                fallback.pricing_version
            )));
        }

        let pricing = self
            .resolver
            .resolve(organization_id, service_name, &fallback.pricing_version)
            .await?;

        if let Some(plan) = &fallback.plan {
            if pricing.plan(plan).is_none() {
                return Err(EngineError::InvalidSubscription(format!(
                    "fallback plan '{plan}' does not exist in pricing '{}'",
                    fallback.pricing_version
                )));
            }
        }
        for add_on in fallback.add_ons.keys() {
            if pricing.add_on(add_on).is_none() {
                return Err(EngineError::InvalidSubscription(format!(
                    "fallback add-on '{add_on}' does not exist in pricing '{}'",
                    fallback.pricing_version
                )));
            }
        }

        Ok((fallback.clone(), pricing))
    }

    /// Persist a novated batch all-or-nothing.
    async fn persist_batch(&self, contracts: Vec<Contract>, expected: usize) -> EngineResult<()> {
        let users: Vec<String> = contracts
            .iter()
            .map(|contract| contract.user_id.clone())
            .collect();

        let written = self
            .contracts
            .bulk_update(contracts)
            .await
            .map_err(|err| EngineError::Store(err.to_string()))?;
        if written != expected {
            return Err(EngineError::Store(format!(
                "bulk novation wrote {written} of {expected} contracts"
            )));
        }

        let mut effects = Vec::new();
        for user in users {
            effects.push(CacheEffect::Del {
                key: keys::contract(&user),
            });
            effects.push(CacheEffect::DelPattern {
                prefix: keys::user_eval(&user),
            });
        }
        apply_effects(self.cache.as_ref(), effects).await;
        Ok(())
    }

    async fn invalidate_service(&self, organization_id: Uuid, service_name: &str) {
        apply_effects(
            self.cache.as_ref(),
            vec![CacheEffect::Del {
                key: keys::service(organization_id, service_name),
            }],
        )
        .await;
    }
}

/// Replace a service's usage levels with fresh counters for the metered
/// features of the pricing it was novated onto.
fn regenerate_usage_levels(
    contract: &mut Contract,
    service_name: &str,
    pricing: &Pricing,
    now: DateTime<Utc>,
) {
    let mut levels = BTreeMap::new();
    for (name, feature) in &pricing.features {
        if let Some(period) = feature.renewal_period {
            levels.insert(
                name.clone(),
                UsageLevel::fresh(Some(period.next_reset(now))),
            );
        }
    }
    contract.usage_levels.insert(service_name.to_string(), levels);
}

/// Build the subscription a contract would hold after novating one
/// service onto a fallback. Does not mutate the contract, so callers can
/// also use it to preview a novation outcome.
pub fn novated_subscription(
    contract: &Contract,
    service_name: &str,
    fallback: &FallbackSubscription,
) -> Subscription {
    let mut subscription = contract.subscription();
    subscription
        .contracted_services
        .insert(service_name.to_string(), fallback.pricing_version.clone());
    subscription
        .subscription_plans
        .insert(service_name.to_string(), fallback.plan.clone());
    subscription
        .subscription_add_ons
        .insert(service_name.to_string(), fallback.add_ons.clone());
    subscription
}
