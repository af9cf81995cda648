//! Feature evaluation orchestrator
//!
//! Ties the other modules together: loads the contract, gates on billing
//! validity, resolves every contracted pricing, refreshes usage levels,
//! builds the three flat contexts, and evaluates every feature (or one
//! feature, with optional consumption) against them. Aggregate results are
//! cached per user for an hour; any state change invalidates that cache
//! before the next evaluation reads it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use pricing_core::{Contract, FeatureDefinition, Pricing, ValueType};
use pricing_expr::Value;

use crate::cache::{apply_effects, keys, Cache, CacheEffect};
use crate::context::{
    flatten_configurations_into_pricing_context, flatten_feature_evaluations_into_evaluation_context,
    flatten_usage_levels_into_subscription_context, to_expr_value, EvaluationContext,
    PricingContext, ServiceConfiguration, SubscriptionContext,
};
use crate::error::{EngineError, EngineResult};
use crate::resolver::PricingResolver;
use crate::store::{ContractStore, ServiceStore};
use crate::usage::{record_consumption, refresh_usage_levels, revert_consumption, ConsumptionOutcome};

/// TTL for cached evaluation results.
const EVAL_CACHE_TTL_SECS: u64 = 3600;

/// Options for a full evaluation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvaluationOptions {
    /// Include the evaluated expression alongside each result.
    pub details: bool,

    /// Use server-side expressions (the default are client-side ones,
    /// safe to hand to browsers).
    pub server: bool,

    /// Return the flattened contexts alongside the results.
    pub return_contexts: bool,
}

/// Options for a single-feature evaluation.
#[derive(Debug, Clone, Default)]
pub struct ConsumeOptions {
    /// Expected consumption per metric, applied before evaluation.
    pub expected: BTreeMap<String, f64>,

    /// Undo consumption instead of evaluating.
    pub revert: bool,

    /// With `revert`, undo only the most recent increment.
    pub latest: bool,

    /// Use server-side expressions.
    pub server: bool,
}

/// Result of evaluating one feature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureEvaluation {
    /// The evaluated value (boolean gate or numeric entitlement).
    pub eval: Value,

    /// Consumed amount, when the feature is usage-tracked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used: Option<f64>,

    /// Applicable limit, when the feature is limited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,

    /// The expression that produced `eval` (detailed mode only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

/// The flattened contexts an evaluation ran against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationContexts {
    /// Usage view.
    pub subscription: SubscriptionContext,

    /// Merged plan + add-on view.
    pub pricing: PricingContext,

    /// Selected expression per feature.
    pub evaluation: EvaluationContext,
}

/// A full evaluation pass over every contracted feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSummary {
    /// Evaluated user.
    pub user_id: String,

    /// `"<service>.<feature>"` -> evaluation result.
    pub evaluations: BTreeMap<String, FeatureEvaluation>,

    /// The contexts used, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contexts: Option<EvaluationContexts>,
}

/// Result of a single-feature call.
#[derive(Debug, Clone, PartialEq)]
pub enum SingleEvaluation {
    /// Consumption was reverted; no evaluation ran.
    Reverted {
        /// Amount reverted.
        amount: f64,
    },

    /// The feature was evaluated (after any requested consumption).
    Evaluated(FeatureEvaluation),
}

/// Which pricing versions of a service to list features from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShowPricings {
    /// Only versions currently subscribable.
    #[default]
    Active,
    /// Only retired versions.
    Archived,
    /// Both.
    All,
}

/// Sort key for feature listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FeatureSortKey {
    /// Sort by feature name.
    #[default]
    FeatureName,
    /// Sort by service name.
    ServiceName,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

/// Query parameters for the feature catalog listing.
#[derive(Debug, Clone)]
pub struct FeatureQuery {
    /// Case-insensitive substring match on feature name.
    pub feature_name: Option<String>,

    /// Case-insensitive substring match on service name.
    pub service_name: Option<String>,

    /// Exact pricing version match.
    pub pricing_version: Option<String>,

    /// Sort key.
    pub sort: FeatureSortKey,

    /// Sort direction.
    pub order: SortOrder,

    /// Which pricing versions to include.
    pub show: ShowPricings,

    /// Explicit offset; when zero, derived from `page`.
    pub offset: usize,

    /// 1-based page number, used when `offset` is zero.
    pub page: usize,

    /// Page size.
    pub limit: usize,
}

impl Default for FeatureQuery {
    fn default() -> Self {
        Self {
            feature_name: None,
            service_name: None,
            pricing_version: None,
            sort: FeatureSortKey::default(),
            order: SortOrder::default(),
            show: ShowPricings::default(),
            offset: 0,
            page: 1,
            limit: 20,
        }
    }
}

impl FeatureQuery {
    fn effective_offset(&self) -> usize {
        if self.offset > 0 {
            self.offset
        } else {
            self.page.saturating_sub(1) * self.limit
        }
    }
}

/// One entry in the feature catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCatalogEntry {
    /// Owning service.
    pub service_name: String,

    /// Pricing version the definition comes from.
    pub pricing_version: String,

    /// The feature definition itself.
    pub feature: FeatureDefinition,
}

/// A page of listing results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// The page contents.
    pub items: Vec<T>,

    /// Total matching entries before pagination.
    pub total: usize,

    /// Offset this page starts at.
    pub offset: usize,

    /// Requested page size.
    pub limit: usize,
}

/// The feature evaluation orchestrator.
pub struct FeatureEvaluator {
    services: Arc<dyn ServiceStore>,
    contracts: Arc<dyn ContractStore>,
    cache: Arc<dyn Cache>,
    resolver: Arc<PricingResolver>,
}

impl std::fmt::Debug for FeatureEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureEvaluator").finish()
    }
}

impl FeatureEvaluator {
    /// Create an evaluator over the given stores, cache, and resolver.
    pub fn new(
        services: Arc<dyn ServiceStore>,
        contracts: Arc<dyn ContractStore>,
        cache: Arc<dyn Cache>,
        resolver: Arc<PricingResolver>,
    ) -> Self {
        Self {
            services,
            contracts,
            cache,
            resolver,
        }
    }

    /// Evaluate every feature the user is contracted for.
    ///
    /// The contract must be within its billing period; expired contracts
    /// with auto-renew are transparently renewed (recording the previous
    /// period in history), others fail with
    /// [`EngineError::SubscriptionExpired`]. Plain results (no details, no
    /// contexts) are cached per user for an hour.
    #[instrument(skip(self, options), fields(user = %user_id))]
    pub async fn evaluate_all(
        &self,
        organization_id: Uuid,
        user_id: &str,
        options: &EvaluationOptions,
    ) -> EngineResult<EvaluationSummary> {
        let now = Utc::now();
        let mut contract = self.load_contract(organization_id, user_id).await?;
        let mut effects = Vec::new();

        let mut dirty = self.ensure_within_period(&mut contract, now, &mut effects)?;

        let pricings = self.resolver.resolve_contracted(&contract).await?;

        let (reset_effects, reset) = refresh_usage_levels(&mut contract, &pricings, now);
        effects.extend(reset_effects);
        dirty |= reset;

        if dirty {
            self.persist_contract(&contract, &mut effects).await?;
        }

        // Invalidations must land before the aggregate cache is consulted.
        apply_effects(self.cache.as_ref(), std::mem::take(&mut effects)).await;

        let plain = !options.details && !options.return_contexts;
        if plain {
            if let Ok(Some(cached)) = self.cache.get(&keys::user_eval(user_id)).await {
                if let Ok(summary) = serde_json::from_value::<EvaluationSummary>(cached) {
                    debug!("evaluation cache hit");
                    return Ok(summary);
                }
            }
        }

        let contexts = Contexts::build(&contract, &pricings, options.server);
        let mut evaluations = BTreeMap::new();
        for (service, pricing) in &pricings {
            for (name, feature) in &pricing.features {
                let key = format!("{service}.{name}");
                let evaluation =
                    contexts.evaluate_feature(&contract, service, feature, options.details)?;
                evaluations.insert(key, evaluation);
            }
        }

        let mut summary = EvaluationSummary {
            user_id: user_id.to_string(),
            evaluations,
            contexts: None,
        };

        if !options.details {
            if let Ok(value) = serde_json::to_value(&summary) {
                effects.push(CacheEffect::Set {
                    key: keys::user_eval(user_id),
                    value,
                    ttl_secs: EVAL_CACHE_TTL_SECS,
                    overwrite: true,
                });
            }
        }
        apply_effects(self.cache.as_ref(), effects).await;

        if options.return_contexts {
            summary.contexts = Some(contexts.into_envelope());
        }
        Ok(summary)
    }

    /// Evaluate one feature, optionally consuming usage first.
    ///
    /// With `expected` consumption, the increment is gated by the feature's
    /// limit: crossing it leaves the counter untouched and returns a
    /// failing evaluation instead of an error. With `revert`, consumption
    /// is undone (the most recent increment when `latest`) and no
    /// evaluation runs.
    #[instrument(skip(self, options), fields(user = %user_id, feature = %feature_name))]
    pub async fn evaluate_feature(
        &self,
        organization_id: Uuid,
        user_id: &str,
        feature_name: &str,
        options: &ConsumeOptions,
    ) -> EngineResult<SingleEvaluation> {
        let now = Utc::now();
        let mut contract = self.load_contract(organization_id, user_id).await?;
        let mut effects = Vec::new();

        let mut dirty = self.ensure_within_period(&mut contract, now, &mut effects)?;

        let pricings = self.resolver.resolve_contracted(&contract).await?;

        let (reset_effects, reset) = refresh_usage_levels(&mut contract, &pricings, now);
        effects.extend(reset_effects);
        dirty |= reset;

        // First service whose pricing defines the feature owns it.
        let (service, feature) = pricings
            .iter()
            .find_map(|(service, pricing)| {
                pricing
                    .feature(feature_name)
                    .map(|feature| (service.clone(), feature.clone()))
            })
            .ok_or_else(|| EngineError::FeatureNotFound(feature_name.to_string()))?;

        if options.revert {
            let amount = revert_consumption(&mut contract, &service, feature_name, options.latest);
            self.persist_contract(&contract, &mut effects).await?;
            effects.push(CacheEffect::DelPattern {
                prefix: keys::user_eval(user_id),
            });
            apply_effects(self.cache.as_ref(), effects).await;
            return Ok(SingleEvaluation::Reverted { amount });
        }

        let contexts = Contexts::build(&contract, &pricings, options.server);
        let limit = contexts.limit_for(&service, &feature);

        let requested: f64 = options.expected.values().sum();
        if requested > 0.0 {
            let outcome = record_consumption(
                &mut contract,
                &service,
                feature_name,
                requested,
                limit,
                feature.allow_overage,
            );
            match outcome {
                ConsumptionOutcome::LimitReached { used, limit } => {
                    // The refused increment changed nothing, but an earlier
                    // renewal or usage reset still has to land.
                    if dirty {
                        self.persist_contract(&contract, &mut effects).await?;
                    }
                    apply_effects(self.cache.as_ref(), effects).await;
                    return Ok(SingleEvaluation::Evaluated(FeatureEvaluation {
                        eval: Value::Bool(false),
                        used: Some(used),
                        limit: Some(limit),
                        expression: None,
                    }));
                }
                ConsumptionOutcome::Applied { .. } => {
                    dirty = true;
                    effects.push(CacheEffect::DelPattern {
                        prefix: keys::user_eval(user_id),
                    });
                }
            }
        }

        if dirty {
            self.persist_contract(&contract, &mut effects).await?;
        }
        apply_effects(self.cache.as_ref(), std::mem::take(&mut effects)).await;

        if requested == 0.0 {
            let key = keys::feature_eval(user_id, feature_name);
            if let Ok(Some(cached)) = self.cache.get(&key).await {
                if let Ok(evaluation) = serde_json::from_value::<FeatureEvaluation>(cached) {
                    debug!("feature evaluation cache hit");
                    return Ok(SingleEvaluation::Evaluated(evaluation));
                }
            }
        }

        // Consumption changed the usage view, so rebuild before evaluating.
        let contexts = Contexts::build(&contract, &pricings, options.server);
        let evaluation = contexts.evaluate_feature(&contract, &service, &feature, false)?;

        if let Ok(value) = serde_json::to_value(&evaluation) {
            effects.push(CacheEffect::Set {
                key: keys::feature_eval(user_id, feature_name),
                value,
                ttl_secs: EVAL_CACHE_TTL_SECS,
                overwrite: true,
            });
        }
        apply_effects(self.cache.as_ref(), effects).await;

        Ok(SingleEvaluation::Evaluated(evaluation))
    }

    /// List feature definitions across an organization's services.
    ///
    /// Walks every non-disabled service, resolves the selected pricing
    /// versions, and returns matching definitions sorted and paginated.
    /// Resolution failures fail the listing.
    #[instrument(skip(self, query))]
    pub async fn list_features(
        &self,
        organization_id: Uuid,
        query: &FeatureQuery,
    ) -> EngineResult<Page<FeatureCatalogEntry>> {
        let services = self
            .services
            .find_all(organization_id)
            .await
            .map_err(|err| EngineError::Store(err.to_string()))?;

        let mut entries = Vec::new();
        for service in services.iter().filter(|service| !service.disabled) {
            if let Some(filter) = &query.service_name {
                if !service
                    .name
                    .to_lowercase()
                    .contains(&filter.to_lowercase())
                {
                    continue;
                }
            }

            let mut versions: Vec<(&String, &pricing_core::PricingLocator)> = Vec::new();
            if query.show != ShowPricings::Archived {
                versions.extend(service.active_pricings.iter());
            }
            if query.show != ShowPricings::Active {
                versions.extend(service.archived_pricings.iter());
            }

            for (version, locator) in versions {
                if let Some(wanted) = &query.pricing_version {
                    if version != wanted {
                        continue;
                    }
                }

                let pricing = self
                    .resolver
                    .resolve_locator(&service.name, version, locator)
                    .await?;

                for feature in pricing.features.values() {
                    if let Some(filter) = &query.feature_name {
                        if !feature.name.to_lowercase().contains(&filter.to_lowercase()) {
                            continue;
                        }
                    }
                    entries.push(FeatureCatalogEntry {
                        service_name: service.name.clone(),
                        pricing_version: version.clone(),
                        feature: feature.clone(),
                    });
                }
            }
        }

        entries.sort_by(|a, b| {
            let ordering = match query.sort {
                FeatureSortKey::FeatureName => (a.feature.name.to_lowercase(), &a.service_name)
                    .cmp(&(b.feature.name.to_lowercase(), &b.service_name)),
                FeatureSortKey::ServiceName => {
                    (a.service_name.to_lowercase(), &a.feature.name)
                        .cmp(&(b.service_name.to_lowercase(), &b.feature.name))
                }
            };
            match query.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        let total = entries.len();
        let offset = query.effective_offset();
        let items = entries
            .into_iter()
            .skip(offset)
            .take(query.limit)
            .collect();

        Ok(Page {
            items,
            total,
            offset,
            limit: query.limit,
        })
    }

    async fn load_contract(
        &self,
        organization_id: Uuid,
        user_id: &str,
    ) -> EngineResult<Contract> {
        let key = keys::contract(user_id);
        if let Ok(Some(cached)) = self.cache.get(&key).await {
            if let Ok(contract) = serde_json::from_value::<Contract>(cached) {
                return Ok(contract);
            }
        }

        let contract = self
            .contracts
            .find_by_user_id(organization_id, user_id)
            .await
            .map_err(|err| EngineError::Store(err.to_string()))?
            .ok_or_else(|| EngineError::ContractNotFound(user_id.to_string()))?;

        if let Ok(value) = serde_json::to_value(&contract) {
            let _ = self
                .cache
                .set(&key, value, EVAL_CACHE_TTL_SECS, true)
                .await;
        }
        Ok(contract)
    }

    /// Gate on billing validity; expired + auto-renew renews in place.
    fn ensure_within_period(
        &self,
        contract: &mut Contract,
        now: DateTime<Utc>,
        effects: &mut Vec<CacheEffect>,
    ) -> EngineResult<bool> {
        if !contract.billing_period.is_expired(now) {
            return Ok(false);
        }
        if !contract.billing_period.auto_renew {
            return Err(EngineError::SubscriptionExpired(contract.user_id.clone()));
        }

        contract.renew(now);
        effects.push(CacheEffect::DelPattern {
            prefix: keys::user_eval(&contract.user_id),
        });
        Ok(true)
    }

    async fn persist_contract(
        &self,
        contract: &Contract,
        effects: &mut Vec<CacheEffect>,
    ) -> EngineResult<()> {
        self.contracts
            .update(contract.clone())
            .await
            .map_err(|err| EngineError::Store(err.to_string()))?;
        effects.push(CacheEffect::Del {
            key: keys::contract(&contract.user_id),
        });
        Ok(())
    }
}

/// The three flat contexts plus the variable map derived from them.
struct Contexts {
    subscription: SubscriptionContext,
    pricing: PricingContext,
    evaluation: EvaluationContext,
    variables: HashMap<String, Value>,
}

impl Contexts {
    fn build(contract: &Contract, pricings: &BTreeMap<String, Pricing>, server: bool) -> Self {
        let subscription = flatten_usage_levels_into_subscription_context(&contract.usage_levels);

        let empty_add_ons = BTreeMap::new();
        let mut configurations = BTreeMap::new();
        for service in contract.contracted_services.keys() {
            let Some(pricing) = pricings.get(service) else {
                continue;
            };
            configurations.insert(
                service.clone(),
                ServiceConfiguration {
                    pricing,
                    plan: contract
                        .subscription_plans
                        .get(service)
                        .and_then(|plan| plan.as_deref()),
                    add_ons: contract
                        .subscription_add_ons
                        .get(service)
                        .unwrap_or(&empty_add_ons),
                },
            );
        }
        let pricing_context = flatten_configurations_into_pricing_context(&configurations);

        let by_service: BTreeMap<String, &Pricing> = pricings
            .iter()
            .map(|(service, pricing)| (service.clone(), pricing))
            .collect();
        let evaluation = flatten_feature_evaluations_into_evaluation_context(&by_service, server);

        // Variable map: pricing values, then usage on top, then feature
        // defaults and zeroed usage for anything still absent.
        let mut variables: HashMap<String, Value> = HashMap::new();
        for (key, value) in &pricing_context {
            variables.insert(key.clone(), value.clone());
        }
        for (key, value) in &subscription {
            variables.insert(key.clone(), value.clone());
        }
        for (service, pricing) in pricings {
            for (name, feature) in &pricing.features {
                variables
                    .entry(format!("{service}.{name}"))
                    .or_insert_with(|| to_expr_value(&feature.default_value));
                variables
                    .entry(format!("{service}.usage.{name}"))
                    .or_insert(Value::Number(0.0));
            }
        }

        Self {
            subscription,
            pricing: pricing_context,
            evaluation,
            variables,
        }
    }

    /// The limit governing a feature: an explicit merged usage limit, or
    /// the numeric feature value itself.
    fn limit_for(&self, service: &str, feature: &FeatureDefinition) -> Option<f64> {
        let explicit = self
            .pricing
            .get(&format!("{service}.limit.{}", feature.name))
            .and_then(Value::as_number);
        if explicit.is_some() {
            return explicit;
        }
        if feature.value_type == ValueType::Numeric {
            return self
                .variables
                .get(&format!("{service}.{}", feature.name))
                .and_then(Value::as_number)
                .or_else(|| feature.default_value.as_number());
        }
        None
    }

    fn evaluate_feature(
        &self,
        contract: &Contract,
        service: &str,
        feature: &FeatureDefinition,
        details: bool,
    ) -> EngineResult<FeatureEvaluation> {
        let key = format!("{service}.{}", feature.name);

        let eval = match self.evaluation.get(&key) {
            Some(expression) => pricing_expr::evaluate(expression, &self.variables)?,
            // No expression: the configured (or default) value stands.
            None => self
                .variables
                .get(&key)
                .cloned()
                .unwrap_or_else(|| to_expr_value(&feature.default_value)),
        };

        Ok(FeatureEvaluation {
            eval,
            used: contract
                .usage_level(service, &feature.name)
                .map(|level| level.consumed),
            limit: self.limit_for(service, feature),
            expression: details.then(|| self.evaluation.get(&key).cloned()).flatten(),
        })
    }

    fn into_envelope(self) -> EvaluationContexts {
        EvaluationContexts {
            subscription: self.subscription,
            pricing: self.pricing,
            evaluation: self.evaluation,
        }
    }
}
