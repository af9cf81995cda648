//! Context flattening
//!
//! Pure functions that convert nested per-service pricing, subscription,
//! and usage structures into the flat dotted-key contexts the expression
//! evaluator consumes. Contexts are request-scoped and never persisted.
//!
//! Key scheme:
//! - `"<service>.<feature>"` — merged plan + add-on feature value
//! - `"<service>.limit.<feature>"` — merged usage limit
//! - `"<service>.usage.<feature>"` — consumed amount
//! - `"<service>.usage.<feature>.resetTimestamp"` — next reset, RFC 3339

use std::collections::BTreeMap;

use pricing_core::{FeatureValue, Pricing, UsageLevel};
use pricing_expr::Value;

/// Flat usage view: `"<service>.usage.<feature>"` keys.
pub type SubscriptionContext = BTreeMap<String, Value>;

/// Flat merged pricing view: feature values and limits.
pub type PricingContext = BTreeMap<String, Value>;

/// Flat expression view: `"<service>.<feature>"` -> expression source.
pub type EvaluationContext = BTreeMap<String, String>;

/// One contracted service's resolved configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfiguration<'a> {
    /// The resolved pricing document.
    pub pricing: &'a Pricing,

    /// Subscribed plan name, if any.
    pub plan: Option<&'a str>,

    /// Purchased add-on quantities.
    pub add_ons: &'a BTreeMap<String, u32>,
}

pub(crate) fn to_expr_value(value: &FeatureValue) -> Value {
    match value {
        FeatureValue::Bool(b) => Value::Bool(*b),
        FeatureValue::Number(n) => Value::Number(*n),
        FeatureValue::Text(s) => Value::Text(s.clone()),
    }
}

/// Flatten per-service usage levels into a subscription context.
///
/// Emits `used` for every tracked feature and `resetTimestamp` when one
/// is present.
pub fn flatten_usage_levels_into_subscription_context(
    usage_levels: &BTreeMap<String, BTreeMap<String, UsageLevel>>,
) -> SubscriptionContext {
    let mut context = SubscriptionContext::new();

    for (service, levels) in usage_levels {
        for (feature, level) in levels {
            context.insert(
                format!("{service}.usage.{feature}"),
                Value::Number(level.consumed),
            );
            if let Some(reset) = level.reset_timestamp {
                context.insert(
                    format!("{service}.usage.{feature}.resetTimestamp"),
                    Value::Text(reset.to_rfc3339()),
                );
            }
        }
    }

    context
}

/// Flatten resolved service configurations into a pricing context.
///
/// For each service, the subscribed plan's feature values are merged with
/// add-on effects: numeric values gain `quantity * value`, boolean and
/// text values are overridden whenever quantity is positive. Usage limits
/// merge the same way from `usage_limits` and add-on extensions.
///
/// A service whose plan name does not exist in its pricing (or with no
/// plan and no purchased add-ons) contributes no keys; feature defaults
/// apply downstream. This never fails.
pub fn flatten_configurations_into_pricing_context(
    configurations: &BTreeMap<String, ServiceConfiguration<'_>>,
) -> PricingContext {
    let mut context = PricingContext::new();

    for (service, config) in configurations {
        let mut values: BTreeMap<&str, FeatureValue> = BTreeMap::new();
        let mut limits: BTreeMap<&str, f64> = BTreeMap::new();

        if let Some(plan) = config.plan.and_then(|name| config.pricing.plan(name)) {
            for (feature, value) in &plan.features {
                values.insert(feature, value.clone());
            }
            for (feature, limit) in &plan.usage_limits {
                limits.insert(feature, *limit);
            }
        }

        for (add_on_name, quantity) in config.add_ons {
            if *quantity == 0 {
                continue;
            }
            let Some(add_on) = config.pricing.add_on(add_on_name) else {
                continue;
            };

            for (feature, value) in &add_on.features {
                match value {
                    FeatureValue::Number(delta) => {
                        let base = values
                            .get(feature.as_str())
                            .and_then(|v| v.as_number())
                            .unwrap_or(0.0);
                        values.insert(
                            feature,
                            FeatureValue::Number(base + *delta * f64::from(*quantity)),
                        );
                    }
                    other => {
                        values.insert(feature, other.clone());
                    }
                }
            }
            for (feature, extension) in &add_on.usage_limit_extensions {
                let base = limits.get(feature.as_str()).copied().unwrap_or(0.0);
                limits.insert(feature, base + *extension * f64::from(*quantity));
            }
        }

        for (feature, value) in values {
            context.insert(format!("{service}.{feature}"), to_expr_value(&value));
        }
        for (feature, limit) in limits {
            context.insert(format!("{service}.limit.{feature}"), Value::Number(limit));
        }
    }

    context
}

/// Flatten per-service feature expressions into an evaluation context.
///
/// Selects, per feature, the server-side or client-side expression
/// variant. Features without any expression are omitted; the orchestrator
/// evaluates those directly from their configured value.
pub fn flatten_feature_evaluations_into_evaluation_context(
    pricings_by_service: &BTreeMap<String, &Pricing>,
    server: bool,
) -> EvaluationContext {
    let mut context = EvaluationContext::new();

    for (service, pricing) in pricings_by_service {
        for (feature_name, feature) in &pricing.features {
            if let Some(expression) = feature.expression_for(server) {
                context.insert(
                    format!("{service}.{feature_name}"),
                    expression.to_string(),
                );
            }
        }
    }

    context
}
