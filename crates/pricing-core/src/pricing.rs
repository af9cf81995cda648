//! Versioned pricing catalogs
//!
//! A pricing is an immutable snapshot of a service's plans, add-ons, and
//! feature definitions, identified by `(service name, version)`. All maps
//! are `BTreeMap` so iteration order is deterministic everywhere a pricing
//! is flattened or listed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::feature::{FeatureDefinition, FeatureValue};

/// Structural validation errors for a pricing document.
#[derive(Debug, Error)]
pub enum PricingValidationError {
    /// A plan references a feature that is not defined in `features`.
    #[error("plan '{plan}' references undefined feature '{feature}'")]
    UndefinedPlanFeature {
        /// Plan name.
        plan: String,
        /// Missing feature name.
        feature: String,
    },

    /// An add-on references a feature that is not defined in `features`.
    #[error("add-on '{add_on}' references undefined feature '{feature}'")]
    UndefinedAddOnFeature {
        /// Add-on name.
        add_on: String,
        /// Missing feature name.
        feature: String,
    },

    /// Pricing has neither plans nor add-ons.
    #[error("pricing '{version}' defines no plans and no add-ons")]
    Empty {
        /// Pricing version.
        version: String,
    },
}

/// A subscription plan within a pricing.
///
/// Maps feature names to the value the plan grants, plus optional
/// per-feature usage limits for metered features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Monthly price
    pub price: f64,

    /// Feature values granted by this plan
    #[serde(default)]
    pub features: BTreeMap<String, FeatureValue>,

    /// Usage limits for metered features
    #[serde(default)]
    pub usage_limits: BTreeMap<String, f64>,
}

/// An add-on within a pricing.
///
/// Add-on values apply per purchased unit: numeric values add
/// `quantity * value` to the plan's base, boolean and text values override
/// the base whenever quantity is positive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddOn {
    /// Price per unit
    pub price: f64,

    /// Feature deltas/overrides applied per unit
    #[serde(default)]
    pub features: BTreeMap<String, FeatureValue>,

    /// Usage limit extensions applied per unit
    #[serde(default)]
    pub usage_limit_extensions: BTreeMap<String, f64>,
}

/// A versioned pricing catalog for one service.
///
/// Immutable once published. A pricing without plans is add-on-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pricing {
    /// Version string (e.g. "1.0.0")
    pub version: String,

    /// ISO currency code
    pub currency: String,

    /// When this pricing was published
    pub created_at: DateTime<Utc>,

    /// Subscription plans by name
    #[serde(default)]
    pub plans: BTreeMap<String, Plan>,

    /// Add-ons by name
    #[serde(default)]
    pub add_ons: BTreeMap<String, AddOn>,

    /// Feature catalog by name
    #[serde(default)]
    pub features: BTreeMap<String, FeatureDefinition>,
}

impl Pricing {
    /// Create an empty pricing with the given version and currency.
    pub fn new(version: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            currency: currency.into(),
            created_at: Utc::now(),
            plans: BTreeMap::new(),
            add_ons: BTreeMap::new(),
            features: BTreeMap::new(),
        }
    }

    /// Validate structural invariants.
    ///
    /// Every feature referenced by a plan or add-on (values or usage
    /// limits) must exist in the feature catalog, and the pricing must
    /// define at least one plan or add-on.
    pub fn validate(&self) -> Result<(), PricingValidationError> {
        if self.plans.is_empty() && self.add_ons.is_empty() {
            return Err(PricingValidationError::Empty {
                version: self.version.clone(),
            });
        }

        for (plan_name, plan) in &self.plans {
            for feature in plan.features.keys().chain(plan.usage_limits.keys()) {
                if !self.features.contains_key(feature) {
                    return Err(PricingValidationError::UndefinedPlanFeature {
                        plan: plan_name.clone(),
                        feature: feature.clone(),
                    });
                }
            }
        }

        for (add_on_name, add_on) in &self.add_ons {
            for feature in add_on
                .features
                .keys()
                .chain(add_on.usage_limit_extensions.keys())
            {
                if !self.features.contains_key(feature) {
                    return Err(PricingValidationError::UndefinedAddOnFeature {
                        add_on: add_on_name.clone(),
                        feature: feature.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Look up a feature definition by name.
    pub fn feature(&self, name: &str) -> Option<&FeatureDefinition> {
        self.features.get(name)
    }

    /// Look up a plan by name.
    pub fn plan(&self, name: &str) -> Option<&Plan> {
        self.plans.get(name)
    }

    /// Look up an add-on by name.
    pub fn add_on(&self, name: &str) -> Option<&AddOn> {
        self.add_ons.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::FeatureDefinition;

    fn basic_pricing() -> Pricing {
        let mut pricing = Pricing::new("1.0.0", "USD");
        pricing
            .features
            .insert("maxSeats".into(), FeatureDefinition::numeric("maxSeats", 0.0));
        pricing.plans.insert(
            "BASIC".into(),
            Plan {
                price: 9.99,
                features: BTreeMap::from([("maxSeats".into(), FeatureValue::Number(10.0))]),
                usage_limits: BTreeMap::new(),
            },
        );
        pricing
    }

    #[test]
    fn test_validate_ok() {
        assert!(basic_pricing().validate().is_ok());
    }

    #[test]
    fn test_validate_undefined_plan_feature() {
        let mut pricing = basic_pricing();
        pricing
            .plans
            .get_mut("BASIC")
            .unwrap()
            .features
            .insert("ghost".into(), FeatureValue::Bool(true));

        let err = pricing.validate().unwrap_err();
        assert!(matches!(
            err,
            PricingValidationError::UndefinedPlanFeature { ref feature, .. } if feature == "ghost"
        ));
    }

    #[test]
    fn test_validate_undefined_addon_feature() {
        let mut pricing = basic_pricing();
        pricing.add_ons.insert(
            "extraSeats".into(),
            AddOn {
                price: 2.0,
                features: BTreeMap::from([("ghost".into(), FeatureValue::Number(1.0))]),
                usage_limit_extensions: BTreeMap::new(),
            },
        );

        let err = pricing.validate().unwrap_err();
        assert!(matches!(
            err,
            PricingValidationError::UndefinedAddOnFeature { ref feature, .. } if feature == "ghost"
        ));
    }

    #[test]
    fn test_validate_empty_pricing() {
        let pricing = Pricing::new("2.0.0", "USD");
        assert!(matches!(
            pricing.validate().unwrap_err(),
            PricingValidationError::Empty { .. }
        ));
    }

    #[test]
    fn test_addon_only_pricing_is_valid() {
        let mut pricing = Pricing::new("1.0.0", "USD");
        pricing
            .features
            .insert("extra".into(), FeatureDefinition::numeric("extra", 0.0));
        pricing.add_ons.insert(
            "extra".into(),
            AddOn {
                price: 1.0,
                features: BTreeMap::from([("extra".into(), FeatureValue::Number(5.0))]),
                usage_limit_extensions: BTreeMap::new(),
            },
        );
        assert!(pricing.validate().is_ok());
    }

    #[test]
    fn test_deterministic_iteration() {
        let mut pricing = Pricing::new("1.0.0", "USD");
        pricing
            .features
            .insert("zeta".into(), FeatureDefinition::boolean("zeta", false));
        pricing
            .features
            .insert("alpha".into(), FeatureDefinition::boolean("alpha", false));

        let names: Vec<&String> = pricing.features.keys().collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
