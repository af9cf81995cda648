//! Usage-level lifecycle
//!
//! Consumption counters move through a lazy state machine: ACTIVE while
//! the reset timestamp lies ahead, EXPIRED once it passes, back to ACTIVE
//! when a context build resets the counter. There is no background timer;
//! expiry is handled on every context build. Every reset invalidates the
//! per-user evaluation cache before new contexts are built, so stale
//! `used` values never leak into a fresh evaluation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use pricing_core::{Contract, Pricing};

use crate::cache::{keys, CacheEffect};

/// Outcome of a consumption attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumptionOutcome {
    /// The increment was applied.
    Applied {
        /// Total consumed after the increment.
        used: f64,
        /// The applicable limit, if the feature is limited.
        limit: Option<f64>,
    },

    /// Applying the increment would cross the limit; nothing was
    /// persisted. Callers report this through the result's `limit`
    /// field, not as an error, so "evaluated" and "rejected" stay
    /// distinguishable.
    LimitReached {
        /// Consumed amount, unchanged.
        used: f64,
        /// The limit that would have been crossed.
        limit: f64,
    },
}

/// Reset every expired usage level on the contract.
///
/// The new reset timestamp comes from the feature's renewal period; a
/// feature without one simply stops being tracked until consumption
/// recreates the level. Returns the cache effects to apply (one
/// evaluation-cache invalidation per reset) and whether anything changed.
pub fn refresh_usage_levels(
    contract: &mut Contract,
    pricings: &BTreeMap<String, Pricing>,
    now: DateTime<Utc>,
) -> (Vec<CacheEffect>, bool) {
    let mut effects = Vec::new();
    let mut changed = false;

    for (service, levels) in contract.usage_levels.iter_mut() {
        for (feature_name, level) in levels.iter_mut() {
            if !level.is_expired(now) {
                continue;
            }

            let next_reset = pricings
                .get(service)
                .and_then(|pricing| pricing.feature(feature_name))
                .and_then(|feature| feature.renewal_period)
                .map(|period| period.next_reset(now));

            level.reset(next_reset);
            changed = true;

            // Invalidate before the new context is built.
            effects.push(CacheEffect::DelPattern {
                prefix: keys::user_eval(&contract.user_id),
            });
        }
    }

    (effects, changed)
}

/// Record consumption against one feature's usage level.
///
/// Refuses to cross `limit` unless the feature allows overage: in that
/// case nothing is recorded and the caller receives
/// [`ConsumptionOutcome::LimitReached`].
pub fn record_consumption(
    contract: &mut Contract,
    service: &str,
    feature: &str,
    amount: f64,
    limit: Option<f64>,
    allow_overage: bool,
) -> ConsumptionOutcome {
    let level = contract.usage_level_mut(service, feature);

    if let Some(limit) = limit {
        if !allow_overage && level.consumed + amount > limit {
            return ConsumptionOutcome::LimitReached {
                used: level.consumed,
                limit,
            };
        }
    }

    level.record(amount);
    ConsumptionOutcome::Applied {
        used: level.consumed,
        limit,
    }
}

/// Revert consumption for one feature.
///
/// With `latest`, only the most recent increment is undone; otherwise all
/// recorded consumption is cleared. Returns the amount reverted.
pub fn revert_consumption(
    contract: &mut Contract,
    service: &str,
    feature: &str,
    latest: bool,
) -> f64 {
    contract.usage_level_mut(service, feature).revert(latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pricing_core::{BillingPeriod, FeatureDefinition, RenewalPeriod, UsageLevel};
    use uuid::Uuid;

    fn contract_with_usage(reset: Option<DateTime<Utc>>) -> Contract {
        let now = Utc::now();
        let mut contract =
            Contract::new("u1", Uuid::now_v7(), BillingPeriod::starting(now, 30, true));
        contract.subscribe("acme", "1.0.0", Some("BASIC".to_string()));
        let mut level = UsageLevel::fresh(reset);
        level.record(9.0);
        contract
            .usage_levels
            .get_mut("acme")
            .unwrap()
            .insert("apiCalls".to_string(), level);
        contract
    }

    fn pricing_with_renewal() -> BTreeMap<String, Pricing> {
        let mut pricing = Pricing::new("1.0.0", "USD");
        pricing.features.insert(
            "apiCalls".into(),
            FeatureDefinition::numeric("apiCalls", 0.0)
                .with_renewal_period(RenewalPeriod::Monthly),
        );
        pricing.plans.insert(
            "BASIC".into(),
            pricing_core::Plan {
                price: 0.0,
                features: BTreeMap::new(),
                usage_limits: BTreeMap::from([("apiCalls".into(), 100.0)]),
            },
        );
        BTreeMap::from([("acme".to_string(), pricing)])
    }

    #[test]
    fn test_expired_level_resets_with_new_timestamp() {
        let now = Utc::now();
        let mut contract = contract_with_usage(Some(now - Duration::hours(1)));
        let pricings = pricing_with_renewal();

        let (effects, changed) = refresh_usage_levels(&mut contract, &pricings, now);

        assert!(changed);
        let level = contract.usage_level("acme", "apiCalls").unwrap();
        assert_eq!(level.consumed, 0.0);
        assert_eq!(level.reset_timestamp, Some(now + Duration::days(30)));
        assert_eq!(
            effects,
            vec![CacheEffect::DelPattern {
                prefix: "features.u1.eval".to_string()
            }]
        );
    }

    #[test]
    fn test_active_level_untouched() {
        let now = Utc::now();
        let mut contract = contract_with_usage(Some(now + Duration::hours(1)));
        let pricings = pricing_with_renewal();

        let (effects, changed) = refresh_usage_levels(&mut contract, &pricings, now);

        assert!(!changed);
        assert!(effects.is_empty());
        assert_eq!(contract.usage_level("acme", "apiCalls").unwrap().consumed, 9.0);
    }

    #[test]
    fn test_consumption_refused_at_limit() {
        let mut contract = contract_with_usage(None);

        // used = 9, limit = 10, requesting 5 would cross it
        let outcome = record_consumption(&mut contract, "acme", "apiCalls", 5.0, Some(10.0), false);

        assert_eq!(
            outcome,
            ConsumptionOutcome::LimitReached {
                used: 9.0,
                limit: 10.0
            }
        );
        assert_eq!(contract.usage_level("acme", "apiCalls").unwrap().consumed, 9.0);
    }

    #[test]
    fn test_consumption_applied_within_limit() {
        let mut contract = contract_with_usage(None);

        let outcome = record_consumption(&mut contract, "acme", "apiCalls", 1.0, Some(10.0), false);

        assert_eq!(
            outcome,
            ConsumptionOutcome::Applied {
                used: 10.0,
                limit: Some(10.0)
            }
        );
    }

    #[test]
    fn test_overage_allowed_when_flagged() {
        let mut contract = contract_with_usage(None);

        let outcome = record_consumption(&mut contract, "acme", "apiCalls", 5.0, Some(10.0), true);

        assert_eq!(
            outcome,
            ConsumptionOutcome::Applied {
                used: 14.0,
                limit: Some(10.0)
            }
        );
    }

    #[test]
    fn test_revert_latest() {
        let mut contract = contract_with_usage(None);
        record_consumption(&mut contract, "acme", "apiCalls", 1.0, None, false);

        let reverted = revert_consumption(&mut contract, "acme", "apiCalls", true);
        assert_eq!(reverted, 1.0);
        assert_eq!(contract.usage_level("acme", "apiCalls").unwrap().consumed, 9.0);
    }
}
