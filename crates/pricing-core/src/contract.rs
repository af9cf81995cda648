//! User contracts and usage levels
//!
//! A contract is a user's subscription record across one or more services:
//! which pricing version they are on, which plan and add-ons they hold,
//! and how much of each metered feature they have consumed. Novation and
//! billing renewal always snapshot the previous state into the append-only
//! history before overwriting.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Billing period for a contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillingPeriod {
    /// Period start
    pub start_date: DateTime<Utc>,

    /// Period end
    pub end_date: DateTime<Utc>,

    /// Whether the contract renews automatically at period end
    pub auto_renew: bool,

    /// Length of each renewal in days
    pub renewal_days: i64,
}

impl BillingPeriod {
    /// Create a period starting at `now` and lasting `renewal_days`.
    pub fn starting(now: DateTime<Utc>, renewal_days: i64, auto_renew: bool) -> Self {
        Self {
            start_date: now,
            end_date: now + Duration::days(renewal_days),
            auto_renew,
            renewal_days,
        }
    }

    /// A zero-length, non-renewing period anchored at `now`.
    ///
    /// Used when a contract is force-disabled.
    pub fn disabled(now: DateTime<Utc>) -> Self {
        Self {
            start_date: now,
            end_date: now,
            auto_renew: false,
            renewal_days: 0,
        }
    }

    /// Whether the period has ended as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.end_date
    }
}

/// Per-feature consumption counter.
///
/// Keeps an append-only log of increments so the most recent consumption
/// record can be reverted without replaying external events.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageLevel {
    /// Total consumed in the current period
    pub consumed: f64,

    /// When the counter next resets (absent for untracked features)
    #[serde(default)]
    pub reset_timestamp: Option<DateTime<Utc>>,

    /// Individual consumption increments, oldest first
    #[serde(default)]
    pub increments: Vec<f64>,
}

impl UsageLevel {
    /// A fresh zeroed counter with the given reset timestamp.
    pub fn fresh(reset_timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            consumed: 0.0,
            reset_timestamp,
            increments: Vec::new(),
        }
    }

    /// Record a consumption increment.
    pub fn record(&mut self, amount: f64) {
        self.consumed += amount;
        self.increments.push(amount);
    }

    /// Revert consumption.
    ///
    /// With `latest` set, only the most recent increment is undone;
    /// otherwise the counter is cleared entirely. Returns the amount
    /// reverted.
    pub fn revert(&mut self, latest: bool) -> f64 {
        if latest {
            match self.increments.pop() {
                Some(amount) => {
                    self.consumed = (self.consumed - amount).max(0.0);
                    amount
                }
                None => 0.0,
            }
        } else {
            let total = self.consumed;
            self.consumed = 0.0;
            self.increments.clear();
            total
        }
    }

    /// Reset to zero with a new reset timestamp.
    pub fn reset(&mut self, next_reset: Option<DateTime<Utc>>) {
        self.consumed = 0.0;
        self.increments.clear();
        self.reset_timestamp = next_reset;
    }

    /// Whether the counter has expired as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.reset_timestamp, Some(ts) if now > ts)
    }
}

/// The subscription portion of a contract: which services, versions,
/// plans, and add-ons the user holds.
///
/// This is both the input to novation and the payload of history
/// snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    /// Service name -> subscribed pricing version
    #[serde(default)]
    pub contracted_services: BTreeMap<String, String>,

    /// Service name -> plan name (None for add-on-only subscriptions)
    #[serde(default)]
    pub subscription_plans: BTreeMap<String, Option<String>>,

    /// Service name -> add-on name -> purchased quantity
    #[serde(default)]
    pub subscription_add_ons: BTreeMap<String, BTreeMap<String, u32>>,
}

impl Subscription {
    /// Whether the subscription covers no services at all.
    pub fn is_empty(&self) -> bool {
        self.contracted_services.is_empty()
    }
}

/// A past subscription state, recorded before it was overwritten.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContractSnapshot {
    /// Start of the period being replaced
    pub start_date: DateTime<Utc>,

    /// End of the period being replaced
    pub end_date: DateTime<Utc>,

    /// The subscription held during that period
    pub subscription: Subscription,

    /// When the snapshot was taken
    pub recorded_at: DateTime<Utc>,
}

/// A user's contract within one organization.
///
/// Invariant: every key in `contracted_services` has a corresponding entry
/// (possibly empty) in `subscription_plans`, `subscription_add_ons`, and
/// `usage_levels`. The mutation methods below maintain this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    /// Owning user
    pub user_id: String,

    /// Organization context
    pub organization_id: Uuid,

    /// Service name -> subscribed pricing version
    #[serde(default)]
    pub contracted_services: BTreeMap<String, String>,

    /// Service name -> plan name
    #[serde(default)]
    pub subscription_plans: BTreeMap<String, Option<String>>,

    /// Service name -> add-on name -> quantity
    #[serde(default)]
    pub subscription_add_ons: BTreeMap<String, BTreeMap<String, u32>>,

    /// Service name -> feature name -> usage level
    #[serde(default)]
    pub usage_levels: BTreeMap<String, BTreeMap<String, UsageLevel>>,

    /// Current billing period
    pub billing_period: BillingPeriod,

    /// Past subscription snapshots, oldest first
    #[serde(default)]
    pub history: Vec<ContractSnapshot>,
}

impl Contract {
    /// Create a contract with no subscribed services.
    pub fn new(
        user_id: impl Into<String>,
        organization_id: Uuid,
        billing_period: BillingPeriod,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            organization_id,
            contracted_services: BTreeMap::new(),
            subscription_plans: BTreeMap::new(),
            subscription_add_ons: BTreeMap::new(),
            usage_levels: BTreeMap::new(),
            billing_period,
            history: Vec::new(),
        }
    }

    /// Subscribe to a service at a pricing version.
    ///
    /// Inserts matching (possibly empty) entries into all subscription
    /// maps to keep the per-service invariant.
    pub fn subscribe(
        &mut self,
        service: impl Into<String>,
        version: impl Into<String>,
        plan: Option<String>,
    ) {
        let service = service.into();
        self.contracted_services
            .insert(service.clone(), version.into());
        self.subscription_plans.insert(service.clone(), plan);
        self.subscription_add_ons
            .entry(service.clone())
            .or_default();
        self.usage_levels.entry(service).or_default();
    }

    /// Set the quantity of an add-on for a contracted service.
    pub fn set_add_on(&mut self, service: &str, add_on: impl Into<String>, quantity: u32) {
        self.subscription_add_ons
            .entry(service.to_string())
            .or_default()
            .insert(add_on.into(), quantity);
    }

    /// The current subscription state.
    pub fn subscription(&self) -> Subscription {
        Subscription {
            contracted_services: self.contracted_services.clone(),
            subscription_plans: self.subscription_plans.clone(),
            subscription_add_ons: self.subscription_add_ons.clone(),
        }
    }

    /// Snapshot the current period and subscription for the history log.
    pub fn snapshot(&self, now: DateTime<Utc>) -> ContractSnapshot {
        ContractSnapshot {
            start_date: self.billing_period.start_date,
            end_date: self.billing_period.end_date,
            subscription: self.subscription(),
            recorded_at: now,
        }
    }

    /// Renew the billing period.
    ///
    /// Records the prior period in history, then opens a new period
    /// running from `now` for `renewal_days`.
    pub fn renew(&mut self, now: DateTime<Utc>) {
        self.history.push(self.snapshot(now));
        self.billing_period = BillingPeriod::starting(
            now,
            self.billing_period.renewal_days,
            self.billing_period.auto_renew,
        );
    }

    /// Replace the subscription with a new one (novation).
    ///
    /// The previous state is pushed onto history and a fresh billing
    /// period opens at `now`, keeping the previous renewal settings
    /// unless new ones are supplied.
    pub fn novate(
        &mut self,
        new_subscription: Subscription,
        now: DateTime<Utc>,
        renewal_days: Option<i64>,
        auto_renew: Option<bool>,
    ) {
        self.history.push(self.snapshot(now));

        self.contracted_services = new_subscription.contracted_services;
        self.subscription_plans = new_subscription.subscription_plans;
        self.subscription_add_ons = new_subscription.subscription_add_ons;

        // Keep the per-service invariant for any newly contracted service.
        for service in self.contracted_services.keys() {
            self.subscription_plans.entry(service.clone()).or_default();
            self.subscription_add_ons
                .entry(service.clone())
                .or_default();
            self.usage_levels.entry(service.clone()).or_default();
        }
        self.usage_levels
            .retain(|service, _| self.contracted_services.contains_key(service));

        self.billing_period = BillingPeriod::starting(
            now,
            renewal_days.unwrap_or(self.billing_period.renewal_days),
            auto_renew.unwrap_or(self.billing_period.auto_renew),
        );
    }

    /// Remove a service from every subscription map.
    ///
    /// Returns `true` if the contract is left with no services.
    pub fn remove_service(&mut self, service: &str) -> bool {
        self.contracted_services.remove(service);
        self.subscription_plans.remove(service);
        self.subscription_add_ons.remove(service);
        self.usage_levels.remove(service);
        self.contracted_services.is_empty()
    }

    /// Force-disable the contract.
    ///
    /// Clears all usage levels and installs a zero-length, non-renewing
    /// billing period. Used when the last contracted service is removed.
    pub fn force_disable(&mut self, now: DateTime<Utc>) {
        self.usage_levels.clear();
        self.billing_period = BillingPeriod::disabled(now);
    }

    /// Get a mutable usage level, creating a zeroed entry on first use.
    pub fn usage_level_mut(&mut self, service: &str, feature: &str) -> &mut UsageLevel {
        self.usage_levels
            .entry(service.to_string())
            .or_default()
            .entry(feature.to_string())
            .or_default()
    }

    /// Get a usage level if one exists.
    pub fn usage_level(&self, service: &str, feature: &str) -> Option<&UsageLevel> {
        self.usage_levels.get(service)?.get(feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> Contract {
        let now = Utc::now();
        let mut contract = Contract::new("user-1", Uuid::now_v7(), BillingPeriod::starting(now, 30, true));
        contract.subscribe("acme", "1.0.0", Some("BASIC".to_string()));
        contract
    }

    #[test]
    fn test_subscribe_keeps_invariant() {
        let contract = contract();
        for service in contract.contracted_services.keys() {
            assert!(contract.subscription_plans.contains_key(service));
            assert!(contract.subscription_add_ons.contains_key(service));
            assert!(contract.usage_levels.contains_key(service));
        }
    }

    #[test]
    fn test_renew_extends_and_records_history() {
        let mut contract = contract();
        let old_start = contract.billing_period.start_date;
        let old_end = contract.billing_period.end_date;

        let later = old_end + Duration::days(5);
        contract.renew(later);

        assert_eq!(contract.history.len(), 1);
        assert_eq!(contract.history[0].start_date, old_start);
        assert_eq!(contract.history[0].end_date, old_end);
        assert_eq!(contract.billing_period.start_date, later);
        assert_eq!(contract.billing_period.end_date, later + Duration::days(30));
        assert!(contract.billing_period.auto_renew);
    }

    #[test]
    fn test_novation_snapshots_previous_state() {
        let mut contract = contract();
        let now = Utc::now();

        let mut new_sub = Subscription::default();
        new_sub
            .contracted_services
            .insert("acme".into(), "2.0.0".into());
        new_sub
            .subscription_plans
            .insert("acme".into(), Some("PRO".into()));

        contract.novate(new_sub, now, None, None);

        assert_eq!(contract.history.len(), 1);
        assert_eq!(
            contract.history[0]
                .subscription
                .contracted_services
                .get("acme"),
            Some(&"1.0.0".to_string())
        );
        assert_eq!(
            contract.contracted_services.get("acme"),
            Some(&"2.0.0".to_string())
        );
        assert_eq!(contract.billing_period.start_date, now);
    }

    #[test]
    fn test_remove_last_service_then_disable() {
        let mut contract = contract();
        let now = Utc::now();

        let emptied = contract.remove_service("acme");
        assert!(emptied);

        contract.force_disable(now);
        assert!(contract.usage_levels.is_empty());
        assert_eq!(contract.billing_period.start_date, contract.billing_period.end_date);
        assert!(!contract.billing_period.auto_renew);
        assert_eq!(contract.billing_period.renewal_days, 0);
    }

    #[test]
    fn test_usage_record_and_revert_latest() {
        let mut level = UsageLevel::default();
        level.record(3.0);
        level.record(2.0);
        assert_eq!(level.consumed, 5.0);

        let reverted = level.revert(true);
        assert_eq!(reverted, 2.0);
        assert_eq!(level.consumed, 3.0);
        assert_eq!(level.increments, vec![3.0]);
    }

    #[test]
    fn test_usage_revert_all() {
        let mut level = UsageLevel::default();
        level.record(1.0);
        level.record(4.0);

        let reverted = level.revert(false);
        assert_eq!(reverted, 5.0);
        assert_eq!(level.consumed, 0.0);
        assert!(level.increments.is_empty());
    }

    #[test]
    fn test_usage_expiry() {
        let now = Utc::now();
        let mut level = UsageLevel::fresh(Some(now - Duration::hours(1)));
        level.record(7.0);
        assert!(level.is_expired(now));

        level.reset(Some(now + Duration::days(30)));
        assert_eq!(level.consumed, 0.0);
        assert!(!level.is_expired(now));
    }
}
