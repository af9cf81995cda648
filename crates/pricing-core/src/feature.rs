//! Feature definitions and typed feature values
//!
//! Pricing documents describe features as loosely-typed records. This module
//! models them as tagged variants so the evaluation engine dispatches on the
//! tag instead of guessing at runtime types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A typed feature value.
///
/// Every value that flows through plans, add-ons, defaults, and evaluation
/// contexts is one of these three variants.
///
/// # Examples
///
/// ```
/// use pricing_core::FeatureValue;
///
/// let seats = FeatureValue::Number(10.0);
/// assert_eq!(seats.as_number(), Some(10.0));
/// assert!(FeatureValue::Bool(true).as_bool().unwrap());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FeatureValue {
    /// Boolean gate (feature on/off)
    Bool(bool),

    /// Numeric value (limits, quantities)
    Number(f64),

    /// Enumerated text value (e.g. support tier name)
    Text(String),
}

impl FeatureValue {
    /// Get the boolean value, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FeatureValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the numeric value, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the text value, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FeatureValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The value type tag for this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            FeatureValue::Bool(_) => ValueType::Boolean,
            FeatureValue::Number(_) => ValueType::Numeric,
            FeatureValue::Text(_) => ValueType::Text,
        }
    }
}

/// Declared type of a feature.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// On/off gate
    Boolean,
    /// Numeric limit or quantity
    Numeric,
    /// Enumerated text
    Text,
}

/// Renewal period for a usage-tracked feature.
///
/// Determines the next reset timestamp when an expired usage level is
/// lazily reset during context building.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RenewalPeriod {
    /// Resets every day
    Daily,
    /// Resets every week
    Weekly,
    /// Resets every month (30 days)
    Monthly,
    /// Resets every year (365 days)
    Yearly,
}

impl RenewalPeriod {
    /// Compute the next reset timestamp from `now`.
    pub fn next_reset(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            RenewalPeriod::Daily => now + Duration::days(1),
            RenewalPeriod::Weekly => now + Duration::weeks(1),
            RenewalPeriod::Monthly => now + Duration::days(30),
            RenewalPeriod::Yearly => now + Duration::days(365),
        }
    }
}

/// Definition of a single gated feature within a pricing.
///
/// Carries two expression variants: the server expression may reference
/// private limits, while the client expression must be safe to expose to
/// browsers. The evaluation engine selects one based on the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureDefinition {
    /// Feature name (unique within the pricing)
    pub name: String,

    /// Declared value type
    pub value_type: ValueType,

    /// Value used when no plan or add-on contributes one
    pub default_value: FeatureValue,

    /// Server-side evaluation expression
    #[serde(default)]
    pub server_expression: Option<String>,

    /// Client-safe evaluation expression
    #[serde(default)]
    pub client_expression: Option<String>,

    /// Renewal period for usage tracking, when the feature is metered
    #[serde(default)]
    pub renewal_period: Option<RenewalPeriod>,

    /// Whether consumption may exceed the configured limit
    #[serde(default)]
    pub allow_overage: bool,
}

impl FeatureDefinition {
    /// Create a boolean feature with a default value and no expressions.
    pub fn boolean(name: impl Into<String>, default: bool) -> Self {
        Self {
            name: name.into(),
            value_type: ValueType::Boolean,
            default_value: FeatureValue::Bool(default),
            server_expression: None,
            client_expression: None,
            renewal_period: None,
            allow_overage: false,
        }
    }

    /// Create a numeric feature with a default value and no expressions.
    pub fn numeric(name: impl Into<String>, default: f64) -> Self {
        Self {
            name: name.into(),
            value_type: ValueType::Numeric,
            default_value: FeatureValue::Number(default),
            server_expression: None,
            client_expression: None,
            renewal_period: None,
            allow_overage: false,
        }
    }

    /// Set the server expression.
    pub fn with_server_expression(mut self, expr: impl Into<String>) -> Self {
        self.server_expression = Some(expr.into());
        self
    }

    /// Set the client expression.
    pub fn with_client_expression(mut self, expr: impl Into<String>) -> Self {
        self.client_expression = Some(expr.into());
        self
    }

    /// Set the renewal period.
    pub fn with_renewal_period(mut self, period: RenewalPeriod) -> Self {
        self.renewal_period = Some(period);
        self
    }

    /// Select the expression variant for the given evaluation side.
    ///
    /// Falls back to the other variant when the requested one is absent,
    /// so a feature with only one expression still evaluates everywhere.
    pub fn expression_for(&self, server: bool) -> Option<&str> {
        if server {
            self.server_expression
                .as_deref()
                .or(self.client_expression.as_deref())
        } else {
            self.client_expression
                .as_deref()
                .or(self.server_expression.as_deref())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        assert_eq!(FeatureValue::Number(3.5).as_number(), Some(3.5));
        assert_eq!(FeatureValue::Bool(true).as_bool(), Some(true));
        assert_eq!(FeatureValue::Text("gold".into()).as_text(), Some("gold"));
        assert_eq!(FeatureValue::Bool(false).as_number(), None);
    }

    #[test]
    fn test_value_serde_untagged() {
        let v: FeatureValue = serde_json::from_str("10").unwrap();
        assert_eq!(v, FeatureValue::Number(10.0));

        let v: FeatureValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, FeatureValue::Bool(true));

        let v: FeatureValue = serde_json::from_str("\"gold\"").unwrap();
        assert_eq!(v, FeatureValue::Text("gold".into()));
    }

    #[test]
    fn test_expression_selection() {
        let feature = FeatureDefinition::numeric("maxSeats", 0.0)
            .with_server_expression("acme.usage.seats <= acme.maxSeats")
            .with_client_expression("acme.maxSeats > 0");

        assert_eq!(
            feature.expression_for(true),
            Some("acme.usage.seats <= acme.maxSeats")
        );
        assert_eq!(feature.expression_for(false), Some("acme.maxSeats > 0"));
    }

    #[test]
    fn test_expression_fallback() {
        let feature =
            FeatureDefinition::boolean("sso", false).with_server_expression("acme.sso");

        assert_eq!(feature.expression_for(false), Some("acme.sso"));
    }

    #[test]
    fn test_renewal_period_next_reset() {
        let now = Utc::now();
        assert_eq!(RenewalPeriod::Daily.next_reset(now), now + Duration::days(1));
        assert_eq!(
            RenewalPeriod::Monthly.next_reset(now),
            now + Duration::days(30)
        );
    }
}
