//! Engine error taxonomy
//!
//! Resolution and validation errors abort the enclosing evaluation or
//! novation entirely; there are no partial results. Cache failures are
//! deliberately absent from this taxonomy: they live in
//! [`crate::cache::CacheError`] and are logged and swallowed, never
//! propagated.

use thiserror::Error;

use pricing_core::PricingValidationError;
use pricing_expr::ExpressionError;

/// Errors surfaced by the evaluation engine and the novation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Service does not exist (or is disabled) in the organization.
    #[error("service '{0}' not found")]
    ServiceNotFound(String),

    /// The service exists but has no such pricing version.
    #[error("pricing version '{version}' not found for service '{service}'")]
    PricingNotFound {
        /// Service name.
        service: String,
        /// Requested version.
        version: String,
    },

    /// No contract exists for the user in this organization.
    #[error("contract not found for user '{0}'")]
    ContractNotFound(String),

    /// The requested feature is not defined by any contracted pricing.
    #[error("feature '{0}' not found")]
    FeatureNotFound(String),

    /// A pricing document or fallback subscription failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The billing period has ended and the contract does not auto-renew.
    #[error("subscription expired for user '{0}'")]
    SubscriptionExpired(String),

    /// A URL-backed pricing could not be retrieved (including timeouts).
    #[error("remote pricing fetch failed for '{url}': {reason}")]
    RemoteFetch {
        /// The pricing document URL.
        url: String,
        /// Failure reason.
        reason: String,
    },

    /// A fallback subscription does not fit the target pricing.
    #[error("invalid fallback subscription: {0}")]
    InvalidSubscription(String),

    /// An evaluation expression is malformed or references undefined
    /// variables. A defect in the pricing data, surfaced to the caller.
    #[error("expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// Store backend failure, including short bulk-update counts.
    #[error("store error: {0}")]
    Store(String),
}

impl From<PricingValidationError> for EngineError {
    fn from(err: PricingValidationError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
