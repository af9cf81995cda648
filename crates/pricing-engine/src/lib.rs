//! # Pricing Engine
//!
//! Feature evaluation engine for the pricing platform: answers "can this
//! user use this feature right now, and how much of it is left?" across
//! every service their contract covers.
//!
//! ## Overview
//!
//! The pricing-engine crate handles:
//! - **Pricing Resolution**: `(service, version)` to pricing document,
//!   cache-first, with bounded-concurrency remote fetches
//! - **Context Flattening**: nested pricing/subscription/usage state into
//!   the flat contexts the expression evaluator consumes
//! - **Usage Lifecycle**: lazy counter expiry, limit-gated consumption,
//!   revert
//! - **Feature Evaluation**: the orchestrator gating on billing validity
//!   and caching aggregate results per user
//! - **Novation**: bulk contract migration for pricing archival and
//!   service removal
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │            FeatureEvaluator / NovationEngine            │
//! ├────────────┬────────────┬───────────────┬───────────────┤
//! │  resolver  │  context   │     usage     │     cache     │
//! ├────────────┴────────────┴───────────────┴───────────────┤
//! │      ServiceStore / ContractStore / Cache / EventSink   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Evaluation itself is pure: it produces results plus a list of
//! [`cache::CacheEffect`]s, and applying those effects is best-effort.
//! Store and sink access sits behind traits so deployments can wire real
//! drivers without touching evaluation logic.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pricing_engine::{
//!     Cache, ContractStore, EvaluationOptions, FeatureEvaluator, MemoryCache,
//!     MemoryContractStore, MemoryServiceStore, PricingResolver, ResolverConfig,
//!     ServiceStore,
//! };
//! use uuid::Uuid;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let services: Arc<dyn ServiceStore> = Arc::new(MemoryServiceStore::new());
//! let contracts: Arc<dyn ContractStore> = Arc::new(MemoryContractStore::new());
//! let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
//!
//! let resolver = Arc::new(PricingResolver::new(
//!     services.clone(),
//!     cache.clone(),
//!     ResolverConfig::from_env(),
//! )?);
//! let evaluator = FeatureEvaluator::new(services, contracts, cache, resolver);
//!
//! let summary = evaluator
//!     .evaluate_all(Uuid::now_v7(), "user-1", &EvaluationOptions::default())
//!     .await?;
//! println!("{} features evaluated", summary.evaluations.len());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod novation;
pub mod resolver;
pub mod store;
pub mod usage;

pub use cache::{apply_effects, keys, Cache, CacheEffect, CacheError, MemoryCache};
pub use config::ResolverConfig;
pub use context::{
    flatten_configurations_into_pricing_context, flatten_feature_evaluations_into_evaluation_context,
    flatten_usage_levels_into_subscription_context, EvaluationContext, PricingContext,
    ServiceConfiguration, SubscriptionContext,
};
pub use engine::{
    ConsumeOptions, EvaluationContexts, EvaluationOptions, EvaluationSummary, FeatureCatalogEntry,
    FeatureEvaluation, FeatureEvaluator, FeatureQuery, FeatureSortKey, Page, ShowPricings,
    SingleEvaluation, SortOrder,
};
pub use error::{EngineError, EngineResult};
pub use novation::{novated_subscription, FallbackSubscription, NovationEngine};
pub use resolver::PricingResolver;
pub use store::{
    ContractFilter, ContractStore, MemoryContractStore, MemoryServiceStore, ServiceStore,
    StoreError,
};
pub use usage::{
    record_consumption, refresh_usage_levels, revert_consumption, ConsumptionOutcome,
};
