//! # Pricing Core
//!
//! This crate provides the domain models for the multi-tenant pricing
//! platform, shared across the evaluation engine and the CRUD services.
//!
//! ## Overview
//!
//! The pricing-core crate handles:
//! - **Pricings**: Versioned, immutable feature/plan/add-on catalogs
//! - **Services**: Named offerings with active and archived pricing versions
//! - **Contracts**: Per-user subscription records across services
//! - **Features**: Gated capabilities with typed values and evaluation expressions
//! - **Usage Levels**: Per-feature consumption counters with periodic reset
//! - **Version Codec**: Reversible escaping of version strings for storage
//!
//! ## Architecture
//!
//! ```text
//! Organization
//!   └─ Service (name, active/archived pricings)
//!         └─ Pricing (version)
//!               ├─ Plans      ─→ feature values + usage limits
//!               ├─ AddOns     ─→ feature deltas/overrides
//!               └─ Features   ─→ FeatureDefinition (expressions)
//!
//! User
//!   └─ Contract
//!         ├─ contracted services ─→ pricing version
//!         ├─ subscription plans / add-ons
//!         ├─ usage levels (consumed, reset timestamp)
//!         ├─ billing period (auto-renew)
//!         └─ history (append-only snapshots)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use pricing_core::{BillingPeriod, Contract};
//! use chrono::Utc;
//! use uuid::Uuid;
//!
//! let now = Utc::now();
//! let org_id = Uuid::now_v7();
//! let mut contract = Contract::new("user-1", org_id, BillingPeriod::starting(now, 30, true));
//! contract.subscribe("acme", "1.0.0", Some("BASIC".to_string()));
//! assert!(contract.contracted_services.contains_key("acme"));
//! ```
//!
//! This crate is pure data: no async, no I/O. The evaluation engine lives
//! in `pricing-engine`.

pub mod contract;
pub mod feature;
pub mod pricing;
pub mod service;
pub mod version;

pub use contract::{BillingPeriod, Contract, ContractSnapshot, Subscription, UsageLevel};
pub use feature::{FeatureDefinition, FeatureValue, RenewalPeriod, ValueType};
pub use pricing::{AddOn, Plan, Pricing, PricingValidationError};
pub use service::{PricingLocator, Service, ServiceError};
pub use version::{escape_version, unescape_version};
