//! Store traits and in-memory implementations
//!
//! The engine consumes plain records through these traits; real
//! deployments put a document-store driver behind them. The in-memory
//! implementations apply the version-escaping codec at the persistence
//! boundary, exactly as a driver storing versions inside mapping keys
//! must.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use pricing_core::{escape_version, unescape_version, Contract, Pricing, Service};

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Criteria for selecting contracts, used by the novation engine.
#[derive(Debug, Clone, Default)]
pub struct ContractFilter {
    /// Restrict to one organization.
    pub organization_id: Option<Uuid>,

    /// Contracts subscribed to this service.
    pub service_name: Option<String>,

    /// Contracts on this pricing version of the service.
    pub pricing_version: Option<String>,
}

impl ContractFilter {
    fn matches(&self, contract: &Contract) -> bool {
        if let Some(org) = self.organization_id {
            if contract.organization_id != org {
                return false;
            }
        }
        if let Some(service) = &self.service_name {
            match contract.contracted_services.get(service) {
                None => return false,
                Some(version) => {
                    if let Some(wanted) = &self.pricing_version {
                        if version != wanted {
                            return false;
                        }
                    }
                }
            }
        }
        true
    }
}

/// Service and pricing lookups.
///
/// Implementations must return mapping keys in a deterministic order.
#[async_trait]
pub trait ServiceStore: Send + Sync {
    /// Find a service by name within an organization.
    async fn find_by_name(
        &self,
        organization_id: Uuid,
        name: &str,
    ) -> Result<Option<Service>, StoreError>;

    /// All services of an organization.
    async fn find_all(&self, organization_id: Uuid) -> Result<Vec<Service>, StoreError>;

    /// Find a stored pricing document by id.
    async fn find_pricing_by_id(&self, id: &str) -> Result<Option<Pricing>, StoreError>;

    /// All stored pricing documents referenced by a service.
    async fn find_pricings_by_service_name(
        &self,
        organization_id: Uuid,
        name: &str,
    ) -> Result<Vec<Pricing>, StoreError>;

    /// Upsert a service record.
    async fn update(&self, service: Service) -> Result<(), StoreError>;

    /// Insert a pricing document under an id.
    async fn insert_pricing(&self, id: &str, pricing: Pricing) -> Result<(), StoreError>;
}

/// Contract lookups and updates.
#[async_trait]
pub trait ContractStore: Send + Sync {
    /// Find the contract for a user within an organization.
    async fn find_by_user_id(
        &self,
        organization_id: Uuid,
        user_id: &str,
    ) -> Result<Option<Contract>, StoreError>;

    /// All contracts matching the filter.
    async fn find_by_filters(&self, filter: &ContractFilter) -> Result<Vec<Contract>, StoreError>;

    /// Upsert one contract.
    async fn update(&self, contract: Contract) -> Result<(), StoreError>;

    /// Upsert a batch of contracts, returning the number updated.
    ///
    /// Callers treat a short count as total failure of the enclosing
    /// operation.
    async fn bulk_update(&self, contracts: Vec<Contract>) -> Result<usize, StoreError>;
}

/// Escape pricing-version mapping keys for storage.
fn escape_service(mut service: Service) -> Service {
    service.active_pricings = service
        .active_pricings
        .into_iter()
        .map(|(version, locator)| (escape_version(&version), locator))
        .collect();
    service.archived_pricings = service
        .archived_pricings
        .into_iter()
        .map(|(version, locator)| (escape_version(&version), locator))
        .collect();
    service
}

/// Unescape pricing-version mapping keys on read.
fn unescape_service(mut service: Service) -> Service {
    service.active_pricings = service
        .active_pricings
        .into_iter()
        .map(|(version, locator)| (unescape_version(&version), locator))
        .collect();
    service.archived_pricings = service
        .archived_pricings
        .into_iter()
        .map(|(version, locator)| (unescape_version(&version), locator))
        .collect();
    service
}

/// In-memory service/pricing store.
#[derive(Debug, Default)]
pub struct MemoryServiceStore {
    services: RwLock<BTreeMap<(Uuid, String), Service>>,
    pricings: RwLock<HashMap<String, Pricing>>,
}

impl MemoryServiceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServiceStore for MemoryServiceStore {
    async fn find_by_name(
        &self,
        organization_id: Uuid,
        name: &str,
    ) -> Result<Option<Service>, StoreError> {
        let services = self.services.read().await;
        Ok(services
            .get(&(organization_id, name.to_string()))
            .cloned()
            .map(unescape_service))
    }

    async fn find_all(&self, organization_id: Uuid) -> Result<Vec<Service>, StoreError> {
        let services = self.services.read().await;
        Ok(services
            .values()
            .filter(|service| service.organization_id == organization_id)
            .cloned()
            .map(unescape_service)
            .collect())
    }

    async fn find_pricing_by_id(&self, id: &str) -> Result<Option<Pricing>, StoreError> {
        Ok(self.pricings.read().await.get(id).cloned())
    }

    async fn find_pricings_by_service_name(
        &self,
        organization_id: Uuid,
        name: &str,
    ) -> Result<Vec<Pricing>, StoreError> {
        let service = match self.find_by_name(organization_id, name).await? {
            Some(service) => service,
            None => return Ok(Vec::new()),
        };

        let pricings = self.pricings.read().await;
        let mut found = Vec::new();
        for locator in service
            .active_pricings
            .values()
            .chain(service.archived_pricings.values())
        {
            if let pricing_core::PricingLocator::Id(id) = locator {
                if let Some(pricing) = pricings.get(id) {
                    found.push(pricing.clone());
                }
            }
        }
        Ok(found)
    }

    async fn update(&self, service: Service) -> Result<(), StoreError> {
        let key = (service.organization_id, service.name.clone());
        self.services.write().await.insert(key, escape_service(service));
        Ok(())
    }

    async fn insert_pricing(&self, id: &str, pricing: Pricing) -> Result<(), StoreError> {
        self.pricings.write().await.insert(id.to_string(), pricing);
        Ok(())
    }
}

/// In-memory contract store.
#[derive(Debug, Default)]
pub struct MemoryContractStore {
    contracts: RwLock<BTreeMap<(Uuid, String), Contract>>,
}

impl MemoryContractStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContractStore for MemoryContractStore {
    async fn find_by_user_id(
        &self,
        organization_id: Uuid,
        user_id: &str,
    ) -> Result<Option<Contract>, StoreError> {
        let contracts = self.contracts.read().await;
        Ok(contracts
            .get(&(organization_id, user_id.to_string()))
            .cloned())
    }

    async fn find_by_filters(&self, filter: &ContractFilter) -> Result<Vec<Contract>, StoreError> {
        let contracts = self.contracts.read().await;
        Ok(contracts
            .values()
            .filter(|contract| filter.matches(contract))
            .cloned()
            .collect())
    }

    async fn update(&self, contract: Contract) -> Result<(), StoreError> {
        let key = (contract.organization_id, contract.user_id.clone());
        self.contracts.write().await.insert(key, contract);
        Ok(())
    }

    async fn bulk_update(&self, contracts: Vec<Contract>) -> Result<usize, StoreError> {
        let mut stored = self.contracts.write().await;
        let mut count = 0;
        for contract in contracts {
            let key = (contract.organization_id, contract.user_id.clone());
            stored.insert(key, contract);
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pricing_core::{BillingPeriod, PricingLocator};

    #[tokio::test]
    async fn test_service_version_keys_round_trip() {
        let store = MemoryServiceStore::new();
        let org = Uuid::now_v7();

        let mut service = Service::new("acme", org);
        service
            .add_active("1.0.0", PricingLocator::Id("p-1".into()))
            .unwrap();
        store.update(service).await.unwrap();

        // Stored keys are escaped...
        {
            let raw = store.services.read().await;
            let stored = raw.get(&(org, "acme".to_string())).unwrap();
            assert!(stored.active_pricings.contains_key("1_0_0"));
        }

        // ...but reads come back unescaped.
        let read = store.find_by_name(org, "acme").await.unwrap().unwrap();
        assert!(read.active_pricings.contains_key("1.0.0"));
    }

    #[tokio::test]
    async fn test_contract_filter() {
        let store = MemoryContractStore::new();
        let org = Uuid::now_v7();
        let now = Utc::now();

        let mut on_v1 = Contract::new("u1", org, BillingPeriod::starting(now, 30, true));
        on_v1.subscribe("acme", "1.0.0", None);
        let mut on_v2 = Contract::new("u2", org, BillingPeriod::starting(now, 30, true));
        on_v2.subscribe("acme", "2.0.0", None);
        store.update(on_v1).await.unwrap();
        store.update(on_v2).await.unwrap();

        let filter = ContractFilter {
            organization_id: Some(org),
            service_name: Some("acme".to_string()),
            pricing_version: Some("1.0.0".to_string()),
        };
        let found = store.find_by_filters(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user_id, "u1");
    }

    #[tokio::test]
    async fn test_bulk_update_counts() {
        let store = MemoryContractStore::new();
        let org = Uuid::now_v7();
        let now = Utc::now();

        let contracts: Vec<Contract> = (0..3)
            .map(|i| Contract::new(format!("u{i}"), org, BillingPeriod::starting(now, 30, true)))
            .collect();

        let count = store.bulk_update(contracts).await.unwrap();
        assert_eq!(count, 3);
    }
}
