//! Services and pricing version lifecycle
//!
//! A service is a named offering within an organization. Each version of
//! its pricing is either active or archived, never both; archival moves
//! the version key between the two maps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors for service pricing-version transitions.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The requested version is not present in the expected set.
    #[error("service '{service}' has no pricing version '{version}'")]
    UnknownVersion {
        /// Service name.
        service: String,
        /// Requested version.
        version: String,
    },

    /// The version already exists in the other set.
    #[error("pricing version '{version}' already exists on service '{service}'")]
    DuplicateVersion {
        /// Service name.
        service: String,
        /// Conflicting version.
        version: String,
    },
}

/// Where a pricing document lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingLocator {
    /// Stored in the pricing repository under this id
    Id(String),
    /// Hosted remotely, fetched over HTTPS
    Url(String),
}

/// A named service offering within an organization.
///
/// Version keys in `active_pricings` / `archived_pricings` are plain
/// (unescaped) here; stores apply the [`crate::version`] codec at the
/// persistence boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Service name (unique within the organization)
    pub name: String,

    /// Owning organization
    pub organization_id: Uuid,

    /// Whether the service is disabled (hidden from evaluation)
    pub disabled: bool,

    /// Currently active pricing versions
    #[serde(default)]
    pub active_pricings: BTreeMap<String, PricingLocator>,

    /// Archived pricing versions
    #[serde(default)]
    pub archived_pricings: BTreeMap<String, PricingLocator>,
}

impl Service {
    /// Create an enabled service with no pricings.
    pub fn new(name: impl Into<String>, organization_id: Uuid) -> Self {
        Self {
            name: name.into(),
            organization_id,
            disabled: false,
            active_pricings: BTreeMap::new(),
            archived_pricings: BTreeMap::new(),
        }
    }

    /// Add a new active pricing version.
    pub fn add_active(
        &mut self,
        version: impl Into<String>,
        locator: PricingLocator,
    ) -> Result<(), ServiceError> {
        let version = version.into();
        if self.active_pricings.contains_key(&version)
            || self.archived_pricings.contains_key(&version)
        {
            return Err(ServiceError::DuplicateVersion {
                service: self.name.clone(),
                version,
            });
        }
        self.active_pricings.insert(version, locator);
        Ok(())
    }

    /// Move a version from active to archived.
    pub fn archive_version(&mut self, version: &str) -> Result<(), ServiceError> {
        match self.active_pricings.remove(version) {
            Some(locator) => {
                self.archived_pricings.insert(version.to_string(), locator);
                Ok(())
            }
            None => Err(ServiceError::UnknownVersion {
                service: self.name.clone(),
                version: version.to_string(),
            }),
        }
    }

    /// Move a version from archived back to active.
    pub fn activate_version(&mut self, version: &str) -> Result<(), ServiceError> {
        match self.archived_pricings.remove(version) {
            Some(locator) => {
                self.active_pricings.insert(version.to_string(), locator);
                Ok(())
            }
            None => Err(ServiceError::UnknownVersion {
                service: self.name.clone(),
                version: version.to_string(),
            }),
        }
    }

    /// Look up the locator for a version in either set.
    pub fn locator(&self, version: &str) -> Option<&PricingLocator> {
        self.active_pricings
            .get(version)
            .or_else(|| self.archived_pricings.get(version))
    }

    /// Whether the version is currently active.
    pub fn is_active(&self, version: &str) -> bool {
        self.active_pricings.contains_key(version)
    }
}
