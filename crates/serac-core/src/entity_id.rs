//! Entity ID type representing a domain.object_id pair
//!
//! The host only accepts ids made of lowercase ASCII letters, digits and
//! underscores. Older releases derived object ids straight from massif display
//! names, so registries in the wild can still hold ids such as
//! `sensor.serac_x_dévoluy_avalanche_summary`; [`EntityId::is_compliant`] is
//! what the reconciliation sweep uses to find them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for invalid entity IDs
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityIdError {
    #[error("entity_id must contain exactly one '.' separator")]
    InvalidFormat,

    #[error("domain cannot be empty")]
    EmptyDomain,

    #[error("object_id cannot be empty")]
    EmptyObjectId,

    #[error(
        "domain contains invalid characters (must be lowercase alphanumeric with underscores, cannot start/end with underscore or contain double underscores)"
    )]
    InvalidDomainChars,

    #[error(
        "object_id contains invalid characters (must be lowercase alphanumeric with underscores, cannot start/end with underscore)"
    )]
    InvalidObjectIdChars,
}

/// A host entity ID (e.g., "sensor.serac_chamonix_humidity")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    domain: String,
    object_id: String,
}

impl EntityId {
    /// Create a new EntityId from domain and object_id parts
    pub fn new(
        domain: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Result<Self, EntityIdError> {
        let domain = domain.into();
        let object_id = object_id.into();

        if domain.is_empty() {
            return Err(EntityIdError::EmptyDomain);
        }
        if object_id.is_empty() {
            return Err(EntityIdError::EmptyObjectId);
        }
        if !is_valid_domain(&domain) {
            return Err(EntityIdError::InvalidDomainChars);
        }
        if !is_valid_object_id(&object_id) {
            return Err(EntityIdError::InvalidObjectIdChars);
        }

        Ok(Self { domain, object_id })
    }

    /// Get the domain part of the entity ID
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Get the object_id part of the entity ID
    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// True if `raw` would be accepted by the host as an entity id
    pub fn is_compliant(raw: &str) -> bool {
        raw.parse::<EntityId>().is_ok()
    }
}

/// Lowercase alphanumeric plus underscore, no leading or trailing underscore
fn is_valid_object_id(s: &str) -> bool {
    if s.starts_with('_') || s.ends_with('_') {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Same as object_id, and no `__`
fn is_valid_domain(s: &str) -> bool {
    !s.contains("__") && is_valid_object_id(s)
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((domain, object_id)) if !object_id.contains('.') => {
                Self::new(domain, object_id)
            }
            _ => Err(EntityIdError::InvalidFormat),
        }
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> String {
        id.to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.object_id)
    }
}
