//! Entity ID type representing a domain.object_id pair

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

    #[error("domain '{0}' must be lowercase alphanumeric with single underscores")]
    InvalidDomainChars(String),

    #[error("object_id '{0}' must be lowercase alphanumeric with underscores")]
    InvalidObjectIdChars(String),
}

/// A host entity id such as `light.living_room`
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
        if domain.contains("__") || !is_slug(&domain) {
            return Err(EntityIdError::InvalidDomainChars(domain));
        }
        if !is_slug(&object_id) {
            return Err(EntityIdError::InvalidObjectIdChars(object_id));
        }

        Ok(Self { domain, object_id })
    }

    /// Build an entity id from a free-form display name.
    ///
    /// Device names coming from configuration ("Living room lamp") or raw
    /// gateway ids ("newkaku_0000c6c2_1") are slugified first.
    pub fn from_name(domain: impl Into<String>, name: &str) -> Result<Self, EntityIdError> {
        Self::new(domain, slugify(name))
    }

    /// Same domain, object id suffixed with `_<n>`.
    ///
    /// Used to resolve collisions when two devices slugify to the same id.
    pub fn with_suffix(&self, n: usize) -> Self {
        Self {
            domain: self.domain.clone(),
            object_id: format!("{}_{}", self.object_id, n),
        }
    }

    /// Get the domain part of the entity ID
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Get the object_id part of the entity ID
    pub fn object_id(&self) -> &str {
        &self.object_id
    }
}

fn is_slug(s: &str) -> bool {
    !s.starts_with('_')
        && !s.ends_with('_')
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Turn arbitrary text into an object id.
///
/// Lowercases, maps every run of non-alphanumeric characters to a single
/// underscore and trims underscores at both ends. Text without any
/// alphanumeric character becomes `unnamed`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_sep = false;

    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }

    if slug.is_empty() {
        "unnamed".to_string()
    } else {
        slug
    }
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((domain, object_id)) if !object_id.contains('.') => Self::new(domain, object_id),
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
