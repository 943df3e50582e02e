//! Schema registry.
//!
//! Rule sets are stored behind `Arc`s. Registering a rule set swaps the
//! `Arc`, so readers holding a snapshot keep seeing the version they fetched.

use crate::defaults::default_rule_sets;
use crate::schema::{AggregationType, RuleSet};
use indexmap::IndexMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tally_core::{AggregationError, Timestamp};
use tracing::{debug, info};

/// Error from registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Unknown schema id
    #[error("Schema not found: {id}")]
    NotFound {
        /// Requested id
        id: String,
    },
    /// Rule set cannot be registered
    #[error("Invalid schema: {reason}")]
    InvalidSchema {
        /// Reason
        reason: String,
    },
}

impl From<RegistryError> for AggregationError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound { id } => AggregationError::not_found("schema", id),
            RegistryError::InvalidSchema { reason } => AggregationError::validation("schema", reason),
        }
    }
}

/// Thread-safe registry of rule sets keyed by id, in registration order
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<IndexMap<String, Arc<RuleSet>>>,
}

impl SchemaRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in rule sets
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for set in default_rule_sets() {
            // Built-in ids are non-empty.
            let _ = registry.register(set);
        }
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, Arc<RuleSet>>> {
        self.schemas.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, Arc<RuleSet>>> {
        self.schemas.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a rule set, replacing any rule set with the same id. A
    /// replacement keeps the original `created_at`.
    ///
    /// # Errors
    ///
    /// Returns error if the id is blank or a rule names an unknown operation
    pub fn register(&self, mut set: RuleSet) -> Result<Arc<RuleSet>, RegistryError> {
        if set.id.trim().is_empty() {
            return Err(RegistryError::InvalidSchema {
                reason: "id must not be empty".to_string(),
            });
        }
        if let Some(rule) = set.rules.iter().find(|r| !r.operation.is_supported()) {
            return Err(RegistryError::InvalidSchema {
                reason: format!("unsupported operation '{}' on field '{}'", rule.operation, rule.field),
            });
        }

        let mut schemas = self.write();
        if let Some(existing) = schemas.get(&set.id) {
            set.created_at = existing.created_at;
            set.updated_at = Timestamp::now();
            debug!(schema_id = %set.id, version = %set.version, "replacing schema");
        } else {
            info!(
                schema_id = %set.id,
                schema_type = %set.schema_type,
                rules = set.rules.len(),
                enabled = set.enabled_count(),
                "registered schema"
            );
        }

        let set = Arc::new(set);
        schemas.insert(set.id.clone(), Arc::clone(&set));
        Ok(set)
    }

    /// Snapshot of a rule set
    ///
    /// # Errors
    ///
    /// Returns error if no rule set has this id
    pub fn get(&self, id: &str) -> Result<Arc<RuleSet>, RegistryError> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })
    }

    /// Snapshots of all rule sets, optionally of one type, in registration
    /// order
    #[must_use]
    pub fn list(&self, schema_type: Option<AggregationType>) -> Vec<Arc<RuleSet>> {
        self.read()
            .values()
            .filter(|s| schema_type.is_none_or(|t| s.schema_type == t))
            .cloned()
            .collect()
    }

    /// Whether a rule set with this id is registered
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// Number of registered rule sets
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove a rule set
    ///
    /// # Errors
    ///
    /// Returns error if no rule set has this id
    pub fn remove(&self, id: &str) -> Result<Arc<RuleSet>, RegistryError> {
        let removed = self
            .write()
            .shift_remove(id)
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })?;
        info!(schema_id = %id, "removed schema");
        Ok(removed)
    }
}
