//! Registry of the sages available to the orchestrator.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::domain::errors::RegistryError;
use crate::domain::models::QueryKind;
use crate::domain::ports::Sage;

/// Sages keyed by name. Built once and shared read-only.
#[derive(Default, Clone)]
pub struct SageRegistry {
    sages: BTreeMap<String, Arc<dyn Sage>>,
}

impl SageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sage; names must be unique and non-empty.
    pub fn register(&mut self, sage: Arc<dyn Sage>) -> Result<(), RegistryError> {
        let name = sage.name().trim().to_string();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if sage.capabilities().is_empty() {
            return Err(RegistryError::NoCapabilities(name));
        }
        if self.sages.contains_key(&name) {
            return Err(RegistryError::DuplicateSage(name));
        }
        self.sages.insert(name, sage);
        Ok(())
    }

    pub fn with_sage(mut self, sage: Arc<dyn Sage>) -> Result<Self, RegistryError> {
        self.register(sage)?;
        Ok(self)
    }

    pub fn from_sages<I>(sages: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = Arc<dyn Sage>>,
    {
        sages.into_iter().try_fold(Self::new(), Self::with_sage)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Sage>> {
        self.sages.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sages.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.sages.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sages.is_empty()
    }

    /// Sorted names of sages advertising `kind`.
    pub fn with_capability(&self, kind: QueryKind) -> Vec<String> {
        self.sages
            .iter()
            .filter(|(_, sage)| sage.capabilities().contains(&kind))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn capabilities_of(&self, name: &str) -> BTreeSet<QueryKind> {
        self.sages
            .get(name)
            .map(|sage| sage.capabilities())
            .unwrap_or_default()
    }

    /// Other sages sharing at least one capability with `name`, sorted.
    pub fn overlapping(&self, name: &str) -> Vec<String> {
        let own = self.capabilities_of(name);
        if own.is_empty() {
            return Vec::new();
        }
        self.sages
            .iter()
            .filter(|(other, _)| other.as_str() != name)
            .filter(|(_, sage)| !sage.capabilities().is_disjoint(&own))
            .map(|(other, _)| other.clone())
            .collect()
    }
}

impl std::fmt::Debug for SageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SageRegistry")
            .field("sages", &self.names())
            .finish()
    }
}
