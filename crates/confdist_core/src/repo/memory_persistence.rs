//! In-memory persistence backend.

use crate::model::properties::Properties;
use crate::repo::persistence::{PersistencePort, PersistenceResult};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Volatile persistence for tests and embedded use without a database file.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    records: Mutex<BTreeMap<String, Properties>>,
    factories: Mutex<BTreeMap<String, BTreeSet<String>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_records().is_empty()
    }

    fn lock_records(&self) -> MutexGuard<'_, BTreeMap<String, Properties>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_factories(&self) -> MutexGuard<'_, BTreeMap<String, BTreeSet<String>>> {
        self.factories.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PersistencePort for MemoryPersistence {
    fn exists(&self, identity: &str) -> PersistenceResult<bool> {
        Ok(self.lock_records().contains_key(identity))
    }

    fn load(&self, identity: &str) -> PersistenceResult<Option<Properties>> {
        Ok(self.lock_records().get(identity).cloned())
    }

    fn load_all(&self) -> PersistenceResult<Vec<(String, PersistenceResult<Properties>)>> {
        Ok(self
            .lock_records()
            .iter()
            .map(|(identity, properties)| (identity.clone(), Ok(properties.clone())))
            .collect())
    }

    fn store(&self, identity: &str, properties: &Properties) -> PersistenceResult<()> {
        self.lock_records()
            .insert(identity.to_string(), properties.clone());
        Ok(())
    }

    fn delete(&self, identity: &str) -> PersistenceResult<()> {
        self.lock_records().remove(identity);
        Ok(())
    }

    fn store_members(
        &self,
        factory_identity: &str,
        members: &BTreeSet<String>,
    ) -> PersistenceResult<()> {
        self.lock_factories()
            .insert(factory_identity.to_string(), members.clone());
        Ok(())
    }

    fn load_members(&self, factory_identity: &str) -> PersistenceResult<Option<BTreeSet<String>>> {
        Ok(self.lock_factories().get(factory_identity).cloned())
    }

    fn load_all_factories(&self) -> PersistenceResult<Vec<(String, BTreeSet<String>)>> {
        Ok(self
            .lock_factories()
            .iter()
            .map(|(factory, members)| (factory.clone(), members.clone()))
            .collect())
    }
}
