//! Record store: live records, factory groups and dynamic bindings.
//!
//! # Invariants
//! - At most one live record exists per identity; concurrent creators race
//!   through [`RecordStore::insert_if_absent`] and all observe the winner.
//! - Dynamic bindings are kept per identity and outlive record objects, so a
//!   re-created record picks its binding back up.
//! - Deleting a record removes it from its factory group but never removes
//!   the group itself.

use crate::model::record::VersionedRecord;
use crate::store::factory::Factory;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Explicitly owned registry of live records.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: Mutex<HashMap<String, Arc<VersionedRecord>>>,
    factories: Mutex<HashMap<String, Factory>>,
    dynamic_locations: Mutex<HashMap<String, String>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &str) -> Option<Arc<VersionedRecord>> {
        self.lock_records().get(identity).cloned()
    }

    /// Caches `record` unless another record with the same identity won the
    /// race; returns whichever record is now live.
    pub fn insert_if_absent(&self, record: Arc<VersionedRecord>) -> Arc<VersionedRecord> {
        let mut records = self.lock_records();
        records
            .entry(record.identity().to_string())
            .or_insert(record)
            .clone()
    }

    /// Returns a snapshot of all live records, sorted by identity.
    pub fn records(&self) -> Vec<Arc<VersionedRecord>> {
        let mut records: Vec<_> = self.lock_records().values().cloned().collect();
        records.sort_by(|a, b| a.identity().cmp(b.identity()));
        records
    }

    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_records().is_empty()
    }

    /// Drops `record` from the identity map and from its factory group.
    ///
    /// Only removes the map entry if it still points at this record object.
    /// Returns the factory identity whose membership changed, if any.
    pub fn remove_record(&self, record: &Arc<VersionedRecord>) -> Option<String> {
        {
            let mut records = self.lock_records();
            if records
                .get(record.identity())
                .is_some_and(|live| Arc::ptr_eq(live, record))
            {
                records.remove(record.identity());
            }
        }

        let factory_identity = record.factory_identity()?;
        if self.remove_member(factory_identity, record.identity()) {
            Some(factory_identity.to_string())
        } else {
            None
        }
    }

    /// Registers a factory group without members if it does not exist.
    pub fn ensure_factory(&self, factory_identity: &str) {
        self.lock_factories()
            .entry(factory_identity.to_string())
            .or_insert_with(|| Factory::new(factory_identity));
    }

    /// Replaces a factory group with persisted membership.
    pub fn restore_factory(&self, factory: Factory) {
        self.lock_factories()
            .insert(factory.identity().to_string(), factory);
    }

    /// Adds `record_identity` to the group, creating the group on first use.
    ///
    /// Returns `true` only when the member was newly added.
    pub fn add_member(&self, factory_identity: &str, record_identity: &str) -> bool {
        self.lock_factories()
            .entry(factory_identity.to_string())
            .or_insert_with(|| Factory::new(factory_identity))
            .add_member(record_identity)
    }

    pub fn remove_member(&self, factory_identity: &str, record_identity: &str) -> bool {
        self.lock_factories()
            .get_mut(factory_identity)
            .is_some_and(|factory| factory.remove_member(record_identity))
    }

    pub fn factory_members(&self, factory_identity: &str) -> Option<BTreeSet<String>> {
        self.lock_factories()
            .get(factory_identity)
            .map(|factory| factory.members().clone())
    }

    pub fn factory_identities(&self) -> Vec<String> {
        let mut identities: Vec<_> = self.lock_factories().keys().cloned().collect();
        identities.sort();
        identities
    }

    pub fn dynamic_location(&self, identity: &str) -> Option<String> {
        self.lock_dynamic_locations().get(identity).cloned()
    }

    /// Records or clears the dynamic binding of `identity`.
    pub fn set_dynamic_location(&self, identity: &str, location: Option<&str>) {
        let mut locations = self.lock_dynamic_locations();
        match location {
            Some(location) => {
                locations.insert(identity.to_string(), location.to_string());
            }
            None => {
                locations.remove(identity);
            }
        }
    }

    fn lock_records(&self) -> MutexGuard<'_, HashMap<String, Arc<VersionedRecord>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_factories(&self) -> MutexGuard<'_, HashMap<String, Factory>> {
        self.factories.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_dynamic_locations(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.dynamic_locations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
