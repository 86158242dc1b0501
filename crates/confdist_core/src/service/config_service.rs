//! Configuration service: the writer-facing entry point.
//!
//! # Responsibility
//! - Create, update, refresh and delete records through one owned store.
//! - Persist every change before it is handed to the dispatcher.
//! - Resolve subscribers (and dynamic bindings) when work is enqueued.
//!
//! # Invariants
//! - A rejected write leaves the in-memory record unchanged.
//! - Deleted records never get new dispatch work apart from the final
//!   "no configuration" delivery.
//! - No store or record lock is held while persistence runs or a subscriber
//!   is called.

use crate::config::CoreConfig;
use crate::dispatch::dispatcher::{DispatchStats, DispatchTask, TaskKind, UpdateDispatcher};
use crate::dispatch::subscriber::{Subscriber, SubscriberRegistry};
use crate::error::{CoreError, CoreResult};
use crate::model::location::{location_admits, BindOutcome};
use crate::model::properties::{Properties, IDENTITY_KEY, NEW_RECORD_MARKER_KEY};
use crate::model::record::{check_finite, validate_identity, VersionedRecord};
use crate::repo::persistence::PersistencePort;
use crate::repo::sqlite_persistence::SqlitePersistence;
use crate::store::factory::Factory;
use crate::store::record_store::RecordStore;
use log::{error, info, warn};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Selects records for [`ConfigService::list_records`].
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    identity_pattern: Option<Regex>,
    factory_identity: Option<String>,
}

impl RecordFilter {
    /// Matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches identities against a regular expression.
    pub fn identity_matches(pattern: &str) -> CoreResult<Self> {
        let regex = Regex::new(pattern).map_err(|err| CoreError::InvalidFilter(err.to_string()))?;
        Ok(Self {
            identity_pattern: Some(regex),
            ..Self::default()
        })
    }

    /// Restricts the filter to members of one factory group.
    pub fn in_factory(mut self, factory_identity: impl Into<String>) -> Self {
        self.factory_identity = Some(factory_identity.into());
        self
    }

    pub fn matches(&self, record: &VersionedRecord) -> bool {
        let identity_ok = self
            .identity_pattern
            .as_ref()
            .map_or(true, |pattern| pattern.is_match(record.identity()));
        let factory_ok = self
            .factory_identity
            .as_deref()
            .map_or(true, |factory| record.factory_identity() == Some(factory));
        identity_ok && factory_ok
    }
}

/// Owns the record store, subscriber registry and dispatcher of one
/// configuration domain.
pub struct ConfigService {
    store: RecordStore,
    persistence: Arc<dyn PersistencePort>,
    subscribers: SubscriberRegistry,
    dispatcher: UpdateDispatcher,
}

impl ConfigService {
    /// Starts a service over `persistence` and loads every persisted record.
    ///
    /// Records whose persisted data is unreadable are logged and skipped.
    pub fn open(config: &CoreConfig, persistence: Arc<dyn PersistencePort>) -> CoreResult<Self> {
        config.validate()?;
        let service = Self {
            store: RecordStore::new(),
            persistence,
            subscribers: SubscriberRegistry::new(),
            dispatcher: UpdateDispatcher::new(config.dispatch_workers)?,
        };
        service.load_persisted()?;
        Ok(service)
    }

    /// Starts a service backed by SQLite at `config.db_path` (or in memory).
    pub fn from_config(config: &CoreConfig) -> CoreResult<Self> {
        let persistence: Arc<dyn PersistencePort> = match &config.db_path {
            Some(path) => Arc::new(SqlitePersistence::open(path)?),
            None => Arc::new(SqlitePersistence::open_in_memory()?),
        };
        Self::open(config, persistence)
    }

    fn load_persisted(&self) -> CoreResult<()> {
        let started_at = Instant::now();
        let mut loaded = 0_usize;
        let mut skipped = 0_usize;

        for (identity, persisted) in self.persistence.load_all()? {
            let restored = persisted
                .map_err(CoreError::from)
                .and_then(|persisted| self.record_from_persisted(&identity, persisted));
            match restored {
                Ok(record) => {
                    self.store.insert_if_absent(Arc::new(record));
                    loaded += 1;
                }
                Err(err) => {
                    skipped += 1;
                    error!(
                        "event=records_load module=service status=error identity={} error_code=corrupt_record error={}",
                        identity, err
                    );
                }
            }
        }

        for (factory_identity, members) in self.persistence.load_all_factories()? {
            self.store
                .restore_factory(Factory::with_members(factory_identity, members));
        }
        for record in self.store.records() {
            if let Some(factory) = record.factory_identity() {
                self.store.add_member(factory, record.identity());
            }
        }

        info!(
            "event=records_load module=service status=ok loaded={} skipped={} factories={} duration_ms={}",
            loaded,
            skipped,
            self.store.factory_identities().len(),
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    fn record_from_persisted(
        &self,
        identity: &str,
        mut persisted: Properties,
    ) -> CoreResult<VersionedRecord> {
        check_embedded_identity(identity, &persisted)?;
        persisted.insert(IDENTITY_KEY, identity);
        VersionedRecord::from_persisted(persisted, self.store.dynamic_location(identity))
    }

    /// Returns the live record for `identity`, if any.
    pub fn record(&self, identity: &str) -> Option<Arc<VersionedRecord>> {
        self.store.get(identity)
    }

    /// Returns the record for `identity`, loading or creating it on first use.
    ///
    /// A freshly created record is persisted immediately with the new-record
    /// marker and bound statically to `location` when given.
    pub fn get_or_create(
        &self,
        identity: &str,
        location: Option<&str>,
    ) -> CoreResult<Arc<VersionedRecord>> {
        validate_identity(identity)?;
        if let Some(record) = self.store.get(identity) {
            return Ok(record);
        }

        if let Some(persisted) = self.persistence.load(identity)? {
            let record = Arc::new(self.record_from_persisted(identity, persisted)?);
            let live = self.store.insert_if_absent(record);
            if let Some(factory) = live.factory_identity() {
                self.store.add_member(factory, identity);
            }
            return Ok(live);
        }

        let record = Arc::new(VersionedRecord::new(
            identity,
            None,
            location.map(str::to_string),
            self.store.dynamic_location(identity),
        )?);
        let live = self.store.insert_if_absent(Arc::clone(&record));
        if !Arc::ptr_eq(&live, &record) {
            return Ok(live);
        }

        if let Err(err) = self
            .persistence
            .store(identity, &record.persisted_properties(None))
        {
            self.store.remove_record(&record);
            error!(
                "event=record_create module=service status=error identity={} error_code=persist_failed error={}",
                identity, err
            );
            return Err(err.into());
        }

        info!(
            "event=record_create module=service status=ok identity={} bound={}",
            identity,
            location.is_some()
        );
        Ok(record)
    }

    /// Creates a new member of `factory_identity` with a generated identity.
    ///
    /// The member is only persisted and added to the group on its first
    /// update.
    pub fn create_factory_record(
        &self,
        factory_identity: &str,
        location: Option<&str>,
    ) -> CoreResult<Arc<VersionedRecord>> {
        validate_identity(factory_identity)?;
        let identity = format!("{factory_identity}.{}", Uuid::new_v4());
        self.store.ensure_factory(factory_identity);

        let record = Arc::new(VersionedRecord::new(
            identity.as_str(),
            Some(factory_identity.to_string()),
            location.map(str::to_string),
            None,
        )?);
        info!(
            "event=factory_record_create module=service status=ok factory_identity={} identity={}",
            factory_identity, identity
        );
        Ok(self.store.insert_if_absent(record))
    }

    /// Replaces the content of `identity` and schedules its distribution.
    ///
    /// Returns the new modification counter.
    pub fn update(&self, identity: &str, properties: Properties) -> CoreResult<i64> {
        let record = self.get_or_create(identity, None)?;
        self.update_record(&record, properties)
    }

    /// Replaces the content of `record` and schedules its distribution.
    pub fn update_record(
        &self,
        record: &Arc<VersionedRecord>,
        mut properties: Properties,
    ) -> CoreResult<i64> {
        let identity = record.identity();
        if record.is_deleted() {
            return Err(CoreError::DeletedRecord(identity.to_string()));
        }

        check_finite(identity, &properties)?;
        properties.strip_reserved();
        let persisted = record.persisted_properties(Some(&properties));
        if let Err(err) = self.persistence.store(identity, &persisted) {
            error!(
                "event=record_update module=service status=error identity={} error_code=persist_failed error={}",
                identity, err
            );
            return Err(err.into());
        }

        if let Some(factory) = record.factory_identity() {
            self.register_member(factory, identity);
        }

        let key_count = properties.len();
        let version = match record.assign_content(properties) {
            Ok(version) => version,
            Err(err) => {
                self.undo_write_after_delete(record);
                return Err(err);
            }
        };

        info!(
            "event=record_update module=service status=ok identity={} version={} keys={}",
            identity, version, key_count
        );
        self.schedule_update(record);
        Ok(version)
    }

    /// Re-reads `identity` from persistence and redistributes it.
    pub fn refresh(&self, identity: &str) -> CoreResult<i64> {
        let record = self.require_live(identity)?;
        let Some(mut persisted) = self.persistence.load(identity)? else {
            self.schedule_update(&record);
            return Ok(record.modification_counter());
        };
        check_embedded_identity(identity, &persisted)?;

        let version = if persisted.remove(NEW_RECORD_MARKER_KEY).is_some() {
            record.clear_content()?
        } else {
            record.assign_content(persisted)?
        };
        info!(
            "event=record_refresh module=service status=ok identity={} version={}",
            identity, version
        );
        self.schedule_update(&record);
        Ok(version)
    }

    /// Deletes `identity` everywhere and delivers "no configuration" once.
    pub fn delete(&self, identity: &str) -> CoreResult<()> {
        let record = self
            .store
            .get(identity)
            .ok_or_else(|| CoreError::NotFound(identity.to_string()))?;
        self.delete_record(&record)
    }

    /// Marks `record` deleted, then removes it from persistence.
    ///
    /// The in-memory deletion happens first so a racing `update_record`
    /// fails instead of re-storing content after the persisted row is gone.
    /// When the persistence delete fails the record stays deleted and the
    /// error is returned; calling this again retries the persistence delete.
    pub fn delete_record(&self, record: &Arc<VersionedRecord>) -> CoreResult<()> {
        let identity = record.identity();
        let newly_deleted = record.delete();
        if !newly_deleted && self.replaced_in_store(record) {
            return Ok(());
        }

        let persisted = self.persistence.delete(identity);

        if newly_deleted {
            let targets = self.resolve_targets(record, false);
            self.store.set_dynamic_location(identity, None);
            if let Some(factory) = self.store.remove_record(record) {
                self.persist_members(&factory);
            }
            info!(
                "event=record_delete module=service status=ok identity={} version={}",
                identity,
                record.modification_counter()
            );
            self.dispatcher
                .enqueue(DispatchTask::update(Arc::clone(record), targets));
        }

        persisted.map_err(|err| {
            error!(
                "event=record_delete module=service status=error identity={} error_code=persist_failed error={}",
                identity, err
            );
            err.into()
        })
    }

    /// Sets or clears the static location of `identity`.
    pub fn set_static_location(&self, identity: &str, location: Option<&str>) -> CoreResult<()> {
        let record = self.require_live(identity)?;
        let previous = record.bind_location(location.map(str::to_string), true);
        if record.dynamic_location().is_none() {
            self.store.set_dynamic_location(identity, None);
        }

        let unsaved_factory_member = record.factory_identity().is_some() && record.is_new();
        if !unsaved_factory_member {
            if let Err(err) = self
                .persistence
                .store(identity, &record.persisted_properties(None))
            {
                error!(
                    "event=location_store module=service status=error identity={} error_code=persist_failed error={}",
                    identity, err
                );
            }
        }

        self.location_changed(&record, previous);
        Ok(())
    }

    /// Binds `identity` dynamically to `location` unless already bound.
    pub fn try_bind_location(&self, identity: &str, location: &str) -> CoreResult<BindOutcome> {
        let record = self.require_live(identity)?;
        let previous = record.effective_location();
        let outcome = record.try_bind(location);
        if outcome == BindOutcome::Bound {
            self.store.set_dynamic_location(identity, Some(location));
            self.location_changed(&record, previous);
        }
        Ok(outcome)
    }

    /// Lists records that have content and match `filter`.
    pub fn list_records(&self, filter: &RecordFilter) -> Vec<Arc<VersionedRecord>> {
        self.store
            .records()
            .into_iter()
            .filter(|record| !record.is_new() && filter.matches(record))
            .collect()
    }

    pub fn factory_members(&self, factory_identity: &str) -> Option<BTreeSet<String>> {
        self.store.factory_members(factory_identity)
    }

    /// Registers `subscriber` for a record or factory identity and delivers
    /// the current state of every matching record to it.
    pub fn attach_subscriber(
        &self,
        target: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> CoreResult<()> {
        self.subscribers.register(target, Arc::clone(&subscriber))?;

        let records: Vec<Arc<VersionedRecord>> = match self.store.get(target) {
            Some(record) => vec![record],
            None => self
                .store
                .records()
                .into_iter()
                .filter(|record| record.factory_identity() == Some(target) && !record.is_new())
                .collect(),
        };

        let owner = subscriber.location();
        for record in &records {
            if let Some(owner) = owner {
                self.bind_dynamic(record, owner);
            }
            if record.admits(owner) {
                self.dispatcher.enqueue(DispatchTask::new(
                    TaskKind::Targeted,
                    Arc::clone(record),
                    vec![Arc::clone(&subscriber)],
                ));
            }
        }

        info!(
            "event=subscriber_attach module=service status=ok target={} subscriber={} records={}",
            target,
            subscriber.subscriber_id(),
            records.len()
        );
        Ok(())
    }

    /// Removes a subscriber registration; returns whether it existed.
    pub fn detach_subscriber(&self, target: &str, subscriber_id: &str) -> bool {
        let removed = self.subscribers.unregister(target, subscriber_id);
        info!(
            "event=subscriber_detach module=service status={} target={} subscriber={}",
            if removed { "ok" } else { "missing" },
            target,
            subscriber_id
        );
        removed
    }

    /// Enqueues a regular dispatch for `identity`, retrying a failed
    /// delivery of the live version.
    pub fn resync(&self, identity: &str) -> CoreResult<()> {
        let record = self.require_live(identity)?;
        self.schedule_update(&record);
        Ok(())
    }

    /// Blocks until every dispatch task enqueued so far has been processed.
    pub fn flush(&self) {
        self.dispatcher.flush();
    }

    pub fn dispatch_stats(&self) -> &DispatchStats {
        self.dispatcher.stats()
    }

    fn require_live(&self, identity: &str) -> CoreResult<Arc<VersionedRecord>> {
        let record = self
            .store
            .get(identity)
            .ok_or_else(|| CoreError::NotFound(identity.to_string()))?;
        if record.is_deleted() {
            return Err(CoreError::DeletedRecord(identity.to_string()));
        }
        Ok(record)
    }

    fn schedule_update(&self, record: &Arc<VersionedRecord>) {
        let targets = self.resolve_targets(record, true);
        self.dispatcher
            .enqueue(DispatchTask::update(Arc::clone(record), targets));
    }

    /// Returns the subscribers admitted by `record`'s location.
    ///
    /// With `bind`, an unbound record is first bound to the location of the
    /// first location-bound candidate.
    fn resolve_targets(&self, record: &VersionedRecord, bind: bool) -> Vec<Arc<dyn Subscriber>> {
        let candidates = self.subscribers.candidates_for(record);
        if bind {
            if let Some(owner) = candidates.iter().find_map(|candidate| candidate.location()) {
                self.bind_dynamic(record, owner);
            }
        }
        candidates
            .into_iter()
            .filter(|candidate| record.admits(candidate.location()))
            .collect()
    }

    fn bind_dynamic(&self, record: &VersionedRecord, owner: &str) {
        if record.try_bind(owner) == BindOutcome::Bound {
            self.store.set_dynamic_location(record.identity(), Some(owner));
            info!(
                "event=location_bind module=service status=ok identity={} dynamic=true",
                record.identity()
            );
        }
    }

    /// Notifies subscribers that gained or lost `record` after its effective
    /// location moved away from `previous`.
    fn location_changed(&self, record: &Arc<VersionedRecord>, previous: Option<String>) {
        let current = record.effective_location();
        if current == previous {
            return;
        }
        info!(
            "event=location_change module=service status=ok identity={} had_location={} has_location={}",
            record.identity(),
            previous.is_some(),
            current.is_some()
        );

        let mut gained = Vec::new();
        let mut lost = Vec::new();
        for candidate in self.subscribers.candidates_for(record) {
            let owner = candidate.location();
            if owner.is_none() {
                continue;
            }
            let before = location_admits(previous.as_deref(), owner);
            let after = location_admits(current.as_deref(), owner);
            match (before, after) {
                (false, true) => gained.push(candidate),
                (true, false) => lost.push(candidate),
                _ => {}
            }
        }

        if !lost.is_empty() {
            self.dispatcher.enqueue(DispatchTask::new(
                TaskKind::Revoke,
                Arc::clone(record),
                lost,
            ));
        }
        if !gained.is_empty() {
            self.dispatcher.enqueue(DispatchTask::new(
                TaskKind::Targeted,
                Arc::clone(record),
                gained,
            ));
        }
    }

    fn register_member(&self, factory_identity: &str, identity: &str) {
        if self.store.add_member(factory_identity, identity) {
            self.persist_members(factory_identity);
        }
    }

    fn persist_members(&self, factory_identity: &str) {
        let members = self
            .store
            .factory_members(factory_identity)
            .unwrap_or_default();
        if let Err(err) = self.persistence.store_members(factory_identity, &members) {
            error!(
                "event=factory_store module=service status=error factory_identity={} members={} error_code=persist_failed error={}",
                factory_identity,
                members.len(),
                err
            );
        }
    }

    /// A delete won the race against an in-flight write: take the write back
    /// out of persistence and the factory group.
    /// True when another record now owns `record`'s identity.
    fn replaced_in_store(&self, record: &Arc<VersionedRecord>) -> bool {
        self.store
            .get(record.identity())
            .is_some_and(|live| !Arc::ptr_eq(&live, record))
    }

    fn undo_write_after_delete(&self, record: &Arc<VersionedRecord>) {
        warn!(
            "event=record_update module=service status=error identity={} error_code=deleted_concurrently",
            record.identity()
        );
        if self.replaced_in_store(record) {
            return;
        }
        if let Err(err) = self.persistence.delete(record.identity()) {
            error!(
                "event=record_delete module=service status=error identity={} error_code=persist_failed error={}",
                record.identity(),
                err
            );
        }
        if let Some(factory) = record.factory_identity() {
            if self.store.remove_member(factory, record.identity()) {
                self.persist_members(factory);
            }
        }
    }
}

fn check_embedded_identity(expected: &str, persisted: &Properties) -> CoreResult<()> {
    match persisted.get_str(IDENTITY_KEY) {
        Some(found) if found != expected => Err(CoreError::IdentityMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }),
        _ => Ok(()),
    }
}
