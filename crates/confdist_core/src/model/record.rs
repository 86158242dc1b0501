//! Versioned configuration record.
//!
//! # Responsibility
//! - Hold one record's identity, owner binding and content.
//! - Version every content assignment with a logical modification counter.
//! - Track the highest version the dispatcher has delivered.
//!
//! # Invariants
//! - `(properties, modification_counter, dispatched_counter, deleted)` live
//!   behind a single mutex; the counter bump and the content swap happen in
//!   one critical section.
//! - `dispatched_counter` never decreases.
//! - `properties == None` means the record was never given content.
//! - Once deleted, content assignment fails with `CoreError::DeletedRecord`.
//! - No lock is held across persistence or subscriber calls.

use crate::error::{CoreError, CoreResult};
use crate::model::location::{BindOutcome, LocationBinding};
use crate::model::properties::{
    Properties, FACTORY_IDENTITY_KEY, IDENTITY_KEY, LOCATION_KEY, NEW_RECORD_MARKER_KEY,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Value of `dispatched_counter` before the first delivery.
pub const NEVER_DISPATCHED: i64 = -1;

static IDENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s\p{Cc}]+$").expect("valid identity regex"));

/// Validates a record or factory identity.
pub fn validate_identity(identity: &str) -> CoreResult<()> {
    if IDENTITY_RE.is_match(identity) {
        Ok(())
    } else {
        Err(CoreError::InvalidIdentity(identity.to_string()))
    }
}

/// Rejects property sets that cannot survive a JSON round trip.
pub(crate) fn check_finite(identity: &str, properties: &Properties) -> CoreResult<()> {
    match properties.non_finite_key() {
        Some(key) => Err(CoreError::InvalidProperty {
            identity: identity.to_string(),
            key: key.to_string(),
        }),
        None => Ok(()),
    }
}

fn take_text(properties: &mut Properties, key: &str) -> Option<String> {
    properties
        .remove(key)
        .and_then(|value| value.as_str().map(str::to_string))
}

#[derive(Debug)]
struct RecordState {
    properties: Option<Properties>,
    modification_counter: i64,
    dispatched_counter: i64,
    deleted: bool,
}

/// One live configuration record.
#[derive(Debug)]
pub struct VersionedRecord {
    identity: String,
    factory_identity: Option<String>,
    binding: Mutex<LocationBinding>,
    state: Mutex<RecordState>,
}

impl VersionedRecord {
    /// Creates a record that has never been given content.
    ///
    /// The creation itself counts as the first content assignment, so the
    /// modification counter starts at `1`.
    pub fn new(
        identity: impl Into<String>,
        factory_identity: Option<String>,
        static_location: Option<String>,
        dynamic_location: Option<String>,
    ) -> CoreResult<Self> {
        Self::with_state(
            identity.into(),
            factory_identity,
            LocationBinding::new(static_location, dynamic_location),
            None,
        )
    }

    /// Rebuilds a record from its persisted form.
    ///
    /// The reserved keys are consumed; a new-record marker restores the
    /// "never given content" state. Loading counts as one modification.
    pub fn from_persisted(
        mut persisted: Properties,
        dynamic_location: Option<String>,
    ) -> CoreResult<Self> {
        let identity = take_text(&mut persisted, IDENTITY_KEY).ok_or_else(|| {
            CoreError::CorruptRecord(format!("missing `{IDENTITY_KEY}` in persisted data"))
        })?;
        let factory_identity = take_text(&mut persisted, FACTORY_IDENTITY_KEY);
        let static_location = take_text(&mut persisted, LOCATION_KEY);
        let is_new = persisted.remove(NEW_RECORD_MARKER_KEY).is_some();

        let content = if is_new {
            None
        } else {
            check_finite(&identity, &persisted)?;
            Some(persisted)
        };
        Self::with_state(
            identity,
            factory_identity,
            LocationBinding::new(static_location, dynamic_location),
            content,
        )
    }

    fn with_state(
        identity: String,
        factory_identity: Option<String>,
        binding: LocationBinding,
        properties: Option<Properties>,
    ) -> CoreResult<Self> {
        validate_identity(&identity)?;
        if let Some(factory) = factory_identity.as_deref() {
            validate_identity(factory)?;
        }

        Ok(Self {
            identity,
            factory_identity,
            binding: Mutex::new(binding),
            state: Mutex::new(RecordState {
                properties,
                modification_counter: 1,
                dispatched_counter: NEVER_DISPATCHED,
                deleted: false,
            }),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn factory_identity(&self) -> Option<&str> {
        self.factory_identity.as_deref()
    }

    /// Replaces the content and bumps the modification counter.
    ///
    /// Reserved keys are stripped before the content is stored. Returns the
    /// new modification counter.
    ///
    /// # Errors
    /// - `InvalidProperty` for a NaN or infinite float anywhere in the set.
    /// - `DeletedRecord` once the record was deleted.
    pub fn assign_content(&self, mut properties: Properties) -> CoreResult<i64> {
        check_finite(&self.identity, &properties)?;
        properties.strip_reserved();
        self.configure(Some(properties))
    }

    /// Resets the content to "never given content"; used when reloading a
    /// persisted new-record marker.
    pub(crate) fn clear_content(&self) -> CoreResult<i64> {
        self.configure(None)
    }

    fn configure(&self, properties: Option<Properties>) -> CoreResult<i64> {
        let mut state = self.lock_state();
        if state.deleted {
            return Err(CoreError::DeletedRecord(self.identity.clone()));
        }
        state.properties = properties;
        state.modification_counter += 1;
        Ok(state.modification_counter)
    }

    /// Returns the modification counter and a content snapshot read together.
    ///
    /// A deleted record reports its final counter with no content.
    pub fn current_version(&self) -> (i64, Option<Properties>) {
        let state = self.lock_state();
        let properties = if state.deleted {
            None
        } else {
            state.properties.clone()
        };
        (state.modification_counter, properties)
    }

    pub fn modification_counter(&self) -> i64 {
        self.lock_state().modification_counter
    }

    pub fn dispatched_counter(&self) -> i64 {
        self.lock_state().dispatched_counter
    }

    /// Records that `version_seen` was delivered.
    ///
    /// Uses max semantics so a late task can never move the counter back.
    /// Returns whether the counter advanced.
    pub fn mark_dispatched(&self, version_seen: i64) -> bool {
        let mut state = self.lock_state();
        if version_seen > state.dispatched_counter {
            state.dispatched_counter = version_seen;
            true
        } else {
            false
        }
    }

    /// Returns `true` while the record was never given content.
    pub fn is_new(&self) -> bool {
        self.lock_state().properties.is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.lock_state().deleted
    }

    /// Marks the record deleted.
    ///
    /// Takes one final modification so that pending dispatch work resolves to
    /// delivering absence exactly once. Returns `false` if it was already
    /// deleted.
    pub fn delete(&self) -> bool {
        let mut state = self.lock_state();
        if state.deleted {
            return false;
        }
        state.deleted = true;
        state.modification_counter += 1;
        true
    }

    /// Returns the externally visible content with identity keys injected.
    ///
    /// `None` for a record that was never given content or was deleted.
    pub fn properties(&self) -> Option<Properties> {
        let (_, properties) = self.current_version();
        properties.map(|properties| self.visible_properties(properties))
    }

    /// Turns a content snapshot into its externally visible form.
    pub fn visible_properties(&self, mut content: Properties) -> Properties {
        self.inject_identity_keys(&mut content);
        content
    }

    /// Builds the form handed to persistence.
    ///
    /// `content` overrides the current content; otherwise the stored content
    /// (or the new-record marker) is used.
    pub fn persisted_properties(&self, content: Option<&Properties>) -> Properties {
        let mut persisted = match content {
            Some(content) => content.clone(),
            None => match self.current_version().1 {
                Some(properties) => properties,
                None => Properties::new().with(NEW_RECORD_MARKER_KEY, true),
            },
        };
        self.inject_identity_keys(&mut persisted);
        persisted.replace_or_remove(LOCATION_KEY, self.static_location().as_deref());
        persisted
    }

    fn inject_identity_keys(&self, properties: &mut Properties) {
        properties.insert(IDENTITY_KEY, self.identity.as_str());
        properties.replace_or_remove(FACTORY_IDENTITY_KEY, self.factory_identity.as_deref());
        properties.remove(LOCATION_KEY);
    }

    /// Sets the static or dynamic location; returns the previous effective
    /// location so callers can detect a change.
    pub fn bind_location(&self, location: Option<String>, is_static: bool) -> Option<String> {
        self.lock_binding().bind(location, is_static)
    }

    /// Binds `location` dynamically unless a location is already set.
    ///
    /// Both outcomes are successful.
    pub fn try_bind(&self, location: &str) -> BindOutcome {
        self.lock_binding().try_bind(location)
    }

    pub fn effective_location(&self) -> Option<String> {
        self.lock_binding().effective().map(str::to_string)
    }

    pub fn static_location(&self) -> Option<String> {
        self.lock_binding().static_location().map(str::to_string)
    }

    pub fn dynamic_location(&self) -> Option<String> {
        self.lock_binding().dynamic_location().map(str::to_string)
    }

    /// Returns whether a subscriber owned by `owner` may receive this record.
    pub fn admits(&self, owner: Option<&str>) -> bool {
        self.lock_binding().admits(owner)
    }

    fn lock_state(&self) -> MutexGuard<'_, RecordState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_binding(&self) -> MutexGuard<'_, LocationBinding> {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Display for VersionedRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "record identity={} factory_identity={} location={}",
            self.identity,
            self.factory_identity.as_deref().unwrap_or("-"),
            self.effective_location().as_deref().unwrap_or("-")
        )
    }
}
