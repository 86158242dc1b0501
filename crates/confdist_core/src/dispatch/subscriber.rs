//! Subscriber port and in-process subscriber registry.

use crate::model::properties::Properties;
use crate::model::record::VersionedRecord;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Failure reported by a subscriber while receiving configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryError {
    pub subscriber_id: String,
    pub message: String,
}

impl DeliveryError {
    pub fn new(subscriber_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            message: message.into(),
        }
    }
}

impl Display for DeliveryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "subscriber `{}` rejected configuration: {}",
            self.subscriber_id, self.message
        )
    }
}

impl Error for DeliveryError {}

/// Receiver of configuration for one or more record identities.
///
/// Implementations may call back into the service; the dispatcher holds no
/// lock while `deliver` runs.
pub trait Subscriber: Send + Sync {
    /// Stable id, unique per registration target.
    fn subscriber_id(&self) -> &str;

    /// Owner location of this subscriber, if it is location-bound.
    fn location(&self) -> Option<&str> {
        None
    }

    /// Receives the current content of `identity`; `None` means "no
    /// configuration".
    fn deliver(&self, identity: &str, properties: Option<&Properties>)
        -> Result<(), DeliveryError>;
}

/// Registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    InvalidSubscriberId(String),
    DuplicateSubscriber { target: String, subscriber_id: String },
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSubscriberId(value) => write!(f, "subscriber id is invalid: `{value}`"),
            Self::DuplicateSubscriber {
                target,
                subscriber_id,
            } => write!(
                f,
                "subscriber `{subscriber_id}` already registered for `{target}`"
            ),
        }
    }
}

impl Error for RegistryError {}

/// Subscribers keyed by target identity.
///
/// A target is either a record identity or a factory identity; factory
/// subscribers receive every member of the group.
#[derive(Default)]
pub struct SubscriberRegistry {
    targets: RwLock<BTreeMap<String, Vec<Arc<dyn Subscriber>>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `subscriber` for `target`.
    pub fn register(
        &self,
        target: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<(), RegistryError> {
        let subscriber_id = subscriber.subscriber_id().trim().to_string();
        if subscriber_id.is_empty() {
            return Err(RegistryError::InvalidSubscriberId(subscriber_id));
        }

        let mut targets = self.write_targets();
        let entries = targets.entry(target.to_string()).or_default();
        if entries
            .iter()
            .any(|existing| existing.subscriber_id().trim() == subscriber_id)
        {
            return Err(RegistryError::DuplicateSubscriber {
                target: target.to_string(),
                subscriber_id,
            });
        }
        entries.push(subscriber);
        Ok(())
    }

    /// Removes one registration; returns whether it existed.
    pub fn unregister(&self, target: &str, subscriber_id: &str) -> bool {
        let mut targets = self.write_targets();
        let Some(entries) = targets.get_mut(target) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|existing| existing.subscriber_id().trim() != subscriber_id.trim());
        let removed = entries.len() != before;
        if entries.is_empty() {
            targets.remove(target);
        }
        removed
    }

    /// Returns every subscriber interested in `record`, by record identity
    /// first and then by factory identity, without location filtering.
    pub fn candidates_for(&self, record: &VersionedRecord) -> Vec<Arc<dyn Subscriber>> {
        let targets = self.read_targets();
        let mut candidates: Vec<Arc<dyn Subscriber>> = targets
            .get(record.identity())
            .cloned()
            .unwrap_or_default();
        if let Some(factory) = record.factory_identity() {
            if let Some(entries) = targets.get(factory) {
                candidates.extend(entries.iter().cloned());
            }
        }
        candidates
    }

    pub fn len(&self) -> usize {
        self.read_targets().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_targets(&self) -> RwLockReadGuard<'_, BTreeMap<String, Vec<Arc<dyn Subscriber>>>> {
        self.targets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_targets(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Vec<Arc<dyn Subscriber>>>> {
        self.targets.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{DeliveryError, RegistryError, Subscriber, SubscriberRegistry};
    use crate::model::properties::Properties;
    use crate::model::record::VersionedRecord;
    use std::sync::Arc;

    struct NoopSubscriber {
        id: String,
    }

    impl Subscriber for NoopSubscriber {
        fn subscriber_id(&self) -> &str {
            &self.id
        }

        fn deliver(
            &self,
            _identity: &str,
            _properties: Option<&Properties>,
        ) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn noop(id: &str) -> Arc<dyn Subscriber> {
        Arc::new(NoopSubscriber { id: id.to_string() })
    }

    #[test]
    fn rejects_blank_and_duplicate_ids() {
        let registry = SubscriberRegistry::new();
        assert!(matches!(
            registry.register("a", noop("   ")),
            Err(RegistryError::InvalidSubscriberId(_))
        ));

        registry.register("a", noop("svc")).expect("first registration");
        assert!(matches!(
            registry.register("a", noop("svc")),
            Err(RegistryError::DuplicateSubscriber { .. })
        ));
        registry
            .register("b", noop("svc"))
            .expect("same id on another target is allowed");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn candidates_include_factory_subscribers() {
        let registry = SubscriberRegistry::new();
        registry.register("pool.1", noop("direct")).unwrap();
        registry.register("pool", noop("factory")).unwrap();

        let record = VersionedRecord::new("pool.1", Some("pool".to_string()), None, None).unwrap();
        let ids: Vec<String> = registry
            .candidates_for(&record)
            .iter()
            .map(|s| s.subscriber_id().to_string())
            .collect();
        assert_eq!(ids, vec!["direct".to_string(), "factory".to_string()]);
    }

    #[test]
    fn unregister_removes_registration() {
        let registry = SubscriberRegistry::new();
        registry.register("a", noop("svc")).unwrap();
        assert!(registry.unregister("a", "svc"));
        assert!(!registry.unregister("a", "svc"));
        assert!(registry.is_empty());
    }
}
