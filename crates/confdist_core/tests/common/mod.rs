#![allow(dead_code)]

use confdist_core::{
    DeliveryError, MemoryPersistence, PersistenceError, PersistencePort, PersistenceResult,
    Properties, Subscriber,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

/// Subscriber that records every delivery it accepts.
pub struct Recorder {
    id: String,
    location: Option<String>,
    fail: AtomicBool,
    seen: Mutex<Vec<(String, Option<Properties>)>>,
}

impl Recorder {
    pub fn new(id: &str) -> Arc<Self> {
        Self::build(id, None)
    }

    pub fn located(id: &str, location: &str) -> Arc<Self> {
        Self::build(id, Some(location.to_string()))
    }

    fn build(id: &str, location: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            location,
            fail: AtomicBool::new(false),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn deliveries(&self) -> Vec<(String, Option<Properties>)> {
        self.seen.lock().unwrap().clone()
    }

    /// Delivered contents, `None` standing for "no configuration".
    pub fn contents(&self) -> Vec<Option<Properties>> {
        self.deliveries().into_iter().map(|(_, p)| p).collect()
    }

    pub fn ints(&self, key: &str) -> Vec<i64> {
        self.contents()
            .iter()
            .filter_map(|p| p.as_ref().and_then(|p| p.get(key)).and_then(|v| v.as_i64()))
            .collect()
    }
}

impl Subscriber for Recorder {
    fn subscriber_id(&self) -> &str {
        &self.id
    }

    fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    fn deliver(&self, identity: &str, properties: Option<&Properties>) -> Result<(), DeliveryError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DeliveryError::new(self.id.as_str(), "not ready"));
        }
        self.seen
            .lock()
            .unwrap()
            .push((identity.to_string(), properties.cloned()));
        Ok(())
    }
}

/// Memory persistence that can be switched into failing every write.
#[derive(Default)]
pub struct FlakyPersistence {
    inner: MemoryPersistence,
    fail_writes: AtomicBool,
}

impl FlakyPersistence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> PersistenceResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Io("disk full".to_string()));
        }
        Ok(())
    }
}

impl PersistencePort for FlakyPersistence {
    fn exists(&self, identity: &str) -> PersistenceResult<bool> {
        self.inner.exists(identity)
    }

    fn load(&self, identity: &str) -> PersistenceResult<Option<Properties>> {
        self.inner.load(identity)
    }

    fn load_all(&self) -> PersistenceResult<Vec<(String, PersistenceResult<Properties>)>> {
        self.inner.load_all()
    }

    fn store(&self, identity: &str, properties: &Properties) -> PersistenceResult<()> {
        self.check()?;
        self.inner.store(identity, properties)
    }

    fn delete(&self, identity: &str) -> PersistenceResult<()> {
        self.check()?;
        self.inner.delete(identity)
    }

    fn store_members(
        &self,
        factory_identity: &str,
        members: &BTreeSet<String>,
    ) -> PersistenceResult<()> {
        self.check()?;
        self.inner.store_members(factory_identity, members)
    }

    fn load_members(&self, factory_identity: &str) -> PersistenceResult<Option<BTreeSet<String>>> {
        self.inner.load_members(factory_identity)
    }

    fn load_all_factories(&self) -> PersistenceResult<Vec<(String, BTreeSet<String>)>> {
        self.inner.load_all_factories()
    }
}

/// Subscriber whose deliveries block until the returned sender is dropped.
///
/// Holds its dispatch worker busy so tasks can be queued behind it.
pub struct Gate {
    release: Mutex<Receiver<()>>,
}

impl Gate {
    pub fn closed() -> (Arc<Self>, Sender<()>) {
        let (sender, receiver) = mpsc::channel();
        let gate = Arc::new(Self {
            release: Mutex::new(receiver),
        });
        (gate, sender)
    }
}

impl Subscriber for Gate {
    fn subscriber_id(&self) -> &str {
        "gate"
    }

    fn deliver(&self, _identity: &str, _properties: Option<&Properties>) -> Result<(), DeliveryError> {
        let _ = self.release.lock().unwrap().recv();
        Ok(())
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// Memory persistence that runs a one-shot callback right after a store or
/// delete reaches the inner backend.
#[derive(Default)]
pub struct HookedPersistence {
    inner: MemoryPersistence,
    after_store: Mutex<Option<Hook>>,
    after_delete: Mutex<Option<Hook>>,
}

impl HookedPersistence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn after_store(&self, hook: impl FnOnce() + Send + 'static) {
        *self.after_store.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn after_delete(&self, hook: impl FnOnce() + Send + 'static) {
        *self.after_delete.lock().unwrap() = Some(Box::new(hook));
    }

    fn fire(slot: &Mutex<Option<Hook>>) {
        let hook = slot.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl PersistencePort for HookedPersistence {
    fn exists(&self, identity: &str) -> PersistenceResult<bool> {
        self.inner.exists(identity)
    }

    fn load(&self, identity: &str) -> PersistenceResult<Option<Properties>> {
        self.inner.load(identity)
    }

    fn load_all(&self) -> PersistenceResult<Vec<(String, PersistenceResult<Properties>)>> {
        self.inner.load_all()
    }

    fn store(&self, identity: &str, properties: &Properties) -> PersistenceResult<()> {
        self.inner.store(identity, properties)?;
        Self::fire(&self.after_store);
        Ok(())
    }

    fn delete(&self, identity: &str) -> PersistenceResult<()> {
        self.inner.delete(identity)?;
        Self::fire(&self.after_delete);
        Ok(())
    }

    fn store_members(
        &self,
        factory_identity: &str,
        members: &BTreeSet<String>,
    ) -> PersistenceResult<()> {
        self.inner.store_members(factory_identity, members)
    }

    fn load_members(&self, factory_identity: &str) -> PersistenceResult<Option<BTreeSet<String>>> {
        self.inner.load_members(factory_identity)
    }

    fn load_all_factories(&self) -> PersistenceResult<Vec<(String, BTreeSet<String>)>> {
        self.inner.load_all_factories()
    }
}

pub fn port(value: i64) -> Properties {
    Properties::new().with("port", value)
}
