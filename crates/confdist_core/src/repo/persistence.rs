//! Persistence port contract.

use crate::db::DbError;
use crate::model::properties::Properties;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Storage failure while loading, storing or deleting persisted records.
#[derive(Debug)]
pub enum PersistenceError {
    Db(DbError),
    Serde(serde_json::Error),
    /// Backend-specific failure without a richer source.
    Io(String),
}

impl Display for PersistenceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Serde(err) => write!(f, "invalid persisted payload: {err}"),
            Self::Io(message) => write!(f, "persistence failure: {message}"),
        }
    }
}

impl Error for PersistenceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Serde(err) => Some(err),
            Self::Io(_) => None,
        }
    }
}

impl From<DbError> for PersistenceError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

/// Byte-level storage of record property sets and factory membership.
///
/// Property sets are passed in their persisted form, reserved keys included.
pub trait PersistencePort: Send + Sync {
    fn exists(&self, identity: &str) -> PersistenceResult<bool>;
    fn load(&self, identity: &str) -> PersistenceResult<Option<Properties>>;
    /// Returns every stored identity with its parsed properties.
    ///
    /// A payload that fails to parse is reported in its own entry so callers
    /// can skip it; the outer error is reserved for backend failures.
    fn load_all(&self) -> PersistenceResult<Vec<(String, PersistenceResult<Properties>)>>;
    fn store(&self, identity: &str, properties: &Properties) -> PersistenceResult<()>;
    /// Deleting a missing identity is not an error.
    fn delete(&self, identity: &str) -> PersistenceResult<()>;

    fn store_members(
        &self,
        factory_identity: &str,
        members: &BTreeSet<String>,
    ) -> PersistenceResult<()>;
    fn load_members(&self, factory_identity: &str) -> PersistenceResult<Option<BTreeSet<String>>>;
    fn load_all_factories(&self) -> PersistenceResult<Vec<(String, BTreeSet<String>)>>;
}
