//! Core error taxonomy.
//!
//! # Invariants
//! - Persistence failures are surfaced to the writer; the in-memory record is
//!   left untouched when a write is rejected.
//! - Delivery failures never appear here; the dispatcher recovers from them
//!   locally.

use crate::config::ConfigError;
use crate::dispatch::subscriber::RegistryError;
use crate::repo::persistence::PersistenceError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type CoreResult<T> = Result<T, CoreError>;

/// Errors returned by record, store and service operations.
#[derive(Debug)]
pub enum CoreError {
    Persistence(PersistenceError),
    /// Persisted data names a different identity than the one requested.
    IdentityMismatch {
        expected: String,
        found: String,
    },
    CorruptRecord(String),
    DeletedRecord(String),
    NotFound(String),
    InvalidIdentity(String),
    InvalidFilter(String),
    /// A value cannot be persisted (NaN or infinite float).
    InvalidProperty {
        identity: String,
        key: String,
    },
    Config(ConfigError),
    Registry(RegistryError),
    Dispatcher(String),
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persistence(err) => write!(f, "{err}"),
            Self::IdentityMismatch { expected, found } => write!(
                f,
                "persisted identity does not match requested identity; expected `{expected}`, got `{found}`"
            ),
            Self::CorruptRecord(message) => write!(f, "corrupt persisted record: {message}"),
            Self::DeletedRecord(identity) => write!(f, "record deleted: {identity}"),
            Self::NotFound(identity) => write!(f, "record not found: {identity}"),
            Self::InvalidIdentity(identity) => write!(f, "invalid record identity `{identity}`"),
            Self::InvalidFilter(message) => write!(f, "invalid record filter: {message}"),
            Self::InvalidProperty { identity, key } => write!(
                f,
                "property `{key}` of `{identity}` is not a finite number"
            ),
            Self::Config(err) => write!(f, "{err}"),
            Self::Registry(err) => write!(f, "{err}"),
            Self::Dispatcher(message) => write!(f, "dispatcher unavailable: {message}"),
        }
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Persistence(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::Registry(err) => Some(err),
            Self::IdentityMismatch { .. }
            | Self::CorruptRecord(_)
            | Self::DeletedRecord(_)
            | Self::NotFound(_)
            | Self::InvalidIdentity(_)
            | Self::InvalidFilter(_)
            | Self::InvalidProperty { .. }
            | Self::Dispatcher(_) => None,
        }
    }
}

impl From<PersistenceError> for CoreError {
    fn from(value: PersistenceError) -> Self {
        Self::Persistence(value)
    }
}

impl From<ConfigError> for CoreError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<RegistryError> for CoreError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}
