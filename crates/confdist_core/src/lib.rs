//! Versioned configuration records and their ordered distribution.
//! Writers change records through `ConfigService`; subscribers converge on
//! the latest persisted content of every record they are bound to.

pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod store;

pub use config::{ConfigError, CoreConfig};
pub use dispatch::dispatcher::{
    process_task, DispatchOutcome, DispatchStats, DispatchTask, TaskKind, UpdateDispatcher,
};
pub use dispatch::subscriber::{DeliveryError, RegistryError, Subscriber, SubscriberRegistry};
pub use error::{CoreError, CoreResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::location::BindOutcome;
pub use model::properties::{Properties, PropertyValue};
pub use model::record::{VersionedRecord, NEVER_DISPATCHED};
pub use repo::memory_persistence::MemoryPersistence;
pub use repo::persistence::{PersistenceError, PersistencePort, PersistenceResult};
pub use repo::sqlite_persistence::SqlitePersistence;
pub use service::config_service::{ConfigService, RecordFilter};

/// Minimal health-check API for smoke binaries.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
