//! Persistence port and its implementations.
//!
//! # Responsibility
//! - Define the storage contract the core writes through before any
//!   distribution happens.
//! - Keep SQLite details out of record, store and dispatch code.
//!
//! # Invariants
//! - Implementations are `Send + Sync`; the service calls them from writer
//!   threads concurrently.
//! - A failed `store` leaves previously stored data intact.

pub mod memory_persistence;
pub mod persistence;
pub mod sqlite_persistence;
