//! In-memory registry of live records and factory groups.
//!
//! # Responsibility
//! - Own the identity -> record map for one service instance.
//! - Track factory group membership and dynamic location bindings.
//!
//! # Invariants
//! - Each map has its own lock; no two store locks are held at once.
//! - No store lock is held while a subscriber is invoked.

pub mod factory;
pub mod record_store;
