//! Configuration record domain model.
//!
//! # Responsibility
//! - Define property sets, location bindings and the versioned record.
//! - Keep the record's version counters and content behind one lock.
//!
//! # Invariants
//! - Every record is identified by a stable identity string.
//! - Deletion is terminal; a deleted record never accepts new content.

pub mod location;
pub mod properties;
pub mod record;
