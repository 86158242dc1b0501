//! Configuration delivery to subscribers.
//!
//! # Responsibility
//! - Define the subscriber port and the in-process subscriber registry.
//! - Deliver record versions in per-record order, skipping superseded work.
//!
//! # Invariants
//! - A version is marked dispatched only after every target accepted it.
//! - Delivery failures are logged and recovered by the next version bump or
//!   an explicit resync; they never propagate to writers.

pub mod dispatcher;
pub mod subscriber;
