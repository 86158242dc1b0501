//! Service layer entry points.
//!
//! # Responsibility
//! - Coordinate record store, persistence and dispatch for writers.
//! - Keep locking and ordering rules out of callers.

pub mod config_service;
