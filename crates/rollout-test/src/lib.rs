//! Integration test infrastructure for rollout controllers
//!
//! Provides:
//! - An in-memory store and status environment
//! - Source change fixtures
//! - Store and status verification helpers
//! - Fault-injecting client wrappers (stale status writes, transport errors)
//! - A store wrapper that measures concurrent reads

mod faults;
pub mod fixtures;
mod verification;

pub use faults::{ConcurrencyTrackingStore, ConflictingStatusClient, FlakyStore};
pub use fixtures::*;
pub use verification::*;
