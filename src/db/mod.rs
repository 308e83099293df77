//! SQLite store.
//!
//! This module provides:
//! - Store initialization, pragmas and the embedded schema
//! - `Repository`, the typed access layer used by the API and the reconciliation core

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::{
    is_unique_violation, FundStats, QueuedRedemption, Repository, IPO_PHASE_KEY, POOL_CREATED_KEY,
};
