//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and ledger schema migrations
//! - The ledger read seam (`LedgerSource`) and its SQLite implementation on `Repository`
//! - The materialized snapshot store

pub mod ledger;
pub mod migrations;
pub mod mock;
pub mod repo;
pub mod snapshot;

pub use ledger::{LedgerSource, LivePage, LiveQuery};
pub use migrations::init_db;
pub use mock::MockLedger;
pub use repo::Repository;
pub use snapshot::{SnapshotMeta, SnapshotPage, SnapshotStore};

use crate::domain::ValidationError;
use thiserror::Error;

/// Failure reading from or writing to the backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error("stored row failed validation: {0}")]
    Decode(#[from] ValidationError),
}
