pub mod api;
pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;

pub use config::Config;
pub use datasource::{
    EnrichmentError, HttpMetadataEnricher, MetadataEnricher, MockMetadataEnricher,
    NoopMetadataEnricher,
};
pub use db::{init_db, LedgerSource, MockLedger, Repository, SnapshotStore};
pub use domain::{EntityId, EntityKind, RawAmount, SortField, SortOrder, TimeMs};
pub use engine::{BaselineMerger, BaselineSource};
pub use error::AppError;
pub use orchestration::{LeaderboardService, RefreshCoordinator};
