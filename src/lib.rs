//! Historical odds backfill.
//!
//! Walks The Odds API historical snapshot chain one calendar day at a time
//! and persists every game, bookmaker quote and market line idempotently.

pub mod collector;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod health;
pub mod pacing;
pub mod quotes;
pub mod resolver;
pub mod scheduler;
pub mod snapshot;
pub mod stats;
pub mod store;
pub mod teams;
pub mod walker;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use collector::{Collector, CollectorSettings};
pub use config::{CollectionRange, Config};
pub use error::CollectError;
pub use fetcher::{FetchOutcome, OddsApiFetcher, SnapshotSource};
pub use snapshot::Snapshot;
pub use stats::CollectionStats;
pub use store::{OddsStore, PgOddsStore, StoreError};
