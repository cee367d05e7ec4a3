//! Persistence contract for resolved snapshots.
//!
//! Correctness lives in the store's unique constraints: one game row per game
//! key and one market line per (game, bookmaker, market type, timestamp).
//! Every [`OddsStore::write_game_snapshot`] call is all-or-nothing.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;
use thiserror::Error;

use crate::quotes::BookmakerQuote;
use crate::teams::CanonicalTeam;

#[cfg(any(test, feature = "testkit"))]
pub mod memory;
pub mod postgres;

#[cfg(any(test, feature = "testkit"))]
pub use memory::MemoryStore;
pub use postgres::PgOddsStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Game identity plus its mutable descriptive fields.
#[derive(Debug, Clone, PartialEq)]
pub struct GameRecord {
    /// `LEAGUE-YYYY-MM-DD-HOME-AWAY`
    pub game_key: String,
    pub league: String,
    pub game_date: NaiveDate,
    pub home_team: CanonicalTeam,
    pub away_team: CanonicalTeam,
    pub provider_game_id: String,
    pub commence_time: DateTime<Utc>,
}

/// Chain position of the snapshot a write came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotEnvelope {
    pub timestamp: DateTime<Utc>,
    pub previous_timestamp: Option<DateTime<Utc>>,
    pub next_timestamp: Option<DateTime<Utc>>,
}

/// Everything written for one game out of one snapshot.
#[derive(Debug, Clone)]
pub struct GameWrite {
    pub game: GameRecord,
    pub envelope: SnapshotEnvelope,
    pub quotes: Vec<BookmakerQuote>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub game_inserted: bool,
    pub envelope_inserted: bool,
    pub lines_inserted: usize,
    /// Lines whose (game, bookmaker, market, timestamp) tuple already existed.
    pub lines_skipped: usize,
}

#[async_trait]
pub trait OddsStore: Send + Sync {
    /// Look a raw team name up in the store's alias table.
    async fn find_team(&self, raw_name: &str) -> Result<Option<CanonicalTeam>, StoreError>;

    /// Latest snapshot timestamp already persisted, for resuming a backfill.
    async fn last_snapshot_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Days whose chain walk finished with nothing cancelled, abandoned or
    /// left unwritten.
    async fn completed_days(&self) -> Result<HashSet<NaiveDate>, StoreError>;

    /// Record that `day` was walked to the end. Repeat calls are no-ops.
    async fn mark_day_complete(&self, day: NaiveDate) -> Result<(), StoreError>;

    /// Upsert the game and insert its envelope, quotes and lines in one
    /// transaction. Existing tuples are no-ops, not errors.
    async fn write_game_snapshot(&self, write: &GameWrite) -> Result<WriteOutcome, StoreError>;
}
