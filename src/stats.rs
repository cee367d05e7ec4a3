//! Collection statistics.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Run report: monotonically incremented counters, flushed at run end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub total_dates: u64,
    pub processed_dates: u64,
    /// Days skipped because the run or the store already covered them
    pub skipped_dates: u64,
    pub zero_snapshot_days: u64,
    /// Non-empty snapshots emitted downstream
    pub total_snapshots: u64,
    pub empty_snapshots: u64,
    pub total_games: u64,
    pub new_games: u64,
    pub duplicate_games: u64,
    pub quotes_inserted: u64,
    /// Market lines whose tuple already existed in the store
    pub quotes_skipped: u64,
    pub unresolved_teams: u64,
    pub rate_limit_retries: u64,
    pub transport_errors: u64,
    pub persistence_errors: u64,
    pub errors: u64,
    pub depth_limit_hits: u64,
    pub cancelled: bool,
    pub elapsed_secs: f64,
}

impl CollectionStats {
    pub fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.elapsed_secs.max(0.0))
    }

    pub fn log_summary(&self) {
        tracing::info!(
            total_dates = self.total_dates,
            processed_dates = self.processed_dates,
            skipped_dates = self.skipped_dates,
            zero_snapshot_days = self.zero_snapshot_days,
            total_snapshots = self.total_snapshots,
            empty_snapshots = self.empty_snapshots,
            total_games = self.total_games,
            new_games = self.new_games,
            duplicate_games = self.duplicate_games,
            quotes_inserted = self.quotes_inserted,
            quotes_skipped = self.quotes_skipped,
            unresolved_teams = self.unresolved_teams,
            rate_limit_retries = self.rate_limit_retries,
            errors = self.errors,
            depth_limit_hits = self.depth_limit_hits,
            cancelled = self.cancelled,
            elapsed = format!("{:.1}s", self.elapsed_secs),
            "Collection complete"
        );
    }
}

/// Which counter to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    TotalDates,
    ProcessedDates,
    SkippedDates,
    ZeroSnapshotDays,
    TotalSnapshots,
    EmptySnapshots,
    TotalGames,
    NewGames,
    DuplicateGames,
    QuotesInserted,
    QuotesSkipped,
    UnresolvedTeams,
    RateLimitRetries,
    TransportErrors,
    PersistenceErrors,
    DepthLimitHits,
}

const COUNTERS: usize = 16;

/// Lock-free counter bag shared by every concurrent day-walk of a run.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    counters: [AtomicU64; COUNTERS],
    cancelled: AtomicBool,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, n: u64) {
        self.counters[counter as usize].fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter as usize].load(Ordering::Relaxed)
    }

    pub fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn report(&self, elapsed: Duration) -> CollectionStats {
        use Counter::*;

        let transport_errors = self.get(TransportErrors);
        let persistence_errors = self.get(PersistenceErrors);

        CollectionStats {
            total_dates: self.get(TotalDates),
            processed_dates: self.get(ProcessedDates),
            skipped_dates: self.get(SkippedDates),
            zero_snapshot_days: self.get(ZeroSnapshotDays),
            total_snapshots: self.get(TotalSnapshots),
            empty_snapshots: self.get(EmptySnapshots),
            total_games: self.get(TotalGames),
            new_games: self.get(NewGames),
            duplicate_games: self.get(DuplicateGames),
            quotes_inserted: self.get(QuotesInserted),
            quotes_skipped: self.get(QuotesSkipped),
            unresolved_teams: self.get(UnresolvedTeams),
            rate_limit_retries: self.get(RateLimitRetries),
            transport_errors,
            persistence_errors,
            errors: transport_errors + persistence_errors,
            depth_limit_hits: self.get(DepthLimitHits),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            elapsed_secs: elapsed.as_secs_f64(),
        }
    }
}
