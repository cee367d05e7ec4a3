//! Run orchestration: walks every requested day and persists what it finds.
//!
//! A [`Collector`] owns all run-scoped state (pacer, coverage ledger, stats,
//! persisted-game set) and is consumed by a single run.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CollectError;
use crate::fetcher::SnapshotSource;
use crate::pacing::RequestPacer;
use crate::quotes::build_quotes;
use crate::resolver::{log_unresolved, IdentityResolver};
use crate::scheduler::{days_in_range, days_in_years, CoverageLedger, DayScheduler};
use crate::snapshot::Snapshot;
use crate::stats::{CollectionStats, Counter, StatsRecorder};
use crate::store::{GameWrite, OddsStore, SnapshotEnvelope};
use crate::teams::TeamDirectory;
use crate::walker::{ChainWalker, SnapshotSink, WalkSettings};

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub league: String,
    pub walk: WalkSettings,
    /// Skip days an earlier run walked to the end.
    pub resume: bool,
    /// Cancel the run once this much wall time has passed.
    pub run_timeout: Option<Duration>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            league: "NBA".to_string(),
            walk: WalkSettings::default(),
            resume: false,
            run_timeout: None,
        }
    }
}

pub struct Collector {
    source: Arc<dyn SnapshotSource>,
    store: Arc<dyn OddsStore>,
    resolver: IdentityResolver,
    pacer: RequestPacer,
    stats: Arc<StatsRecorder>,
    ledger: CoverageLedger,
    cancel: CancellationToken,
    settings: CollectorSettings,
}

impl Collector {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        store: Arc<dyn OddsStore>,
        directory: TeamDirectory,
        pacer: RequestPacer,
        settings: CollectorSettings,
    ) -> Self {
        let resolver = IdentityResolver::new(settings.league.clone(), directory, store.clone());
        Self {
            source,
            store,
            resolver,
            pacer,
            stats: Arc::new(StatsRecorder::new()),
            ledger: CoverageLedger::new(),
            cancel: CancellationToken::new(),
            settings,
        }
    }

    /// Live counters, readable while the run is in flight.
    pub fn stats_handle(&self) -> Arc<StatsRecorder> {
        self.stats.clone()
    }

    /// Cancelling this token stops the run after in-flight requests finish.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Backfill every day from `start_date` to `end_date` inclusive.
    pub async fn run(
        self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        max_concurrent_requests: usize,
    ) -> CollectionStats {
        info!(start = %start_date, end = %end_date, "Starting historical odds collection");
        self.run_days(days_in_range(start_date, end_date), max_concurrent_requests)
            .await
    }

    /// Backfill whole calendar years.
    pub async fn run_years(
        self,
        start_year: i32,
        end_year: i32,
        max_concurrent_requests: usize,
    ) -> CollectionStats {
        info!(start_year, end_year, "Starting historical odds collection");
        self.run_days(days_in_years(start_year, end_year), max_concurrent_requests)
            .await
    }

    async fn run_days(self, days: Vec<NaiveDate>, max_concurrent_requests: usize) -> CollectionStats {
        let started = Instant::now();
        let completed = self.completed_days().await;

        let deadline = self.settings.run_timeout.map(|timeout| {
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!(timeout_secs = timeout.as_secs(), "Run timeout reached, cancelling");
                cancel.cancel();
            })
        });

        let walker = ChainWalker::new(
            self.source.as_ref(),
            &self.pacer,
            &self,
            &self.stats,
            &self.ledger,
            &self.cancel,
            self.settings.walk.clone(),
        );
        DayScheduler::new(
            &walker,
            self.store.as_ref(),
            &self.stats,
            &self.cancel,
            max_concurrent_requests,
        )
        .run(days, &completed)
        .await;

        if let Some(deadline) = deadline {
            deadline.abort();
        }
        if self.cancel.is_cancelled() {
            self.stats.mark_cancelled();
        }

        info!(
            covered_dates = self.ledger.covered_count().await,
            persisted_games = self.resolver.persisted_count().await,
            "Run finished"
        );
        self.stats.report(started.elapsed())
    }

    /// Days an earlier run walked to the end. Empty unless resuming.
    async fn completed_days(&self) -> HashSet<NaiveDate> {
        if !self.settings.resume {
            return HashSet::new();
        }
        match self.store.last_snapshot_timestamp().await {
            Ok(latest) => info!(last_snapshot = ?latest, "Resuming backfill"),
            Err(e) => warn!("Could not read last stored snapshot: {}", e),
        }
        match self.store.completed_days().await {
            Ok(days) => {
                info!(completed_days = days.len(), "Skipping days completed by earlier runs");
                days
            }
            Err(e) => {
                warn!("Could not read completed days, walking every day: {}", e);
                HashSet::new()
            }
        }
    }
}

#[async_trait]
impl SnapshotSink for Collector {
    async fn accept(&self, snapshot: &Snapshot) -> Result<(), CollectError> {
        let envelope = SnapshotEnvelope {
            timestamp: snapshot.timestamp,
            previous_timestamp: snapshot.previous_timestamp,
            next_timestamp: snapshot.next_timestamp,
        };

        for event in &snapshot.entries {
            self.stats.incr(Counter::TotalGames);

            let game = match self.resolver.resolve_game(event).await? {
                Ok(game) => game,
                Err(reason) => {
                    log_unresolved(event, &reason);
                    self.stats.incr(Counter::UnresolvedTeams);
                    continue;
                }
            };

            let write = GameWrite {
                game,
                envelope,
                quotes: build_quotes(event),
            };
            let outcome = self
                .store
                .write_game_snapshot(&write)
                .await
                .map_err(|source| CollectError::Persistence {
                    game_key: write.game.game_key.clone(),
                    source,
                })?;

            self.stats
                .add(Counter::QuotesInserted, outcome.lines_inserted as u64);
            self.stats
                .add(Counter::QuotesSkipped, outcome.lines_skipped as u64);
            if self.resolver.record_persisted(&event.id).await {
                self.stats.incr(Counter::NewGames);
            } else {
                self.stats.incr(Counter::DuplicateGames);
            }

            debug!(
                game_key = %write.game.game_key,
                bookmakers = write.quotes.len(),
                lines_inserted = outcome.lines_inserted,
                lines_skipped = outcome.lines_skipped,
                "Stored game snapshot"
            );
        }
        Ok(())
    }
}
