//! Day Scheduler: one chain walk per calendar day, bounded concurrency.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use futures::future::join_all;
use std::collections::HashSet;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::snapshot::day_start;
use crate::stats::{Counter, StatsRecorder};
use crate::store::OddsStore;
use crate::walker::ChainWalker;

/// Every calendar day from `start` to `end`, both inclusive.
pub fn days_in_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    if end < start {
        return Vec::new();
    }
    start.iter_days().take_while(|day| *day <= end).collect()
}

/// Every calendar day of the given years, both inclusive.
pub fn days_in_years(start_year: i32, end_year: i32) -> Vec<NaiveDate> {
    match (
        NaiveDate::from_ymd_opt(start_year, 1, 1),
        NaiveDate::from_ymd_opt(end_year, 12, 31),
    ) {
        (Some(start), Some(end)) => days_in_range(start, end),
        _ => Vec::new(),
    }
}

/// Calendar dates whose snapshots some walk in this run already requested.
#[derive(Debug, Default)]
pub struct CoverageLedger {
    dates: RwLock<HashSet<NaiveDate>>,
}

impl CoverageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, timestamp: DateTime<Utc>) {
        let date = timestamp.date_naive();
        if self.dates.read().await.contains(&date) {
            return;
        }
        self.dates.write().await.insert(date);
    }

    pub async fn covers(&self, date: NaiveDate) -> bool {
        self.dates.read().await.contains(&date)
    }

    pub async fn covered_count(&self) -> usize {
        self.dates.read().await.len()
    }
}

pub struct DayScheduler<'a> {
    walker: &'a ChainWalker<'a>,
    store: &'a dyn OddsStore,
    stats: &'a StatsRecorder,
    cancel: &'a CancellationToken,
    max_concurrent: usize,
}

impl<'a> DayScheduler<'a> {
    pub fn new(
        walker: &'a ChainWalker<'a>,
        store: &'a dyn OddsStore,
        stats: &'a StatsRecorder,
        cancel: &'a CancellationToken,
        max_concurrent: usize,
    ) -> Self {
        Self {
            walker,
            store,
            stats,
            cancel,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Walk every day, at most `max_concurrent` at a time.
    ///
    /// Days in `completed` were walked to the end by an earlier run and are
    /// skipped. Every other day is walked from midnight, so a day an earlier
    /// run left unfinished is never assumed covered.
    pub async fn run(&self, days: Vec<NaiveDate>, completed: &HashSet<NaiveDate>) {
        self.stats.add(Counter::TotalDates, days.len() as u64);
        info!(
            days = days.len(),
            already_completed = completed.len(),
            max_concurrent = self.max_concurrent,
            "Scheduling day walks"
        );

        let gate = Semaphore::new(self.max_concurrent);
        join_all(
            days.into_iter()
                .map(|day| self.walk_day(&gate, day, completed)),
        )
        .await;
    }

    async fn walk_day(&self, gate: &Semaphore, day: NaiveDate, completed: &HashSet<NaiveDate>) {
        let Ok(_permit) = gate.acquire().await else {
            return;
        };
        if self.cancel.is_cancelled() {
            return;
        }

        if completed.contains(&day) {
            debug!(day = %day, "Completed by an earlier run, skipping day");
            self.stats.incr(Counter::SkippedDates);
            return;
        }
        if self.walker.ledger().covers(day).await {
            info!(day = %day, "Day already covered by an earlier walk, skipping");
            self.stats.incr(Counter::SkippedDates);
            return;
        }

        let walk = self.walker.walk(day_start(day)).await;

        if walk.cancelled && walk.fetched == 0 {
            return;
        }
        self.stats.incr(Counter::ProcessedDates);
        if walk.emitted == 0 && walk.abandoned == 0 {
            info!(day = %day, weekday = %day.weekday(), "No snapshots with games");
            self.stats.incr(Counter::ZeroSnapshotDays);
        }

        if !walk.is_complete() {
            warn!(
                day = %day,
                abandoned = walk.abandoned,
                failed = walk.failed,
                cancelled = walk.cancelled,
                "Day incomplete, it will be walked again on resume"
            );
            return;
        }
        if let Err(e) = self.store.mark_day_complete(day).await {
            warn!(day = %day, "Failed to record completed day: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FetchOutcome;
    use crate::pacing::RequestPacer;
    use crate::store::MemoryStore;
    use crate::testkit::{at, empty_snapshot, game_snapshot, RecordingSink, ScriptedSource};
    use crate::walker::WalkSettings;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_days_in_range_inclusive() {
        let days = days_in_range(date(2024, 2, 27), date(2024, 3, 1));
        assert_eq!(
            days,
            vec![date(2024, 2, 27), date(2024, 2, 28), date(2024, 2, 29), date(2024, 3, 1)]
        );
        assert_eq!(days_in_range(date(2024, 1, 1), date(2024, 1, 1)).len(), 1);
        assert!(days_in_range(date(2024, 1, 2), date(2024, 1, 1)).is_empty());
    }

    #[test]
    fn test_days_in_years() {
        assert_eq!(days_in_years(2024, 2024).len(), 366);
        assert_eq!(days_in_years(2023, 2024).len(), 365 + 366);
        assert!(days_in_years(2025, 2024).is_empty());
    }

    struct Parts {
        source: ScriptedSource,
        pacer: RequestPacer,
        sink: RecordingSink,
        store: MemoryStore,
        stats: StatsRecorder,
        ledger: CoverageLedger,
        cancel: CancellationToken,
    }

    impl Parts {
        fn new(source: ScriptedSource) -> Self {
            Self {
                source,
                pacer: RequestPacer::unpaced(),
                sink: RecordingSink::default(),
                store: MemoryStore::new(),
                stats: StatsRecorder::new(),
                ledger: CoverageLedger::new(),
                cancel: CancellationToken::new(),
            }
        }

        async fn run(&self, days: Vec<NaiveDate>, completed: &[NaiveDate], max: usize) {
            let walker = ChainWalker::new(
                &self.source,
                &self.pacer,
                &self.sink,
                &self.stats,
                &self.ledger,
                &self.cancel,
                WalkSettings::default(),
            );
            let completed: HashSet<NaiveDate> = completed.iter().copied().collect();
            DayScheduler::new(&walker, &self.store, &self.stats, &self.cancel, max)
                .run(days, &completed)
                .await;
        }
    }

    #[tokio::test]
    async fn test_each_day_seeded_at_midnight() {
        let source = ScriptedSource::new()
            .respond(at(2024, 1, 1, 0, 0), FetchOutcome::Fetched(game_snapshot(at(2024, 1, 1, 0, 0), None, "a", 1)))
            .respond(at(2024, 1, 2, 0, 0), FetchOutcome::Fetched(empty_snapshot(at(2024, 1, 2, 0, 0), None)))
            .respond(at(2024, 1, 3, 0, 0), FetchOutcome::Fetched(game_snapshot(at(2024, 1, 3, 0, 0), None, "c", 1)));
        let parts = Parts::new(source);

        parts
            .run(days_in_range(date(2024, 1, 1), date(2024, 1, 3)), &[], 2)
            .await;

        let mut calls = parts.source.calls().await;
        calls.sort();
        assert_eq!(
            calls,
            vec![at(2024, 1, 1, 0, 0), at(2024, 1, 2, 0, 0), at(2024, 1, 3, 0, 0)]
        );
        assert_eq!(parts.stats.get(Counter::TotalDates), 3);
        assert_eq!(parts.stats.get(Counter::ProcessedDates), 3);
        assert_eq!(parts.stats.get(Counter::ZeroSnapshotDays), 1);
        assert_eq!(parts.stats.get(Counter::TotalSnapshots), 2);
        assert_eq!(parts.store.completed_days().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_day_covered_by_earlier_walk_is_skipped() {
        // Another walk already requested a snapshot on day two
        let ledger_hit = at(2024, 1, 2, 0, 0);
        let source = ScriptedSource::new().respond(
            at(2024, 1, 1, 0, 0),
            FetchOutcome::Fetched(empty_snapshot(at(2024, 1, 1, 0, 0), None)),
        );
        let parts = Parts::new(source);
        parts.ledger.record(ledger_hit).await;

        parts
            .run(days_in_range(date(2024, 1, 1), date(2024, 1, 2)), &[], 1)
            .await;

        assert_eq!(parts.source.calls().await, vec![at(2024, 1, 1, 0, 0)]);
        assert_eq!(parts.stats.get(Counter::SkippedDates), 1);
        assert_eq!(parts.stats.get(Counter::ProcessedDates), 1);
    }

    #[tokio::test]
    async fn test_only_completed_days_are_skipped() {
        // Day two is later than day one but day one never finished
        let source = ScriptedSource::new()
            .respond(at(2024, 1, 1, 0, 0), FetchOutcome::Fetched(empty_snapshot(at(2024, 1, 1, 0, 0), None)))
            .respond(at(2024, 1, 3, 0, 0), FetchOutcome::Fetched(empty_snapshot(at(2024, 1, 3, 0, 0), None)));
        let parts = Parts::new(source);

        parts
            .run(days_in_range(date(2024, 1, 1), date(2024, 1, 3)), &[date(2024, 1, 2)], 1)
            .await;

        assert_eq!(
            parts.source.calls().await,
            vec![at(2024, 1, 1, 0, 0), at(2024, 1, 3, 0, 0)]
        );
        assert_eq!(parts.stats.get(Counter::SkippedDates), 1);
        assert_eq!(parts.stats.get(Counter::ProcessedDates), 2);
    }

    #[tokio::test]
    async fn test_cancelled_run_walks_nothing() {
        let parts = Parts::new(ScriptedSource::new());
        parts.cancel.cancel();

        parts
            .run(days_in_range(date(2024, 1, 1), date(2024, 1, 10)), &[], 3)
            .await;

        assert!(parts.source.calls().await.is_empty());
        assert_eq!(parts.stats.get(Counter::ProcessedDates), 0);
        assert_eq!(parts.stats.get(Counter::TotalDates), 10);
        assert!(parts.store.completed_days().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_day_is_not_a_zero_snapshot_day() {
        // Unscripted seed: transport error, nothing emitted
        let parts = Parts::new(ScriptedSource::new());

        parts.run(vec![date(2024, 6, 1)], &[], 1).await;

        assert_eq!(parts.stats.get(Counter::ProcessedDates), 1);
        assert_eq!(parts.stats.get(Counter::ZeroSnapshotDays), 0);
        assert_eq!(parts.stats.get(Counter::TransportErrors), 1);
        assert!(parts.store.completed_days().await.unwrap().is_empty());
    }
}
