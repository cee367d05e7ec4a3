//! Chain Walker: follows `next_timestamp` pointers within one calendar day.
//!
//! The provider's snapshot chain is walked with an explicit FIFO queue and a
//! visited set rather than recursion, so depth is trivially bounded and
//! cycles terminate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::CollectError;
use crate::fetcher::{FetchOutcome, SnapshotSource};
use crate::pacing::{Backoff, RequestPacer};
use crate::scheduler::CoverageLedger;
use crate::snapshot::{format_timestamp, normalize_timestamp, Snapshot};
use crate::stats::{Counter, StatsRecorder};

/// Downstream consumer of non-empty snapshots.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn accept(&self, snapshot: &Snapshot) -> Result<(), CollectError>;
}

#[derive(Debug, Clone)]
pub struct WalkSettings {
    /// Deepest chain position fetched; the seed is depth 0.
    pub max_depth: usize,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for WalkSettings {
    fn default() -> Self {
        Self {
            max_depth: 10,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

/// What one day-walk did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DayWalk {
    pub fetched: usize,
    pub emitted: usize,
    pub abandoned: usize,
    /// Snapshots the sink failed to store.
    pub failed: usize,
    pub depth_limited: bool,
    pub cancelled: bool,
}

impl DayWalk {
    /// Every reachable node was fetched and stored.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.abandoned == 0 && self.failed == 0
    }
}

pub struct ChainWalker<'a> {
    source: &'a dyn SnapshotSource,
    pacer: &'a RequestPacer,
    sink: &'a dyn SnapshotSink,
    stats: &'a StatsRecorder,
    ledger: &'a CoverageLedger,
    cancel: &'a CancellationToken,
    settings: WalkSettings,
}

impl<'a> ChainWalker<'a> {
    pub fn new(
        source: &'a dyn SnapshotSource,
        pacer: &'a RequestPacer,
        sink: &'a dyn SnapshotSink,
        stats: &'a StatsRecorder,
        ledger: &'a CoverageLedger,
        cancel: &'a CancellationToken,
        settings: WalkSettings,
    ) -> Self {
        Self {
            source,
            pacer,
            sink,
            stats,
            ledger,
            cancel,
            settings,
        }
    }

    pub fn ledger(&self) -> &CoverageLedger {
        self.ledger
    }

    /// Walk every snapshot reachable from `seed` without leaving its
    /// calendar day.
    pub async fn walk(&self, seed: DateTime<Utc>) -> DayWalk {
        let seed = normalize_timestamp(seed);
        let day = seed.date_naive();
        let mut queue = VecDeque::from([(seed, 0usize)]);
        let mut visited: HashSet<DateTime<Utc>> = HashSet::new();
        let mut backoff = Backoff::new(self.settings.backoff_base, self.settings.backoff_cap);
        let mut walk = DayWalk::default();

        while let Some((timestamp, depth)) = queue.pop_front() {
            if self.cancel.is_cancelled() {
                walk.cancelled = true;
                break;
            }
            if !visited.insert(timestamp) {
                continue;
            }
            self.ledger.record(timestamp).await;

            let Some(snapshot) = self.fetch_with_backoff(timestamp, &mut backoff, &mut walk).await
            else {
                if walk.cancelled {
                    break;
                }
                continue;
            };
            walk.fetched += 1;

            if snapshot.is_empty() {
                self.stats.incr(Counter::EmptySnapshots);
            } else {
                self.stats.incr(Counter::TotalSnapshots);
                walk.emitted += 1;
                if let Err(e) = self.sink.accept(&snapshot).await {
                    walk.failed += 1;
                    self.stats.incr(Counter::PersistenceErrors);
                    error!(
                        timestamp = %format_timestamp(snapshot.timestamp),
                        "Error saving snapshot: {}", e
                    );
                }
            }

            let Some(next) = snapshot.next_timestamp.map(normalize_timestamp) else {
                continue;
            };

            if next.date_naive() != day {
                debug!(next = %format_timestamp(next), "Chain leaves the day, stopping");
            } else if visited.contains(&next) {
                debug!(next = %format_timestamp(next), "Chain loops back, stopping");
            } else if depth + 1 > self.settings.max_depth {
                self.stats.incr(Counter::DepthLimitHits);
                walk.depth_limited = true;
                warn!(
                    day = %day,
                    max_depth = self.settings.max_depth,
                    next = %format_timestamp(next),
                    "Max chain depth reached"
                );
            } else {
                queue.push_back((next, depth + 1));
            }
        }

        info!(
            day = %day,
            fetched = walk.fetched,
            emitted = walk.emitted,
            abandoned = walk.abandoned,
            "Day walk finished"
        );
        walk
    }

    /// Fetch one node, retrying rate-limit responses until they clear.
    ///
    /// Returns `None` when the node is abandoned (transport error) or the run
    /// is cancelled while backing off.
    async fn fetch_with_backoff(
        &self,
        timestamp: DateTime<Utc>,
        backoff: &mut Backoff,
        walk: &mut DayWalk,
    ) -> Option<Snapshot> {
        loop {
            self.pacer.until_ready().await;

            match self.source.fetch(timestamp).await {
                FetchOutcome::Fetched(snapshot) => {
                    backoff.reset();
                    return Some(snapshot);
                }
                FetchOutcome::RateLimited => {
                    self.stats.incr(Counter::RateLimitRetries);
                    let delay = backoff.next_delay();
                    warn!(
                        timestamp = %format_timestamp(timestamp),
                        attempt = backoff.consecutive(),
                        "Rate limit exceeded. Waiting {:?}...", delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => {
                            walk.cancelled = true;
                            return None;
                        }
                    }
                }
                FetchOutcome::TransportError(reason) => {
                    backoff.reset();
                    self.stats.incr(Counter::TransportErrors);
                    walk.abandoned += 1;
                    error!(
                        timestamp = %format_timestamp(timestamp),
                        "Error processing timestamp: {}", reason
                    );
                    return None;
                }
            }
        }
    }
}
