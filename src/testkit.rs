//! Scripted doubles for driving walks without a network.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

use crate::error::CollectError;
use crate::fetcher::{FetchOutcome, SnapshotSource};
use crate::snapshot::{day_start, Bookmaker, Market, OddsApiEvent, Outcome, Snapshot};
use crate::store::StoreError;
use crate::walker::SnapshotSink;

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .unwrap_or_else(|| panic!("invalid test timestamp {year}-{month}-{day} {hour}:{minute}"))
}

/// Answers each timestamp from a queue of scripted outcomes, then from a
/// sticky outcome if one is set. Anything else is a transport error.
#[derive(Default)]
pub struct ScriptedSource {
    queued: Mutex<HashMap<DateTime<Utc>, VecDeque<FetchOutcome>>>,
    sticky: HashMap<DateTime<Utc>, FetchOutcome>,
    calls: Mutex<Vec<DateTime<Utc>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, timestamp: DateTime<Utc>, outcome: FetchOutcome) -> Self {
        self.queued
            .get_mut()
            .entry(timestamp)
            .or_default()
            .push_back(outcome);
        self
    }

    pub fn respond_always(mut self, timestamp: DateTime<Utc>, outcome: FetchOutcome) -> Self {
        self.sticky.insert(timestamp, outcome);
        self
    }

    pub async fn calls(&self) -> Vec<DateTime<Utc>> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSource {
    async fn fetch(&self, timestamp: DateTime<Utc>) -> FetchOutcome {
        self.calls.lock().await.push(timestamp);

        if let Some(outcome) = self
            .queued
            .lock()
            .await
            .get_mut(&timestamp)
            .and_then(VecDeque::pop_front)
        {
            return outcome;
        }
        match self.sticky.get(&timestamp) {
            Some(outcome) => outcome.clone(),
            None => FetchOutcome::TransportError(format!("unscripted timestamp {timestamp}")),
        }
    }
}

/// Collects every accepted snapshot; optionally rejects one timestamp.
#[derive(Default)]
pub struct RecordingSink {
    accepted: Mutex<Vec<Snapshot>>,
    failing_at: Option<DateTime<Utc>>,
}

impl RecordingSink {
    pub fn failing_at(timestamp: DateTime<Utc>) -> Self {
        Self {
            failing_at: Some(timestamp),
            ..Self::default()
        }
    }

    pub async fn snapshots(&self) -> Vec<Snapshot> {
        self.accepted.lock().await.clone()
    }

    pub async fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.accepted.lock().await.iter().map(|s| s.timestamp).collect()
    }
}

#[async_trait]
impl SnapshotSink for RecordingSink {
    async fn accept(&self, snapshot: &Snapshot) -> Result<(), CollectError> {
        if self.failing_at == Some(snapshot.timestamp) {
            return Err(CollectError::Persistence {
                game_key: "scripted".to_string(),
                source: StoreError::Unavailable("scripted failure".to_string()),
            });
        }
        self.accepted.lock().await.push(snapshot.clone());
        Ok(())
    }
}

pub fn snapshot(
    timestamp: DateTime<Utc>,
    next: Option<DateTime<Utc>>,
    entries: Vec<OddsApiEvent>,
) -> Snapshot {
    Snapshot {
        timestamp,
        previous_timestamp: None,
        next_timestamp: next,
        entries,
    }
}

pub fn empty_snapshot(timestamp: DateTime<Utc>, next: Option<DateTime<Utc>>) -> Snapshot {
    snapshot(timestamp, next, Vec::new())
}

/// Lakers host the Warriors the evening after `timestamp`'s day, priced by
/// `bookmakers` books.
pub fn game_snapshot(
    timestamp: DateTime<Utc>,
    next: Option<DateTime<Utc>>,
    provider_game_id: &str,
    bookmakers: usize,
) -> Snapshot {
    let commence = day_start(timestamp.date_naive()) + Duration::hours(24 + 3);
    snapshot(
        timestamp,
        next,
        vec![event(
            provider_game_id,
            "Los Angeles Lakers",
            "Golden State Warriors",
            commence,
            bookmakers,
        )],
    )
}

pub fn event(
    id: &str,
    home: &str,
    away: &str,
    commence: DateTime<Utc>,
    bookmakers: usize,
) -> OddsApiEvent {
    OddsApiEvent {
        id: id.to_string(),
        sport_key: "basketball_nba".to_string(),
        sport_title: "NBA".to_string(),
        commence_time: Some(commence),
        home_team: home.to_string(),
        away_team: away.to_string(),
        bookmakers: (0..bookmakers).map(|i| bookmaker(i, home, away)).collect(),
    }
}

fn bookmaker(index: usize, home: &str, away: &str) -> Bookmaker {
    let outcome = |name: &str, price: f64, point: Option<f64>| Outcome {
        name: name.to_string(),
        price: Some(price),
        point,
    };
    Bookmaker {
        key: format!("book{index}"),
        title: format!("Book {index}"),
        last_update: None,
        markets: vec![
            Market {
                key: "h2h".to_string(),
                last_update: None,
                outcomes: vec![outcome(home, -150.0, None), outcome(away, 130.0, None)],
            },
            Market {
                key: "spreads".to_string(),
                last_update: None,
                outcomes: vec![
                    outcome(home, -110.0, Some(-3.5)),
                    outcome(away, -110.0, Some(3.5)),
                ],
            },
        ],
    }
}
