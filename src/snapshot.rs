//! Wire types for The Odds API historical endpoint and the immutable
//! [`Snapshot`] the rest of the pipeline works with.

use chrono::{DateTime, NaiveDate, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// The Odds API event structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct OddsApiEvent {
    pub id: String,
    pub sport_key: String,
    pub sport_title: String,
    pub commence_time: Option<DateTime<Utc>>,
    pub home_team: String,
    pub away_team: String,
    pub bookmakers: Vec<Bookmaker>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Bookmaker {
    pub key: String,
    pub title: String,
    pub last_update: Option<DateTime<Utc>>,
    pub markets: Vec<Market>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Market {
    pub key: String,
    pub last_update: Option<DateTime<Utc>>,
    pub outcomes: Vec<Outcome>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Outcome {
    pub name: String,
    pub price: Option<f64>,
    pub point: Option<f64>,
}

/// Body of `GET /historical/sports/{sport}/odds`
#[derive(Debug, Deserialize, Clone)]
pub struct HistoricalOddsResponse {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub previous_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: Vec<OddsApiEvent>,
}

/// Point-in-time view of the provider's odds plus its chain pointers.
///
/// An empty `entries` list is a valid chain node, not a failure.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub previous_timestamp: Option<DateTime<Utc>>,
    pub next_timestamp: Option<DateTime<Utc>>,
    pub entries: Vec<OddsApiEvent>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<HistoricalOddsResponse> for Snapshot {
    fn from(body: HistoricalOddsResponse) -> Self {
        Self {
            timestamp: body.timestamp,
            previous_timestamp: body.previous_timestamp,
            next_timestamp: body.next_timestamp,
            entries: body.data,
        }
    }
}

/// Truncate to whole seconds; the provider addresses snapshots at second precision.
pub fn normalize_timestamp(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// `2024-01-01T00:00:00Z`
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    normalize_timestamp(ts).to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Midnight UTC of the given calendar day.
pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}
