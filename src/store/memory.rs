//! In-memory [`OddsStore`] enforcing the same unique constraints as Postgres.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

use super::{GameRecord, GameWrite, OddsStore, StoreError, WriteOutcome};
use crate::quotes::MarketType;
use crate::teams::CanonicalTeam;

type LineKey = (String, String, MarketType, DateTime<Utc>);

#[derive(Default, Clone)]
struct MemoryState {
    games: HashMap<String, GameRecord>,
    envelopes: HashSet<(String, DateTime<Utc>)>,
    quotes: HashSet<(String, String, DateTime<Utc>)>,
    lines: HashSet<LineKey>,
    completed_days: HashSet<NaiveDate>,
    aliases: HashMap<String, CanonicalTeam>,
    failing_games: HashSet<String>,
    team_lookups: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_alias(&self, alias: &str, team: CanonicalTeam) {
        self.state.lock().await.aliases.insert(alias.to_lowercase(), team);
    }

    /// Make every write touching `game_key` fail after its game upsert; the
    /// whole write is rolled back.
    pub async fn fail_writes_for(&self, game_key: &str) {
        self.state.lock().await.failing_games.insert(game_key.to_string());
    }

    pub async fn game(&self, game_key: &str) -> Option<GameRecord> {
        self.state.lock().await.games.get(game_key).cloned()
    }

    pub async fn game_count(&self) -> usize {
        self.state.lock().await.games.len()
    }

    pub async fn envelope_count(&self) -> usize {
        self.state.lock().await.envelopes.len()
    }

    pub async fn quote_count(&self) -> usize {
        self.state.lock().await.quotes.len()
    }

    pub async fn line_count(&self) -> usize {
        self.state.lock().await.lines.len()
    }

    pub async fn team_lookups(&self) -> usize {
        self.state.lock().await.team_lookups
    }
}

#[async_trait]
impl OddsStore for MemoryStore {
    async fn find_team(&self, raw_name: &str) -> Result<Option<CanonicalTeam>, StoreError> {
        let mut state = self.state.lock().await;
        state.team_lookups += 1;
        Ok(state.aliases.get(&raw_name.to_lowercase()).cloned())
    }

    async fn last_snapshot_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.envelopes.iter().map(|(_, ts)| *ts).max())
    }

    async fn completed_days(&self) -> Result<HashSet<NaiveDate>, StoreError> {
        Ok(self.state.lock().await.completed_days.clone())
    }

    async fn mark_day_complete(&self, day: NaiveDate) -> Result<(), StoreError> {
        self.state.lock().await.completed_days.insert(day);
        Ok(())
    }

    async fn write_game_snapshot(&self, write: &GameWrite) -> Result<WriteOutcome, StoreError> {
        let mut guard = self.state.lock().await;
        // Mutate a copy; it replaces the state only once the write succeeds
        let mut staged = guard.clone();
        let key = write.game.game_key.clone();
        let ts = write.envelope.timestamp;
        let mut outcome = WriteOutcome::default();

        match staged.games.get_mut(&key) {
            Some(existing) => {
                existing.provider_game_id = write.game.provider_game_id.clone();
                existing.commence_time = write.game.commence_time;
            }
            None => {
                staged.games.insert(key.clone(), write.game.clone());
                outcome.game_inserted = true;
            }
        }

        if staged.failing_games.contains(&key) {
            return Err(StoreError::Unavailable(format!("write rejected for {}", key)));
        }

        outcome.envelope_inserted = staged.envelopes.insert((key.clone(), ts));

        for quote in &write.quotes {
            staged
                .quotes
                .insert((key.clone(), quote.bookmaker_key.clone(), ts));
            for line in &quote.lines {
                let line_key = (
                    key.clone(),
                    quote.bookmaker_key.clone(),
                    line.market_type(),
                    ts,
                );
                if staged.lines.insert(line_key) {
                    outcome.lines_inserted += 1;
                } else {
                    outcome.lines_skipped += 1;
                }
            }
        }

        *guard = staged;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quotes::{BookmakerQuote, MarketLine};
    use crate::store::SnapshotEnvelope;
    use chrono::{NaiveDate, TimeZone};

    fn write(provider_game_id: &str, ts: DateTime<Utc>) -> GameWrite {
        let commence = Utc.with_ymd_and_hms(2024, 1, 15, 3, 30, 0).unwrap();
        GameWrite {
            game: GameRecord {
                game_key: "NBA-2024-01-15-LAL-GSW".to_string(),
                league: "NBA".to_string(),
                game_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                home_team: CanonicalTeam::new("Los Angeles Lakers", Some("LAL")),
                away_team: CanonicalTeam::new("Golden State Warriors", Some("GSW")),
                provider_game_id: provider_game_id.to_string(),
                commence_time: commence,
            },
            envelope: SnapshotEnvelope {
                timestamp: ts,
                previous_timestamp: None,
                next_timestamp: None,
            },
            quotes: vec![BookmakerQuote {
                bookmaker_key: "draftkings".to_string(),
                bookmaker_title: "DraftKings".to_string(),
                last_update: None,
                lines: vec![
                    MarketLine::Moneyline {
                        home_price: -120.0,
                        away_price: 100.0,
                    },
                    MarketLine::Total {
                        over_price: -110.0,
                        under_price: -110.0,
                        point: 231.5,
                    },
                ],
                markets: serde_json::Value::Null,
            }],
        }
    }

    #[tokio::test]
    async fn test_repeat_write_is_noop() {
        let store = MemoryStore::new();
        let ts = Utc.with_ymd_and_hms(2024, 1, 14, 12, 0, 0).unwrap();

        let first = store.write_game_snapshot(&write("p1", ts)).await.unwrap();
        let second = store.write_game_snapshot(&write("p2", ts)).await.unwrap();

        assert!(first.game_inserted);
        assert_eq!(first.lines_inserted, 2);
        assert!(!second.game_inserted);
        assert!(!second.envelope_inserted);
        assert_eq!(second.lines_inserted, 0);
        assert_eq!(second.lines_skipped, 2);
        assert_eq!(store.line_count().await, 2);
        // Descriptive fields follow the latest write
        let game = store.game("NBA-2024-01-15-LAL-GSW").await.unwrap();
        assert_eq!(game.provider_game_id, "p2");
    }

    #[tokio::test]
    async fn test_rejected_write_leaves_nothing_behind() {
        let store = MemoryStore::new();
        store.fail_writes_for("NBA-2024-01-15-LAL-GSW").await;
        let ts = Utc.with_ymd_and_hms(2024, 1, 14, 12, 0, 0).unwrap();

        assert!(store.write_game_snapshot(&write("p1", ts)).await.is_err());
        assert_eq!(store.game_count().await, 0);
        assert_eq!(store.quote_count().await, 0);
        assert_eq!(store.last_snapshot_timestamp().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failure_after_game_upsert_rolls_back_update() {
        let store = MemoryStore::new();
        let first_ts = Utc.with_ymd_and_hms(2024, 1, 14, 12, 0, 0).unwrap();
        store.write_game_snapshot(&write("p1", first_ts)).await.unwrap();

        store.fail_writes_for("NBA-2024-01-15-LAL-GSW").await;
        let later = first_ts + chrono::Duration::hours(2);
        assert!(store.write_game_snapshot(&write("p2", later)).await.is_err());

        let game = store.game("NBA-2024-01-15-LAL-GSW").await.unwrap();
        assert_eq!(game.provider_game_id, "p1");
        assert_eq!(store.envelope_count().await, 1);
        assert_eq!(store.line_count().await, 2);
        assert_eq!(store.last_snapshot_timestamp().await.unwrap(), Some(first_ts));
    }

    #[tokio::test]
    async fn test_completed_days() {
        let store = MemoryStore::new();
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        store.mark_day_complete(day).await.unwrap();
        store.mark_day_complete(day).await.unwrap();
        assert_eq!(store.completed_days().await.unwrap().len(), 1);
    }
}
