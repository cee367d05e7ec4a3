//! Dedup & identity resolution.
//!
//! Maps provider team names onto canonical teams and derives the stable game
//! key. Two snapshots describing the same real game always produce the same
//! key, which is what makes the store upsert idempotent.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::snapshot::OddsApiEvent;
use crate::store::{GameRecord, OddsStore, StoreError};
use crate::teams::{CanonicalTeam, TeamDirectory};

/// `LEAGUE-YYYY-MM-DD-HOME-AWAY`
pub fn derive_game_key(
    league: &str,
    date: NaiveDate,
    home: &CanonicalTeam,
    away: &CanonicalTeam,
) -> String {
    format!(
        "{}-{}-{}-{}",
        league.to_uppercase(),
        date.format("%Y-%m-%d"),
        home.code(),
        away.code()
    )
}

/// Why an entry could not be mapped onto a game identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    UnknownTeam(String),
    SameTeam { home: String, away: String },
    MissingCommenceTime,
}

impl std::fmt::Display for Unresolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTeam(name) => write!(f, "no canonical team for '{}'", name),
            Self::SameTeam { home, away } => {
                write!(f, "home '{}' and away '{}' resolve to the same team", home, away)
            }
            Self::MissingCommenceTime => write!(f, "missing commence_time"),
        }
    }
}

pub struct IdentityResolver {
    league: String,
    directory: TeamDirectory,
    store: Arc<dyn OddsStore>,
    /// Read-through memo of store alias lookups. Concurrent misses may each
    /// hit the store; the result is the same either way.
    team_cache: RwLock<HashMap<String, CanonicalTeam>>,
    /// Provider game ids written at least once this run. Stats only.
    persisted_game_ids: RwLock<HashSet<String>>,
}

impl IdentityResolver {
    pub fn new(league: impl Into<String>, directory: TeamDirectory, store: Arc<dyn OddsStore>) -> Self {
        Self {
            league: league.into(),
            directory,
            store,
            team_cache: RwLock::new(HashMap::new()),
            persisted_game_ids: RwLock::new(HashSet::new()),
        }
    }

    /// Static alias table first, then the store's alias table.
    pub async fn resolve_team(&self, raw_name: &str) -> Result<Option<CanonicalTeam>, StoreError> {
        if let Some(team) = self.directory.resolve(raw_name) {
            return Ok(Some(team.clone()));
        }

        let key = raw_name.trim().to_lowercase();
        if let Some(team) = self.team_cache.read().await.get(&key) {
            return Ok(Some(team.clone()));
        }

        let found = self.store.find_team(raw_name.trim()).await?;
        if let Some(team) = &found {
            self.team_cache.write().await.insert(key, team.clone());
        }
        Ok(found)
    }

    /// Resolve one provider entry into the game row it belongs to.
    pub async fn resolve_game(
        &self,
        event: &OddsApiEvent,
    ) -> Result<Result<GameRecord, Unresolved>, StoreError> {
        let Some(commence_time) = event.commence_time else {
            return Ok(Err(Unresolved::MissingCommenceTime));
        };

        let Some(home) = self.resolve_team(&event.home_team).await? else {
            return Ok(Err(Unresolved::UnknownTeam(event.home_team.clone())));
        };
        let Some(away) = self.resolve_team(&event.away_team).await? else {
            return Ok(Err(Unresolved::UnknownTeam(event.away_team.clone())));
        };

        if home == away {
            return Ok(Err(Unresolved::SameTeam {
                home: event.home_team.clone(),
                away: event.away_team.clone(),
            }));
        }

        Ok(Ok(self.game_record(event, commence_time, home, away)))
    }

    fn game_record(
        &self,
        event: &OddsApiEvent,
        commence_time: DateTime<Utc>,
        home: CanonicalTeam,
        away: CanonicalTeam,
    ) -> GameRecord {
        let game_date = commence_time.date_naive();
        GameRecord {
            game_key: derive_game_key(&self.league, game_date, &home, &away),
            league: self.league.to_uppercase(),
            game_date,
            home_team: home,
            away_team: away,
            provider_game_id: event.id.clone(),
            commence_time,
        }
    }

    /// Record a successful write. Returns `true` the first time a provider
    /// game id is persisted in this run.
    pub async fn record_persisted(&self, provider_game_id: &str) -> bool {
        if self.persisted_game_ids.read().await.contains(provider_game_id) {
            return false;
        }
        self.persisted_game_ids
            .write()
            .await
            .insert(provider_game_id.to_string())
    }

    pub async fn persisted_count(&self) -> usize {
        self.persisted_game_ids.read().await.len()
    }
}

/// Log an entry that could not be resolved, keeping the raw names for
/// alias-table maintenance.
pub fn log_unresolved(event: &OddsApiEvent, reason: &Unresolved) {
    warn!(
        provider_game_id = %event.id,
        home_team = %event.home_team,
        away_team = %event.away_team,
        reason = %reason,
        "Skipping unresolvable game"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn event(id: &str, home: &str, away: &str, commence: DateTime<Utc>) -> OddsApiEvent {
        OddsApiEvent {
            id: id.to_string(),
            home_team: home.to_string(),
            away_team: away.to_string(),
            commence_time: Some(commence),
            ..Default::default()
        }
    }

    fn resolver(store: Arc<MemoryStore>) -> IdentityResolver {
        IdentityResolver::new("nba", TeamDirectory::nba(), store)
    }

    #[tokio::test]
    async fn test_same_game_from_different_spellings_collides() {
        let resolver = resolver(Arc::new(MemoryStore::new()));
        let tip = Utc.with_ymd_and_hms(2024, 1, 15, 3, 30, 0).unwrap();

        let a = resolver
            .resolve_game(&event("p1", "Los Angeles Lakers", "Golden State Warriors", tip))
            .await
            .unwrap()
            .unwrap();
        let b = resolver
            .resolve_game(&event("p2", "LA Lakers", "warriors", tip + chrono::Duration::hours(1)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(a.game_key, "NBA-2024-01-15-LAL-GSW");
        assert_eq!(a.game_key.as_bytes(), b.game_key.as_bytes());
    }

    #[tokio::test]
    async fn test_home_away_order_matters() {
        let resolver = resolver(Arc::new(MemoryStore::new()));
        let tip = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let a = resolver
            .resolve_game(&event("x", "Boston Celtics", "Miami Heat", tip))
            .await
            .unwrap()
            .unwrap();
        let b = resolver
            .resolve_game(&event("y", "Miami Heat", "Boston Celtics", tip))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(a.game_key, b.game_key);
    }

    #[tokio::test]
    async fn test_unknown_team_is_unresolved() {
        let resolver = resolver(Arc::new(MemoryStore::new()));
        let tip = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let result = resolver
            .resolve_game(&event("x", "Seattle SuperSonics", "Miami Heat", tip))
            .await
            .unwrap();
        assert_eq!(
            result,
            Err(Unresolved::UnknownTeam("Seattle SuperSonics".to_string()))
        );
    }

    #[tokio::test]
    async fn test_same_team_both_sides_is_unresolved() {
        let resolver = resolver(Arc::new(MemoryStore::new()));
        let tip = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let result = resolver
            .resolve_game(&event("x", "Boston Celtics", "celtics", tip))
            .await
            .unwrap();
        assert!(matches!(result, Err(Unresolved::SameTeam { .. })));
    }

    #[tokio::test]
    async fn test_missing_commence_time_is_unresolved() {
        let resolver = resolver(Arc::new(MemoryStore::new()));
        let mut e = event("x", "Boston Celtics", "Miami Heat", Utc::now());
        e.commence_time = None;
        assert_eq!(
            resolver.resolve_game(&e).await.unwrap(),
            Err(Unresolved::MissingCommenceTime)
        );
    }

    #[tokio::test]
    async fn test_store_alias_is_read_through_cached() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_alias("Seattle Sonics", CanonicalTeam::new("Seattle SuperSonics", Some("SEA")))
            .await;
        let resolver = resolver(store.clone());

        for _ in 0..3 {
            let team = resolver.resolve_team("Seattle Sonics").await.unwrap().unwrap();
            assert_eq!(team.code(), "SEA");
        }
        assert_eq!(store.team_lookups().await, 1);

        // Static table hits never reach the store
        resolver.resolve_team("Boston Celtics").await.unwrap();
        assert_eq!(store.team_lookups().await, 1);
    }

    #[tokio::test]
    async fn test_record_persisted_counts_first_sighting_only() {
        let resolver = resolver(Arc::new(MemoryStore::new()));
        assert!(resolver.record_persisted("abc").await);
        assert!(!resolver.record_persisted("abc").await);
        assert!(resolver.record_persisted("def").await);
        assert_eq!(resolver.persisted_count().await, 2);
    }
}
