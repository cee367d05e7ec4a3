use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use super::{GameWrite, OddsStore, StoreError, WriteOutcome};
use crate::quotes::{BookmakerQuote, MarketLine};
use crate::teams::CanonicalTeam;

/// Postgres-backed [`OddsStore`].
pub struct PgOddsStore {
    db: PgPool,
    /// Bookmaker keys known to exist in `bookmakers`; a miss costs one
    /// idempotent insert.
    known_bookmakers: RwLock<HashSet<String>>,
}

impl PgOddsStore {
    pub fn new(db: PgPool) -> Self {
        Self {
            db,
            known_bookmakers: RwLock::new(HashSet::new()),
        }
    }

    pub async fn connect(url: &str, max_retries: u32) -> Result<Self, StoreError> {
        Ok(Self::new(Self::connect_db_with_retry(url, max_retries).await?))
    }

    async fn connect_db_with_retry(url: &str, max_retries: u32) -> Result<PgPool, StoreError> {
        let mut attempt = 0;
        loop {
            match PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await
            {
                Ok(pool) => {
                    info!("Connected to PostgreSQL");
                    return Ok(pool);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_retries {
                        return Err(StoreError::Database(e));
                    }
                    warn!("Database connection attempt {} failed: {}. Retrying...", attempt, e);
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
            }
        }
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.db).await?;
        info!("Database schema up to date");
        Ok(())
    }

    async fn ensure_bookmaker(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        quote: &BookmakerQuote,
    ) -> Result<(), StoreError> {
        if self.known_bookmakers.read().await.contains(&quote.bookmaker_key) {
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO bookmakers (key, title)
            VALUES ($1, $2)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(&quote.bookmaker_key)
        .bind(&quote.bookmaker_title)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn insert_quote(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        snapshot_id: Uuid,
        write: &GameWrite,
        quote: &BookmakerQuote,
    ) -> Result<Uuid, StoreError> {
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO bookmaker_quotes (
                id, snapshot_id, game_key, bookmaker_key, snapshot_timestamp, last_update, markets
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (game_key, bookmaker_key, snapshot_timestamp) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(snapshot_id)
        .bind(&write.game.game_key)
        .bind(&quote.bookmaker_key)
        .bind(write.envelope.timestamp)
        .bind(quote.last_update)
        .bind(Json(&quote.markets))
        .fetch_optional(&mut **tx)
        .await?;

        if let Some((id,)) = inserted {
            return Ok(id);
        }

        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            SELECT id FROM bookmaker_quotes
            WHERE game_key = $1 AND bookmaker_key = $2 AND snapshot_timestamp = $3
            "#,
        )
        .bind(&write.game.game_key)
        .bind(&quote.bookmaker_key)
        .bind(write.envelope.timestamp)
        .fetch_one(&mut **tx)
        .await?;

        Ok(id)
    }

    async fn insert_line(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        quote_id: Uuid,
        write: &GameWrite,
        bookmaker_key: &str,
        line: &MarketLine,
    ) -> Result<bool, StoreError> {
        let (home_price, away_price, home_point, over_price, under_price, total_point) = match *line
        {
            MarketLine::Moneyline {
                home_price,
                away_price,
            } => (Some(home_price), Some(away_price), None, None, None, None),
            MarketLine::Spread {
                home_price,
                away_price,
                home_point,
            } => (Some(home_price), Some(away_price), Some(home_point), None, None, None),
            MarketLine::Total {
                over_price,
                under_price,
                point,
            } => (None, None, None, Some(over_price), Some(under_price), Some(point)),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO market_lines (
                quote_id, game_key, bookmaker_key, market_type, snapshot_timestamp,
                home_price, away_price, home_point,
                over_price, under_price, total_point
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (game_key, bookmaker_key, market_type, snapshot_timestamp) DO NOTHING
            "#,
        )
        .bind(quote_id)
        .bind(&write.game.game_key)
        .bind(bookmaker_key)
        .bind(line.market_type().as_str())
        .bind(write.envelope.timestamp)
        .bind(home_price)
        .bind(away_price)
        .bind(home_point)
        .bind(over_price)
        .bind(under_price)
        .bind(total_point)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl OddsStore for PgOddsStore {
    async fn find_team(&self, raw_name: &str) -> Result<Option<CanonicalTeam>, StoreError> {
        // Ignore punctuation and spacing, check canonical names and aliases
        let resolved: Option<(String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT t.canonical_name, t.abbreviation
            FROM teams t
            LEFT JOIN team_aliases ta ON t.id = ta.team_id
            WHERE regexp_replace(lower(t.canonical_name), '[^a-z0-9]+', '', 'g')
                    = regexp_replace(lower($1), '[^a-z0-9]+', '', 'g')
               OR regexp_replace(lower(ta.alias), '[^a-z0-9]+', '', 'g')
                    = regexp_replace(lower($1), '[^a-z0-9]+', '', 'g')
            ORDER BY t.canonical_name
            LIMIT 1
            "#,
        )
        .bind(raw_name)
        .fetch_optional(&self.db)
        .await?;

        Ok(resolved.map(|(name, abbreviation)| CanonicalTeam { name, abbreviation }))
    }

    async fn last_snapshot_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let (last,): (Option<DateTime<Utc>>,) =
            sqlx::query_as("SELECT MAX(snapshot_timestamp) FROM odds_snapshots")
                .fetch_one(&self.db)
                .await?;
        Ok(last)
    }

    async fn completed_days(&self) -> Result<HashSet<NaiveDate>, StoreError> {
        let rows: Vec<(NaiveDate,)> = sqlx::query_as("SELECT day FROM completed_days")
            .fetch_all(&self.db)
            .await?;
        Ok(rows.into_iter().map(|(day,)| day).collect())
    }

    async fn mark_day_complete(&self, day: NaiveDate) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO completed_days (day) VALUES ($1)
            ON CONFLICT (day) DO UPDATE SET completed_at = NOW()
            "#,
        )
        .bind(day)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn write_game_snapshot(&self, write: &GameWrite) -> Result<WriteOutcome, StoreError> {
        let game = &write.game;
        let mut outcome = WriteOutcome::default();

        // Dropping the transaction on any `?` below rolls everything back
        let mut tx = self.db.begin().await?;

        // Identity columns are never touched on conflict
        let (game_inserted,): (bool,) = sqlx::query_as(
            r#"
            INSERT INTO games (
                game_key, league, game_date, home_team, away_team, home_code, away_code,
                provider_game_id, commence_time
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (game_key) DO UPDATE SET
                provider_game_id = EXCLUDED.provider_game_id,
                commence_time = EXCLUDED.commence_time,
                updated_at = NOW()
            RETURNING (xmax = 0)
            "#,
        )
        .bind(&game.game_key)
        .bind(&game.league)
        .bind(game.game_date)
        .bind(&game.home_team.name)
        .bind(&game.away_team.name)
        .bind(game.home_team.code())
        .bind(game.away_team.code())
        .bind(&game.provider_game_id)
        .bind(game.commence_time)
        .fetch_one(&mut *tx)
        .await?;
        outcome.game_inserted = game_inserted;

        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO odds_snapshots (
                id, game_key, snapshot_timestamp, previous_snapshot_timestamp, next_snapshot_timestamp
            ) VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (game_key, snapshot_timestamp) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&game.game_key)
        .bind(write.envelope.timestamp)
        .bind(write.envelope.previous_timestamp)
        .bind(write.envelope.next_timestamp)
        .fetch_optional(&mut *tx)
        .await?;

        let snapshot_id = match inserted {
            Some((id,)) => {
                outcome.envelope_inserted = true;
                id
            }
            None => {
                let (id,): (Uuid,) = sqlx::query_as(
                    "SELECT id FROM odds_snapshots WHERE game_key = $1 AND snapshot_timestamp = $2",
                )
                .bind(&game.game_key)
                .bind(write.envelope.timestamp)
                .fetch_one(&mut *tx)
                .await?;
                id
            }
        };

        for quote in &write.quotes {
            self.ensure_bookmaker(&mut tx, quote).await?;
            let quote_id = self.insert_quote(&mut tx, snapshot_id, write, quote).await?;
            for line in &quote.lines {
                if self
                    .insert_line(&mut tx, quote_id, write, &quote.bookmaker_key, line)
                    .await?
                {
                    outcome.lines_inserted += 1;
                } else {
                    outcome.lines_skipped += 1;
                }
            }
        }

        tx.commit().await?;

        // Only remember bookmakers once the insert is durable
        {
            let mut known = self.known_bookmakers.write().await;
            for quote in &write.quotes {
                known.insert(quote.bookmaker_key.clone());
            }
        }

        Ok(outcome)
    }
}
