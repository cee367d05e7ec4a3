//! Environment-driven configuration.
//!
//! Secrets come from env vars when set, otherwise from Docker secret files
//! under `/run/secrets`.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use std::path::PathBuf;
use std::time::Duration;

use crate::collector::CollectorSettings;
use crate::fetcher::OddsApiSettings;
use crate::pacing::{min_interval_for_quota, RequestPacer};
use crate::walker::WalkSettings;

const DEFAULT_BASE_URL: &str = "https://api.the-odds-api.com/v4";
/// 45 requests per minute
const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(1334);

/// Which days a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionRange {
    Dates { start: NaiveDate, end: NaiveDate },
    Years { start: i32, end: i32 },
}

#[derive(Clone)]
pub struct Config {
    pub odds_api: OddsApiSettings,
    pub database_url: String,
    pub league: String,
    pub range: CollectionRange,
    pub max_concurrent_requests: usize,
    pub max_chain_depth: usize,
    pub min_request_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub resume: bool,
    pub run_timeout: Option<Duration>,
    pub stats_report_path: PathBuf,
    pub health_port: u16,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.odds_api.base_url)
            .field("sport_key", &self.odds_api.sport_key)
            .field("league", &self.league)
            .field("range", &self.range)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .field("max_chain_depth", &self.max_chain_depth)
            .field("min_request_interval", &self.min_request_interval)
            .field("resume", &self.resume)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars(lookup);

        // API key
        let api_key = match vars.get("THE_ODDS_API_KEY") {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            Some(_) => return Err(anyhow!("THE_ODDS_API_KEY is set but empty")),
            None => read_secret_file("/run/secrets/odds_api_key", "odds_api_key")?,
        };
        reject_placeholder_key(&api_key)?;

        let database_url = match vars.get("DATABASE_URL") {
            Some(v) if !v.trim().is_empty() => v,
            Some(_) => return Err(anyhow!("DATABASE_URL is set but empty")),
            None => {
                let db_user = vars.string("DB_USER", "nba");
                let db_name = vars.string("DB_NAME", "nba");
                let db_host = vars.string("DB_HOST", "postgres");
                let db_port = vars.string("DB_PORT", "5432");
                let db_password = read_secret_file("/run/secrets/db_password", "db_password")?;
                format!(
                    "postgresql://{}:{}@{}:{}/{}",
                    db_user, db_password, db_host, db_port, db_name
                )
            }
        };

        let min_request_interval = match (
            vars.get("MIN_REQUEST_INTERVAL_MS"),
            vars.get("MONTHLY_REQUEST_QUOTA"),
        ) {
            (Some(ms), _) => Duration::from_millis(
                ms.parse()
                    .with_context(|| format!("Invalid MIN_REQUEST_INTERVAL_MS: {}", ms))?,
            ),
            (None, Some(quota)) => min_interval_for_quota(
                quota
                    .parse()
                    .with_context(|| format!("Invalid MONTHLY_REQUEST_QUOTA: {}", quota))?,
            ),
            (None, None) => DEFAULT_MIN_INTERVAL,
        };

        Ok(Self {
            odds_api: OddsApiSettings {
                base_url: vars.string("ODDS_API_BASE_URL", DEFAULT_BASE_URL),
                api_key,
                sport_key: vars.string("SPORT_KEY", "basketball_nba"),
                regions: vars.string("ODDS_REGIONS", "us"),
                markets: vars.string("ODDS_MARKETS", "h2h,spreads,totals"),
                odds_format: vars.string("ODDS_FORMAT", "american"),
            },
            database_url,
            league: vars.string("LEAGUE", "NBA").to_uppercase(),
            range: collection_range(&vars)?,
            max_concurrent_requests: vars.parse("MAX_CONCURRENT_REQUESTS", 3usize).max(1),
            max_chain_depth: vars.parse("MAX_CHAIN_DEPTH", 10),
            min_request_interval,
            backoff_base: Duration::from_millis(vars.parse("BACKOFF_BASE_MS", 1000)),
            backoff_cap: Duration::from_millis(vars.parse("BACKOFF_CAP_MS", 30_000)),
            resume: vars.bool("RESUME", false),
            run_timeout: vars
                .get("RUN_TIMEOUT_SECONDS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs),
            stats_report_path: PathBuf::from(vars.string("STATS_REPORT_PATH", "collection_stats.json")),
            health_port: vars.parse("HEALTH_PORT", 8083),
        })
    }

    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            league: self.league.clone(),
            walk: WalkSettings {
                max_depth: self.max_chain_depth,
                backoff_base: self.backoff_base,
                backoff_cap: self.backoff_cap,
            },
            resume: self.resume,
            run_timeout: self.run_timeout,
        }
    }

    pub fn pacer(&self) -> RequestPacer {
        RequestPacer::new(self.min_request_interval)
    }
}

fn collection_range<F: Fn(&str) -> Option<String>>(vars: &Vars<F>) -> Result<CollectionRange> {
    match (vars.get("START_DATE"), vars.get("END_DATE")) {
        (Some(start), Some(end)) => {
            let start = parse_date("START_DATE", &start)?;
            let end = parse_date("END_DATE", &end)?;
            if end < start {
                return Err(anyhow!("END_DATE {} is before START_DATE {}", end, start));
            }
            Ok(CollectionRange::Dates { start, end })
        }
        (Some(_), None) | (None, Some(_)) => {
            Err(anyhow!("START_DATE and END_DATE must be set together"))
        }
        (None, None) => {
            let start = vars.parse("START_YEAR", 2020);
            let end = vars.parse("END_YEAR", 2024);
            if end < start {
                return Err(anyhow!("END_YEAR {} is before START_YEAR {}", end, start));
            }
            Ok(CollectionRange::Years { start, end })
        }
    }
}

fn parse_date(key: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid {} (expected YYYY-MM-DD): {}", key, value))
}

/// Prevent accidental use of sample/placeholder keys
fn reject_placeholder_key(key: &str) -> Result<()> {
    let key_lower = key.trim().to_lowercase();
    if key_lower.contains("change_me")
        || key_lower.contains("your_")
        || key_lower.starts_with("sample")
    {
        return Err(anyhow!(
            "THE_ODDS_API_KEY appears to be a placeholder value; replace with your real key"
        ));
    }
    Ok(())
}

/// Read a secret from Docker secret file
fn read_secret_file(file_path: &str, secret_name: &str) -> Result<String> {
    std::fs::read_to_string(file_path)
        .map(|s| s.trim().to_string())
        .context(format!(
            "Secret file not found at {} ({}). Set the env var or mount the secret.",
            file_path, secret_name
        ))
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    /// Parse a value, falling back to the default when missing or invalid
    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map(|v| {
                let v = v.trim().to_lowercase();
                v == "true" || v == "1"
            })
            .unwrap_or(default)
    }
}
