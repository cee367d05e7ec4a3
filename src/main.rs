//! Historical NBA odds backfill.
//!
//! Walks The Odds API historical snapshot chain for every requested day and
//! stores games, bookmaker quotes and market lines in Postgres. Safe to re-run:
//! every write is idempotent.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use odds_backfill::health::{self, HealthState};
use odds_backfill::teams::TeamDirectory;
use odds_backfill::{CollectionRange, CollectionStats, Collector, Config, OddsApiFetcher, PgOddsStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Local development only; deployments set real env vars or mount secrets
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("odds_backfill=info".parse()?),
        )
        .init();

    info!("Historical odds backfill v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(config = ?config, "Loaded configuration");

    let store = PgOddsStore::connect(&config.database_url, 5)
        .await
        .context("Failed to connect to database")?;
    store.migrate().await.context("Failed to apply migrations")?;

    let fetcher = Arc::new(OddsApiFetcher::new(config.odds_api.clone())?);
    let directory = if config.league == "NBA" {
        TeamDirectory::nba()
    } else {
        TeamDirectory::new()
    };
    info!(teams = directory.len(), league = %config.league, "Loaded team directory");

    let collector = Collector::new(
        fetcher.clone(),
        Arc::new(store),
        directory,
        config.pacer(),
        config.collector_settings(),
    );
    let health_state = HealthState::new(collector.stats_handle());

    // Start health check server
    let health_addr = format!("0.0.0.0:{}", config.health_port);
    let listener = tokio::net::TcpListener::bind(&health_addr)
        .await
        .with_context(|| format!("Failed to bind health endpoint on {}", health_addr))?;
    info!("Health endpoint listening on {}", health_addr);
    let app = health::router(health_state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Health endpoint stopped: {}", e);
        }
    });

    // Ctrl-C stops scheduling new work; in-flight requests finish
    let cancel = collector.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            cancel.cancel();
        }
    });

    let stats = match config.range {
        CollectionRange::Dates { start, end } => {
            collector
                .run(start, end, config.max_concurrent_requests)
                .await
        }
        CollectionRange::Years { start, end } => {
            collector
                .run_years(start, end, config.max_concurrent_requests)
                .await
        }
    };
    health_state.mark_finished().await;

    stats.log_summary();
    if let Some(remaining) = fetcher.requests_remaining().await {
        info!(remaining, "API requests remaining this month");
    }
    write_report(&config.stats_report_path, &stats).await?;

    Ok(())
}

async fn write_report(path: &Path, stats: &CollectionStats) -> Result<()> {
    let body = serde_json::to_string_pretty(stats).context("Failed to serialize stats")?;
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("Failed to write stats report to {}", path.display()))?;
    info!(path = %path.display(), "Stats report written");
    Ok(())
}
