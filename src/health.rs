//! `/health` endpoint reporting live run progress.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::stats::{Counter, StatsRecorder};

/// Service health state
#[derive(Clone)]
pub struct HealthState {
    stats: Arc<StatsRecorder>,
    started_at: DateTime<Utc>,
    finished_at: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl HealthState {
    pub fn new(stats: Arc<StatsRecorder>) -> Self {
        Self {
            stats,
            started_at: Utc::now(),
            finished_at: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn mark_finished(&self) {
        *self.finished_at.write().await = Some(Utc::now());
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(health): State<HealthState>) -> (StatusCode, Json<serde_json::Value>) {
    let stats = &health.stats;
    let finished_at = *health.finished_at.read().await;
    let transport_errors = stats.get(Counter::TransportErrors);
    let persistence_errors = stats.get(Counter::PersistenceErrors);

    let status = if persistence_errors > 0 || transport_errors > 5 {
        "degraded"
    } else if finished_at.is_some() {
        "finished"
    } else {
        "running"
    };

    // Store writes keep failing
    let http_status = if persistence_errors > 10 {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        http_status,
        Json(json!({
            "service": "odds-backfill",
            "version": env!("CARGO_PKG_VERSION"),
            "status": status,
            "started_at": health.started_at.to_rfc3339(),
            "finished_at": finished_at.map(|t| t.to_rfc3339()),
            "dates_total": stats.get(Counter::TotalDates),
            "dates_processed": stats.get(Counter::ProcessedDates),
            "snapshots": stats.get(Counter::TotalSnapshots),
            "new_games": stats.get(Counter::NewGames),
            "quotes_inserted": stats.get(Counter::QuotesInserted),
            "rate_limit_retries": stats.get(Counter::RateLimitRetries),
            "transport_errors": transport_errors,
            "persistence_errors": persistence_errors
        })),
    )
}
