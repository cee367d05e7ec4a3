//! Snapshot Fetcher: one provider request per timestamp.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::snapshot::{format_timestamp, HistoricalOddsResponse, Snapshot};

/// Body marker the provider uses for frequency-limit rejections.
pub const RATE_LIMIT_MARKER: &str = "EXCEEDED_FREQ_LIMIT";

/// Classified result of a single provider call.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// HTTP 200; the snapshot may carry no entries.
    Fetched(Snapshot),
    /// 429 or frequency-limit marker. Retry policy belongs to the caller.
    RateLimited,
    /// Network failure, unexpected status or unreadable body.
    TransportError(String),
}

/// Anything that can answer "what did the odds look like at `timestamp`".
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, timestamp: DateTime<Utc>) -> FetchOutcome;
}

/// Request parameters for the historical odds endpoint.
#[derive(Debug, Clone)]
pub struct OddsApiSettings {
    pub base_url: String,
    pub api_key: String,
    pub sport_key: String,
    pub regions: String,
    pub markets: String,
    pub odds_format: String,
}

/// The Odds API historical endpoint client.
///
/// Does no pacing of its own; callers wait on a [`crate::pacing::RequestPacer`]
/// before every call.
pub struct OddsApiFetcher {
    settings: OddsApiSettings,
    http_client: reqwest::Client,
    last_remaining: RwLock<Option<u32>>,
}

impl OddsApiFetcher {
    pub fn new(settings: OddsApiSettings) -> anyhow::Result<Self> {
        use anyhow::Context;

        // HTTP client with timeouts
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(5)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            settings,
            http_client,
            last_remaining: RwLock::new(None),
        })
    }

    /// Last `x-requests-remaining` value seen, if any.
    pub async fn requests_remaining(&self) -> Option<u32> {
        *self.last_remaining.read().await
    }

    fn url(&self) -> String {
        format!(
            "{}/historical/sports/{}/odds",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.sport_key
        )
    }

    async fn record_quota(&self, headers: &reqwest::header::HeaderMap) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let remaining = header("x-requests-remaining");
        let used = header("x-requests-used");

        if let Some(remaining) = &remaining {
            debug!(
                remaining = %remaining,
                used = used.as_deref().unwrap_or("?"),
                "API request quota"
            );
            if let Ok(parsed) = remaining.parse::<f64>() {
                *self.last_remaining.write().await = Some(parsed.max(0.0) as u32);
            }
        }
    }
}

#[async_trait]
impl SnapshotSource for OddsApiFetcher {
    async fn fetch(&self, timestamp: DateTime<Utc>) -> FetchOutcome {
        let date = format_timestamp(timestamp);

        let response = match self
            .http_client
            .get(self.url())
            .query(&[
                ("apiKey", self.settings.api_key.as_str()),
                ("regions", self.settings.regions.as_str()),
                ("markets", self.settings.markets.as_str()),
                ("oddsFormat", self.settings.odds_format.as_str()),
                ("date", date.as_str()),
            ])
            .send()
            .await
        {
            Ok(response) => response,
            // Strip the URL so the api key never lands in logs
            Err(e) => return FetchOutcome::TransportError(e.without_url().to_string()),
        };

        self.record_quota(response.headers()).await;

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return FetchOutcome::TransportError(format!(
                    "Failed to read response body: {}",
                    e.without_url()
                ))
            }
        };

        if status == StatusCode::TOO_MANY_REQUESTS || body.contains(RATE_LIMIT_MARKER) {
            warn!(date = %date, status = %status, "Odds API rate limit hit");
            return FetchOutcome::RateLimited;
        }

        if !status.is_success() {
            return FetchOutcome::TransportError(format!(
                "Odds API error (status {}): {}",
                status, body
            ));
        }

        match serde_json::from_str::<HistoricalOddsResponse>(&body) {
            Ok(parsed) => {
                let snapshot = Snapshot::from(parsed);
                info!(
                    requested = %date,
                    timestamp = %format_timestamp(snapshot.timestamp),
                    games = snapshot.entries.len(),
                    "Fetched historical snapshot"
                );
                FetchOutcome::Fetched(snapshot)
            }
            Err(e) => FetchOutcome::TransportError(format!("Failed to parse snapshot: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::Matcher;

    fn settings(base_url: String) -> OddsApiSettings {
        OddsApiSettings {
            base_url,
            api_key: "test-key".to_string(),
            sport_key: "basketball_nba".to_string(),
            regions: "us".to_string(),
            markets: "h2h,spreads,totals".to_string(),
            odds_format: "american".to_string(),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_empty_data_is_fetched_with_pointers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/historical/sports/basketball_nba/odds")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("date".into(), "2024-01-01T00:00:00Z".into()),
                Matcher::UrlEncoded("apiKey".into(), "test-key".into()),
                Matcher::UrlEncoded("oddsFormat".into(), "american".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("x-requests-remaining", "499")
            .with_header("x-requests-used", "1")
            .with_body(
                r#"{"timestamp":"2024-01-01T00:00:00Z","previous_timestamp":null,"next_timestamp":"2024-01-01T00:05:00Z","data":[]}"#,
            )
            .create_async()
            .await;

        let fetcher = OddsApiFetcher::new(settings(server.url())).unwrap();
        match fetcher.fetch(t0()).await {
            FetchOutcome::Fetched(snapshot) => {
                assert!(snapshot.is_empty());
                assert_eq!(
                    snapshot.next_timestamp,
                    Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap())
                );
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
        assert_eq!(fetcher.requests_remaining().await, Some(499));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_429_is_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Any)
            .with_status(429)
            .with_body("Too Many Requests")
            .create_async()
            .await;

        let fetcher = OddsApiFetcher::new(settings(server.url())).unwrap();
        assert!(matches!(fetcher.fetch(t0()).await, FetchOutcome::RateLimited));
    }

    #[tokio::test]
    async fn test_frequency_marker_is_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Any)
            .with_status(400)
            .with_body(r#"{"message":"slow down","error_code":"EXCEEDED_FREQ_LIMIT"}"#)
            .create_async()
            .await;

        let fetcher = OddsApiFetcher::new(settings(server.url())).unwrap();
        assert!(matches!(fetcher.fetch(t0()).await, FetchOutcome::RateLimited));
    }

    #[tokio::test]
    async fn test_unexpected_status_is_transport_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Any)
            .with_status(401)
            .with_body(r#"{"message":"API key is not valid"}"#)
            .create_async()
            .await;

        let fetcher = OddsApiFetcher::new(settings(server.url())).unwrap();
        match fetcher.fetch(t0()).await {
            FetchOutcome::TransportError(reason) => assert!(reason.contains("401")),
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let fetcher = OddsApiFetcher::new(settings("http://127.0.0.1:1".to_string())).unwrap();
        match fetcher.fetch(t0()).await {
            FetchOutcome::TransportError(reason) => assert!(!reason.contains("test-key")),
            other => panic!("expected transport error, got {:?}", other),
        }
    }
}
