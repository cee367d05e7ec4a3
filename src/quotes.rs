//! Turns one bookmaker's raw markets into a [`BookmakerQuote`].
//!
//! Only structural validation happens here: a market is kept when its
//! required prices (and line, where the market has one) are present.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::snapshot::{Bookmaker, Market, OddsApiEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MarketType {
    Moneyline,
    Spread,
    Total,
}

impl MarketType {
    /// Provider market key (`h2h`, `spreads`, `totals`).
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "h2h" => Some(Self::Moneyline),
            "spreads" => Some(Self::Spread),
            "totals" => Some(Self::Total),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Moneyline => "h2h",
            Self::Spread => "spreads",
            Self::Total => "totals",
        }
    }
}

/// Structured prices for one market of one bookmaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketLine {
    Moneyline {
        home_price: f64,
        away_price: f64,
    },
    Spread {
        home_price: f64,
        away_price: f64,
        /// Home side line; away is its negation.
        home_point: f64,
    },
    Total {
        over_price: f64,
        under_price: f64,
        point: f64,
    },
}

impl MarketLine {
    pub fn market_type(&self) -> MarketType {
        match self {
            Self::Moneyline { .. } => MarketType::Moneyline,
            Self::Spread { .. } => MarketType::Spread,
            Self::Total { .. } => MarketType::Total,
        }
    }
}

/// One bookmaker's market state for one game at one snapshot instant.
#[derive(Debug, Clone)]
pub struct BookmakerQuote {
    pub bookmaker_key: String,
    pub bookmaker_title: String,
    pub last_update: Option<DateTime<Utc>>,
    pub lines: Vec<MarketLine>,
    /// Raw provider markets, kept verbatim for later re-parsing.
    pub markets: serde_json::Value,
}

/// Build quotes for every bookmaker on `event`. Bookmakers with no usable
/// market are dropped.
pub fn build_quotes(event: &OddsApiEvent) -> Vec<BookmakerQuote> {
    event
        .bookmakers
        .iter()
        .filter_map(|bookmaker| build_quote(event, bookmaker))
        .collect()
}

fn build_quote(event: &OddsApiEvent, bookmaker: &Bookmaker) -> Option<BookmakerQuote> {
    let lines: Vec<MarketLine> = bookmaker
        .markets
        .iter()
        .filter_map(|market| extract_line(market, &event.home_team, &event.away_team))
        .collect();

    if lines.is_empty() {
        return None;
    }

    Some(BookmakerQuote {
        bookmaker_key: bookmaker.key.clone(),
        bookmaker_title: bookmaker.title.clone(),
        last_update: bookmaker.last_update,
        lines,
        markets: serde_json::to_value(&bookmaker.markets).unwrap_or(serde_json::Value::Null),
    })
}

fn extract_line(market: &Market, home_team: &str, away_team: &str) -> Option<MarketLine> {
    let market_type = MarketType::from_key(&market.key)?;

    let find = |name: &str| market.outcomes.iter().find(|o| o.name == name);

    match market_type {
        MarketType::Moneyline => {
            let home = find(home_team)?;
            let away = find(away_team)?;
            Some(MarketLine::Moneyline {
                home_price: home.price?,
                away_price: away.price?,
            })
        }
        MarketType::Spread => {
            let home = find(home_team)?;
            let away = find(away_team)?;
            Some(MarketLine::Spread {
                home_price: home.price?,
                away_price: away.price?,
                home_point: home.point?,
            })
        }
        MarketType::Total => {
            let over = find("Over")?;
            let under = find("Under")?;
            Some(MarketLine::Total {
                over_price: over.price?,
                under_price: under.price?,
                point: over.point.or(under.point)?,
            })
        }
    }
}
