// src/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed registry of exchanges the monitor knows how to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    Binance,
    Okx,
    Lighter,
    Grvt,
    Gate,
    Bybit,
    Bitget,
}

impl Exchange {
    pub const ALL: [Exchange; 7] = [
        Exchange::Binance,
        Exchange::Okx,
        Exchange::Lighter,
        Exchange::Grvt,
        Exchange::Gate,
        Exchange::Bybit,
        Exchange::Bitget,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Binance => "BINANCE",
            Exchange::Okx => "OKX",
            Exchange::Lighter => "LIGHTER",
            Exchange::Grvt => "GRVT",
            Exchange::Gate => "GATE",
            Exchange::Bybit => "BYBIT",
            Exchange::Bitget => "BITGET",
        }
    }

    /// Conservative max leverage assumed when a quote carries none.
    pub fn default_leverage(&self) -> f64 {
        match self {
            Exchange::Binance => 125.0, // USDT-M tops out at 125x
            _ => 50.0,
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One exchange's funding quote for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateObservation {
    pub source: Exchange,
    pub raw_symbol: String,              // exchange-native id, e.g. "BTCUSDT"
    pub unified_symbol: String,          // "BTC-USDT-PERP"
    pub rate_8h: f64,                    // normalized to an 8h settlement period
    pub raw_rate: f64,                   // as reported
    pub next_settlement_time: Option<i64>, // unix ms
    pub max_leverage: Option<f64>,
}

impl RateObservation {
    pub fn leverage_or_default(&self) -> f64 {
        self.max_leverage
            .filter(|lev| lev.is_finite() && *lev > 0.0)
            .unwrap_or_else(|| self.source.default_leverage())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingRow {
    pub unified_symbol: String,
    pub high_source: Exchange,
    pub high_rate: f64,
    pub low_source: Exchange,
    pub low_rate: f64,
    pub rate_diff: f64,
    pub leverage_used: f64,
    pub nominal_spread: f64,
    pub details: Vec<RateObservation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub rate_diff: f64,
    pub nominal_spread: f64,
    pub high_rate: f64,
    pub low_rate: f64,
    pub high_source: Exchange,
    pub low_source: Exchange,
}

impl HistoryRecord {
    pub fn from_row(row: &RankingRow, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            rate_diff: row.rate_diff,
            nominal_spread: row.nominal_spread,
            high_rate: row.high_rate,
            low_rate: row.low_rate,
            high_source: row.high_source,
            low_source: row.low_source,
        }
    }
}
