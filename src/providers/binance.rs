// src/providers/binance.rs
use serde::Deserialize;
use serde_json::Value;
use serde_with::{serde_as, DisplayFromStr};

use super::{decode_records, int_like, send_json, symbols, SourceAdapter, SourceError};
use crate::types::{Exchange, RateObservation};

/// Binance USDT-M futures, one `premiumIndex` call for every symbol.
pub struct BinanceFunding {
    pub http: reqwest::Client,
    pub base_url: String,
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndex {
    symbol: String,
    #[serde_as(as = "DisplayFromStr")]
    last_funding_rate: f64,
    #[serde(default)]
    next_funding_time: Value,
}

impl BinanceFunding {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self { http, base_url: base_url.trim_end_matches('/').to_string() }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for BinanceFunding {
    fn source(&self) -> Exchange {
        Exchange::Binance
    }

    async fn fetch(&self) -> Result<Vec<RateObservation>, SourceError> {
        let url = format!("{}/fapi/v1/premiumIndex", self.base_url);
        let rows: Vec<Value> = send_json(self.http.get(url)).await?;

        let items: Vec<RateObservation> = decode_records::<PremiumIndex>(Exchange::Binance, rows)
            .into_iter()
            .filter_map(|rec| {
                let unified_symbol = symbols::concat_usdt_to_unified(&rec.symbol)?;
                Some(RateObservation {
                    source: Exchange::Binance,
                    unified_symbol,
                    rate_8h: rec.last_funding_rate,
                    raw_rate: rec.last_funding_rate,
                    next_settlement_time: int_like(Some(&rec.next_funding_time)),
                    max_leverage: Some(Exchange::Binance.default_leverage()),
                    raw_symbol: rec.symbol,
                })
            })
            .collect();

        tracing::info!("Fetched {} Binance funding items", items.len());
        Ok(items)
    }
}
