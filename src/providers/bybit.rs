// src/providers/bybit.rs
use serde::Deserialize;
use serde_json::Value;
use serde_with::{serde_as, DisplayFromStr, NoneAsEmptyString};

use super::{decode_records, send_json, symbols, SourceAdapter, SourceError};
use crate::types::{Exchange, RateObservation};

pub struct BybitFunding {
    pub http: reqwest::Client,
    pub base_url: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Option<TickerList>,
}

#[derive(Debug, Deserialize)]
struct TickerList {
    #[serde(default)]
    list: Vec<Value>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinearTicker {
    symbol: String,
    #[serde_as(as = "DisplayFromStr")]
    funding_rate: f64,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    next_funding_time: Option<i64>,
}

impl BybitFunding {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self { http, base_url: base_url.trim_end_matches('/').to_string() }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for BybitFunding {
    fn source(&self) -> Exchange {
        Exchange::Bybit
    }

    async fn fetch(&self) -> Result<Vec<RateObservation>, SourceError> {
        let url = format!("{}/v5/market/tickers", self.base_url);
        let env: Envelope = send_json(self.http.get(url).query(&[("category", "linear")])).await?;
        let rows = env.result.map(|r| r.list).unwrap_or_default();

        let items: Vec<RateObservation> = decode_records::<LinearTicker>(Exchange::Bybit, rows)
            .into_iter()
            .filter_map(|rec| {
                let unified_symbol = symbols::concat_usdt_to_unified(&rec.symbol)?;
                Some(RateObservation {
                    source: Exchange::Bybit,
                    unified_symbol,
                    rate_8h: rec.funding_rate,
                    raw_rate: rec.funding_rate,
                    next_settlement_time: rec.next_funding_time,
                    max_leverage: Some(Exchange::Bybit.default_leverage()),
                    raw_symbol: rec.symbol,
                })
            })
            .collect();

        tracing::info!("Fetched {} Bybit funding items", items.len());
        Ok(items)
    }
}
