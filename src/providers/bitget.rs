// src/providers/bitget.rs
use serde::Deserialize;
use serde_json::Value;
use serde_with::{serde_as, DisplayFromStr};

use super::{decode_records, int_like, send_json, symbols, SourceAdapter, SourceError};
use crate::types::{Exchange, RateObservation};

pub struct BitgetFunding {
    pub http: reqwest::Client,
    pub base_url: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<Vec<Value>>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MixTicker {
    #[serde(alias = "instId")]
    symbol: String,
    #[serde_as(as = "DisplayFromStr")]
    funding_rate: f64,
    #[serde(default)]
    next_funding_time: Value,
    #[serde(default)]
    fund_time: Value,
}

impl BitgetFunding {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self { http, base_url: base_url.trim_end_matches('/').to_string() }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for BitgetFunding {
    fn source(&self) -> Exchange {
        Exchange::Bitget
    }

    async fn fetch(&self) -> Result<Vec<RateObservation>, SourceError> {
        let url = format!("{}/api/mix/v1/market/tickers", self.base_url);
        let env: Envelope = send_json(self.http.get(url).query(&[("productType", "umcbl")])).await?;
        let rows = env.data.unwrap_or_default();

        let items: Vec<RateObservation> = decode_records::<MixTicker>(Exchange::Bitget, rows)
            .into_iter()
            .filter_map(|rec| {
                let unified_symbol = symbols::bitget_to_unified(&rec.symbol)?;
                let next = int_like(Some(&rec.next_funding_time)).or_else(|| int_like(Some(&rec.fund_time)));
                Some(RateObservation {
                    source: Exchange::Bitget,
                    unified_symbol,
                    rate_8h: rec.funding_rate,
                    raw_rate: rec.funding_rate,
                    next_settlement_time: next,
                    max_leverage: Some(Exchange::Bitget.default_leverage()),
                    raw_symbol: rec.symbol,
                })
            })
            .collect();

        tracing::info!("Fetched {} Bitget funding items", items.len());
        Ok(items)
    }
}
