// src/providers/gate.rs
use serde::Deserialize;
use serde_json::Value;

use super::{
    decode_records, int_like, note_unparsed_rates, num_like, send_json, symbols, SourceAdapter, SourceError,
};
use crate::types::{Exchange, RateObservation};

pub struct GateFunding {
    pub http: reqwest::Client,
    pub base_url: String,
}

// Gate mixes numbers and numeric strings across fields, so keep them loose here.
#[derive(Debug, Deserialize)]
struct FuturesTicker {
    contract: String,
    #[serde(default, rename = "funding_rate8h")]
    funding_rate_8h: Value,
    #[serde(default)]
    funding_rate: Value,
    #[serde(default)]
    funding_next_apply: Value,
}

impl GateFunding {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self { http, base_url: base_url.trim_end_matches('/').to_string() }
    }
}

/// Tickers with a usable rate, plus how many were dropped because neither
/// rate field parsed. Unrecognised contract names are filtered silently.
fn parse_tickers(rows: Vec<FuturesTicker>) -> (Vec<RateObservation>, usize) {
    let mut skipped = 0;
    let items = rows
        .into_iter()
        .filter_map(|rec| {
            let unified_symbol = symbols::gate_to_unified(&rec.contract)?;
            let Some(rate) = num_like(Some(&rec.funding_rate_8h)).or_else(|| num_like(Some(&rec.funding_rate)))
            else {
                skipped += 1;
                return None;
            };
            Some(RateObservation {
                source: Exchange::Gate,
                unified_symbol,
                rate_8h: rate,
                raw_rate: rate,
                next_settlement_time: int_like(Some(&rec.funding_next_apply)),
                max_leverage: Some(Exchange::Gate.default_leverage()),
                raw_symbol: rec.contract,
            })
        })
        .collect();
    (items, skipped)
}

#[async_trait::async_trait]
impl SourceAdapter for GateFunding {
    fn source(&self) -> Exchange {
        Exchange::Gate
    }

    async fn fetch(&self) -> Result<Vec<RateObservation>, SourceError> {
        let url = format!("{}/api/v4/futures/usdt/tickers", self.base_url);
        let rows: Vec<Value> = send_json(self.http.get(url)).await?;

        let (items, skipped) = parse_tickers(decode_records(Exchange::Gate, rows));
        note_unparsed_rates(Exchange::Gate, skipped);

        tracing::info!("Fetched {} Gate funding items", items.len());
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ticker(contract: &str, rate_8h: Value, rate: Value) -> FuturesTicker {
        FuturesTicker {
            contract: contract.into(),
            funding_rate_8h: rate_8h,
            funding_rate: rate,
            funding_next_apply: Value::Null,
        }
    }

    #[test]
    fn unparseable_rates_are_counted() {
        let (items, skipped) = parse_tickers(vec![
            ticker("BTC_USDT", json!("0.0001"), Value::Null),
            ticker("ETH_USDT", json!("n/a"), json!(0.0002)),
            ticker("SOL_USDT", json!(""), json!("garbage")),
            ticker("XRP_USDT", Value::Null, Value::Null),
            ticker("BTCUSDT", json!("bad"), Value::Null),
        ]);

        let symbols: Vec<&str> = items.iter().map(|o| o.unified_symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTC-USDT-PERP", "ETH-USDT-PERP"]);
        assert_eq!(items[1].rate_8h, 0.0002);
        // an unrecognised contract name is filtered, not counted
        assert_eq!(skipped, 2);
    }
}
