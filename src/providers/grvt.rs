// src/providers/grvt.rs
use serde::Deserialize;
use serde_json::{json, Value};

use super::{decode_records, num_like, send_json, symbols, SourceAdapter, SourceError};
use crate::subfetch::BoundedFetcher;
use crate::types::{Exchange, RateObservation};

const DEFAULT_INTERVAL_HOURS: f64 = 8.0;

/// GRVT lite market-data API: list instruments, then one ticker per perpetual.
pub struct GrvtFunding {
    pub http: reqwest::Client,
    pub base_url: String,
    fetcher: BoundedFetcher,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    r: Value,
}

// lite field names: i=instrument, k=kind, q=quote, fi=funding interval hours
#[derive(Debug, Deserialize)]
struct Instrument {
    i: String,
    #[serde(default)]
    k: String,
    #[serde(default)]
    q: String,
    #[serde(default)]
    fi: Value,
}

#[derive(Debug, Clone)]
struct Perp {
    instrument: String,
    interval_hours: f64,
}

impl GrvtFunding {
    pub fn new(http: reqwest::Client, base_url: &str, fetcher: BoundedFetcher) -> Self {
        Self { http, base_url: base_url.trim_end_matches('/').to_string(), fetcher }
    }

    async fn usdt_perps(&self) -> Result<Vec<Perp>, SourceError> {
        let url = format!("{}/lite/v1/instruments", self.base_url);
        let env: Envelope = send_json(self.http.post(url).json(&json!({}))).await?;
        let rows = match env.r {
            Value::Array(rows) => rows,
            Value::Null => Vec::new(),
            other => return Err(SourceError::Malformed(format!("instruments payload: {other}"))),
        };
        let perps = decode_records::<Instrument>(Exchange::Grvt, rows)
            .into_iter()
            .filter(|inst| inst.k == "PERPETUAL" && inst.q == "USDT" && !inst.i.is_empty())
            .map(|inst| Perp {
                interval_hours: num_like(Some(&inst.fi))
                    .filter(|h| *h > 0.0)
                    .unwrap_or(DEFAULT_INTERVAL_HOURS),
                instrument: inst.i,
            })
            .collect();
        Ok(perps)
    }

    async fn fetch_ticker(&self, perp: Perp) -> Result<Option<RateObservation>, SourceError> {
        let unified_symbol = symbols::grvt_to_unified(&perp.instrument)
            .ok_or_else(|| SourceError::BadSymbol(perp.instrument.clone()))?;

        let url = format!("{}/lite/v1/ticker", self.base_url);
        let env: Envelope = send_json(self.http.post(url).json(&json!({ "i": perp.instrument }))).await?;
        let ticker = env.r;
        // `fr` is the live rate, `fr1` the last settled one; both in percent
        let Some(pct) = num_like(ticker.get("fr")).or_else(|| num_like(ticker.get("fr1"))) else {
            return Ok(None);
        };
        let raw_rate = pct / 100.0;

        Ok(Some(RateObservation {
            source: Exchange::Grvt,
            raw_symbol: perp.instrument,
            unified_symbol,
            rate_8h: raw_rate * (8.0 / perp.interval_hours),
            raw_rate,
            next_settlement_time: None,
            max_leverage: Some(Exchange::Grvt.default_leverage()),
        }))
    }
}

#[async_trait::async_trait]
impl SourceAdapter for GrvtFunding {
    fn source(&self) -> Exchange {
        Exchange::Grvt
    }

    async fn fetch(&self) -> Result<Vec<RateObservation>, SourceError> {
        let deadline = self.fetcher.deadline();
        let perps = tokio::time::timeout_at(deadline, self.usdt_perps())
            .await
            .map_err(|_| SourceError::Timeout)??;
        tracing::debug!("GRVT lists {} USDT perpetuals", perps.len());

        let this = self;
        let report = self
            .fetcher
            .fetch_all_until(deadline, perps, move |perp: Perp| this.fetch_ticker(perp))
            .await;

        #[cfg(feature = "metrics")]
        crate::metrics::record_subfetch_errors(Exchange::Grvt, &report.errors);

        if report.error_total() > 0 {
            tracing::warn!(errors = ?report.errors, "GRVT ticker fetch had failures");
        }
        tracing::info!("Fetched {} GRVT funding items", report.items.len());
        Ok(report.items)
    }
}
