// src/providers/okx.rs
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use super::{decode_records, int_like, num_like, send_json, symbols, SourceAdapter, SourceError};
use crate::subfetch::BoundedFetcher;
use crate::types::{Exchange, RateObservation};

/// OKX only serves funding per instrument, so this fans out one request per
/// USDT swap through the bounded fetcher.
pub struct OkxFunding {
    pub http: reqwest::Client,
    pub base_url: String,
    fetcher: BoundedFetcher,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    inst_id: String,
    #[serde(default)]
    settle_ccy: Option<String>,
    #[serde(default)]
    lever: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingRate {
    funding_rate: Value,
    #[serde(default)]
    next_funding_time: Value,
}

const RATE_LIMITED: &str = "50011";

impl Envelope {
    // OKX reports API errors in-band with HTTP 200.
    fn into_data(self) -> Result<Vec<Value>, SourceError> {
        match self.code.as_deref() {
            None | Some("0") | Some("") => Ok(self.data),
            Some(RATE_LIMITED) => Err(SourceError::Status(429)),
            Some(code) => {
                tracing::debug!("OKX error code {code}: {}", self.msg.unwrap_or_default());
                Err(SourceError::Status(400))
            }
        }
    }
}

impl OkxFunding {
    pub fn new(http: reqwest::Client, base_url: &str, fetcher: BoundedFetcher) -> Self {
        Self { http, base_url: base_url.trim_end_matches('/').to_string(), fetcher }
    }

    /// USDT-settled swaps and their max leverage, when OKX publishes one.
    async fn usdt_swaps(&self) -> Result<Vec<(String, Option<f64>)>, SourceError> {
        let url = format!("{}/api/v5/public/instruments", self.base_url);
        let env: Envelope = send_json(self.http.get(url).query(&[("instType", "SWAP")])).await?;
        let swaps = decode_records::<Instrument>(Exchange::Okx, env.into_data()?)
            .into_iter()
            .filter(|inst| {
                inst.inst_id.ends_with("-USDT-SWAP") || inst.settle_ccy.as_deref() == Some("USDT")
            })
            .map(|inst| {
                let lever = num_like(Some(&inst.lever)).filter(|l| *l > 0.0);
                (inst.inst_id, lever)
            })
            .collect();
        Ok(swaps)
    }

    async fn fetch_one(&self, inst_id: String, lever: Option<f64>) -> Result<Option<RateObservation>, SourceError> {
        let unified_symbol =
            symbols::okx_to_unified(&inst_id).ok_or_else(|| SourceError::BadSymbol(inst_id.clone()))?;

        let url = format!("{}/api/v5/public/funding-rate", self.base_url);
        let env: Envelope = send_json(self.http.get(url).query(&[("instId", inst_id.as_str())])).await?;
        let Some(first) = env.into_data()?.into_iter().next() else {
            return Ok(None);
        };
        let row: FundingRate =
            serde_json::from_value(first).map_err(|e| SourceError::Malformed(e.to_string()))?;
        let rate = num_like(Some(&row.funding_rate))
            .ok_or_else(|| SourceError::Malformed(format!("fundingRate for {inst_id}")))?;

        Ok(Some(RateObservation {
            source: Exchange::Okx,
            raw_symbol: inst_id,
            unified_symbol,
            rate_8h: rate,
            raw_rate: rate,
            next_settlement_time: int_like(Some(&row.next_funding_time)),
            max_leverage: lever,
        }))
    }
}

#[async_trait::async_trait]
impl SourceAdapter for OkxFunding {
    fn source(&self) -> Exchange {
        Exchange::Okx
    }

    async fn fetch(&self) -> Result<Vec<RateObservation>, SourceError> {
        let deadline = self.fetcher.deadline();
        let swaps = tokio::time::timeout_at(deadline, self.usdt_swaps())
            .await
            .map_err(|_| SourceError::Timeout)??;
        tracing::info!("Discovered {} OKX USDT swap instruments", swaps.len());

        let leverage: HashMap<String, Option<f64>> = swaps.iter().cloned().collect();
        let ids: Vec<String> = swaps.into_iter().map(|(id, _)| id).collect();

        let (this, leverage) = (self, &leverage);
        let report = self
            .fetcher
            .fetch_all_until(deadline, ids, move |inst_id: String| {
                let lever = leverage.get(&inst_id).copied().flatten();
                this.fetch_one(inst_id, lever)
            })
            .await;

        #[cfg(feature = "metrics")]
        crate::metrics::record_subfetch_errors(Exchange::Okx, &report.errors);

        if report.error_total() > 0 {
            tracing::warn!(errors = ?report.errors, "OKX per-instrument fetch had failures");
        }
        tracing::info!("Fetched {} OKX funding items", report.items.len());
        Ok(report.items)
    }
}
