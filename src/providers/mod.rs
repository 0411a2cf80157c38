// src/providers/mod.rs
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::config::{ms, SourcesConfig};
use crate::subfetch::BoundedFetcher;
use crate::types::{Exchange, RateObservation};

pub mod binance;
pub mod bitget;
pub mod bybit;
pub mod gate;
pub mod grvt;
pub mod lighter;
pub mod okx;
pub mod symbols;

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Exchange;

    /// Fetch every qualifying funding quote. An empty vector means the exchange
    /// listed nothing we could use; errors are reserved for failed requests.
    async fn fetch(&self) -> Result<Vec<RateObservation>, SourceError>;
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("request timed out")]
    Timeout,
    #[error("http status {0}")]
    Status(u16),
    #[error("transport: {0}")]
    Transport(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("unrecognized symbol: {0}")]
    BadSymbol(String),
}

/// Buckets used when failures are counted rather than surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Timeout,
    RateLimited,
    ServerError,
    ClientError,
    Transport,
    Malformed,
    BadSymbol,
    BudgetTimeout,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::RateLimited => "rate_limited",
            FetchErrorKind::ServerError => "server_error",
            FetchErrorKind::ClientError => "client_error",
            FetchErrorKind::Transport => "transport",
            FetchErrorKind::Malformed => "malformed",
            FetchErrorKind::BadSymbol => "bad_symbol",
            FetchErrorKind::BudgetTimeout => "budget_timeout",
        }
    }
}

impl SourceError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            SourceError::Timeout => FetchErrorKind::Timeout,
            SourceError::Status(429) => FetchErrorKind::RateLimited,
            SourceError::Status(s) if *s >= 500 => FetchErrorKind::ServerError,
            SourceError::Status(_) => FetchErrorKind::ClientError,
            SourceError::Transport(_) => FetchErrorKind::Transport,
            SourceError::Malformed(_) => FetchErrorKind::Malformed,
            SourceError::BadSymbol(_) => FetchErrorKind::BadSymbol,
        }
    }

    /// Worth another attempt: timeouts, 5xx, 429, garbled bodies and dropped connections.
    pub fn is_transient(&self) -> bool {
        match self.kind() {
            FetchErrorKind::Timeout
            | FetchErrorKind::RateLimited
            | FetchErrorKind::ServerError
            | FetchErrorKind::Transport
            | FetchErrorKind::Malformed => true,
            FetchErrorKind::ClientError | FetchErrorKind::BadSymbol | FetchErrorKind::BudgetTimeout => false,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout
        } else if let Some(status) = e.status() {
            SourceError::Status(status.as_u16())
        } else if e.is_decode() {
            SourceError::Malformed(e.to_string())
        } else {
            SourceError::Transport(e.to_string())
        }
    }
}

/// Send a request and decode its JSON body, mapping non-2xx to `SourceError::Status`.
pub(crate) async fn send_json<T: DeserializeOwned>(req: reqwest::RequestBuilder) -> Result<T, SourceError> {
    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(SourceError::Status(status.as_u16()));
    }
    let body = resp.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| SourceError::Malformed(e.to_string()))
}

/// Decode a list of loosely-typed rows, skipping (and counting) the ones that don't fit.
pub(crate) fn decode_records<R: DeserializeOwned>(source: Exchange, rows: Vec<Value>) -> Vec<R> {
    let total = rows.len();
    let out: Vec<R> = rows
        .into_iter()
        .filter_map(|row| match serde_json::from_value::<R>(row) {
            Ok(rec) => Some(rec),
            Err(err) => {
                tracing::trace!(%source, "skipping malformed record: {err}");
                None
            }
        })
        .collect();
    if out.len() < total {
        tracing::debug!(%source, skipped = total - out.len(), "skipped malformed records");
    }
    out
}

/// Records that decoded but carried no usable funding rate. Same log level as
/// `decode_records` so both kinds of drop show up together.
pub(crate) fn note_unparsed_rates(source: Exchange, skipped: usize) {
    if skipped > 0 {
        tracing::debug!(%source, skipped, "skipped records with unparseable funding rate");
    }
}

/// Accept a JSON number or a numeric string.
pub(crate) fn num_like(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|x| x.is_finite())
}

pub(crate) fn int_like(v: Option<&Value>) -> Option<i64> {
    match v? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Build one adapter per enabled exchange, sharing a single HTTP client.
pub fn build_adapters(cfg: &SourcesConfig) -> anyhow::Result<Vec<Arc<dyn SourceAdapter>>> {
    let http = reqwest::Client::builder()
        .timeout(ms(cfg.request_timeout_ms))
        .gzip(true)
        .build()?;
    let fetcher = BoundedFetcher::new(cfg.subfetch.clone());
    let urls = &cfg.endpoints;

    let mut out: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    for exchange in Exchange::ALL {
        if !cfg.is_enabled(exchange) {
            tracing::info!(%exchange, "source disabled via config");
            continue;
        }
        let adapter: Arc<dyn SourceAdapter> = match exchange {
            Exchange::Binance => Arc::new(binance::BinanceFunding::new(http.clone(), &urls.binance)),
            Exchange::Okx => Arc::new(okx::OkxFunding::new(http.clone(), &urls.okx, fetcher.clone())),
            Exchange::Lighter => Arc::new(lighter::LighterFunding::new(
                http.clone(),
                &urls.lighter,
                &urls.lighter_docs,
                std::time::Duration::from_secs(cfg.lighter_leverage_ttl_secs),
            )),
            Exchange::Grvt => Arc::new(grvt::GrvtFunding::new(http.clone(), &urls.grvt, fetcher.clone())),
            Exchange::Gate => Arc::new(gate::GateFunding::new(http.clone(), &urls.gate)),
            Exchange::Bybit => Arc::new(bybit::BybitFunding::new(http.clone(), &urls.bybit)),
            Exchange::Bitget => Arc::new(bitget::BitgetFunding::new(http.clone(), &urls.bitget)),
        };
        out.push(adapter);
    }
    Ok(out)
}
