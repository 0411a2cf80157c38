// src/config.rs
use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::Exchange;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)] pub server: ServerConfig,
    #[serde(default)] pub cache: CacheConfig,
    #[serde(default)] pub sources: SourcesConfig,
    #[serde(default)] pub ranking: RankingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]                 pub host: String,
    #[serde(default = "d_port")]                 pub port: u16,
    #[serde(default)]                            pub static_dir: Option<PathBuf>,
    #[serde(default = "d_warm_secs")]            pub warm_interval_secs: u64, // 0 disables the background refresher
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "d_refresh_interval")]     pub refresh_interval_secs: u64,
    #[serde(default = "d_refresh_timeout_ms")]   pub refresh_timeout_ms: u64,
    #[serde(default = "d_history_limit")]        pub history_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "d_enabled")]              pub enabled: Vec<Exchange>,
    #[serde(default = "d_request_timeout_ms")]   pub request_timeout_ms: u64,
    #[serde(default = "d_source_timeout_ms")]    pub source_timeout_ms: u64,
    #[serde(default = "d_leverage_ttl")]         pub lighter_leverage_ttl_secs: u64,
    #[serde(default)]                            pub subfetch: SubFetchConfig,
    #[serde(default)]                            pub endpoints: Endpoints,
}

/// Knobs for exchanges that need one request per instrument.
#[derive(Debug, Clone, Deserialize)]
pub struct SubFetchConfig {
    #[serde(default = "d_concurrency")]          pub concurrency: usize,
    #[serde(default = "d_retries")]              pub retries: usize,
    #[serde(default = "d_backoff_ms")]           pub backoff_base_ms: u64,
    #[serde(default = "d_budget_ms")]            pub budget_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Endpoints {
    #[serde(default = "d_binance")]              pub binance: String,
    #[serde(default = "d_okx")]                  pub okx: String,
    #[serde(default = "d_lighter")]              pub lighter: String,
    #[serde(default = "d_lighter_docs")]         pub lighter_docs: String,
    #[serde(default = "d_grvt")]                 pub grvt: String,
    #[serde(default = "d_gate")]                 pub gate: String,
    #[serde(default = "d_bybit")]                pub bybit: String,
    #[serde(default = "d_bitget")]               pub bitget: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "d_rel_tol")]              pub rel_tolerance: f64,
    #[serde(default = "d_abs_tol")]              pub abs_tolerance: f64,
}

fn d_host() -> String { "0.0.0.0".into() }
fn d_port() -> u16 { 8000 }
fn d_warm_secs() -> u64 { 30 }
fn d_refresh_interval() -> u64 { 30 }
fn d_refresh_timeout_ms() -> u64 { 9_000 }
fn d_history_limit() -> usize { 200 }
fn d_enabled() -> Vec<Exchange> { Exchange::ALL.to_vec() }
fn d_request_timeout_ms() -> u64 { 5_000 }
fn d_source_timeout_ms() -> u64 { 8_000 }
fn d_leverage_ttl() -> u64 { 1_800 }
fn d_concurrency() -> usize { 10 }
fn d_retries() -> usize { 2 }
fn d_backoff_ms() -> u64 { 200 }
fn d_budget_ms() -> u64 { 6_000 }
fn d_binance() -> String { "https://fapi.binance.com".into() }
fn d_okx() -> String { "https://www.okx.com".into() }
fn d_lighter() -> String { "https://mainnet.zklighter.elliot.ai".into() }
fn d_lighter_docs() -> String {
    "https://r.jina.ai/https://docs.lighter.xyz/perpetual-futures/contract-specifications".into()
}
fn d_grvt() -> String { "https://market-data.grvt.io".into() }
fn d_gate() -> String { "https://api.gateio.ws".into() }
fn d_bybit() -> String { "https://api.bybit.com".into() }
fn d_bitget() -> String { "https://api.bitget.com".into() }
fn d_rel_tol() -> f64 { 1e-9 }
fn d_abs_tol() -> f64 { 1e-12 }

#[inline]
pub fn ms(d: u64) -> std::time::Duration { Duration::from_millis(d) }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            static_dir: None,
            warm_interval_secs: d_warm_secs(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: d_refresh_interval(),
            refresh_timeout_ms: d_refresh_timeout_ms(),
            history_limit: d_history_limit(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            enabled: d_enabled(),
            request_timeout_ms: d_request_timeout_ms(),
            source_timeout_ms: d_source_timeout_ms(),
            lighter_leverage_ttl_secs: d_leverage_ttl(),
            subfetch: SubFetchConfig::default(),
            endpoints: Endpoints::default(),
        }
    }
}

impl Default for SubFetchConfig {
    fn default() -> Self {
        Self {
            concurrency: d_concurrency(),
            retries: d_retries(),
            backoff_base_ms: d_backoff_ms(),
            budget_ms: d_budget_ms(),
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            binance: d_binance(),
            okx: d_okx(),
            lighter: d_lighter(),
            lighter_docs: d_lighter_docs(),
            grvt: d_grvt(),
            gate: d_gate(),
            bybit: d_bybit(),
            bitget: d_bitget(),
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self { rel_tolerance: d_rel_tol(), abs_tolerance: d_abs_tol() }
    }
}

impl CacheConfig {
    pub fn refresh_interval(&self) -> Duration { Duration::from_secs(self.refresh_interval_secs) }
    pub fn refresh_timeout(&self) -> Duration { ms(self.refresh_timeout_ms) }
}

impl SubFetchConfig {
    pub fn backoff_base(&self) -> Duration { ms(self.backoff_base_ms) }
    pub fn budget(&self) -> Duration { ms(self.budget_ms) }
}

impl SourcesConfig {
    pub fn is_enabled(&self, exchange: Exchange) -> bool { self.enabled.contains(&exchange) }
}

impl MonitorConfig {
    /// Read an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("reading config {}", p.display()))?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// The sub-fetch budget must end before the collector's per-source
    /// timeout, otherwise partial results are discarded with the source.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.sources.subfetch.budget_ms < self.sources.source_timeout_ms,
            "sources.subfetch.budget_ms ({}) must be below sources.source_timeout_ms ({})",
            self.sources.subfetch.budget_ms,
            self.sources.source_timeout_ms
        );
        Ok(())
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw).context("parsing config toml")
    }

    /// `REFRESH_INTERVAL` and `REFRESH_TIMEOUT` are in seconds (fractions allowed for the timeout).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("REFRESH_INTERVAL").and_then(|v| v.parse::<u64>().ok()) {
            self.cache.refresh_interval_secs = v;
        }
        if let Some(v) = get("REFRESH_TIMEOUT").and_then(|v| v.parse::<f64>().ok()) {
            if v.is_finite() && v > 0.0 {
                self.cache.refresh_timeout_ms = (v * 1000.0).round() as u64;
            }
        }
        if let Some(v) = get("HOST") {
            self.server.host = v;
        }
        if let Some(v) = get("PORT").and_then(|v| v.parse::<u16>().ok()) {
            self.server.port = v;
        }
        if let Some(v) = get("STATIC_DIR") {
            self.server.static_dir = Some(PathBuf::from(v));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_toml_matches_defaults() {
        let cfg = MonitorConfig::from_toml("").unwrap();
        assert_eq!(cfg.cache.refresh_interval_secs, 30);
        assert_eq!(cfg.cache.refresh_timeout_ms, 9_000);
        assert_eq!(cfg.cache.history_limit, 200);
        assert_eq!(cfg.sources.enabled.len(), Exchange::ALL.len());
        assert_eq!(cfg.sources.subfetch.concurrency, 10);
        assert_eq!(cfg.server.port, 8000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn budget_must_end_before_source_timeout() {
        let cfg = MonitorConfig::from_toml(
            r#"
            [sources]
            source_timeout_ms = 3000

            [sources.subfetch]
            budget_ms = 3000
            "#,
        )
        .unwrap();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("budget_ms"), "{err}");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = MonitorConfig::from_toml(
            r#"
            [sources]
            enabled = ["BINANCE", "OKX"]

            [sources.subfetch]
            concurrency = 4
            "#,
        )
        .unwrap();
        assert_eq!(cfg.sources.enabled, vec![Exchange::Binance, Exchange::Okx]);
        assert!(!cfg.sources.is_enabled(Exchange::Grvt));
        assert_eq!(cfg.sources.subfetch.concurrency, 4);
        assert_eq!(cfg.sources.subfetch.retries, 2);
        assert_eq!(cfg.sources.endpoints.binance, "https://fapi.binance.com");
    }

    #[test]
    fn env_overrides_win_and_garbage_is_ignored() {
        let env: HashMap<&str, &str> = [
            ("REFRESH_INTERVAL", "15"),
            ("REFRESH_TIMEOUT", "2.5"),
            ("PORT", "not-a-port"),
            ("HOST", " 127.0.0.1 "),
        ]
        .into_iter()
        .collect();

        let mut cfg = MonitorConfig::default();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.cache.refresh_interval(), Duration::from_secs(15));
        assert_eq!(cfg.cache.refresh_timeout(), Duration::from_millis(2_500));
        assert_eq!(cfg.server.port, 8000);
        assert_eq!(cfg.server.host, "127.0.0.1");
    }
}
