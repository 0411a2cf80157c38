// src/providers/lighter.rs
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{
    decode_records, int_like, note_unparsed_rates, num_like, send_json, symbols, SourceAdapter, SourceError,
};
use crate::types::{Exchange, RateObservation};

type LeverageMap = Arc<HashMap<String, f64>>;

/// zkLighter public funding endpoint. Leverage limits are not in the API, so
/// they are scraped from the contract-specifications docs page and cached for `leverage_ttl`.
pub struct LighterFunding {
    pub http: reqwest::Client,
    pub base_url: String,
    pub docs_url: String,
    leverage_ttl: Duration,
    leverage: Mutex<Option<(Instant, LeverageMap)>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Payload {
    Current { funding_rates: Vec<Value> },
    Legacy(Vec<Value>),
}

#[derive(Debug, Deserialize)]
struct CurrentRow {
    #[serde(default)]
    exchange: String,
    symbol: String,
    rate: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRow {
    instrument: String,
    funding_rate: Value,
    #[serde(default)]
    funding_interval_hours: Value,
    #[serde(default)]
    next_funding_time: Value,
}

impl LighterFunding {
    pub fn new(http: reqwest::Client, base_url: &str, docs_url: &str, leverage_ttl: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            docs_url: docs_url.to_string(),
            leverage_ttl,
            leverage: Mutex::new(None),
        }
    }

    async fn leverage_table(&self) -> LeverageMap {
        let cached = self.leverage.lock().clone();
        if let Some((at, map)) = &cached {
            if at.elapsed() < self.leverage_ttl && !map.is_empty() {
                return Arc::clone(map);
            }
        }

        let fetched = async {
            let resp = self.http.get(&self.docs_url).send().await?.error_for_status()?;
            Ok::<_, reqwest::Error>(parse_leverage_markdown(&resp.text().await?))
        }
        .await;

        match fetched {
            Ok(map) if !map.is_empty() => {
                let map = Arc::new(map);
                *self.leverage.lock() = Some((Instant::now(), Arc::clone(&map)));
                map
            }
            Ok(_) => {
                tracing::warn!("Lighter leverage table parsed empty; keeping previous");
                cached.map(|(_, m)| m).unwrap_or_default()
            }
            Err(err) => {
                tracing::warn!("Failed to fetch Lighter leverage table: {err}");
                cached.map(|(_, m)| m).unwrap_or_default()
            }
        }
    }
}

/// The docs page renders as a table flattened to one cell per line, with the
/// `NNx` leverage cell three lines below the symbol cell.
pub fn parse_leverage_markdown(text: &str) -> HashMap<String, f64> {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let mut out = HashMap::new();
    for (idx, line) in lines.iter().enumerate() {
        let Some(lev) = leverage_cell(line) else {
            continue;
        };
        if lev <= 0.0 || idx < 3 {
            continue;
        }
        let symbol = lines[idx - 3];
        if symbol.eq_ignore_ascii_case("symbol") || symbol.eq_ignore_ascii_case("leverage") {
            continue;
        }
        let well_formed = symbol.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
        if well_formed && !symbol.is_empty() {
            out.insert(symbol.to_string(), lev);
        }
    }
    out
}

/// `50x` or `12.5x`. Exponents, `inf` and bare dots are not leverage cells.
fn leverage_cell(cell: &str) -> Option<f64> {
    let num = cell.strip_suffix('x')?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    let well_formed = match num.split_once('.') {
        Some((whole, frac)) => digits(whole) && digits(frac),
        None => digits(num),
    };
    if !well_formed {
        return None;
    }
    num.parse().ok()
}

#[derive(Debug, Default)]
struct Parsed {
    items: Vec<RateObservation>,
    // decoded rows whose rate did not parse
    skipped: usize,
    missing_leverage: BTreeSet<String>,
}

/// Lighter's own rows from either payload schema, with leverage from `table`
/// or the venue default.
fn observations(payload: Payload, table: &HashMap<String, f64>) -> Parsed {
    let mut parsed = Parsed::default();
    let Parsed { items, skipped, missing_leverage } = &mut parsed;
    let mut lever_for = |symbol: &str| {
        let key = symbol.to_ascii_uppercase();
        let lev = table.get(&key).copied();
        if lev.is_none() {
            missing_leverage.insert(key);
        }
        Some(lev.unwrap_or_else(|| Exchange::Lighter.default_leverage()))
    };

    match payload {
        Payload::Current { funding_rates } => {
            for row in decode_records::<CurrentRow>(Exchange::Lighter, funding_rates) {
                // the feed also mirrors other venues; keep only Lighter's own rows
                if !matches!(row.exchange.to_ascii_lowercase().as_str(), "lighter" | "zklighter") {
                    continue;
                }
                let Some(unified_symbol) = symbols::lighter_to_unified(&row.symbol) else {
                    continue;
                };
                let Some(rate) = num_like(Some(&row.rate)) else {
                    *skipped += 1;
                    continue;
                };
                items.push(RateObservation {
                    source: Exchange::Lighter,
                    unified_symbol,
                    rate_8h: rate,
                    raw_rate: rate,
                    next_settlement_time: None,
                    max_leverage: lever_for(&row.symbol),
                    raw_symbol: row.symbol,
                });
            }
        }
        Payload::Legacy(rows) => {
            for row in decode_records::<LegacyRow>(Exchange::Lighter, rows) {
                let Some(unified_symbol) = symbols::lighter_to_unified(&row.instrument) else {
                    continue;
                };
                let Some(raw_rate) = num_like(Some(&row.funding_rate)) else {
                    *skipped += 1;
                    continue;
                };
                let hours = num_like(Some(&row.funding_interval_hours))
                    .filter(|h| *h > 0.0)
                    .unwrap_or(8.0);
                items.push(RateObservation {
                    source: Exchange::Lighter,
                    unified_symbol,
                    rate_8h: raw_rate * (8.0 / hours),
                    raw_rate,
                    next_settlement_time: int_like(Some(&row.next_funding_time)),
                    max_leverage: lever_for(&row.instrument),
                    raw_symbol: row.instrument,
                });
            }
        }
    }
    parsed
}

#[async_trait::async_trait]
impl SourceAdapter for LighterFunding {
    fn source(&self) -> Exchange {
        Exchange::Lighter
    }

    async fn fetch(&self) -> Result<Vec<RateObservation>, SourceError> {
        let url = format!("{}/api/v1/funding-rates", self.base_url);
        let payload: Payload = send_json(self.http.get(url)).await?;
        let leverage = self.leverage_table().await;
        let Parsed { items, skipped, missing_leverage: missing } = observations(payload, &leverage);
        note_unparsed_rates(Exchange::Lighter, skipped);

        if !missing.is_empty() {
            let sample: Vec<&str> = missing.iter().take(10).map(String::as_str).collect();
            tracing::info!(
                "Lighter leverage missing for {} symbols (sample: {}); defaulting to {:.0}x",
                missing.len(),
                sample.join(", "),
                Exchange::Lighter.default_leverage()
            );
        }
        tracing::info!("Fetched {} Lighter funding items", items.len());
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flattened_leverage_table() {
        let md = "\
Symbol
Price step
Amount step
Leverage
BTC
0.1
0.00001
50x
ETH
0.01
0.0001
25x
note: 10x is the default
";
        let map = parse_leverage_markdown(md);
        assert_eq!(map.get("BTC"), Some(&50.0));
        assert_eq!(map.get("ETH"), Some(&25.0));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn leverage_cells_are_plain_decimals() {
        assert_eq!(leverage_cell("50x"), Some(50.0));
        assert_eq!(leverage_cell("12.5x"), Some(12.5));
        for cell in ["1e3x", "infx", "NaNx", ".5x", "5.x", "+5x", "-5x", "5", "x", "5 x"] {
            assert_eq!(leverage_cell(cell), None, "{cell}");
        }

        let md = "Symbol\na\nb\nLeverage\nBTC\n0.1\n0.001\n1e3x\nETH\n0.01\n0.001\n12.5x\n";
        let map = parse_leverage_markdown(md);
        assert_eq!(map.get("BTC"), None);
        assert_eq!(map.get("ETH"), Some(&12.5));
    }

    #[test]
    fn rows_without_a_rate_are_counted() {
        let payload: Payload = serde_json::from_value(serde_json::json!({"funding_rates": [
            {"exchange": "lighter", "symbol": "BTC", "rate": "0.0001"},
            {"exchange": "lighter", "symbol": "ETH", "rate": "n/a"},
            {"exchange": "lighter", "symbol": "SOL", "rate": null},
            {"exchange": "binance", "symbol": "XRP", "rate": "bad"}
        ]}))
        .unwrap();
        let table = HashMap::from([("BTC".to_string(), 50.0)]);

        let parsed = observations(payload, &table);
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].max_leverage, Some(50.0));
        // the binance mirror row is filtered, not counted
        assert_eq!(parsed.skipped, 2);
        assert!(parsed.missing_leverage.is_empty());

        let legacy: Payload = serde_json::from_value(serde_json::json!([
            {"instrument": "BTC", "fundingRate": "0.0002", "fundingIntervalHours": 4},
            {"instrument": "DOGE", "fundingRate": {}}
        ]))
        .unwrap();
        let parsed = observations(legacy, &HashMap::new());
        assert_eq!(parsed.items[0].rate_8h, 0.0004);
        assert_eq!(parsed.skipped, 1);
        assert_eq!(parsed.missing_leverage.into_iter().collect::<Vec<_>>(), vec!["BTC".to_string()]);
    }

    #[test]
    fn ignores_header_and_lowercase_cells() {
        let md = "a\nb\nc\n3x\nsymbol\nx\ny\n5x\n";
        assert!(parse_leverage_markdown(md).is_empty());
    }
}
