// src/ranking.rs
use indexmap::IndexMap;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::RankingConfig;
use crate::types::{Exchange, RankingRow, RateObservation};

/// Closeness test for rates that should count as tied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub rel: f64,
    pub abs: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self { rel: 1e-9, abs: 1e-12 }
    }
}

impl Tolerance {
    #[inline]
    pub fn approx_eq(&self, a: f64, b: f64) -> bool {
        if a == b {
            return true;
        }
        let scale = a.abs().max(b.abs());
        (a - b).abs() <= (self.rel * scale).max(self.abs)
    }
}

type Candidates<'a> = SmallVec<[&'a RateObservation; 4]>;

/// Groups observations by unified symbol and ranks cross-source divergence.
/// Pure: no I/O, no shared state.
#[derive(Debug, Clone, Copy, Default)]
pub struct RankingBuilder {
    pub tolerance: Tolerance,
}

impl RankingBuilder {
    pub fn new(tolerance: Tolerance) -> Self {
        Self { tolerance }
    }

    pub fn from_config(cfg: &RankingConfig) -> Self {
        Self::new(Tolerance { rel: cfg.rel_tolerance, abs: cfg.abs_tolerance })
    }

    pub fn build(&self, items: &[RateObservation]) -> Vec<RankingRow> {
        if items.is_empty() {
            tracing::warn!("No funding items collected; ranking will be empty");
            return Vec::new();
        }

        let mut groups: IndexMap<&str, Vec<&RateObservation>> = IndexMap::new();
        let mut symbols_by_source: BTreeMap<Exchange, BTreeSet<&str>> = BTreeMap::new();
        let mut non_finite = 0usize;
        for obs in items {
            if !obs.rate_8h.is_finite() {
                non_finite += 1;
                continue;
            }
            groups.entry(obs.unified_symbol.as_str()).or_default().push(obs);
            symbols_by_source.entry(obs.source).or_default().insert(obs.unified_symbol.as_str());
        }
        if non_finite > 0 {
            tracing::debug!(non_finite, "dropped observations with non-finite rates");
        }
        let unique: BTreeMap<Exchange, usize> = symbols_by_source.iter().map(|(ex, s)| (*ex, s.len())).collect();
        tracing::debug!(?unique, "unique symbols per source");

        let mut rows = Vec::with_capacity(groups.len());
        let mut skipped_single_source = 0usize;
        for (symbol, group) in &groups {
            let sources: BTreeSet<Exchange> = group.iter().map(|o| o.source).collect();
            if sources.len() < 2 {
                skipped_single_source += 1;
                continue;
            }
            if let Some(row) = self.rank_group(symbol, group) {
                rows.push(row);
            }
        }

        // stable: equal spreads keep first-seen symbol order
        rows.sort_by(|a, b| b.rate_diff.abs().total_cmp(&a.rate_diff.abs()));

        tracing::info!(
            "Built ranking with {} rows (skipped {} single-exchange symbols)",
            rows.len(),
            skipped_single_source
        );
        rows
    }

    fn rank_group(&self, symbol: &str, group: &[&RateObservation]) -> Option<RankingRow> {
        let max_rate = group.iter().map(|o| o.rate_8h).fold(f64::NEG_INFINITY, f64::max);
        let min_rate = group.iter().map(|o| o.rate_8h).fold(f64::INFINITY, f64::min);

        let highs: Candidates = group.iter().copied().filter(|o| self.tolerance.approx_eq(o.rate_8h, max_rate)).collect();
        let lows: Candidates = group.iter().copied().filter(|o| self.tolerance.approx_eq(o.rate_8h, min_rate)).collect();

        let mut high = *highs.first()?;
        let mut low = *lows.first()?;

        if high.source == low.source {
            if let Some(alt) = lows.iter().find(|o| o.source != high.source) {
                low = alt;
            } else if let Some(alt) = highs.iter().find(|o| o.source != low.source) {
                high = alt;
            }
            // otherwise one source holds both extremes; report it as-is
        }

        let rate_diff = high.rate_8h - low.rate_8h;
        let leverage_used = high.leverage_or_default().min(low.leverage_or_default());

        Some(RankingRow {
            unified_symbol: symbol.to_string(),
            high_source: high.source,
            high_rate: high.rate_8h,
            low_source: low.source,
            low_rate: low.rate_8h,
            rate_diff,
            leverage_used,
            nominal_spread: rate_diff * leverage_used,
            details: group.iter().map(|o| (*o).clone()).collect(),
        })
    }
}

/// Rank with the default tolerance.
pub fn build_ranking(items: &[RateObservation]) -> Vec<RankingRow> {
    RankingBuilder::default().build(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(source: Exchange, symbol: &str, rate: f64, lev: Option<f64>) -> RateObservation {
        RateObservation {
            source,
            raw_symbol: symbol.replace('-', ""),
            unified_symbol: symbol.to_string(),
            rate_8h: rate,
            raw_rate: rate,
            next_settlement_time: None,
            max_leverage: lev,
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn two_source_scenario() {
        let items = vec![
            obs(Exchange::Binance, "BTC-USDT-PERP", 0.0001, Some(125.0)),
            obs(Exchange::Okx, "BTC-USDT-PERP", 0.0004, Some(50.0)),
        ];
        let rows = build_ranking(&items);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.high_source, Exchange::Okx);
        assert_eq!(row.high_rate, 0.0004);
        assert_eq!(row.low_source, Exchange::Binance);
        assert_eq!(row.low_rate, 0.0001);
        assert!(close(row.rate_diff, 0.0003));
        assert_eq!(row.leverage_used, 50.0);
        assert!(close(row.nominal_spread, 0.015));
        assert_eq!(row.details.len(), 2);
    }

    #[test]
    fn single_source_symbols_are_dropped() {
        let items = vec![
            obs(Exchange::Binance, "ETH-USDT-PERP", 0.0001, None),
            obs(Exchange::Okx, "ETH-USDT-PERP", 0.0002, None),
            obs(Exchange::Gate, "SOLO-USDT-PERP", 0.05, None),
            // two quotes, same source: still one source
            obs(Exchange::Bybit, "DUO-USDT-PERP", 0.01, None),
            obs(Exchange::Bybit, "DUO-USDT-PERP", -0.01, None),
        ];
        let rows = build_ranking(&items);
        let symbols: Vec<&str> = rows.iter().map(|r| r.unified_symbol.as_str()).collect();
        assert_eq!(symbols, vec!["ETH-USDT-PERP"]);
    }

    #[test]
    fn tied_high_prefers_a_different_source() {
        // A and B tie at the top; picking A/A would be impossible here, but make
        // sure the tied set is used when the low side collides.
        let items = vec![
            obs(Exchange::Binance, "X-USDT-PERP", 0.01, None),
            obs(Exchange::Bybit, "X-USDT-PERP", 0.01, None),
            obs(Exchange::Gate, "X-USDT-PERP", -0.02, None),
        ];
        let row = &build_ranking(&items)[0];
        assert_ne!(row.high_source, row.low_source);
        assert_eq!(row.high_source, Exchange::Binance);
        assert_eq!(row.low_source, Exchange::Gate);
    }

    #[test]
    fn flat_group_uses_alternate_low() {
        let items = vec![
            obs(Exchange::Binance, "F-USDT-PERP", 0.0003, None),
            obs(Exchange::Okx, "F-USDT-PERP", 0.0003, None),
        ];
        let row = &build_ranking(&items)[0];
        assert_eq!(row.high_source, Exchange::Binance);
        assert_eq!(row.low_source, Exchange::Okx);
        assert_eq!(row.rate_diff, 0.0);
    }

    #[test]
    fn alternate_high_when_low_has_no_alternative() {
        // Gate is first at the top and sole holder of the bottom, so the high side moves
        let items = vec![
            obs(Exchange::Gate, "Y-USDT-PERP", 0.02, None),
            obs(Exchange::Okx, "Y-USDT-PERP", 0.02, None),
            obs(Exchange::Gate, "Y-USDT-PERP", -0.01, None),
        ];
        let row = &build_ranking(&items)[0];
        assert_eq!(row.high_source, Exchange::Okx);
        assert_eq!(row.low_source, Exchange::Gate);
    }

    #[test]
    fn same_source_pair_kept_when_unavoidable() {
        let items = vec![
            obs(Exchange::Gate, "Z-USDT-PERP", 0.03, None),
            obs(Exchange::Gate, "Z-USDT-PERP", -0.03, None),
            obs(Exchange::Okx, "Z-USDT-PERP", 0.0, None),
        ];
        let row = &build_ranking(&items)[0];
        assert_eq!(row.high_source, Exchange::Gate);
        assert_eq!(row.low_source, Exchange::Gate);
        assert!(close(row.rate_diff, 0.06));
    }

    #[test]
    fn rounding_noise_counts_as_a_tie() {
        let noisy = 0.1 + 0.2; // 0.30000000000000004
        let items = vec![
            obs(Exchange::Binance, "N-USDT-PERP", 0.3, None),
            obs(Exchange::Okx, "N-USDT-PERP", noisy, None),
        ];
        let row = &build_ranking(&items)[0];
        // without tolerance the high/low sets would be singletons split by noise
        assert_ne!(row.high_source, row.low_source);
        assert!(row.rate_diff.abs() < 1e-15);
    }

    #[test]
    fn missing_leverage_uses_source_default() {
        let items = vec![
            obs(Exchange::Binance, "L-USDT-PERP", 0.001, None),
            obs(Exchange::Lighter, "L-USDT-PERP", -0.001, Some(0.0)),
        ];
        let row = &build_ranking(&items)[0];
        // Binance defaults to 125x, Lighter's zero is treated as unknown (50x)
        assert_eq!(row.leverage_used, 50.0);
        assert!(close(row.nominal_spread, 0.1));
    }

    #[test]
    fn sorted_by_absolute_spread_with_stable_ties() {
        let items = vec![
            obs(Exchange::Binance, "A-USDT-PERP", 0.001, None),
            obs(Exchange::Okx, "A-USDT-PERP", 0.002, None),
            obs(Exchange::Binance, "B-USDT-PERP", 0.0, None),
            obs(Exchange::Okx, "B-USDT-PERP", 0.005, None),
            obs(Exchange::Binance, "C-USDT-PERP", 0.003, None),
            obs(Exchange::Okx, "C-USDT-PERP", 0.002, None),
        ];
        let rows = build_ranking(&items);
        let order: Vec<&str> = rows.iter().map(|r| r.unified_symbol.as_str()).collect();
        // A and C both differ by 0.001; A was seen first
        assert_eq!(order, vec!["B-USDT-PERP", "A-USDT-PERP", "C-USDT-PERP"]);
    }

    #[test]
    fn non_finite_rates_are_ignored() {
        let items = vec![
            obs(Exchange::Binance, "Q-USDT-PERP", f64::NAN, None),
            obs(Exchange::Okx, "Q-USDT-PERP", 0.001, None),
        ];
        assert!(build_ranking(&items).is_empty());
    }
}
