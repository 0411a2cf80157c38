// src/report.rs
use std::fmt::Write as _;

use crate::types::RankingRow;

pub const HEADER: &str = "Symbol            Diff(8h)   Nominal@lev  Max(Exch)          Min(Exch)";

/// One fixed-width line per row, as printed by `funding_report`.
pub fn format_row(row: &RankingRow) -> String {
    let max_part = format!("{}({:.6})", row.high_source, row.high_rate);
    let min_part = format!("{}({:.6})", row.low_source, row.low_rate);
    format!(
        "{:<16} {:+.6} {:+.6} {:<18} {:<18}",
        row.unified_symbol, row.rate_diff, row.nominal_spread, max_part, min_part
    )
}

pub fn render_table(rows: &[RankingRow], top: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{HEADER}");
    let _ = writeln!(out, "{}", "-".repeat(80));
    for row in rows.iter().take(top) {
        let _ = writeln!(out, "{}", format_row(row).trim_end());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Exchange;

    fn row(symbol: &str, diff: f64) -> RankingRow {
        RankingRow {
            unified_symbol: symbol.into(),
            high_source: Exchange::Okx,
            high_rate: 0.0004,
            low_source: Exchange::Binance,
            low_rate: 0.0001,
            rate_diff: diff,
            leverage_used: 50.0,
            nominal_spread: diff * 50.0,
            details: vec![],
        }
    }

    #[test]
    fn row_layout() {
        let line = format_row(&row("BTC-USDT-PERP", 0.0003));
        assert_eq!(
            line,
            "BTC-USDT-PERP    +0.000300 +0.015000 OKX(0.000400)      BINANCE(0.000100) "
        );
    }

    #[test]
    fn table_is_truncated_to_top() {
        let rows: Vec<RankingRow> = (0..30).map(|i| row(&format!("C{i}-USDT-PERP"), 0.001)).collect();
        let table = render_table(&rows, 20);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 22);
        assert_eq!(lines[0], HEADER);
        assert!(lines[2].starts_with("C0-USDT-PERP"));
    }
}
