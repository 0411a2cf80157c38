// src/providers/symbols.rs
//! Exchange-native instrument ids → `BASE-QUOTE-PERP`.
//!
//! Every function here is pure; `None` means the instrument is not a USDT
//! perpetual we compare.

const USDT: &str = "USDT";

fn usdt_perp(base: &str) -> Option<String> {
    let base = base.trim();
    if base.is_empty() {
        return None;
    }
    Some(format!("{}-USDT-PERP", base.to_ascii_uppercase()))
}

/// `BTCUSDT` (Binance, Bybit).
pub fn concat_usdt_to_unified(symbol: &str) -> Option<String> {
    usdt_perp(symbol.strip_suffix(USDT)?)
}

/// `BTC_USDT` (Gate futures contract).
pub fn gate_to_unified(contract: &str) -> Option<String> {
    let (base, quote) = contract.split_once('_')?;
    if quote.is_empty() {
        return None;
    }
    usdt_perp(base)
}

/// `BTCUSDT_UMCBL` (Bitget USDT-M mix).
pub fn bitget_to_unified(symbol: &str) -> Option<String> {
    concat_usdt_to_unified(symbol.strip_suffix("_UMCBL")?)
}

/// `BTC-USDT-SWAP` (OKX).
pub fn okx_to_unified(inst_id: &str) -> Option<String> {
    let pair = inst_id.strip_suffix("-SWAP")?;
    let (base, quote) = pair.split_once('-')?;
    if base.is_empty() || quote.is_empty() {
        return None;
    }
    Some(format!("{}-{}-PERP", base.to_ascii_uppercase(), quote.to_ascii_uppercase()))
}

/// `BTC_USDT_Perp` (GRVT).
pub fn grvt_to_unified(instrument: &str) -> Option<String> {
    let mut parts = instrument.split('_');
    let (base, quote, kind) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || base.is_empty() || quote.is_empty() {
        return None;
    }
    if !kind.eq_ignore_ascii_case("perp") {
        return None;
    }
    Some(format!("{}-{}-PERP", base.to_ascii_uppercase(), quote.to_ascii_uppercase()))
}

/// Lighter quotes bare bases (`BTC`) against USDT; already-unified ids pass through.
pub fn lighter_to_unified(symbol: &str) -> Option<String> {
    let symbol = symbol.trim();
    if symbol.ends_with("-PERP") {
        return Some(symbol.to_ascii_uppercase());
    }
    if !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    usdt_perp(symbol)
}
