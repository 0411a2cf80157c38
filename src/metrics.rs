// src/metrics.rs
use once_cell::sync::Lazy;
use prometheus::{register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec, TextEncoder};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::collector::SourceOutcome;
use crate::providers::FetchErrorKind;
use crate::types::Exchange;

pub static SOURCE_FETCH_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "fundwatch_source_fetch_total", "Source collections by outcome", &["source", "outcome"] // fresh|cached_after_error|...
    ).unwrap()
});

pub static SUBFETCH_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "fundwatch_subfetch_errors_total", "Per-instrument request failures", &["source", "kind"]
    ).unwrap()
});

pub static REFRESH_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "fundwatch_refresh_latency_seconds",
        "Ranking refresh latency",
        &["result"], // ok|error
        vec![0.25, 0.5, 1.0, 2.0, 4.0, 6.0, 9.0, 15.0]
    ).unwrap()
});

pub fn record_source_outcome(source: Exchange, outcome: SourceOutcome) {
    SOURCE_FETCH_TOTAL.with_label_values(&[source.as_str(), outcome.as_str()]).inc();
}

pub fn record_subfetch_errors(source: Exchange, errors: &BTreeMap<FetchErrorKind, usize>) {
    for (kind, n) in errors {
        SUBFETCH_ERRORS_TOTAL.with_label_values(&[source.as_str(), kind.as_str()]).inc_by(*n as u64);
    }
}

pub fn observe_refresh(result: &str, elapsed: Duration) {
    REFRESH_LATENCY.with_label_values(&[result]).observe(elapsed.as_secs_f64());
}

/// Prometheus text exposition of the default registry.
pub fn gather() -> String {
    let mut buf = Vec::new();
    if let Err(err) = TextEncoder::new().encode(&prometheus::gather(), &mut buf) {
        tracing::warn!("metrics encode failed: {err}");
    }
    String::from_utf8(buf).unwrap_or_default()
}
