// tests/http_api.rs
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use fundwatch::cache::RankingCache;
use fundwatch::config::CacheConfig;
use fundwatch::pipeline::{Pipeline, PipelineOutput};
use fundwatch::ranking::build_ranking;
use fundwatch::types::{Exchange, RateObservation};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

struct FixedPipeline;

fn obs(source: Exchange, rate: f64, lev: f64) -> RateObservation {
    RateObservation {
        source,
        raw_symbol: "BTCUSDT".into(),
        unified_symbol: "BTC-USDT-PERP".into(),
        rate_8h: rate,
        raw_rate: rate,
        next_settlement_time: None,
        max_leverage: Some(lev),
    }
}

#[async_trait]
impl Pipeline for FixedPipeline {
    async fn run(&self) -> anyhow::Result<PipelineOutput> {
        let items = vec![obs(Exchange::Binance, 0.0001, 125.0), obs(Exchange::Okx, 0.0004, 50.0)];
        Ok(PipelineOutput { item_total: items.len(), rows: build_ranking(&items), ..Default::default() })
    }
}

fn app() -> axum::Router {
    let cfg = CacheConfig { refresh_interval_secs: 30, refresh_timeout_ms: 1_000, history_limit: 200 };
    let cache = Arc::new(RankingCache::new(FixedPipeline, &cfg));
    fundwatch::server::router(cache, None)
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let resp = app.oneshot(Request::get(uri).body(Body::empty()).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn ranking_endpoint_returns_rows_and_meta() {
    let (status, body) = get_json(app(), "/api/funding/ranking").await;
    assert_eq!(status, StatusCode::OK);

    let row = &body["rows"][0];
    assert_eq!(row["unified_symbol"], "BTC-USDT-PERP");
    assert_eq!(row["high_source"], "OKX");
    assert_eq!(row["low_source"], "BINANCE");
    assert_eq!(row["leverage_used"], 50.0);
    assert_eq!(row["details"].as_array().map(Vec::len), Some(2));

    assert_eq!(body["meta"]["row_total"], 1);
    assert_eq!(body["meta"]["item_total"], 2);
    assert_eq!(body["meta"]["refresh_in_progress"], false);
    assert!(body["meta"]["last_error"].is_null());
    assert!(body["updated_at"].is_string());
}

#[tokio::test]
async fn history_follows_ranking_refreshes() {
    let app = app();
    let (_, empty) = get_json(app.clone(), "/api/funding/history?symbol=BTC-USDT-PERP").await;
    assert_eq!(empty["symbol"], "BTC-USDT-PERP");
    assert_eq!(empty["history"].as_array().map(Vec::len), Some(0));

    get_json(app.clone(), "/api/funding/ranking").await;
    let (status, body) = get_json(app, "/api/funding/history?symbol=BTC-USDT-PERP").await;
    assert_eq!(status, StatusCode::OK);
    let history = body["history"].as_array().cloned().unwrap_or_default();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["high_source"], "OKX");
    assert!(history[0]["timestamp"].is_string());
}

#[tokio::test]
async fn history_requires_symbol() {
    let (status, _) = get_json(app(), "/api/funding/history").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reports_cold_cache() {
    let (status, body) = get_json(app(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["updated_at"].is_null());
}

#[tokio::test]
async fn ranking_is_gzipped_when_client_accepts_it() {
    let req = Request::get("/api/funding/ranking")
        .header(header::ACCEPT_ENCODING, "gzip")
        .body(Body::empty())
        .unwrap();
    let resp = app().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_ENCODING], "gzip");

    let (_, plain) = get_json(app(), "/api/funding/ranking").await;
    assert_eq!(plain["meta"]["row_total"], 1);
}
