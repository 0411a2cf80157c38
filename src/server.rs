// src/server.rs
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::cache::{RankingCache, RankingView};
use crate::pipeline::Pipeline;
use crate::types::HistoryRecord;

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub symbol: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub symbol: String,
    pub history: Vec<HistoryRecord>,
}

/// Read-only API over the ranking cache, plus the static frontend when
/// `static_dir` is set.
pub fn router<P: Pipeline>(cache: Arc<RankingCache<P>>, static_dir: Option<&Path>) -> Router {
    let mut app = Router::new()
        .route("/api/funding/ranking", get(ranking::<P>))
        .route("/api/funding/history", get(history::<P>))
        .route("/health", get(health::<P>));

    #[cfg(feature = "metrics")]
    {
        app = app.route("/metrics", get(|| async { crate::metrics::gather() }));
    }

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
    }

    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive()),
    )
    .with_state(cache)
}

async fn ranking<P: Pipeline>(State(cache): State<Arc<RankingCache<P>>>) -> Json<RankingView> {
    Json(cache.get_ranking().await)
}

async fn history<P: Pipeline>(
    State(cache): State<Arc<RankingCache<P>>>,
    Query(params): Query<HistoryParams>,
) -> Json<HistoryResponse> {
    let history = cache.history(&params.symbol);
    Json(HistoryResponse { symbol: params.symbol, history })
}

async fn health<P: Pipeline>(State(cache): State<Arc<RankingCache<P>>>) -> Json<serde_json::Value> {
    let snap = cache.snapshot();
    Json(serde_json::json!({
        "status": "ok",
        "updated_at": snap.generated_at,
        "cache_age_s": snap.age().map(|a| a.as_secs_f64()),
        "refresh_in_progress": cache.refresh_in_progress(),
        "last_error": snap.last_error,
    }))
}
