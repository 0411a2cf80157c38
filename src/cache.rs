// src/cache.rs
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::collector::SourceStatus;
use crate::config::CacheConfig;
use crate::pipeline::{Pipeline, PipelineOutput};
use crate::types::{Exchange, HistoryRecord, RankingRow};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RefreshError {
    #[error("refresh_timeout_{}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("refresh_failed: {0}")]
    Failure(String),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SnapshotMeta {
    pub item_total: usize,
    pub exchange_item_counts: BTreeMap<Exchange, usize>,
    pub row_total: usize,
    pub refresh_ms: Option<u64>,
    pub fetch_status: BTreeMap<Exchange, SourceStatus>,
}

/// Immutable once published; replaced wholesale by each refresh.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    pub generated_at: Option<DateTime<Utc>>,
    generated_mono: Option<Instant>,
    pub rows: Arc<Vec<RankingRow>>,
    pub meta: SnapshotMeta,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl CacheSnapshot {
    pub fn age(&self) -> Option<Duration> {
        self.generated_mono.map(|t| t.elapsed())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewMeta {
    #[serde(flatten)]
    pub snapshot: SnapshotMeta,
    pub cache_age_s: Option<f64>,
    pub refresh_in_progress: bool,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

/// What readers get back from `get_ranking`.
#[derive(Debug, Clone, Serialize)]
pub struct RankingView {
    pub updated_at: Option<DateTime<Utc>>,
    pub rows: Arc<Vec<RankingRow>>,
    pub meta: ViewMeta,
}

struct InProgress<'a>(&'a AtomicBool);

impl<'a> InProgress<'a> {
    fn mark(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// TTL-bounded ranking cache with single-flight refresh and per-symbol history.
///
/// Readers never wait on a refresh another caller started; they get the
/// current snapshot. A refresh that times out or fails keeps the previous rows
/// and records the error on the snapshot instead.
pub struct RankingCache<P: Pipeline> {
    pipeline: P,
    refresh_interval: Duration,
    refresh_timeout: Duration,
    history_limit: usize,
    snapshot: RwLock<Arc<CacheSnapshot>>,
    history: Mutex<HashMap<String, VecDeque<HistoryRecord>>>,
    refresh_lock: tokio::sync::Mutex<()>,
    refreshing: AtomicBool,
}

impl<P: Pipeline> RankingCache<P> {
    pub fn new(pipeline: P, cfg: &CacheConfig) -> Self {
        Self {
            pipeline,
            refresh_interval: cfg.refresh_interval(),
            refresh_timeout: cfg.refresh_timeout(),
            history_limit: cfg.history_limit.max(1),
            snapshot: RwLock::new(Arc::new(CacheSnapshot::default())),
            history: Mutex::new(HashMap::new()),
            refresh_lock: tokio::sync::Mutex::new(()),
            refreshing: AtomicBool::new(false),
        }
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn refresh_in_progress(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    fn is_fresh(&self, snap: &CacheSnapshot) -> bool {
        snap.age().is_some_and(|age| age < self.refresh_interval)
    }

    pub async fn get_ranking(&self) -> RankingView {
        let snap = self.snapshot();
        if self.is_fresh(&snap) {
            return self.view(&snap);
        }
        self.refresh_single_flight(true).await
    }

    /// Refresh regardless of snapshot age. Still single-flight: if another
    /// refresh is running this returns the current snapshot.
    pub async fn refresh_now(&self) -> RankingView {
        self.refresh_single_flight(false).await
    }

    async fn refresh_single_flight(&self, skip_if_fresh: bool) -> RankingView {
        let Ok(_guard) = self.refresh_lock.try_lock() else {
            tracing::debug!("refresh already running; serving current snapshot");
            return self.view(&self.snapshot());
        };

        // someone may have finished a refresh between our check and the lock
        let snap = self.snapshot();
        if skip_if_fresh && self.is_fresh(&snap) {
            return self.view(&snap);
        }

        let _in_progress = InProgress::mark(&self.refreshing);
        let next = self.refresh_locked(&snap).await;
        *self.snapshot.write() = Arc::clone(&next);
        drop(_in_progress);
        self.view(&next)
    }

    async fn refresh_locked(&self, prev: &CacheSnapshot) -> Arc<CacheSnapshot> {
        let started = Instant::now();
        let run = AssertUnwindSafe(self.pipeline.run()).catch_unwind();
        let result = match tokio::time::timeout(self.refresh_timeout, run).await {
            Err(_) => Err(RefreshError::Timeout(self.refresh_timeout)),
            Ok(Err(panic)) => Err(RefreshError::Failure(panic_message(panic.as_ref()))),
            Ok(Ok(Err(err))) => Err(RefreshError::Failure(format!("{err:#}"))),
            Ok(Ok(Ok(out))) => Ok(out),
        };
        let elapsed = started.elapsed();

        #[cfg(feature = "metrics")]
        crate::metrics::observe_refresh(if result.is_ok() { "ok" } else { "error" }, elapsed);

        match result {
            Ok(out) => Arc::new(self.publish(out, elapsed)),
            Err(err) => {
                match &err {
                    RefreshError::Timeout(_) => {
                        tracing::warn!("Ranking refresh timed out after {:.1}s; serving stale data", elapsed.as_secs_f64())
                    }
                    RefreshError::Failure(msg) => tracing::warn!("Ranking refresh failed: {msg}"),
                }
                let mut stale = prev.clone();
                stale.last_error = Some(err.to_string());
                stale.last_error_at = Some(Utc::now());
                Arc::new(stale)
            }
        }
    }

    fn publish(&self, out: PipelineOutput, elapsed: Duration) -> CacheSnapshot {
        let now = Utc::now();
        self.append_history(&out.rows, now);

        tracing::info!(
            "Refreshed ranking: {} rows from {} items in {} ms",
            out.rows.len(),
            out.item_total,
            elapsed.as_millis()
        );
        CacheSnapshot {
            generated_at: Some(now),
            generated_mono: Some(Instant::now()),
            meta: SnapshotMeta {
                item_total: out.item_total,
                exchange_item_counts: out.exchange_item_counts,
                row_total: out.rows.len(),
                refresh_ms: Some(elapsed.as_millis() as u64),
                fetch_status: out.fetch_status,
            },
            rows: Arc::new(out.rows),
            last_error: None,
            last_error_at: None,
        }
    }

    fn append_history(&self, rows: &[RankingRow], ts: DateTime<Utc>) {
        let mut history = self.history.lock();
        for row in rows {
            let ring = history.entry(row.unified_symbol.clone()).or_default();
            ring.push_back(HistoryRecord::from_row(row, ts));
            while ring.len() > self.history_limit {
                ring.pop_front();
            }
        }
    }

    /// Oldest first; empty for symbols that were never ranked.
    pub fn history(&self, symbol: &str) -> Vec<HistoryRecord> {
        self.history.lock().get(symbol).map(|ring| ring.iter().cloned().collect()).unwrap_or_default()
    }

    fn view(&self, snap: &CacheSnapshot) -> RankingView {
        RankingView {
            updated_at: snap.generated_at,
            rows: Arc::clone(&snap.rows),
            meta: ViewMeta {
                snapshot: snap.meta.clone(),
                cache_age_s: snap.age().map(|a| a.as_secs_f64()),
                refresh_in_progress: self.refresh_in_progress(),
                last_error: snap.last_error.clone(),
                last_error_at: snap.last_error_at,
            },
        }
    }

    /// Keep the cache warm so readers rarely pay for a refresh. Each tick
    /// forces a refresh; the freshness check would otherwise skip every
    /// other tick when the period equals the refresh interval.
    pub fn spawn_refresher(self: &Arc<Self>, period: Duration) -> Option<JoinHandle<()>> {
        if period.is_zero() {
            tracing::info!("background refresher disabled");
            return None;
        }
        let cache = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let view = cache.refresh_now().await;
                tracing::debug!(rows = view.rows.len(), "background refresh tick");
            }
        }))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_string()
    }
}
