// src/collector.rs
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::providers::{SourceAdapter, SourceError};
use crate::types::{Exchange, RateObservation};

/// What a source contributed to one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOutcome {
    Fresh,
    CachedAfterError,
    CachedAfterEmpty,
    Empty,
    Failed,
}

impl SourceOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceOutcome::Fresh => "fresh",
            SourceOutcome::CachedAfterError => "cached_after_error",
            SourceOutcome::CachedAfterEmpty => "cached_after_empty",
            SourceOutcome::Empty => "empty",
            SourceOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStatus {
    pub outcome: SourceOutcome,
    pub items: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub items: Vec<RateObservation>,
    pub status: BTreeMap<Exchange, SourceStatus>,
}

impl Collection {
    pub fn counts(&self) -> BTreeMap<Exchange, usize> {
        self.status.iter().map(|(ex, st)| (*ex, st.items)).collect()
    }
}

/// Polls every adapter concurrently and keeps the last non-empty result per
/// source so a flaky exchange does not drop out of the ranking.
pub struct Collector {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    source_timeout: Duration,
    last_good: RwLock<HashMap<Exchange, Arc<Vec<RateObservation>>>>,
}

impl Collector {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, source_timeout: Duration) -> Self {
        Self { adapters, source_timeout, last_good: RwLock::new(HashMap::new()) }
    }

    pub fn sources(&self) -> Vec<Exchange> {
        self.adapters.iter().map(|a| a.source()).collect()
    }

    pub async fn collect_all(&self) -> Collection {
        let futs = self.adapters.iter().map(|adapter| async move {
            let result = match tokio::time::timeout(self.source_timeout, adapter.fetch()).await {
                Ok(res) => res,
                Err(_) => Err(SourceError::Timeout),
            };
            (adapter.source(), result)
        });
        let results = join_all(futs).await;

        let mut out = Collection::default();
        for (source, result) in results {
            let (items, status) = self.settle(source, result);
            if let Some(items) = items {
                out.items.extend(items.iter().cloned());
            }

            #[cfg(feature = "metrics")]
            crate::metrics::record_source_outcome(source, status.outcome);

            out.status.insert(source, status);
        }

        let counts = out.counts();
        tracing::info!(total = out.items.len(), ?counts, "Collected funding items");
        out
    }

    fn settle(
        &self,
        source: Exchange,
        result: Result<Vec<RateObservation>, SourceError>,
    ) -> (Option<Arc<Vec<RateObservation>>>, SourceStatus) {
        let status = |outcome, items, error| SourceStatus { outcome, items, error };
        match result {
            Ok(items) if !items.is_empty() => {
                let items = Arc::new(items);
                self.last_good.write().insert(source, Arc::clone(&items));
                let n = items.len();
                (Some(items), status(SourceOutcome::Fresh, n, None))
            }
            Ok(_) => match self.cached(source) {
                Some(cached) => {
                    tracing::info!("No fresh items for {source}; using {} cached items", cached.len());
                    let n = cached.len();
                    (Some(cached), status(SourceOutcome::CachedAfterEmpty, n, None))
                }
                None => {
                    tracing::warn!("No items for {source} and no cache available");
                    (None, status(SourceOutcome::Empty, 0, None))
                }
            },
            Err(err) => {
                tracing::warn!("Error while collecting funding for {source}: {err}");
                let error = Some(err.to_string());
                match self.cached(source) {
                    Some(cached) => {
                        tracing::info!("Using {} cached items for {source} due to error", cached.len());
                        let n = cached.len();
                        (Some(cached), status(SourceOutcome::CachedAfterError, n, error))
                    }
                    None => (None, status(SourceOutcome::Failed, 0, error)),
                }
            }
        }
    }

    fn cached(&self, source: Exchange) -> Option<Arc<Vec<RateObservation>>> {
        self.last_good.read().get(&source).filter(|items| !items.is_empty()).cloned()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Plays back a fixed script of results, repeating the last one.
    pub(crate) struct ScriptedAdapter {
        pub source: Exchange,
        pub delay: Duration,
        script: Mutex<VecDeque<Result<Vec<RateObservation>, SourceError>>>,
    }

    impl ScriptedAdapter {
        pub(crate) fn new(source: Exchange, script: Vec<Result<Vec<RateObservation>, SourceError>>) -> Self {
            Self { source, delay: Duration::ZERO, script: Mutex::new(script.into()) }
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl SourceAdapter for ScriptedAdapter {
        fn source(&self) -> Exchange {
            self.source
        }

        async fn fetch(&self) -> Result<Vec<RateObservation>, SourceError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut script = self.script.lock();
            if script.len() > 1 {
                script.pop_front().unwrap_or(Ok(Vec::new()))
            } else {
                script.front().cloned().unwrap_or(Ok(Vec::new()))
            }
        }
    }

    pub(crate) fn quotes(source: Exchange, n: usize, rate: f64) -> Vec<RateObservation> {
        (0..n)
            .map(|i| RateObservation {
                source,
                raw_symbol: format!("C{i}USDT"),
                unified_symbol: format!("C{i}-USDT-PERP"),
                rate_8h: rate,
                raw_rate: rate,
                next_settlement_time: None,
                max_leverage: None,
            })
            .collect()
    }

    fn collector(adapters: Vec<ScriptedAdapter>) -> Collector {
        let adapters = adapters.into_iter().map(|a| Arc::new(a) as Arc<dyn SourceAdapter>).collect();
        Collector::new(adapters, Duration::from_millis(200))
    }

    fn count_from(c: &Collection, source: Exchange) -> usize {
        c.items.iter().filter(|o| o.source == source).count()
    }

    #[tokio::test]
    async fn failed_source_falls_back_to_cached_items() {
        let c = collector(vec![
            ScriptedAdapter::new(Exchange::Binance, vec![Ok(quotes(Exchange::Binance, 3, 0.0001))]),
            ScriptedAdapter::new(
                Exchange::Okx,
                vec![Ok(quotes(Exchange::Okx, 10, 0.0002)), Err(SourceError::Status(503))],
            ),
        ]);

        let first = c.collect_all().await;
        assert_eq!(count_from(&first, Exchange::Okx), 10);
        assert_eq!(first.status[&Exchange::Okx].outcome, SourceOutcome::Fresh);

        let second = c.collect_all().await;
        assert_eq!(count_from(&second, Exchange::Okx), 10);
        assert_eq!(count_from(&second, Exchange::Binance), 3);
        let okx = &second.status[&Exchange::Okx];
        assert_eq!(okx.outcome, SourceOutcome::CachedAfterError);
        assert_eq!(okx.items, 10);
        assert_eq!(okx.error.as_deref(), Some("http status 503"));
    }

    #[tokio::test]
    async fn empty_result_is_treated_like_failure() {
        let c = collector(vec![ScriptedAdapter::new(
            Exchange::Gate,
            vec![Ok(quotes(Exchange::Gate, 4, 0.0)), Ok(Vec::new())],
        )]);
        c.collect_all().await;
        let second = c.collect_all().await;
        assert_eq!(second.items.len(), 4);
        assert_eq!(second.status[&Exchange::Gate].outcome, SourceOutcome::CachedAfterEmpty);
    }

    #[tokio::test]
    async fn no_cache_means_nothing_from_that_source() {
        let c = collector(vec![
            ScriptedAdapter::new(Exchange::Bybit, vec![Err(SourceError::Transport("reset".into()))]),
            ScriptedAdapter::new(Exchange::Bitget, vec![Ok(Vec::new())]),
        ]);
        let out = c.collect_all().await;
        assert!(out.items.is_empty());
        assert_eq!(out.status[&Exchange::Bybit].outcome, SourceOutcome::Failed);
        assert_eq!(out.status[&Exchange::Bitget].outcome, SourceOutcome::Empty);
    }

    #[tokio::test]
    async fn slow_source_does_not_block_the_others() {
        let c = collector(vec![
            ScriptedAdapter::new(Exchange::Grvt, vec![Ok(quotes(Exchange::Grvt, 2, 0.0))])
                .with_delay(Duration::from_secs(5)),
            ScriptedAdapter::new(Exchange::Binance, vec![Ok(quotes(Exchange::Binance, 2, 0.0))]),
        ]);
        let started = std::time::Instant::now();
        let out = c.collect_all().await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(count_from(&out, Exchange::Binance), 2);
        let grvt = &out.status[&Exchange::Grvt];
        assert_eq!(grvt.outcome, SourceOutcome::Failed);
        assert_eq!(grvt.error.as_deref(), Some("request timed out"));
    }

    #[tokio::test]
    async fn fresh_result_replaces_cache() {
        let c = collector(vec![ScriptedAdapter::new(
            Exchange::Lighter,
            vec![
                Ok(quotes(Exchange::Lighter, 5, 0.0)),
                Ok(quotes(Exchange::Lighter, 2, 0.0)),
                Err(SourceError::Timeout),
            ],
        )]);
        c.collect_all().await;
        c.collect_all().await;
        let third = c.collect_all().await;
        assert_eq!(third.items.len(), 2);
    }
}
