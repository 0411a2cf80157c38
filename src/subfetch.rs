// src/subfetch.rs
//! One-request-per-instrument fetching under a concurrency ceiling, with
//! per-request exponential backoff and a hard wall-clock budget.

use backon::{ExponentialBuilder, Retryable};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::future::Future;
use tokio::time::Instant;

use crate::config::SubFetchConfig;
use crate::providers::{FetchErrorKind, SourceError};

/// What a bounded fan-out produced. Failures are only counted.
#[derive(Debug)]
pub struct SubFetchReport<T> {
    pub items: Vec<T>,
    pub errors: BTreeMap<FetchErrorKind, usize>,
}

impl<T> Default for SubFetchReport<T> {
    fn default() -> Self {
        Self { items: Vec::new(), errors: BTreeMap::new() }
    }
}

impl<T> SubFetchReport<T> {
    pub fn error_total(&self) -> usize {
        self.errors.values().sum()
    }

    fn count(&mut self, kind: FetchErrorKind, n: usize) {
        if n > 0 {
            *self.errors.entry(kind).or_default() += n;
        }
    }
}

#[derive(Debug, Clone)]
pub struct BoundedFetcher {
    cfg: SubFetchConfig,
}

impl BoundedFetcher {
    pub fn new(cfg: SubFetchConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &SubFetchConfig {
        &self.cfg
    }

    /// Deadline for a fetch that starts now. Adapters take this before their
    /// discovery request so the budget covers the whole source fetch.
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.cfg.budget()
    }

    /// `fetch_all_until` with a budget starting now.
    pub async fn fetch_all<K, T, F, Fut>(&self, keys: Vec<K>, fetch_one: F) -> SubFetchReport<T>
    where
        K: Clone + Send + Sync,
        T: Send,
        F: Fn(K) -> Fut + Sync,
        Fut: Future<Output = Result<Option<T>, SourceError>> + Send,
    {
        self.fetch_all_until(self.deadline(), keys, fetch_one).await
    }

    /// Run `fetch_one` for every key. `Ok(None)` means "nothing to report for
    /// this key" and is neither an item nor an error.
    ///
    /// Returns once every key settled or `deadline` passed, whichever is
    /// first; keys still outstanding at the deadline are dropped (cancelling
    /// their request) and counted as `budget_timeout`.
    pub async fn fetch_all_until<K, T, F, Fut>(
        &self,
        deadline: Instant,
        keys: Vec<K>,
        fetch_one: F,
    ) -> SubFetchReport<T>
    where
        K: Clone + Send + Sync,
        T: Send,
        F: Fn(K) -> Fut + Sync,
        Fut: Future<Output = Result<Option<T>, SourceError>> + Send,
    {
        let total = keys.len();
        let mut report = SubFetchReport::default();
        if total == 0 {
            return report;
        }

        let fetch_one = &fetch_one;
        let mut pending = stream::iter(keys)
            .map(|key| self.fetch_with_retry(key, fetch_one))
            .buffer_unordered(self.cfg.concurrency.max(1));

        let deadline = tokio::time::sleep_until(deadline);
        tokio::pin!(deadline);

        let mut settled = 0usize;
        loop {
            tokio::select! {
                biased;
                next = pending.next() => match next {
                    Some(Ok(Some(item))) => {
                        settled += 1;
                        report.items.push(item);
                    }
                    Some(Ok(None)) => settled += 1,
                    Some(Err(err)) => {
                        settled += 1;
                        report.count(err.kind(), 1);
                    }
                    None => break,
                },
                _ = &mut deadline => {
                    let cancelled = total - settled;
                    report.count(FetchErrorKind::BudgetTimeout, cancelled);
                    tracing::warn!(
                        cancelled,
                        total,
                        budget_ms = self.cfg.budget_ms,
                        "sub-fetch budget exhausted; dropping outstanding requests"
                    );
                    break;
                }
            }
        }
        drop(pending);

        if report.error_total() > 0 {
            tracing::debug!(ok = report.items.len(), errors = ?report.errors, "sub-fetch finished with errors");
        }
        report
    }

    async fn fetch_with_retry<K, T, F, Fut>(&self, key: K, fetch_one: &F) -> Result<Option<T>, SourceError>
    where
        K: Clone,
        F: Fn(K) -> Fut,
        Fut: Future<Output = Result<Option<T>, SourceError>>,
    {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.cfg.backoff_base())
            .with_factor(2.0)
            .with_max_times(self.cfg.retries);

        (|| fetch_one(key.clone()))
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .when(|err: &SourceError| err.is_transient())
            .notify(|err: &SourceError, wait| tracing::trace!("sub-request failed ({err}); retrying in {wait:?}"))
            .await
    }
}
