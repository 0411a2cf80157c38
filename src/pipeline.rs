// src/pipeline.rs
use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::collector::{Collector, SourceStatus};
use crate::ranking::RankingBuilder;
use crate::types::{Exchange, RankingRow};

/// Result of one collect + rank pass.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    pub rows: Vec<RankingRow>,
    pub item_total: usize,
    pub exchange_item_counts: BTreeMap<Exchange, usize>,
    pub fetch_status: BTreeMap<Exchange, SourceStatus>,
}

/// The unit of work a `RankingCache` runs under its refresh lock.
#[async_trait]
pub trait Pipeline: Send + Sync + 'static {
    async fn run(&self) -> anyhow::Result<PipelineOutput>;
}

pub struct FundingPipeline {
    pub collector: Collector,
    pub ranking: RankingBuilder,
}

impl FundingPipeline {
    pub fn new(collector: Collector, ranking: RankingBuilder) -> Self {
        Self { collector, ranking }
    }
}

#[async_trait]
impl Pipeline for FundingPipeline {
    async fn run(&self) -> anyhow::Result<PipelineOutput> {
        let collection = self.collector.collect_all().await;
        let rows = self.ranking.build(&collection.items);
        Ok(PipelineOutput {
            item_total: collection.items.len(),
            exchange_item_counts: collection.counts(),
            fetch_status: collection.status,
            rows,
        })
    }
}
