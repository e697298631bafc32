//! In-process click aggregate storage.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::entities::ClickAggregate;
use crate::domain::repositories::ClickAggregateRepository;
use crate::error::AppError;

/// Aggregates keyed by `(link_id, bucket_start_ms)`.
#[derive(Default)]
pub struct MemoryClickAggregateRepository {
    aggregates: DashMap<(i64, i64), ClickAggregate>,
}

impl MemoryClickAggregateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClickAggregateRepository for MemoryClickAggregateRepository {
    async fn merge(&self, aggregate: &ClickAggregate) -> Result<(), AppError> {
        self.aggregates
            .entry((aggregate.link_id, aggregate.bucket_start_ms))
            .or_insert_with(|| ClickAggregate::new(aggregate.link_id, aggregate.bucket_start_ms))
            .merge(aggregate);
        Ok(())
    }

    async fn get(
        &self,
        link_id: i64,
        bucket_start_ms: i64,
    ) -> Result<Option<ClickAggregate>, AppError> {
        Ok(self
            .aggregates
            .get(&(link_id, bucket_start_ms))
            .map(|e| e.value().clone()))
    }
}
