//! PostgreSQL implementation of the click aggregate repository.

use async_trait::async_trait;
use serde_json::json;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;

use crate::domain::entities::{ClickAggregate, CountKey, DeviceClass};
use crate::domain::repositories::ClickAggregateRepository;
use crate::error::AppError;

#[derive(FromRow)]
struct CounterRow {
    region_code: String,
    device_class: String,
    count: i64,
}

/// Stores one row per counter; the primary key starts with
/// `(link_id, bucket_start_ms)` so a bucket is a single index range.
pub struct PgClickAggregateRepository {
    pool: Arc<PgPool>,
}

impl PgClickAggregateRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClickAggregateRepository for PgClickAggregateRepository {
    async fn merge(&self, aggregate: &ClickAggregate) -> Result<(), AppError> {
        if aggregate.is_empty() {
            return Ok(());
        }

        let mut regions = Vec::with_capacity(aggregate.counts.len());
        let mut devices = Vec::with_capacity(aggregate.counts.len());
        let mut counts = Vec::with_capacity(aggregate.counts.len());
        for (key, count) in &aggregate.counts {
            regions.push(key.region_code.clone());
            devices.push(key.device_class.as_str().to_string());
            counts.push(i64::try_from(*count).unwrap_or(i64::MAX));
        }

        sqlx::query(
            r#"
            INSERT INTO click_aggregates (link_id, bucket_start_ms, region_code, device_class, count)
            SELECT $1, $2, r, d, c
            FROM UNNEST($3::text[], $4::text[], $5::bigint[]) AS t(r, d, c)
            ON CONFLICT (link_id, bucket_start_ms, region_code, device_class)
            DO UPDATE SET count = click_aggregates.count + EXCLUDED.count
            "#,
        )
        .bind(aggregate.link_id)
        .bind(aggregate.bucket_start_ms)
        .bind(&regions)
        .bind(&devices)
        .bind(&counts)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn get(
        &self,
        link_id: i64,
        bucket_start_ms: i64,
    ) -> Result<Option<ClickAggregate>, AppError> {
        let rows = sqlx::query_as::<_, CounterRow>(
            r#"
            SELECT region_code, device_class, count
            FROM click_aggregates
            WHERE link_id = $1 AND bucket_start_ms = $2
            "#,
        )
        .bind(link_id)
        .bind(bucket_start_ms)
        .fetch_all(self.pool.as_ref())
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut aggregate = ClickAggregate::new(link_id, bucket_start_ms);
        for row in rows {
            let device = row.device_class.parse::<DeviceClass>().map_err(|reason| {
                AppError::internal("Corrupt click aggregate row", json!({ "reason": reason }))
            })?;
            aggregate
                .counts
                .insert(CountKey::new(&row.region_code, device), row.count.max(0) as u64);
        }

        Ok(Some(aggregate))
    }
}
