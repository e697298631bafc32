//! PostgreSQL implementation of evaluation record and checkpoint repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;

use crate::domain::entities::{Checkpoint, EvaluationJob, EvaluationRecord, Verdict, WorkflowState};
use crate::domain::repositories::{CheckpointRepository, EvaluationRepository};
use crate::error::AppError;

#[derive(FromRow)]
struct EvaluationRow {
    destination_url: String,
    link_id: i64,
    verdict: String,
    quality_score: i16,
    last_checked_at: DateTime<Utc>,
    failure_streak: i32,
}

impl TryFrom<EvaluationRow> for EvaluationRecord {
    type Error = AppError;

    fn try_from(row: EvaluationRow) -> Result<Self, Self::Error> {
        let verdict = row.verdict.parse::<Verdict>().map_err(|reason| {
            AppError::internal(
                "Corrupt evaluation row",
                json!({ "destination_url": row.destination_url, "reason": reason }),
            )
        })?;

        Ok(EvaluationRecord {
            destination_url: row.destination_url,
            link_id: row.link_id,
            verdict,
            quality_score: row.quality_score.clamp(0, 100) as u8,
            last_checked_at: row.last_checked_at,
            failure_streak: row.failure_streak.max(0) as u32,
        })
    }
}

/// PostgreSQL repository for evaluation records.
pub struct PgEvaluationRepository {
    pool: Arc<PgPool>,
}

impl PgEvaluationRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EvaluationRepository for PgEvaluationRepository {
    async fn get(&self, destination_url: &str) -> Result<Option<EvaluationRecord>, AppError> {
        let row = sqlx::query_as::<_, EvaluationRow>(
            r#"
            SELECT destination_url, link_id, verdict, quality_score, last_checked_at, failure_streak
            FROM evaluation_records
            WHERE destination_url = $1
            "#,
        )
        .bind(destination_url)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(EvaluationRecord::try_from).transpose()
    }

    async fn upsert(&self, record: EvaluationRecord) -> Result<EvaluationRecord, AppError> {
        let written = sqlx::query_as::<_, EvaluationRow>(
            r#"
            INSERT INTO evaluation_records
                (destination_url, link_id, verdict, quality_score, last_checked_at, failure_streak)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (destination_url) DO UPDATE
            SET link_id = EXCLUDED.link_id,
                verdict = EXCLUDED.verdict,
                quality_score = EXCLUDED.quality_score,
                last_checked_at = EXCLUDED.last_checked_at,
                failure_streak = EXCLUDED.failure_streak
            WHERE evaluation_records.last_checked_at <= EXCLUDED.last_checked_at
            RETURNING destination_url, link_id, verdict, quality_score, last_checked_at, failure_streak
            "#,
        )
        .bind(&record.destination_url)
        .bind(record.link_id)
        .bind(record.verdict.as_str())
        .bind(i16::from(record.quality_score))
        .bind(record.last_checked_at)
        .bind(i32::try_from(record.failure_streak).unwrap_or(i32::MAX))
        .fetch_optional(self.pool.as_ref())
        .await?;

        match written {
            Some(row) => EvaluationRecord::try_from(row),
            // Older write lost against a newer record; report what is stored.
            None => self.get(&record.destination_url).await?.ok_or_else(|| {
                AppError::internal(
                    "Evaluation record vanished during upsert",
                    json!({ "destination_url": record.destination_url }),
                )
            }),
        }
    }

    async fn delete(&self, destination_url: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM evaluation_records WHERE destination_url = $1")
            .bind(destination_url)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_stale(
        &self,
        checked_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<EvaluationRecord>, AppError> {
        let rows = sqlx::query_as::<_, EvaluationRow>(
            r#"
            SELECT destination_url, link_id, verdict, quality_score, last_checked_at, failure_streak
            FROM evaluation_records
            WHERE last_checked_at < $1
            ORDER BY last_checked_at ASC
            LIMIT $2
            "#,
        )
        .bind(checked_before)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.into_iter().map(EvaluationRecord::try_from).collect()
    }
}

#[derive(FromRow)]
struct CheckpointRow {
    key: String,
    job: Json<EvaluationJob>,
    state: Json<WorkflowState>,
    updated_at: DateTime<Utc>,
}

impl From<CheckpointRow> for Checkpoint {
    fn from(row: CheckpointRow) -> Self {
        Checkpoint {
            key: row.key,
            job: row.job.0,
            state: row.state.0,
            updated_at: row.updated_at,
        }
    }
}

/// PostgreSQL repository for workflow checkpoints.
///
/// Job and state are stored as JSONB so new workflow steps need no migration.
pub struct PgCheckpointRepository {
    pool: Arc<PgPool>,
}

impl PgCheckpointRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointRepository for PgCheckpointRepository {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO evaluation_checkpoints (key, job, state, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key) DO UPDATE
            SET job = EXCLUDED.job, state = EXCLUDED.state, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&checkpoint.key)
        .bind(Json(&checkpoint.job))
        .bind(Json(&checkpoint.state))
        .bind(checkpoint.updated_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Checkpoint>, AppError> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            "SELECT key, job, state, updated_at FROM evaluation_checkpoints WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row.map(Checkpoint::from))
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM evaluation_checkpoints WHERE key = $1")
            .bind(key)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<Checkpoint>, AppError> {
        let rows = sqlx::query_as::<_, CheckpointRow>(
            "SELECT key, job, state, updated_at FROM evaluation_checkpoints ORDER BY updated_at ASC",
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows.into_iter().map(Checkpoint::from).collect())
    }
}
