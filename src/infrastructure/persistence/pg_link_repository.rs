//! PostgreSQL implementation of link and geo rule repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;

use crate::domain::entities::{GeoRule, Link, LinkStatus};
use crate::domain::repositories::{GeoRuleRepository, LinkRepository};
use crate::error::AppError;

#[derive(FromRow)]
struct LinkRow {
    id: i64,
    short_code: String,
    owner_id: i64,
    created_at: DateTime<Utc>,
    default_destination: String,
    status: String,
}

impl TryFrom<LinkRow> for Link {
    type Error = AppError;

    fn try_from(row: LinkRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<LinkStatus>().map_err(|reason| {
            AppError::internal("Corrupt link row", json!({ "id": row.id, "reason": reason }))
        })?;

        Ok(Link::new(
            row.id,
            row.short_code,
            row.owner_id,
            row.created_at,
            row.default_destination,
            status,
        ))
    }
}

/// PostgreSQL repository for link reference data.
pub struct PgLinkRepository {
    pool: Arc<PgPool>,
}

impl PgLinkRepository {
    /// Creates a new repository with a database connection pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LinkRepository for PgLinkRepository {
    async fn find_by_code(&self, short_code: &str) -> Result<Option<Link>, AppError> {
        let row = sqlx::query_as::<_, LinkRow>(
            r#"
            SELECT id, short_code, owner_id, created_at, default_destination, status
            FROM links
            WHERE short_code = $1
            "#,
        )
        .bind(short_code)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(Link::try_from).transpose()
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Link>, AppError> {
        let row = sqlx::query_as::<_, LinkRow>(
            r#"
            SELECT id, short_code, owner_id, created_at, default_destination, status
            FROM links
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(Link::try_from).transpose()
    }

    async fn find_ids_by_default_destination(
        &self,
        destination_url: &str,
    ) -> Result<Vec<i64>, AppError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM links WHERE default_destination = $1 ORDER BY id",
        )
        .bind(destination_url)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(ids)
    }

    async fn upsert(&self, link: Link) -> Result<Link, AppError> {
        let row = sqlx::query_as::<_, LinkRow>(
            r#"
            INSERT INTO links (id, short_code, owner_id, created_at, default_destination, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET owner_id = EXCLUDED.owner_id,
                default_destination = EXCLUDED.default_destination,
                status = EXCLUDED.status
            RETURNING id, short_code, owner_id, created_at, default_destination, status
            "#,
        )
        .bind(link.id)
        .bind(&link.short_code)
        .bind(link.owner_id)
        .bind(link.created_at)
        .bind(&link.default_destination)
        .bind(link.status.as_str())
        .fetch_one(self.pool.as_ref())
        .await?;

        Link::try_from(row)
    }

    async fn delete(&self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM links WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(self.pool.as_ref()).await?;
        Ok(())
    }
}

#[derive(FromRow)]
struct GeoRuleRow {
    link_id: i64,
    region_code: String,
    destination: String,
    priority: i32,
}

/// PostgreSQL repository for geo rules.
pub struct PgGeoRuleRepository {
    pool: Arc<PgPool>,
}

impl PgGeoRuleRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GeoRuleRepository for PgGeoRuleRepository {
    async fn find_by_link_id(&self, link_id: i64) -> Result<Vec<GeoRule>, AppError> {
        let rows = sqlx::query_as::<_, GeoRuleRow>(
            r#"
            SELECT link_id, region_code, destination, priority
            FROM geo_rules
            WHERE link_id = $1
            ORDER BY priority ASC, id ASC
            "#,
        )
        .bind(link_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| GeoRule::new(r.link_id, &r.region_code, &r.destination, r.priority))
            .collect())
    }

    async fn find_link_ids_by_destination(&self, destination: &str) -> Result<Vec<i64>, AppError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT DISTINCT link_id FROM geo_rules WHERE destination = $1 ORDER BY link_id",
        )
        .bind(destination)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(ids)
    }

    async fn replace_for_link(&self, link_id: i64, rules: Vec<GeoRule>) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM geo_rules WHERE link_id = $1")
            .bind(link_id)
            .execute(&mut *tx)
            .await?;

        if !rules.is_empty() {
            let regions: Vec<String> = rules.iter().map(|r| r.region_code.clone()).collect();
            let destinations: Vec<String> = rules.iter().map(|r| r.destination.clone()).collect();
            let priorities: Vec<i32> = rules.iter().map(|r| r.priority).collect();

            sqlx::query(
                r#"
                INSERT INTO geo_rules (link_id, region_code, destination, priority)
                SELECT $1, r, d, p
                FROM UNNEST($2::text[], $3::text[], $4::int[]) AS t(r, d, p)
                "#,
            )
            .bind(link_id)
            .bind(&regions)
            .bind(&destinations)
            .bind(&priorities)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
