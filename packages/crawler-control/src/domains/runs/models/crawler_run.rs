use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::InvocationParams;

/// Persisted lifecycle status of a worker run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "crawler_run_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Starting,
    Running,
    Completed,
    Stopped,
    Crashed,
    Failed,
}

impl RunStatus {
    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::Starting | RunStatus::Running)
    }
}

/// One worker invocation and its outcome.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CrawlerRun {
    pub id: Uuid,
    pub params: Json<InvocationParams>,
    pub status: RunStatus,
    pub pid: Option<i32>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl CrawlerRun {
    pub async fn create(params: &InvocationParams, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO crawler_runs (params, status)
            VALUES ($1, 'starting')
            RETURNING *
            "#,
        )
        .bind(Json(params))
        .fetch_one(pool)
        .await
        .context("Failed to create crawler run")
    }

    /// Record a status change. Terminal statuses stamp `finished_at`.
    pub async fn update_status(
        id: Uuid,
        status: RunStatus,
        pid: Option<i32>,
        exit_code: Option<i32>,
        error: Option<&str>,
        pool: &PgPool,
    ) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE crawler_runs
            SET status = $2,
                pid = COALESCE($3, pid),
                exit_code = COALESCE($4, exit_code),
                error = COALESCE($5, error),
                finished_at = CASE WHEN $2 IN ('starting', 'running') THEN NULL ELSE NOW() END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(pid)
        .bind(exit_code)
        .bind(error)
        .fetch_one(pool)
        .await
        .with_context(|| format!("Failed to update crawler run {id}"))
    }

    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM crawler_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Most recent run still marked starting or running.
    pub async fn find_active(pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM crawler_runs
            WHERE status IN ('starting', 'running')
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_recent(limit: i64, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM crawler_runs ORDER BY started_at DESC LIMIT $1")
            .bind(limit)
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }
}
