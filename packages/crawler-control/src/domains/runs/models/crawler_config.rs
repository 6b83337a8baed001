use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::common::InvocationParams;

/// A versioned snapshot of the worker parameters.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CrawlerConfig {
    pub version: i64,
    pub params: Json<InvocationParams>,
    pub created_at: DateTime<Utc>,
}

impl CrawlerConfig {
    /// Append a new version.
    pub async fn publish(params: &InvocationParams, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("INSERT INTO crawler_config (params) VALUES ($1) RETURNING *")
            .bind(Json(params))
            .fetch_one(pool)
            .await
            .context("Failed to publish crawler config")
    }

    pub async fn latest(pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM crawler_config ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await
            .context("Failed to load latest crawler config")
    }
}
