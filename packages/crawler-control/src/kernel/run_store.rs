//! Postgres-backed [`RunStore`].

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::{ActiveRun, ConfigSnapshot, RunStore, RunUpdate};
use crate::common::{InvocationParams, RunId};
use crate::domains::runs::models::{CrawlerConfig, CrawlerRun};

pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStore for PostgresRunStore {
    async fn create_run(&self, params: &InvocationParams) -> Result<RunId> {
        let run = CrawlerRun::create(params, &self.pool).await?;
        Ok(run.id)
    }

    async fn update_run(&self, run_id: RunId, update: RunUpdate) -> Result<()> {
        let pid = update.pid.map(i32::try_from).transpose()?;
        CrawlerRun::update_status(
            run_id,
            update.status,
            pid,
            update.exit_code,
            update.error.as_deref(),
            &self.pool,
        )
        .await?;
        Ok(())
    }

    async fn latest_config(&self) -> Result<Option<ConfigSnapshot>> {
        Ok(CrawlerConfig::latest(&self.pool)
            .await?
            .map(|config| ConfigSnapshot {
                version: config.version,
                params: config.params.0,
            }))
    }

    async fn find_active_run(&self) -> Result<Option<ActiveRun>> {
        Ok(CrawlerRun::find_active(&self.pool).await?.map(|run| ActiveRun {
            run_id: run.id,
            pid: run.pid.and_then(|p| u32::try_from(p).ok()),
            params: run.params.0,
            started_at: run.started_at,
        }))
    }
}
