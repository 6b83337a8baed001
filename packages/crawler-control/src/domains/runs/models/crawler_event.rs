use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::kernel::notifications::Notification;

/// Progress event row. Inserting one fires a notification on `crawler_events`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CrawlerEvent {
    pub id: i64,
    pub run_id: Uuid,
    pub event_type: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

impl CrawlerEvent {
    pub async fn record(run_id: Uuid, event_type: &str, data: Value, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO crawler_events (run_id, event_type, data)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(run_id)
        .bind(event_type)
        .bind(data)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    /// Events newer than `last_seen_id`, oldest first. Used to catch up when
    /// live updates are unavailable.
    pub async fn find_after(run_id: Uuid, last_seen_id: i64, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM crawler_events WHERE run_id = $1 AND id > $2 ORDER BY id",
        )
        .bind(run_id)
        .bind(last_seen_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub fn into_notification(self) -> Notification {
        Notification::new(self.run_id, self.id, self.event_type, self.data)
    }
}
