//! Dedicated LISTEN connection abstraction.
//!
//! Provides a trait-based listener so the channel supervisor can run against
//! a real Postgres `PgListener` or an in-memory test double.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgListener;

use super::ChannelError;

/// Opens dedicated listener connections.
#[async_trait]
pub trait ListenerConnector: Send + Sync {
    /// Connect and register for the notification channel.
    async fn connect(&self) -> Result<Box<dyn ListenerConnection>, ChannelError>;
}

/// One live listener connection, owned by the channel supervisor alone.
#[async_trait]
pub trait ListenerConnection: Send {
    /// Wait up to `timeout` for a notification, then drain everything already
    /// buffered. Returns raw payloads in arrival order; empty on timeout.
    async fn wait_batch(&mut self, timeout: Duration) -> Result<Vec<String>, ChannelError>;

    /// Lightweight round-trip probe.
    async fn ping(&mut self) -> Result<(), ChannelError>;
}

/// Postgres LISTEN connector.
///
/// Every `connect` opens a fresh `PgListener`, which holds its own connection
/// outside of any pool.
pub struct PgListenerConnector {
    database_url: String,
    channel: String,
}

impl PgListenerConnector {
    pub fn new(database_url: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl ListenerConnector for PgListenerConnector {
    async fn connect(&self) -> Result<Box<dyn ListenerConnection>, ChannelError> {
        let mut listener = PgListener::connect(&self.database_url)
            .await
            .map_err(ChannelError::connect)?;
        listener
            .listen(&self.channel)
            .await
            .map_err(ChannelError::connect)?;
        tracing::info!(channel = %self.channel, "listening for crawler notifications");
        Ok(Box::new(PgListenerConnection { listener }))
    }
}

struct PgListenerConnection {
    listener: PgListener,
}

#[async_trait]
impl ListenerConnection for PgListenerConnection {
    async fn wait_batch(&mut self, timeout: Duration) -> Result<Vec<String>, ChannelError> {
        let first = match tokio::time::timeout(timeout, self.listener.try_recv()).await {
            Err(_) => return Ok(Vec::new()),
            Ok(Ok(Some(notification))) => notification,
            // try_recv yields None when the connection dropped underneath us
            Ok(Ok(None)) => {
                return Err(ChannelError::Lost("listener connection closed".to_string()))
            }
            Ok(Err(e)) => return Err(ChannelError::Lost(e.to_string())),
        };

        let mut payloads = vec![first.payload().to_string()];
        while let Some(next) = self.listener.next_buffered() {
            payloads.push(next.payload().to_string());
        }
        Ok(payloads)
    }

    async fn ping(&mut self) -> Result<(), ChannelError> {
        sqlx::query("SELECT 1")
            .execute(&mut self.listener)
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::Lost(e.to_string()))
    }
}
