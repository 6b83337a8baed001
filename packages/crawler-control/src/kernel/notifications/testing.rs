//! In-memory listener for testing the channel supervisor.
//!
//! Tests push payloads with [`TestListener::notify`] and inject connection
//! failures without a database.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::listener::{ListenerConnection, ListenerConnector};
use super::ChannelError;

#[derive(Default)]
struct TestListenerState {
    queue: Mutex<VecDeque<String>>,
    wake: Notify,
    connects: AtomicUsize,
    pings: AtomicUsize,
    failing_connects: AtomicUsize,
    refuse_all: AtomicBool,
    drop_connection: AtomicBool,
    fail_pings: AtomicBool,
}

/// Mock listener that hands out connections backed by a shared queue.
#[derive(Clone, Default)]
pub struct TestListener {
    state: Arc<TestListenerState>,
}

impl TestListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw payload as if the database had published it.
    pub fn notify(&self, payload: impl Into<String>) {
        self.state
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(payload.into());
        self.state.wake.notify_one();
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.state.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Refuse every connection attempt until reset.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse_all.store(refuse, Ordering::SeqCst);
    }

    /// Break the current connection; the next wait reports it lost.
    pub fn drop_connection(&self) {
        self.state.drop_connection.store(true, Ordering::SeqCst);
        self.state.wake.notify_one();
    }

    pub fn fail_pings(&self, fail: bool) {
        self.state.fail_pings.store(fail, Ordering::SeqCst);
    }

    /// Number of connection attempts made so far.
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn ping_count(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListenerConnector for TestListener {
    async fn connect(&self) -> Result<Box<dyn ListenerConnection>, ChannelError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        if self.state.refuse_all.load(Ordering::SeqCst) {
            return Err(ChannelError::Connect("connection refused".to_string()));
        }
        let failing = self.state.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.state
                .failing_connects
                .store(failing - 1, Ordering::SeqCst);
            return Err(ChannelError::Connect("connection refused".to_string()));
        }

        self.state.drop_connection.store(false, Ordering::SeqCst);
        Ok(Box::new(TestConnection {
            state: self.state.clone(),
        }))
    }
}

struct TestConnection {
    state: Arc<TestListenerState>,
}

impl TestConnection {
    fn drain(&self) -> Vec<String> {
        self.state
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }
}

#[async_trait]
impl ListenerConnection for TestConnection {
    async fn wait_batch(&mut self, timeout: Duration) -> Result<Vec<String>, ChannelError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.state.drop_connection.swap(false, Ordering::SeqCst) {
                return Err(ChannelError::Lost("connection reset".to_string()));
            }
            let batch = self.drain();
            if !batch.is_empty() {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, self.state.wake.notified())
                .await
                .is_err()
            {
                return Ok(Vec::new());
            }
        }
    }

    async fn ping(&mut self) -> Result<(), ChannelError> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_pings.load(Ordering::SeqCst) {
            Err(ChannelError::Lost("ping failed".to_string()))
        } else {
            Ok(())
        }
    }
}
