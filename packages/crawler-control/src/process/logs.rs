//! Captured worker output.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

/// Bounded ring of the most recent output lines.
pub struct LogBuffer {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Up to `n` most recent lines, oldest first.
    pub fn recent(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&self) {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Case-insensitive marker search over one output line.
pub fn contains_rate_limit_marker(line: &str, markers: &[String]) -> bool {
    let line = line.to_lowercase();
    markers
        .iter()
        .any(|marker| !marker.is_empty() && line.contains(&marker.to_lowercase()))
}

/// Spawn a task copying one output stream into the buffer, line by line.
///
/// Sets `rate_limited` when a line carries a marker. Ends at EOF.
pub fn spawn_reader<R>(
    reader: R,
    stream: &'static str,
    buffer: Arc<LogBuffer>,
    markers: Arc<[String]>,
    rate_limited: Arc<AtomicBool>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::debug!(target: "crawler_worker", stream, "{}", line);
                    if contains_rate_limit_marker(&line, &markers) {
                        rate_limited.store(true, Ordering::SeqCst);
                    }
                    buffer.push(line);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(stream, error = %e, "worker output unreadable");
                    break;
                }
            }
        }
    })
}
