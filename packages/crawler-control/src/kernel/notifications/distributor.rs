//! Per-run fan-out buffer for progress notifications.
//!
//! One notification stream comes in from the channel; any number of readers
//! drain it per run, each remembering its own last-seen id. Reading never
//! removes anything: items leave a buffer only through capacity eviction
//! (drop-oldest) or when the buffer itself is released.
//!
//! Delivery is at-least-once and may reorder. A late id is slotted into its
//! ordered position, so only readers whose last-seen id is still below it
//! receive it; readers already past it skip it.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use super::notification::{Notification, NotificationSink};
use crate::common::RunId;
use crate::config::DistributorConfig;

struct RunBuffer {
    items: VecDeque<Notification>,
    consumers: usize,
    finished_at: Option<Instant>,
    touched_at: Instant,
}

impl RunBuffer {
    fn new() -> Self {
        Self {
            items: VecDeque::new(),
            consumers: 0,
            finished_at: None,
            touched_at: Instant::now(),
        }
    }
}

/// Introspection snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributorStats {
    pub total_buffers: usize,
    pub sizes_by_run: BTreeMap<RunId, usize>,
    pub total_buffered: usize,
}

/// Thread-safe, cloneable via `Arc`. Keyed by run id.
pub struct NotificationDistributor {
    capacity: usize,
    stale_run_ttl: Option<Duration>,
    /// How long a finished run stays readable before `sweep` may drop it.
    finished_linger: Duration,
    buffers: Mutex<HashMap<RunId, RunBuffer>>,
}

impl NotificationDistributor {
    pub fn new(config: &DistributorConfig) -> Self {
        Self {
            capacity: config.capacity.max(1),
            stale_run_ttl: config.stale_run_ttl,
            finished_linger: config.sweep_interval,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Distributor with the given per-run capacity and no lingering.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            stale_run_ttl: None,
            finished_linger: Duration::ZERO,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RunId, RunBuffer>> {
        self.buffers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Buffer a notification. Returns false when it was dropped as a duplicate
    /// or as older than everything a full buffer holds.
    ///
    /// A late id lands in order and is not replayed to readers past it.
    pub fn put(&self, notification: Notification) -> bool {
        let mut buffers = self.lock();
        let run_id = notification.run_id;
        let buffer = buffers.entry(run_id).or_insert_with(RunBuffer::new);
        buffer.touched_at = Instant::now();

        let mut pos = buffer
            .items
            .partition_point(|n| n.id < notification.id);
        if buffer
            .items
            .get(pos)
            .is_some_and(|n| n.id == notification.id)
        {
            debug!(run_id = %run_id, id = notification.id, "duplicate notification ignored");
            return false;
        }

        if buffer.items.len() >= self.capacity {
            if pos == 0 {
                debug!(
                    run_id = %run_id,
                    id = notification.id,
                    "late notification older than eviction window dropped"
                );
                return false;
            }
            if let Some(evicted) = buffer.items.pop_front() {
                debug!(
                    run_id = %run_id,
                    evicted_id = evicted.id,
                    capacity = self.capacity,
                    "event buffer full; evicted oldest notification"
                );
            }
            pos -= 1;
        }

        buffer.items.insert(pos, notification);
        true
    }

    /// All buffered notifications for `run_id` with `id > last_seen_id`, ascending.
    pub fn get_all_new(&self, run_id: RunId, last_seen_id: i64) -> Vec<Notification> {
        let buffers = self.lock();
        let Some(buffer) = buffers.get(&run_id) else {
            return Vec::new();
        };
        let start = buffer.items.partition_point(|n| n.id <= last_seen_id);
        buffer.items.range(start..).cloned().collect()
    }

    /// Release the buffer for a run. Returns whether one existed.
    pub fn clear(&self, run_id: RunId) -> bool {
        let removed = self.lock().remove(&run_id).is_some();
        if removed {
            debug!(run_id = %run_id, "event buffer cleared");
        }
        removed
    }

    pub fn stats(&self) -> DistributorStats {
        let buffers = self.lock();
        let sizes_by_run: BTreeMap<RunId, usize> = buffers
            .iter()
            .map(|(run_id, buffer)| (*run_id, buffer.items.len()))
            .collect();
        DistributorStats {
            total_buffers: buffers.len(),
            total_buffered: sizes_by_run.values().sum(),
            sizes_by_run,
        }
    }

    /// Register a reader for a run. Dropping the last reader clears the buffer.
    pub fn attach(self: &Arc<Self>, run_id: RunId) -> RunSubscription {
        self.attach_from(run_id, 0)
    }

    /// Register a reader resuming after `last_seen_id`.
    pub fn attach_from(self: &Arc<Self>, run_id: RunId, last_seen_id: i64) -> RunSubscription {
        let mut buffers = self.lock();
        let buffer = buffers.entry(run_id).or_insert_with(RunBuffer::new);
        buffer.consumers += 1;
        buffer.touched_at = Instant::now();
        RunSubscription {
            distributor: Arc::clone(self),
            run_id,
            last_seen_id,
        }
    }

    /// Flag a run whose worker has exited; `sweep` releases it once unread.
    pub fn mark_finished(&self, run_id: RunId) {
        if let Some(buffer) = self.lock().get_mut(&run_id) {
            buffer.finished_at.get_or_insert_with(Instant::now);
        }
    }

    /// Drop finished runs nobody reads and, with a TTL configured, idle runs.
    /// Returns the number of buffers released.
    pub fn sweep(&self) -> usize {
        let mut buffers = self.lock();
        let before = buffers.len();
        let linger = self.finished_linger;
        let ttl = self.stale_run_ttl;

        buffers.retain(|run_id, buffer| {
            if buffer.consumers > 0 {
                return true;
            }
            let finished = buffer
                .finished_at
                .is_some_and(|at| at.elapsed() >= linger);
            let stale = ttl.is_some_and(|ttl| buffer.touched_at.elapsed() >= ttl);
            if finished || stale {
                debug!(run_id = %run_id, finished, stale, "releasing event buffer");
                false
            } else {
                true
            }
        });

        let released = before - buffers.len();
        if released > 0 {
            info!(released, remaining = buffers.len(), "swept event buffers");
        }
        released
    }

    fn detach(&self, run_id: RunId) {
        let mut buffers = self.lock();
        let last = match buffers.get_mut(&run_id) {
            Some(buffer) => {
                buffer.consumers = buffer.consumers.saturating_sub(1);
                buffer.consumers == 0
            }
            None => false,
        };
        if last {
            buffers.remove(&run_id);
            debug!(run_id = %run_id, "last reader disconnected; event buffer cleared");
        }
    }
}

impl NotificationSink for NotificationDistributor {
    fn deliver(&self, notification: Notification) {
        self.put(notification);
    }
}

/// A reader attached to one run's buffer, tracking its own position.
pub struct RunSubscription {
    distributor: Arc<NotificationDistributor>,
    run_id: RunId,
    last_seen_id: i64,
}

impl RunSubscription {
    pub fn last_seen_id(&self) -> i64 {
        self.last_seen_id
    }

    /// Everything new since the previous call.
    pub fn poll(&mut self) -> Vec<Notification> {
        let batch = self
            .distributor
            .get_all_new(self.run_id, self.last_seen_id);
        if let Some(last) = batch.last() {
            self.last_seen_id = last.id;
        }
        batch
    }
}

impl Drop for RunSubscription {
    fn drop(&mut self) {
        self.distributor.detach(self.run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn event(run_id: RunId, id: i64) -> Notification {
        Notification::new(run_id, id, "progress", json!({"n": id}))
    }

    fn ids(items: &[Notification]) -> Vec<i64> {
        items.iter().map(|n| n.id).collect()
    }

    #[test]
    fn test_get_all_new_is_exclusive_and_ascending() {
        let d = NotificationDistributor::with_capacity(10);
        let run = Uuid::new_v4();
        for id in 1..=5 {
            d.put(event(run, id));
        }

        assert_eq!(ids(&d.get_all_new(run, 0)), vec![1, 2, 3, 4, 5]);
        assert_eq!(ids(&d.get_all_new(run, 3)), vec![4, 5]);
        assert!(d.get_all_new(run, 5).is_empty());
        assert!(d.get_all_new(Uuid::new_v4(), 0).is_empty());
    }

    #[test]
    fn test_capacity_evicts_exactly_the_oldest() {
        let d = NotificationDistributor::with_capacity(3);
        let run = Uuid::new_v4();
        for id in 1..=3 {
            d.put(event(run, id));
        }
        d.put(event(run, 4));

        assert_eq!(ids(&d.get_all_new(run, 0)), vec![2, 3, 4]);
        assert_eq!(d.stats().sizes_by_run[&run], 3);

        for id in 5..=20 {
            d.put(event(run, id));
            assert!(d.stats().sizes_by_run[&run] <= 3);
        }
    }

    #[test]
    fn test_readers_do_not_interfere() {
        let d = Arc::new(NotificationDistributor::with_capacity(10));
        let run = Uuid::new_v4();
        let mut fast = d.attach(run);
        let mut slow = d.attach(run);

        d.put(event(run, 1));
        d.put(event(run, 2));
        assert_eq!(ids(&fast.poll()), vec![1, 2]);

        d.put(event(run, 3));
        assert_eq!(ids(&fast.poll()), vec![3]);
        assert_eq!(ids(&slow.poll()), vec![1, 2, 3]);
        assert!(slow.poll().is_empty());
    }

    #[test]
    fn test_duplicates_ignored_and_late_ids_ordered() {
        let d = NotificationDistributor::with_capacity(10);
        let run = Uuid::new_v4();
        d.put(event(run, 1));
        d.put(event(run, 3));
        assert!(!d.put(event(run, 3)));
        assert!(d.put(event(run, 2)));

        assert_eq!(ids(&d.get_all_new(run, 0)), vec![1, 2, 3]);
    }

    #[test]
    fn test_late_id_reaches_only_readers_behind_it() {
        let d = Arc::new(NotificationDistributor::with_capacity(10));
        let run = Uuid::new_v4();
        let mut ahead = d.attach(run);
        let mut behind = d.attach(run);

        d.put(event(run, 1));
        d.put(event(run, 3));
        assert_eq!(ids(&ahead.poll()), vec![1, 3]);

        d.put(event(run, 2));
        assert!(ahead.poll().is_empty());
        assert_eq!(ahead.last_seen_id(), 3);
        assert_eq!(ids(&behind.poll()), vec![1, 2, 3]);
    }

    #[test]
    fn test_last_reader_disconnect_clears_buffer() {
        let d = Arc::new(NotificationDistributor::with_capacity(10));
        let run = Uuid::new_v4();
        let a = d.attach(run);
        let b = d.attach(run);
        d.put(event(run, 1));

        drop(a);
        assert_eq!(d.stats().total_buffers, 1);
        drop(b);
        assert_eq!(d.stats().total_buffers, 0);
    }

    #[test]
    fn test_stats_and_clear() {
        let d = NotificationDistributor::with_capacity(10);
        let run_a = Uuid::new_v4();
        let run_b = Uuid::new_v4();
        d.put(event(run_a, 1));
        d.put(event(run_a, 2));
        d.put(event(run_b, 1));

        let stats = d.stats();
        assert_eq!(stats.total_buffers, 2);
        assert_eq!(stats.total_buffered, 3);
        assert_eq!(stats.sizes_by_run[&run_a], 2);

        assert!(d.clear(run_a));
        assert!(!d.clear(run_a));
        assert_eq!(d.stats().total_buffered, 1);
    }

    #[test]
    fn test_sweep_releases_finished_unread_runs() {
        let d = Arc::new(NotificationDistributor::with_capacity(10));
        let finished = Uuid::new_v4();
        let active = Uuid::new_v4();
        let watched = Uuid::new_v4();
        d.put(event(finished, 1));
        d.put(event(active, 1));
        d.put(event(watched, 1));
        let _reader = d.attach(watched);

        d.mark_finished(finished);
        d.mark_finished(watched);

        assert_eq!(d.sweep(), 1);
        let stats = d.stats();
        assert!(!stats.sizes_by_run.contains_key(&finished));
        assert!(stats.sizes_by_run.contains_key(&active));
        assert!(stats.sizes_by_run.contains_key(&watched));
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let d = Arc::new(NotificationDistributor::with_capacity(1000));
        let run = Uuid::new_v4();

        let writer = {
            let d = d.clone();
            std::thread::spawn(move || {
                for id in 1..=500 {
                    d.put(event(run, id));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let d = d.clone();
                std::thread::spawn(move || {
                    let mut last = 0;
                    let mut seen = Vec::new();
                    while last < 500 {
                        for n in d.get_all_new(run, last) {
                            assert!(n.id > last);
                            last = n.id;
                            seen.push(n.id);
                        }
                        std::thread::yield_now();
                    }
                    seen
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            let seen = reader.join().unwrap();
            assert_eq!(seen, (1..=500).collect::<Vec<_>>());
        }
    }
}
