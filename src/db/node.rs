//! Database node
//!
//! A node owns one [`EventDatabase`] and one [`ObjectsDatabase`] per host
//! that created objects, and runs a background flusher.
//!
//! The flusher wakes every `autoflush_delay`:
//! - if events arrived since the previous cycle, it drains what is older
//!   than the delay (`flush_old`);
//! - if the node went idle, it drains everything once (`flush`).
//!
//! Ingestion cancels a running flusher cycle before taking the node lock, so
//! producers never queue behind a long background drain.

use crate::db::counters::DatabaseCounters;
use crate::db::cursor::EventBrowser;
use crate::db::event_db::EventDatabase;
use crate::db::filter::EventFilter;
use crate::db::flush::{FlushMonitor, ShutdownSignal};
use crate::db::objects_db::{LoadedClass, ObjectsDatabase};
use crate::db::DatabaseSettings;
use crate::storage::{Event, ObjectId, PagedFile, StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

/// Flusher wake-up period while autoflush is disabled
const IDLE_WAIT: Duration = Duration::from_secs(5);

const MAX_HOSTS: usize = 1 << ObjectId::HOST_BITS;

/// Statistics reported by a node to the master
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStats {
    pub node_id: u32,
    pub hostname: String,
    pub events_count: u64,
    pub dropped_events_count: u64,
    pub unordered_events_count: u64,
    pub objects_count: u64,
    pub objects_store_size: u64,
    /// Zero while the node holds no event
    pub first_timestamp: u64,
    pub last_timestamp: u64,
}

struct NodeState {
    events: EventDatabase,
    objects_file: Arc<PagedFile>,
    objects: Vec<Option<ObjectsDatabase>>,
}

impl NodeState {
    fn new(settings: &DatabaseSettings, counters: &Arc<DatabaseCounters>) -> StorageResult<Self> {
        Ok(Self {
            events: EventDatabase::new(settings, Arc::clone(counters))?,
            objects_file: Arc::new(PagedFile::new(settings.layout)),
            objects: std::iter::repeat_with(|| None).take(MAX_HOSTS).collect(),
        })
    }

    fn objects_mut(
        &mut self,
        host_id: u32,
        settings: &DatabaseSettings,
        counters: &Arc<DatabaseCounters>,
    ) -> StorageResult<&mut ObjectsDatabase> {
        let slot = self
            .objects
            .get_mut(host_id as usize)
            .ok_or_else(|| StorageError::NotFound(format!("host {}", host_id)))?;
        if slot.is_none() {
            tracing::debug!(host_id, "Creating objects database");
            *slot = Some(ObjectsDatabase::new(
                host_id,
                &self.objects_file,
                settings,
                Arc::clone(counters),
            )?);
        }
        slot.as_mut()
            .ok_or_else(|| StorageError::NotFound(format!("host {}", host_id)))
    }

    fn objects(&self, host_id: u32) -> Option<&ObjectsDatabase> {
        self.objects.get(host_id as usize).and_then(Option::as_ref)
    }
}

pub struct DatabaseNode {
    hostname: String,
    node_id: AtomicU32,
    settings: DatabaseSettings,
    state: Mutex<NodeState>,
    counters: Arc<DatabaseCounters>,
    monitor: Mutex<Option<Arc<FlushMonitor>>>,
    first_timestamp: AtomicU64,
    last_timestamp: AtomicU64,
    /// Set by ingestion, cleared by every flusher cycle
    active: AtomicBool,
    /// Set once an idle node has been fully drained
    flushed: AtomicBool,
    shutdown: Arc<ShutdownSignal>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl DatabaseNode {
    /// Create a node and start its flusher thread
    pub fn new(hostname: impl Into<String>, settings: DatabaseSettings) -> StorageResult<Arc<Self>> {
        let counters = Arc::new(DatabaseCounters::new());
        let state = NodeState::new(&settings, &counters)?;
        let delay = settings.autoflush_delay;

        let node = Arc::new(Self {
            hostname: hostname.into(),
            node_id: AtomicU32::new(0),
            settings,
            state: Mutex::new(state),
            counters,
            monitor: Mutex::new(None),
            first_timestamp: AtomicU64::new(u64::MAX),
            last_timestamp: AtomicU64::new(0),
            active: AtomicBool::new(false),
            flushed: AtomicBool::new(true),
            shutdown: Arc::new(ShutdownSignal::new()),
            flusher: Mutex::new(None),
        });

        let weak = Arc::downgrade(&node);
        let shutdown = Arc::clone(&node.shutdown);
        let handle = std::thread::Builder::new()
            .name("tracegrid-flusher".to_string())
            .spawn(move || flusher_loop(weak, shutdown, delay))?;
        *node.flusher.lock()? = Some(handle);

        tracing::info!(
            hostname = %node.hostname,
            autoflush_delay_secs = delay.as_secs(),
            "Database node started"
        );
        Ok(node)
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn node_id(&self) -> u32 {
        self.node_id.load(Ordering::Relaxed)
    }

    /// Record the id assigned by the master
    pub fn set_node_id(&self, node_id: u32) {
        self.node_id.store(node_id, Ordering::Relaxed);
    }

    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    fn lock_state(&self) -> StorageResult<MutexGuard<'_, NodeState>> {
        Ok(self.state.lock()?)
    }

    fn cancel_flush(&self) -> StorageResult<()> {
        if let Some(monitor) = self.monitor.lock()?.as_ref() {
            monitor.cancel();
        }
        Ok(())
    }

    fn note_activity(&self) {
        self.active.store(true, Ordering::Relaxed);
        self.flushed.store(false, Ordering::Relaxed);
    }

    pub fn push_event(&self, event: Event) -> StorageResult<()> {
        self.push_events(std::iter::once(event))
    }

    /// Buffer a batch of events under one acquisition of the node lock
    pub fn push_events(&self, events: impl IntoIterator<Item = Event>) -> StorageResult<()> {
        self.cancel_flush()?;
        let mut state = self.lock_state()?;
        for event in events {
            self.first_timestamp
                .fetch_min(event.timestamp, Ordering::Relaxed);
            self.last_timestamp
                .fetch_max(event.timestamp, Ordering::Relaxed);
            state.events.push(event)?;
        }
        drop(state);
        self.note_activity();
        Ok(())
    }

    pub fn register_object(&self, id: ObjectId, timestamp: u64, data: Vec<u8>) -> StorageResult<()> {
        self.cancel_flush()?;
        let mut state = self.lock_state()?;
        state
            .objects_mut(id.host_id(), &self.settings, &self.counters)?
            .store(id.sequence(), timestamp, data)?;
        drop(state);
        self.note_activity();
        Ok(())
    }

    pub fn register_ref(&self, id: ObjectId, timestamp: u64, class_id: ObjectId) -> StorageResult<()> {
        self.cancel_flush()?;
        let mut state = self.lock_state()?;
        state
            .objects_mut(id.host_id(), &self.settings, &self.counters)?
            .register_ref(id.sequence(), timestamp, class_id.0)?;
        drop(state);
        self.note_activity();
        Ok(())
    }

    pub fn register_class(&self, class_id: ObjectId, loader_id: ObjectId, name: &str) -> StorageResult<()> {
        if class_id.host_id() != loader_id.host_id() && loader_id.0 != 0 {
            tracing::warn!(
                class_id = %class_id,
                loader_id = %loader_id,
                "Class and loader created on different hosts"
            );
        }
        let mut state = self.lock_state()?;
        state
            .objects_mut(class_id.host_id(), &self.settings, &self.counters)?
            .register_class(class_id.0, loader_id.0, name);
        Ok(())
    }

    fn install_monitor(&self) -> StorageResult<Arc<FlushMonitor>> {
        let monitor = Arc::new(FlushMonitor::new());
        *self.monitor.lock()? = Some(Arc::clone(&monitor));
        Ok(monitor)
    }

    fn remove_monitor(&self) -> StorageResult<()> {
        *self.monitor.lock()? = None;
        Ok(())
    }

    /// Background drain that ingestion may cut short; returns the number of
    /// records drained and whether it was cancelled
    fn drain(&self, max_age: Option<u64>) -> StorageResult<(usize, bool)> {
        // installed before locking so that a producer waiting on the lock can cancel it
        let monitor = self.install_monitor()?;
        let result = self.drain_with(Some(&*monitor), max_age);
        self.remove_monitor()?;
        Ok((result?, monitor.is_cancelled()))
    }

    fn drain_with(&self, monitor: Option<&FlushMonitor>, max_age: Option<u64>) -> StorageResult<usize> {
        let mut state = self.lock_state()?;
        let mut count = match max_age {
            Some(age) => state.events.flush_old(age, monitor)?,
            None => state.events.flush(monitor)?,
        };
        for objects in state.objects.iter_mut().flatten() {
            count += match max_age {
                Some(age) => objects.flush_old(age, monitor)?,
                None => objects.flush(monitor)?,
            };
        }
        Ok(count)
    }

    /// Drain every buffered event and object
    ///
    /// Runs to completion even while producers keep pushing; only the
    /// background flusher yields to ingestion.
    pub fn flush(&self) -> StorageResult<usize> {
        let count = self.drain_with(None, None)?;
        tracing::debug!(node_id = self.node_id(), count, "Node flushed");
        Ok(count)
    }

    /// Drain what is older than `max_age` nanoseconds
    pub fn flush_old(&self, max_age: u64) -> StorageResult<usize> {
        self.drain_with(None, Some(max_age))
    }

    fn autoflush_cycle(&self, delay: Duration) {
        if !self.active.load(Ordering::Relaxed) {
            if !self.flushed.swap(true, Ordering::Relaxed) {
                match self.drain(None) {
                    Ok((count, cancelled)) => {
                        if cancelled {
                            self.flushed.store(false, Ordering::Relaxed);
                        }
                        tracing::debug!(count, cancelled, "Idle node flushed");
                    }
                    Err(e) => {
                        self.flushed.store(false, Ordering::Relaxed);
                        tracing::error!(error = %e, "Autoflush failed");
                    }
                }
            }
        } else {
            let max_age = delay.as_nanos().min(u64::MAX as u128) as u64;
            if let Err(e) = self.drain(Some(max_age)) {
                tracing::error!(error = %e, "Autoflush of old entries failed");
            }
        }
        self.active.store(false, Ordering::Relaxed);
    }

    /// Drop every stored and buffered record and reset statistics
    pub fn clear(&self) -> StorageResult<()> {
        self.cancel_flush()?;
        let mut state = self.lock_state()?;
        *state = NodeState::new(&self.settings, &self.counters)?;
        self.counters.reset();
        self.first_timestamp.store(u64::MAX, Ordering::Relaxed);
        self.last_timestamp.store(0, Ordering::Relaxed);
        self.flushed.store(true, Ordering::Relaxed);
        tracing::info!(node_id = self.node_id(), "Node cleared");
        Ok(())
    }

    /// Current statistics, read without the node lock
    pub fn stats(&self) -> NodeStats {
        let values = self.counters.values();
        let first = self.first_timestamp.load(Ordering::Relaxed);
        NodeStats {
            node_id: self.node_id(),
            hostname: self.hostname.clone(),
            events_count: values.events_processed,
            dropped_events_count: values.events_dropped,
            unordered_events_count: values.events_unordered,
            objects_count: values.objects_count,
            objects_store_size: values.objects_store_size,
            first_timestamp: if first == u64::MAX { 0 } else { first },
            last_timestamp: self.last_timestamp.load(Ordering::Relaxed),
        }
    }

    /// Histogram of the events matching `filter` over `slots` buckets of `[t1, t2)`
    pub fn event_counts(&self, filter: &EventFilter, t1: u64, t2: u64, slots: usize) -> StorageResult<Vec<u64>> {
        let plan = self.lock_state()?.events.count_plan(filter)?;
        plan.execute(t1, t2, slots)
    }

    pub fn create_browser(&self, filter: &EventFilter) -> StorageResult<EventBrowser> {
        self.lock_state()?.events.browser(filter)
    }

    pub fn event_count_at_behaviors(&self, behavior_ids: &[u32]) -> StorageResult<Vec<u64>> {
        Ok(self.lock_state()?.events.event_count_at_behaviors(behavior_ids))
    }

    /// Serialized state of an object, if this node stored it
    pub fn registered_object(&self, id: ObjectId) -> StorageResult<Option<Vec<u8>>> {
        let state = self.lock_state()?;
        match state.objects(id.host_id()) {
            Some(objects) => objects.load(id.sequence()),
            None => Ok(None),
        }
    }

    /// Class of an object, if this node stored its reference
    pub fn object_type(&self, id: ObjectId) -> StorageResult<Option<LoadedClass>> {
        let state = self.lock_state()?;
        let Some(objects) = state.objects(id.host_id()) else {
            return Ok(None);
        };
        let Some(class_id) = objects.object_type(id.sequence())? else {
            return Ok(None);
        };
        let class_host = ObjectId(class_id).host_id();
        Ok(state
            .objects(class_host)
            .and_then(|db| db.loaded_class(class_id))
            .cloned())
    }

    /// Write the event database to `dir`; buffered events are flushed first
    pub fn save_snapshot(&self, dir: &Path) -> StorageResult<()> {
        self.flush()?;
        self.lock_state()?.events.save_snapshot(dir)
    }

    /// Replace the event database with one saved by [`DatabaseNode::save_snapshot`]
    pub fn restore_snapshot(&self, dir: &Path) -> StorageResult<()> {
        self.cancel_flush()?;
        let events = EventDatabase::open_snapshot(dir, &self.settings, Arc::clone(&self.counters))?;
        let count = events.events_count();
        let range = events.time_range()?;

        let mut state = self.lock_state()?;
        state.events = events;
        self.counters.events_restored(count);
        if let Some((first, last)) = range {
            self.first_timestamp.fetch_min(first, Ordering::Relaxed);
            self.last_timestamp.fetch_max(last, Ordering::Relaxed);
        }
        tracing::info!(node_id = self.node_id(), events = count, "Node restored from snapshot");
        Ok(())
    }

    /// Stop the flusher thread and wait for it
    pub fn shutdown(&self) -> StorageResult<()> {
        self.shutdown.trigger();
        self.cancel_flush()?;
        let handle = self.flusher.lock()?.take();
        if let Some(handle) = handle {
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                tracing::error!("Flusher thread panicked");
            }
        }
        Ok(())
    }
}

impl Drop for DatabaseNode {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

fn flusher_loop(node: Weak<DatabaseNode>, shutdown: Arc<ShutdownSignal>, delay: Duration) {
    let wait = if delay.is_zero() { IDLE_WAIT } else { delay };
    loop {
        if shutdown.wait(wait) {
            break;
        }
        if delay.is_zero() {
            continue;
        }
        let Some(node) = node.upgrade() else {
            break;
        };
        node.autoflush_cycle(delay);
    }
    tracing::debug!("Flusher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::EventKind;
    use std::time::Instant;
    use tempfile::tempdir;

    fn settings(delay: Duration) -> DatabaseSettings {
        DatabaseSettings {
            event_buffer_size: 64,
            thread_buffer_size: 64,
            objects_buffer_size: 16,
            autoflush_delay: delay,
            ..DatabaseSettings::default()
        }
    }

    fn exit(timestamp: u64, thread: u32) -> Event {
        Event::new(
            timestamp,
            1,
            thread,
            EventKind::BehaviorExit {
                behavior: 4,
                result: None,
                has_thrown: false,
            },
        )
        .at(4, 1)
    }

    #[test]
    fn test_stats_track_ingestion() {
        let node = DatabaseNode::new("alpha", settings(Duration::ZERO)).unwrap();
        assert_eq!(node.stats().first_timestamp, 0);

        node.push_events([exit(100, 1), exit(300, 1), exit(200, 2), exit(400, 1)])
            .unwrap();
        node.flush().unwrap();
        node.push_event(exit(350, 3)).unwrap();
        node.flush().unwrap();

        let stats = node.stats();
        assert_eq!(stats.hostname, "alpha");
        assert_eq!(stats.events_count, 4);
        assert_eq!(stats.dropped_events_count, 1);
        assert_eq!(stats.unordered_events_count, 2);
        assert_eq!(stats.first_timestamp, 100);
        assert_eq!(stats.last_timestamp, 400);

        let counts = node.event_counts(&EventFilter::All, 0, 500, 5).unwrap();
        assert_eq!(counts.iter().sum::<u64>(), 4);
        assert_eq!(node.event_count_at_behaviors(&[4, 5]).unwrap(), vec![4, 0]);

        node.clear().unwrap();
        assert_eq!(node.stats(), NodeStats {
            hostname: "alpha".into(),
            ..NodeStats::default()
        });
        node.shutdown().unwrap();
    }

    #[test]
    fn test_objects_routed_by_host() {
        let node = DatabaseNode::new("beta", settings(Duration::ZERO)).unwrap();
        let class = ObjectId::new(2, 1);
        node.register_class(class, ObjectId(0), "Point").unwrap();
        node.register_object(ObjectId::new(7, 10), 0, b"x=1".to_vec()).unwrap();
        node.register_ref(ObjectId::new(7, 10), 0, class).unwrap();
        node.flush().unwrap();

        assert_eq!(
            node.registered_object(ObjectId::new(7, 10)).unwrap(),
            Some(b"x=1".to_vec())
        );
        assert_eq!(node.registered_object(ObjectId::new(8, 10)).unwrap(), None);
        assert_eq!(
            node.object_type(ObjectId::new(7, 10)).unwrap().map(|c| c.name),
            Some("Point".to_string())
        );

        let stats = node.stats();
        assert_eq!(stats.objects_count, 1);
        assert_eq!(stats.objects_store_size, 3);
        node.shutdown().unwrap();
    }

    #[test]
    fn test_flusher_drains_idle_node() {
        let node = DatabaseNode::new("gamma", settings(Duration::from_millis(20))).unwrap();
        node.push_events((1..=10).map(|ts| exit(ts, 1))).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while node.stats().events_count < 10 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(node.stats().events_count, 10);
        node.shutdown().unwrap();
    }

    #[test]
    fn test_explicit_flush_is_not_cut_short_by_ingestion() {
        let node = DatabaseNode::new(
            "eta",
            DatabaseSettings {
                event_buffer_size: 100_000,
                thread_buffer_size: 100_000,
                ..settings(Duration::ZERO)
            },
        )
        .unwrap();
        node.push_events((1..=50_000).map(|ts| exit(ts, 1))).unwrap();

        let producer = {
            let node = Arc::clone(&node);
            std::thread::spawn(move || {
                for ts in 50_001..=50_100 {
                    node.push_event(exit(ts, 1)).unwrap();
                }
            })
        };
        node.flush().unwrap();
        producer.join().unwrap();
        node.flush().unwrap();

        assert_eq!(node.stats().events_count, 50_100);
        assert_eq!(node.lock_state().unwrap().events.buffered_count(), 0);
        node.shutdown().unwrap();
    }

    #[test]
    fn test_active_cycle_keeps_recent_events_buffered() {
        let node = DatabaseNode::new("theta", settings(Duration::ZERO)).unwrap();
        // events every 0.5ms up to 5ms; with a 1ms delay those before 4ms drain
        node.push_events((1..=10).map(|i| exit(i * 500_000, 1))).unwrap();
        assert!(node.active.load(Ordering::Relaxed));

        node.autoflush_cycle(Duration::from_millis(1));
        assert!(!node.active.load(Ordering::Relaxed));
        assert!(!node.flushed.load(Ordering::Relaxed));

        let stored = node.stats().events_count;
        let buffered = node.lock_state().unwrap().events.buffered_count();
        assert_eq!((stored, buffered), (7, 3));

        // next cycle sees an idle node and drains everything once
        node.autoflush_cycle(Duration::from_millis(1));
        assert_eq!(node.stats().events_count, 10);
        assert!(node.flushed.load(Ordering::Relaxed));
        node.shutdown().unwrap();
    }

    #[test]
    fn test_ingestion_cancels_background_drain() {
        let node = DatabaseNode::new("iota", settings(Duration::ZERO)).unwrap();
        node.push_events((1..=10).map(|ts| exit(ts, 1))).unwrap();
        node.register_object(ObjectId::new(3, 1), 5, b"v".to_vec()).unwrap();

        let monitor = node.install_monitor().unwrap();
        node.push_event(exit(11, 1)).unwrap();
        assert!(monitor.is_cancelled());

        // a cancelled drain leaves both the event and the object buffers alone
        assert_eq!(node.drain_with(Some(&*monitor), None).unwrap(), 0);
        node.remove_monitor().unwrap();
        {
            let state = node.lock_state().unwrap();
            assert_eq!(state.events.buffered_count(), 11);
            assert_eq!(state.objects(3).map(ObjectsDatabase::buffered_count), Some(1));
        }

        assert_eq!(node.flush().unwrap(), 12);
        assert_eq!(node.stats().objects_count, 1);
        node.shutdown().unwrap();
    }

    #[test]
    fn test_browser_sees_flushed_events() {
        let node = DatabaseNode::new("delta", settings(Duration::ZERO)).unwrap();
        node.push_events((0..50).map(|ts| exit(ts * 10, 1))).unwrap();
        node.flush().unwrap();

        let mut browser = node.create_browser(&EventFilter::Thread { host_id: 1, thread_id: 1 }).unwrap();
        browser.set_next_timestamp(245).unwrap();
        let page = browser.next_batch(3).unwrap();
        assert_eq!(page.iter().map(|e| e.timestamp).collect::<Vec<_>>(), vec![250, 260, 270]);
        node.shutdown().unwrap();
    }

    #[test]
    fn test_snapshot_restores_events() {
        let dir = tempdir().unwrap();
        let node = DatabaseNode::new("epsilon", settings(Duration::ZERO)).unwrap();
        node.push_events((1..=20).map(|ts| exit(ts, 1))).unwrap();
        node.save_snapshot(dir.path()).unwrap();
        node.shutdown().unwrap();

        let restored = DatabaseNode::new("epsilon", settings(Duration::ZERO)).unwrap();
        restored.restore_snapshot(dir.path()).unwrap();
        let stats = restored.stats();
        assert_eq!(stats.events_count, 20);
        assert_eq!((stats.first_timestamp, stats.last_timestamp), (1, 20));

        let mut browser = restored.create_browser(&EventFilter::All).unwrap();
        assert_eq!(browser.next_batch(usize::MAX).unwrap().len(), 20);
        restored.shutdown().unwrap();
    }

    #[test]
    fn test_missing_snapshot_is_an_error() {
        let dir = tempdir().unwrap();
        let node = DatabaseNode::new("zeta", settings(Duration::ZERO)).unwrap();
        assert!(matches!(
            node.restore_snapshot(dir.path()),
            Err(StorageError::Io(_))
        ));
        node.shutdown().unwrap();
    }
}
