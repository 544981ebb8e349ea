//! Grid master
//!
//! The master keeps the registry of database nodes, reduces their
//! statistics, notifies listeners and fans queries out to every node.
//!
//! ```text
//!                        ┌──────────── GridMaster ────────────┐
//! register_node ───────→ │ registry (nodes, threads, hosts)   │
//! keep_alive ──────────→ │ watchdog ── timeout ──→ exit       │
//!                        │ stats updater ── changed ──→ listeners
//! queries ─────────────→ │ fan_out ──→ node 1 .. node N       │
//!                        └────────────────────────────────────┘
//! ```
//!
//! Fan-out runs one thread per node and waits at most the node query
//! timeout. Nodes that fail or do not answer in time are logged and left
//! out of the result.

use crate::config::Config;
use crate::db::{EventFilter, LoadedClass, NodeStats, ShutdownSignal};
use crate::grid::browser::GridBrowser;
use crate::grid::connector::NodeConnector;
use crate::grid::listener::{ListenerEntry, ListenerId, MasterListener, MonitorData};
use crate::grid::stats::ClusterStats;
use crate::storage::{ObjectId, StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct MasterSettings {
    /// Keepalive timeout; zero disables the watchdog
    pub timeout: Duration,
    pub stats_initial_delay: Duration,
    pub stats_interval: Duration,
    pub node_query_timeout: Duration,
    pub listener_grace: Duration,
    pub reject_duplicate_hosts: bool,
    pub expected_nodes: usize,
}

impl MasterSettings {
    pub fn from_config(config: &Config) -> Self {
        let master = &config.master;
        Self {
            timeout: Duration::from_secs(master.timeout_secs),
            stats_initial_delay: Duration::from_millis(master.stats_initial_delay_ms),
            stats_interval: Duration::from_millis(master.stats_interval_ms),
            node_query_timeout: Duration::from_millis(master.node_query_timeout_ms),
            listener_grace: Duration::from_millis(master.listener_grace_ms),
            reject_duplicate_hosts: master.reject_duplicate_hosts,
            expected_nodes: master.expected_nodes,
        }
    }
}

impl Default for MasterSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            stats_initial_delay: Duration::from_secs(5),
            stats_interval: Duration::from_secs(3),
            node_query_timeout: Duration::from_secs(30),
            listener_grace: Duration::from_secs(10),
            reject_duplicate_hosts: false,
            expected_nodes: 1,
        }
    }
}

/// A thread of a traced host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub host_id: u32,
    pub thread_id: u32,
    pub name: String,
}

/// A traced host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub host_id: u32,
    pub name: String,
}

/// A registered node as reported by the master
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: u32,
    pub hostname: String,
    /// Statistics from the latest successful stats cycle
    pub stats: Option<NodeStats>,
}

struct RegisteredNode {
    node_id: u32,
    hostname: String,
    connector: Arc<dyn NodeConnector>,
    last_stats: Option<NodeStats>,
}

#[derive(Default)]
struct Registry {
    nodes: Vec<RegisteredNode>,
    threads: Vec<ThreadInfo>,
    hosts: Vec<HostInfo>,
    stats: ClusterStats,
}

pub struct GridMaster {
    settings: MasterSettings,
    registry: Mutex<Registry>,
    node_registered: Condvar,
    listeners: Mutex<Vec<ListenerEntry>>,
    next_listener_id: AtomicU64,
    last_keep_alive: Mutex<Instant>,
    capture_enabled: AtomicBool,
    started: AtomicBool,
    shutdown: Arc<ShutdownSignal>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl GridMaster {
    pub fn new(settings: MasterSettings) -> Arc<Self> {
        Arc::new(Self {
            settings,
            registry: Mutex::new(Registry::default()),
            node_registered: Condvar::new(),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            last_keep_alive: Mutex::new(Instant::now()),
            capture_enabled: AtomicBool::new(true),
            started: AtomicBool::new(false),
            shutdown: Arc::new(ShutdownSignal::new()),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn settings(&self) -> &MasterSettings {
        &self.settings
    }

    fn lock_registry(&self) -> StorageResult<MutexGuard<'_, Registry>> {
        Ok(self.registry.lock()?)
    }

    /// Register a node; ids are assigned sequentially from 1
    pub fn register_node(&self, connector: Arc<dyn NodeConnector>) -> StorageResult<u32> {
        let hostname = connector.hostname();
        let mut registry = self.lock_registry()?;

        if self.settings.reject_duplicate_hosts
            && registry.nodes.iter().any(|n| n.hostname == hostname)
        {
            tracing::warn!(hostname = %hostname, "Rejected node from an already registered host");
            return Err(StorageError::NodeRejected(format!(
                "host already registered: {}",
                hostname
            )));
        }

        let node_id = u32::try_from(registry.nodes.len() + 1)
            .map_err(|_| StorageError::NodeRejected("too many nodes".to_string()))?;
        connector.set_node_id(node_id);
        registry.nodes.push(RegisteredNode {
            node_id,
            hostname: hostname.clone(),
            connector,
            last_stats: None,
        });
        drop(registry);
        self.node_registered.notify_all();

        tracing::info!(node_id, hostname = %hostname, "Node registered");
        Ok(node_id)
    }

    pub fn node_count(&self) -> StorageResult<usize> {
        Ok(self.lock_registry()?.nodes.len())
    }

    pub fn nodes(&self) -> StorageResult<Vec<NodeInfo>> {
        Ok(self
            .lock_registry()?
            .nodes
            .iter()
            .map(|n| NodeInfo {
                node_id: n.node_id,
                hostname: n.hostname.clone(),
                stats: n.last_stats.clone(),
            })
            .collect())
    }

    /// Block until `expected_nodes` nodes are registered, then start the
    /// stats updater and the keepalive watchdog
    pub fn wait_ready(self: &Arc<Self>, expected_nodes: usize) -> StorageResult<()> {
        let mut registry = self.lock_registry()?;
        while registry.nodes.len() < expected_nodes {
            tracing::info!(
                registered = registry.nodes.len(),
                expected = expected_nodes,
                "Waiting for nodes"
            );
            registry = self
                .node_registered
                .wait_timeout(registry, Duration::from_secs(1))?
                .0;
        }
        drop(registry);
        self.start()
    }

    /// Start background threads; later calls do nothing
    pub fn start(self: &Arc<Self>) -> StorageResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        *self.last_keep_alive.lock()? = Instant::now();

        let mut workers = self.workers.lock()?;
        let weak = Arc::downgrade(self);
        let shutdown = Arc::clone(&self.shutdown);
        let (initial, interval) = (self.settings.stats_initial_delay, self.settings.stats_interval);
        workers.push(
            std::thread::Builder::new()
                .name("tracegrid-stats".to_string())
                .spawn(move || stats_loop(weak, shutdown, initial, interval))?,
        );

        if !self.settings.timeout.is_zero() {
            let weak = Arc::downgrade(self);
            let shutdown = Arc::clone(&self.shutdown);
            workers.push(
                std::thread::Builder::new()
                    .name("tracegrid-watchdog".to_string())
                    .spawn(move || watchdog_loop(weak, shutdown))?,
            );
        }

        tracing::info!(
            timeout_secs = self.settings.timeout.as_secs(),
            "Master ready"
        );
        Ok(())
    }

    pub fn keep_alive(&self) -> StorageResult<()> {
        *self.last_keep_alive.lock()? = Instant::now();
        Ok(())
    }

    /// True when the watchdog is enabled and `keep_alive` is overdue
    pub fn keep_alive_expired(&self) -> bool {
        if self.settings.timeout.is_zero() {
            return false;
        }
        match self.last_keep_alive.lock() {
            Ok(last) => last.elapsed() > self.settings.timeout,
            Err(_) => true,
        }
    }

    /// Stop background threads and wait for them
    pub fn shutdown(&self) -> StorageResult<()> {
        self.shutdown.trigger();
        let workers: Vec<JoinHandle<()>> = self.workers.lock()?.drain(..).collect();
        let current = std::thread::current().id();
        for worker in workers {
            if worker.thread().id() != current && worker.join().is_err() {
                tracing::error!("Master worker panicked");
            }
        }
        Ok(())
    }

    fn connectors(&self) -> StorageResult<Vec<(u32, Arc<dyn NodeConnector>)>> {
        Ok(self
            .lock_registry()?
            .nodes
            .iter()
            .map(|n| (n.node_id, Arc::clone(&n.connector)))
            .collect())
    }

    /// Run `task` on every node in parallel, waiting at most the node query timeout
    ///
    /// Returns `(node id, result)` for the nodes that answered successfully.
    fn fan_out<T, F>(&self, what: &'static str, task: F) -> StorageResult<Vec<(u32, T)>>
    where
        T: Send + 'static,
        F: Fn(&dyn NodeConnector) -> StorageResult<T> + Send + Sync + 'static,
    {
        let connectors = self.connectors()?;
        let expected = connectors.len();
        let task = Arc::new(task);
        let (sender, receiver) = mpsc::channel();

        for (node_id, connector) in connectors {
            let task = Arc::clone(&task);
            let sender = sender.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("tracegrid-{}-{}", what, node_id))
                .spawn(move || {
                    let _ = sender.send((node_id, task(connector.as_ref())));
                });
            if let Err(e) = spawned {
                tracing::error!(node_id, error = %e, query = what, "Could not start node query");
            }
        }
        drop(sender);

        let deadline = Instant::now() + self.settings.node_query_timeout;
        let mut results = Vec::with_capacity(expected);
        let mut answered = 0;
        while answered < expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match receiver.recv_timeout(remaining) {
                Ok((node_id, Ok(value))) => {
                    answered += 1;
                    results.push((node_id, value));
                }
                Ok((node_id, Err(e))) => {
                    answered += 1;
                    tracing::warn!(node_id, error = %e, query = what, "Node query failed");
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        answered,
                        expected,
                        query = what,
                        "Node query timed out, returning partial result"
                    );
                    break;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        results.sort_unstable_by_key(|(node_id, _)| *node_id);
        Ok(results)
    }

    /// Pull statistics from every node and reduce them
    pub fn update_stats(&self) -> StorageResult<ClusterStats> {
        let answers = self.fan_out("stats", |node| node.stats())?;

        let mut registry = self.lock_registry()?;
        for (node_id, stats) in answers {
            if let Some(node) = registry.nodes.iter_mut().find(|n| n.node_id == node_id) {
                node.last_stats = Some(stats);
            }
        }
        let mut stats = ClusterStats::reduce(registry.nodes.iter().filter_map(|n| n.last_stats.as_ref()));
        stats.nodes_count = registry.nodes.len();
        stats.threads_count = registry.threads.len();
        registry.stats = stats;
        Ok(stats)
    }

    /// Statistics from the latest stats cycle
    pub fn stats(&self) -> StorageResult<ClusterStats> {
        Ok(self.lock_registry()?.stats)
    }

    pub fn events_count(&self) -> StorageResult<u64> {
        Ok(self.stats()?.events_count)
    }

    pub fn dropped_events_count(&self) -> StorageResult<u64> {
        Ok(self.stats()?.dropped_events_count)
    }

    pub fn first_timestamp(&self) -> StorageResult<u64> {
        Ok(self.stats()?.first_timestamp)
    }

    pub fn last_timestamp(&self) -> StorageResult<u64> {
        Ok(self.stats()?.last_timestamp)
    }

    pub fn register_thread(&self, thread: ThreadInfo) -> StorageResult<()> {
        self.lock_registry()?.threads.push(thread);
        Ok(())
    }

    pub fn register_host(&self, host: HostInfo) -> StorageResult<()> {
        self.lock_registry()?.hosts.push(host);
        Ok(())
    }

    pub fn threads(&self) -> StorageResult<Vec<ThreadInfo>> {
        Ok(self.lock_registry()?.threads.clone())
    }

    pub fn hosts(&self) -> StorageResult<Vec<HostInfo>> {
        Ok(self.lock_registry()?.hosts.clone())
    }

    /// Drain buffered data on every node; returns the number of records drained
    pub fn flush(&self) -> StorageResult<usize> {
        let drained: usize = self
            .fan_out("flush", |node| node.flush())?
            .into_iter()
            .map(|(_, count)| count)
            .sum();
        tracing::info!(drained, "Cluster flushed");
        Ok(drained)
    }

    /// Clear every node and forget threads, hosts and statistics
    pub fn clear(&self) -> StorageResult<()> {
        self.fan_out("clear", |node| node.clear())?;
        {
            let mut registry = self.lock_registry()?;
            registry.threads.clear();
            registry.hosts.clear();
            for node in &mut registry.nodes {
                node.last_stats = None;
            }
        }
        self.update_stats()?;
        tracing::info!("Cluster cleared");
        Ok(())
    }

    /// Histogram over all nodes, summed per bucket
    pub fn event_counts(&self, filter: &EventFilter, t1: u64, t2: u64, slots: usize) -> StorageResult<Vec<u64>> {
        let filter = filter.clone();
        let answers = self.fan_out("counts", move |node| node.event_counts(&filter, t1, t2, slots))?;
        let mut total = vec![0u64; slots];
        for (_, counts) in answers {
            for (sum, count) in total.iter_mut().zip(counts) {
                *sum += count;
            }
        }
        Ok(total)
    }

    pub fn event_count_at_behaviors(&self, behavior_ids: &[u32]) -> StorageResult<Vec<u64>> {
        let ids = behavior_ids.to_vec();
        let answers = self.fan_out("behavior-counts", move |node| node.event_count_at_behaviors(&ids))?;
        let mut total = vec![0u64; behavior_ids.len()];
        for (_, counts) in answers {
            for (sum, count) in total.iter_mut().zip(counts) {
                *sum += count;
            }
        }
        Ok(total)
    }

    /// Serialized state of an object; an object is stored on at most one node
    pub fn registered_object(&self, id: ObjectId) -> StorageResult<Option<Vec<u8>>> {
        let found = self.fan_out("object", move |node| node.registered_object(id))?;
        single_owner(id, found)
    }

    pub fn object_type(&self, id: ObjectId) -> StorageResult<Option<LoadedClass>> {
        let found = self.fan_out("object-type", move |node| node.object_type(id))?;
        single_owner(id, found)
    }

    /// Browser merging the events of every node in timestamp order
    ///
    /// Nodes that fail or do not answer in time are left out of the merge.
    pub fn create_browser(&self, filter: &EventFilter) -> StorageResult<GridBrowser> {
        let filter = filter.clone();
        let browsers = self.fan_out("browser", move |node| node.create_browser(&filter))?;
        Ok(GridBrowser::new(browsers))
    }

    pub fn add_listener(&self, listener: Arc<dyn MasterListener>) -> StorageResult<ListenerId> {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock()?.push(ListenerEntry::new(id, listener));
        tracing::debug!(listener = id.0, "Listener added");
        Ok(id)
    }

    pub fn remove_listener(&self, id: ListenerId) -> StorageResult<bool> {
        let mut listeners = self.listeners.lock()?;
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        Ok(listeners.len() != before)
    }

    pub fn listener_count(&self) -> StorageResult<usize> {
        Ok(self.listeners.lock()?.len())
    }

    /// Deliver a notification to every listener, evicting repeat offenders
    fn fire<F>(&self, what: &'static str, notify: F) -> StorageResult<()>
    where
        F: Fn(&dyn MasterListener) -> anyhow::Result<()>,
    {
        let targets: Vec<(ListenerId, Arc<dyn MasterListener>)> = self
            .listeners
            .lock()?
            .iter()
            .map(|entry| (entry.id, Arc::clone(&entry.listener)))
            .collect();

        // listeners are called without the lock so that they may call back into the master
        let mut outcomes = Vec::with_capacity(targets.len());
        for (id, listener) in targets {
            let result = notify(listener.as_ref());
            if let Err(e) = &result {
                tracing::warn!(listener = id.0, notification = what, error = %e, "Listener failed");
            }
            outcomes.push((id, result.is_ok()));
        }

        let now = Instant::now();
        let grace = self.settings.listener_grace;
        let mut listeners = self.listeners.lock()?;
        listeners.retain_mut(|entry| {
            let Some((_, success)) = outcomes.iter().find(|(id, _)| *id == entry.id) else {
                return true;
            };
            let keep = entry.record(*success, now, grace);
            if !keep {
                tracing::warn!(listener = entry.id.0, "Listener evicted after repeated failures");
            }
            keep
        });
        Ok(())
    }

    pub fn fire_events_received(&self, stats: &ClusterStats) -> StorageResult<()> {
        self.fire("events_received", |l| l.events_received(stats))
    }

    /// Report an exception raised on a node
    pub fn node_exception(&self, node_id: u32, message: &str) -> StorageResult<()> {
        tracing::error!(node_id, message, "Exception on node");
        self.fire("exception", |l| l.exception(node_id, message))
    }

    pub fn push_monitor_data(&self, node_id: u32, data: &MonitorData) -> StorageResult<()> {
        tracing::debug!(node_id, values = ?data.values, "Monitor data");
        self.fire("monitor_data", |l| l.monitor_data(node_id, data))
    }

    pub fn send_enable_capture(&self, enabled: bool) -> StorageResult<()> {
        self.capture_enabled.store(enabled, Ordering::Relaxed);
        tracing::info!(enabled, "Capture toggled");
        self.fire("capture_enabled", |l| l.capture_enabled(enabled))
    }

    pub fn capture_enabled(&self) -> bool {
        self.capture_enabled.load(Ordering::Relaxed)
    }
}

impl Drop for GridMaster {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

fn single_owner<T>(id: ObjectId, found: Vec<(u32, Option<T>)>) -> StorageResult<Option<T>> {
    let mut owners = found.into_iter().filter_map(|(node_id, v)| v.map(|v| (node_id, v)));
    let first = owners.next();
    if let Some((other, _)) = owners.next() {
        return Err(StorageError::InconsistentCluster(format!(
            "object {} found on nodes {} and {}",
            id,
            first.as_ref().map_or(0, |(node_id, _)| *node_id),
            other
        )));
    }
    Ok(first.map(|(_, value)| value))
}

/// Recording rate bookkeeping for the stats log
#[derive(Default)]
struct RateTracker {
    first: Option<(Instant, u64)>,
    previous: Option<(Instant, ClusterStats)>,
}

impl RateTracker {
    /// Returns true when `stats` differ from the previous cycle
    fn observe(&mut self, stats: ClusterStats, now: Instant) -> bool {
        let (first_time, first_count) = *self.first.get_or_insert((now, stats.events_count));
        let changed = self
            .previous
            .map_or(true, |(_, previous)| stats.differs_from(&previous));
        if !changed {
            return false;
        }

        let (previous_time, previous_count) = self
            .previous
            .map_or((first_time, first_count), |(t, s)| (t, s.events_count));
        let rate = per_second(stats.events_count.saturating_sub(previous_count), now - previous_time);
        let average = per_second(stats.events_count.saturating_sub(first_count), now - first_time);
        tracing::info!(
            rate_events_per_sec = rate,
            avg_events_per_sec = average,
            events = stats.events_count,
            dropped = stats.dropped_events_count,
            objects_store_size = stats.objects_store_size,
            "Recording stats"
        );

        self.previous = Some((now, stats));
        true
    }
}

fn per_second(count: u64, elapsed: Duration) -> u64 {
    let millis = elapsed.as_millis();
    if millis == 0 {
        0
    } else {
        (count as u128 * 1000 / millis) as u64
    }
}

fn stats_loop(master: Weak<GridMaster>, shutdown: Arc<ShutdownSignal>, initial: Duration, interval: Duration) {
    let mut tracker = RateTracker::default();
    let mut wait = initial;
    loop {
        if shutdown.wait(wait) {
            break;
        }
        wait = interval;
        let Some(master) = master.upgrade() else {
            break;
        };
        match master.update_stats() {
            Ok(stats) => {
                if tracker.observe(stats, Instant::now()) {
                    if let Err(e) = master.fire_events_received(&stats) {
                        tracing::error!(error = %e, "Could not notify listeners");
                    }
                }
            }
            Err(e) => tracing::error!(error = %e, "Stats update failed"),
        }
    }
    tracing::debug!("Stats updater stopped");
}

fn watchdog_loop(master: Weak<GridMaster>, shutdown: Arc<ShutdownSignal>) {
    loop {
        let Some(strong) = master.upgrade() else {
            break;
        };
        let period = (strong.settings.timeout / 2).clamp(Duration::from_millis(100), Duration::from_secs(1));
        if strong.keep_alive_expired() {
            tracing::error!(
                timeout_secs = strong.settings.timeout.as_secs(),
                "No keepalive received within timeout, exiting"
            );
            std::process::exit(1);
        }
        drop(strong);
        if shutdown.wait(period) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DatabaseNode, DatabaseSettings};
    use crate::grid::browser::BrowsePosition;
    use crate::grid::connector::LocalNodeConnector;
    use crate::storage::{Event, EventKind};
    use std::sync::atomic::AtomicUsize;

    fn settings() -> MasterSettings {
        MasterSettings {
            node_query_timeout: Duration::from_secs(5),
            ..MasterSettings::default()
        }
    }

    fn local_node(hostname: &str) -> Arc<DatabaseNode> {
        let settings = DatabaseSettings {
            event_buffer_size: 64,
            thread_buffer_size: 64,
            autoflush_delay: Duration::ZERO,
            ..DatabaseSettings::default()
        };
        DatabaseNode::new(hostname, settings).unwrap()
    }

    fn write(timestamp: u64, thread: u32, variable: u32) -> Event {
        Event::new(timestamp, 1, thread, EventKind::LocalWrite { variable, value: None }).at(3, 0)
    }

    fn cluster(hosts: &[&str]) -> (Arc<GridMaster>, Vec<Arc<DatabaseNode>>) {
        let master = GridMaster::new(settings());
        let nodes: Vec<_> = hosts.iter().map(|h| local_node(h)).collect();
        for node in &nodes {
            master
                .register_node(Arc::new(LocalNodeConnector::new(Arc::clone(node))))
                .unwrap();
        }
        (master, nodes)
    }

    #[test]
    fn test_node_ids_are_sequential() {
        let (master, nodes) = cluster(&["a", "b", "a"]);
        assert_eq!(nodes.iter().map(|n| n.node_id()).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(master.node_count().unwrap(), 3);
    }

    #[test]
    fn test_duplicate_host_rejected_by_policy() {
        let master = GridMaster::new(MasterSettings {
            reject_duplicate_hosts: true,
            ..settings()
        });
        let connect = |host: &str| Arc::new(LocalNodeConnector::new(local_node(host)));
        assert_eq!(master.register_node(connect("alpha")).unwrap(), 1);
        assert!(matches!(
            master.register_node(connect("alpha")),
            Err(StorageError::NodeRejected(_))
        ));
        assert_eq!(master.register_node(connect("beta")).unwrap(), 2);
    }

    #[test]
    fn test_stats_and_queries_span_nodes() {
        let (master, nodes) = cluster(&["a", "b"]);
        nodes[0].push_events((0..10).map(|i| write(100 + i * 10, 1, 1))).unwrap();
        nodes[1].push_events((0..5).map(|i| write(95 + i * 20, 2, 2))).unwrap();
        master.flush().unwrap();

        let stats = master.update_stats().unwrap();
        assert_eq!(stats.nodes_count, 2);
        assert_eq!(stats.events_count, 15);
        assert_eq!((stats.first_timestamp, stats.last_timestamp), (95, 190));
        assert_eq!(master.events_count().unwrap(), 15);

        let counts = master.event_counts(&EventFilter::Variable(2), 0, 200, 2).unwrap();
        assert_eq!(counts.iter().sum::<u64>(), 5);
        assert_eq!(master.event_count_at_behaviors(&[3, 4]).unwrap(), vec![15, 0]);

        let infos = master.nodes().unwrap();
        assert_eq!(infos[1].stats.as_ref().map(|s| s.events_count), Some(5));

        master.clear().unwrap();
        assert_eq!(master.stats().unwrap().events_count, 0);
    }

    #[test]
    fn test_grid_browser_merges_nodes() {
        let (master, nodes) = cluster(&["a", "b"]);
        nodes[0].push_events([write(10, 1, 0), write(30, 1, 0), write(30, 1, 0)]).unwrap();
        nodes[1].push_events([write(20, 2, 0), write(30, 2, 0), write(40, 2, 0)]).unwrap();
        master.flush().unwrap();

        let mut browser = master.create_browser(&EventFilter::All).unwrap();
        let all: Vec<(u64, u32)> = browser
            .next_batch(usize::MAX)
            .unwrap()
            .into_iter()
            .map(|e| (e.event.timestamp, e.node_id))
            .collect();
        assert_eq!(all, vec![(10, 1), (20, 2), (30, 1), (30, 1), (30, 2), (40, 2)]);

        let mut backwards = Vec::new();
        while let Some(e) = browser.previous().unwrap() {
            backwards.push((e.event.timestamp, e.node_id));
        }
        backwards.reverse();
        assert_eq!(backwards, all);

        browser.set_previous_timestamp(30);
        let before = browser.previous_batch(2).unwrap();
        assert_eq!(
            before.iter().map(|e| (e.event.timestamp, e.node_id)).collect::<Vec<_>>(),
            vec![(30, 1), (30, 2)]
        );
        assert_eq!(browser.next().unwrap().map(|e| e.node_id), Some(1));

        browser.set_next_timestamp(25);
        assert_eq!(browser.next().unwrap().map(|e| e.event.timestamp), Some(30));
    }

    #[test]
    fn test_position_resumes_within_shared_timestamp() {
        let (master, nodes) = cluster(&["a", "b"]);
        nodes[0].push_events([write(10, 1, 0), write(20, 1, 0), write(20, 1, 0)]).unwrap();
        nodes[1].push_events([write(20, 2, 0), write(30, 2, 0)]).unwrap();
        master.flush().unwrap();

        let mut pages = Vec::new();
        let mut position = BrowsePosition::at(0);
        loop {
            // a fresh browser per page, as the API does
            let mut browser = master.create_browser(&EventFilter::All).unwrap();
            browser.seek(position);
            let page = browser.next_batch(2).unwrap();
            pages.extend(page.iter().map(|e| (e.event.timestamp, e.node_id)));
            if page.len() < 2 {
                break;
            }
            position = browser.position();
        }
        assert_eq!(pages, vec![(10, 1), (20, 1), (20, 1), (20, 2), (30, 2)]);

        let mut browser = master.create_browser(&EventFilter::All).unwrap();
        browser.seek(BrowsePosition::MAX);
        let last = browser.previous_batch(3).unwrap();
        assert_eq!(last.iter().map(|e| e.node_id).collect::<Vec<_>>(), vec![1, 2, 2]);

        let mut resumed = master.create_browser(&EventFilter::All).unwrap();
        resumed.seek(browser.position());
        let earlier = resumed.previous_batch(10).unwrap();
        assert_eq!(
            earlier.iter().map(|e| (e.event.timestamp, e.node_id)).collect::<Vec<_>>(),
            vec![(10, 1), (20, 1)]
        );
    }

    #[test]
    fn test_object_lookup_detects_duplicates() {
        let (master, nodes) = cluster(&["a", "b"]);
        let id = ObjectId::new(1, 5);
        nodes[0].register_object(id, 0, vec![1]).unwrap();
        nodes[0].flush().unwrap();
        assert_eq!(master.registered_object(id).unwrap(), Some(vec![1]));
        assert_eq!(master.registered_object(ObjectId::new(1, 6)).unwrap(), None);

        nodes[1].register_object(id, 0, vec![2]).unwrap();
        nodes[1].flush().unwrap();
        assert!(matches!(
            master.registered_object(id),
            Err(StorageError::InconsistentCluster(_))
        ));
    }

    #[test]
    fn test_thread_and_host_tables() {
        let (master, _nodes) = cluster(&["a"]);
        master
            .register_host(HostInfo { host_id: 1, name: "vm".into() })
            .unwrap();
        master
            .register_thread(ThreadInfo { host_id: 1, thread_id: 7, name: "main".into() })
            .unwrap();
        assert_eq!(master.update_stats().unwrap().threads_count, 1);
        assert_eq!(master.hosts().unwrap().len(), 1);

        master.clear().unwrap();
        assert!(master.threads().unwrap().is_empty());
        assert!(master.hosts().unwrap().is_empty());
    }

    #[derive(Default)]
    struct Flaky {
        fail: AtomicBool,
        calls: AtomicUsize,
        received: Mutex<Vec<String>>,
    }

    impl Flaky {
        fn failing() -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(true),
                ..Self::default()
            })
        }

        fn answer(&self, note: String) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.received.lock().unwrap().push(note);
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("listener unreachable");
            }
            Ok(())
        }
    }

    impl MasterListener for Flaky {
        fn events_received(&self, stats: &ClusterStats) -> anyhow::Result<()> {
            self.answer(format!("events {}", stats.events_count))
        }

        fn exception(&self, node_id: u32, message: &str) -> anyhow::Result<()> {
            self.answer(format!("exception {} {}", node_id, message))
        }

        fn monitor_data(&self, node_id: u32, data: &MonitorData) -> anyhow::Result<()> {
            self.answer(format!("monitor {} {:?}", node_id, data.values.get("heap")))
        }

        fn capture_enabled(&self, enabled: bool) -> anyhow::Result<()> {
            self.answer(format!("capture {}", enabled))
        }
    }

    #[test]
    fn test_listener_evicted_after_two_failures() {
        let master = GridMaster::new(settings());
        let flaky = Flaky::failing();
        master.add_listener(flaky.clone()).unwrap();
        let stats = ClusterStats::default();

        master.fire_events_received(&stats).unwrap();
        assert_eq!(master.listener_count().unwrap(), 1);

        flaky.fail.store(false, Ordering::SeqCst);
        master.fire_events_received(&stats).unwrap();
        flaky.fail.store(true, Ordering::SeqCst);
        master.fire_events_received(&stats).unwrap();
        assert_eq!(master.listener_count().unwrap(), 1);

        master.fire_events_received(&stats).unwrap();
        assert_eq!(master.listener_count().unwrap(), 0);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_every_notification_reaches_listeners() {
        let master = GridMaster::new(settings());
        let flaky = Arc::new(Flaky::default());
        master.add_listener(flaky.clone()).unwrap();

        master.node_exception(2, "disk full").unwrap();
        master
            .push_monitor_data(3, &MonitorData::default().with("heap", 0.5))
            .unwrap();
        assert!(!master.capture_enabled());
        master.send_enable_capture(true).unwrap();
        assert!(master.capture_enabled());

        assert_eq!(
            *flaky.received.lock().unwrap(),
            vec!["exception 2 disk full", "monitor 3 Some(0.5)", "capture true"]
        );
    }

    #[test]
    fn test_failing_capture_listener_is_evicted() {
        let master = GridMaster::new(settings());
        let flaky = Flaky::failing();
        let steady = Arc::new(Flaky::default());
        master.add_listener(flaky.clone()).unwrap();
        master.add_listener(steady.clone()).unwrap();

        master.send_enable_capture(true).unwrap();
        assert_eq!(master.listener_count().unwrap(), 2);
        master.send_enable_capture(false).unwrap();
        assert_eq!(master.listener_count().unwrap(), 1);
        assert!(!master.capture_enabled());

        // evicted listeners hear nothing more
        master.node_exception(1, "late").unwrap();
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
        assert_eq!(steady.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exception_and_monitor_failures_count_together() {
        let master = GridMaster::new(settings());
        let flaky = Flaky::failing();
        master.add_listener(flaky.clone()).unwrap();

        master.node_exception(1, "boom").unwrap();
        assert_eq!(master.listener_count().unwrap(), 1);
        master.push_monitor_data(1, &MonitorData::default()).unwrap();
        assert_eq!(master.listener_count().unwrap(), 0);
    }

    #[test]
    fn test_remove_listener() {
        let master = GridMaster::new(settings());
        let id = master.add_listener(Arc::new(Flaky::default())).unwrap();
        assert!(master.remove_listener(id).unwrap());
        assert!(!master.remove_listener(id).unwrap());
    }

    #[test]
    fn test_keep_alive_watchdog_state() {
        let master = GridMaster::new(MasterSettings {
            timeout: Duration::from_millis(50),
            ..settings()
        });
        assert!(!master.keep_alive_expired());
        std::thread::sleep(Duration::from_millis(80));
        assert!(master.keep_alive_expired());
        master.keep_alive().unwrap();
        assert!(!master.keep_alive_expired());

        let disabled = GridMaster::new(settings());
        std::thread::sleep(Duration::from_millis(10));
        assert!(!disabled.keep_alive_expired());
    }

    struct Stalled;

    impl NodeConnector for Stalled {
        fn hostname(&self) -> String {
            "stalled".into()
        }
        fn set_node_id(&self, _node_id: u32) {}
        fn stats(&self) -> StorageResult<NodeStats> {
            std::thread::sleep(Duration::from_secs(2));
            Ok(NodeStats::default())
        }
        fn flush(&self) -> StorageResult<usize> {
            Ok(0)
        }
        fn clear(&self) -> StorageResult<()> {
            Ok(())
        }
        fn event_counts(&self, _f: &EventFilter, _t1: u64, _t2: u64, slots: usize) -> StorageResult<Vec<u64>> {
            Ok(vec![0; slots])
        }
        fn create_browser(&self, _f: &EventFilter) -> StorageResult<crate::db::EventBrowser> {
            Err(StorageError::NotFound("browser".into()))
        }
        fn event_count_at_behaviors(&self, ids: &[u32]) -> StorageResult<Vec<u64>> {
            Ok(vec![0; ids.len()])
        }
        fn registered_object(&self, _id: ObjectId) -> StorageResult<Option<Vec<u8>>> {
            Ok(None)
        }
        fn object_type(&self, _id: ObjectId) -> StorageResult<Option<LoadedClass>> {
            Ok(None)
        }
    }

    #[test]
    fn test_slow_node_yields_partial_stats() {
        let master = GridMaster::new(MasterSettings {
            node_query_timeout: Duration::from_millis(200),
            ..settings()
        });
        let node = local_node("fast");
        node.push_event(write(5, 1, 0)).unwrap();
        node.flush().unwrap();
        master.register_node(Arc::new(LocalNodeConnector::new(node))).unwrap();
        master.register_node(Arc::new(Stalled)).unwrap();

        let started = Instant::now();
        let stats = master.update_stats().unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(stats.nodes_count, 2);
        assert_eq!(stats.events_count, 1);
    }

    #[test]
    fn test_browser_skips_failing_node() {
        let master = GridMaster::new(settings());
        let node = local_node("healthy");
        node.push_events([write(10, 1, 0), write(20, 1, 0)]).unwrap();
        node.flush().unwrap();
        master.register_node(Arc::new(LocalNodeConnector::new(node))).unwrap();
        master.register_node(Arc::new(Stalled)).unwrap();

        let mut browser = master.create_browser(&EventFilter::All).unwrap();
        let found: Vec<(u64, u32)> = browser
            .next_batch(usize::MAX)
            .unwrap()
            .into_iter()
            .map(|e| (e.event.timestamp, e.node_id))
            .collect();
        assert_eq!(found, vec![(10, 1), (20, 1)]);
    }

    #[test]
    fn test_wait_ready_starts_once() {
        let (master, _nodes) = cluster(&["a"]);
        master.wait_ready(1).unwrap();
        master.wait_ready(1).unwrap();
        assert_eq!(master.workers.lock().unwrap().len(), 1);
        master.shutdown().unwrap();
    }
}
