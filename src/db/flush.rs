//! Flush coordination primitives

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Advisory cancellation flag shared by a flush and the ingestion path
///
/// Ingestion cancels the current flush so that producers are not stalled
/// behind a long drain. The flag is advisory: a flush polls it between
/// records, so relaxed ordering is enough.
#[derive(Debug, Default)]
pub struct FlushMonitor {
    cancelled: AtomicBool,
}

impl FlushMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Drain loop pacing: polls the monitor and yields every `check_interval` records
pub(crate) struct FlushPacer<'a> {
    monitor: Option<&'a FlushMonitor>,
    check_interval: usize,
    count: usize,
}

impl<'a> FlushPacer<'a> {
    pub fn new(monitor: Option<&'a FlushMonitor>, check_interval: usize) -> Self {
        Self {
            monitor,
            check_interval: check_interval.max(1),
            count: 0,
        }
    }

    /// False once the flush has been cancelled
    pub fn proceed(&mut self) -> bool {
        let Some(monitor) = self.monitor else {
            self.count += 1;
            return true;
        };
        if monitor.is_cancelled() {
            return false;
        }
        if self.count % self.check_interval == 0 {
            std::thread::yield_now();
        }
        self.count += 1;
        true
    }

    pub fn cancelled(&self) -> bool {
        self.monitor.is_some_and(FlushMonitor::is_cancelled)
    }
}

/// One-shot stop signal for background threads
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        if let Ok(mut stopped) = self.stopped.lock() {
            *stopped = true;
        }
        self.condvar.notify_all();
    }

    /// Sleep up to `timeout`; true if the signal fired
    pub fn wait(&self, timeout: Duration) -> bool {
        let Ok(stopped) = self.stopped.lock() else {
            return true;
        };
        match self.condvar.wait_timeout_while(stopped, timeout, |stopped| !*stopped) {
            Ok((stopped, _)) => *stopped,
            Err(_) => true,
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.stopped.lock().map(|s| *s).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_pacer_stops_after_cancel() {
        let monitor = FlushMonitor::new();
        let mut pacer = FlushPacer::new(Some(&monitor), 16);
        assert!(pacer.proceed());
        assert!(pacer.proceed());
        monitor.cancel();
        assert!(!pacer.proceed());
        assert!(pacer.cancelled());

        let mut unmonitored = FlushPacer::new(None, 16);
        assert!(unmonitored.proceed());
        assert!(!unmonitored.cancelled());
    }

    #[test]
    fn test_shutdown_wakes_waiter() {
        let signal = Arc::new(ShutdownSignal::new());
        assert!(!signal.wait(Duration::from_millis(1)));

        let waiter = {
            let signal = Arc::clone(&signal);
            std::thread::spawn(move || {
                let start = Instant::now();
                let fired = signal.wait(Duration::from_secs(30));
                (fired, start.elapsed())
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        signal.trigger();

        let (fired, elapsed) = waiter.join().unwrap();
        assert!(fired);
        assert!(elapsed < Duration::from_secs(10));
        assert!(signal.is_triggered());
    }
}
