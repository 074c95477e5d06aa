//! Named, bounded worker pools with graceful shutdown.
//!
//! A [`Scheduler`] owns a fixed set of OS threads draining a shared task
//! queue. Pools are independently named and sized so that slow blocking work
//! never starves lightweight dispatch, and worker thread names carry the
//! pool name (`{name}.{index}`) because pool identity is observable
//! behavior: callers assert which pool ran a stage by thread name.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::SchedulerError;

/// A unit of work submitted to a pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Tracks how many workers are still alive so `stop` can await drain.
#[derive(Debug)]
struct WorkerCount {
    live: Mutex<usize>,
    all_exited: Condvar,
}

/// A named, bounded, lifecycle-managed worker pool.
///
/// Lifecycle: `start` spawns the workers; `stop(timeout)` closes the queue,
/// lets workers drain in-flight and queued tasks for up to `timeout`, then
/// abandons stragglers with a warning. `stop` is idempotent and never fails.
#[derive(Debug)]
pub struct Scheduler {
    name: String,
    size: usize,
    sender: RwLock<Option<Sender<Task>>>,
    cancelled: Arc<AtomicBool>,
    count: Arc<WorkerCount>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Start a pool of `size` workers named `{name}.0` .. `{name}.{size-1}`.
    pub fn start(name: impl Into<String>, size: usize) -> Result<Arc<Self>, SchedulerError> {
        let name = name.into();
        let size = size.max(1);
        let (sender, receiver) = crossbeam_channel::unbounded::<Task>();
        let cancelled = Arc::new(AtomicBool::new(false));
        let count = Arc::new(WorkerCount {
            live: Mutex::new(size),
            all_exited: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(size);
        for index in 0..size {
            let thread_name = format!("{name}.{index}");
            let receiver = receiver.clone();
            let cancelled = cancelled.clone();
            let count = count.clone();
            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    worker_loop(&thread_name, &receiver, &cancelled);
                    let mut live = count.live.lock();
                    *live -= 1;
                    if *live == 0 {
                        count.all_exited.notify_all();
                    }
                })
                .map_err(|source| SchedulerError::Spawn {
                    name: name.clone(),
                    source,
                })?;
            handles.push(handle);
        }

        info!(scheduler = %name, size, "scheduler started");
        Ok(Arc::new(Self {
            name,
            size,
            sender: RwLock::new(Some(sender)),
            cancelled,
            count,
            handles: Mutex::new(handles),
        }))
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of worker threads.
    pub fn pool_size(&self) -> usize {
        self.size
    }

    /// Whether `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Submit a task for execution on one of the workers.
    pub fn execute(&self, task: Task) -> Result<(), SchedulerError> {
        let guard = self.sender.read();
        match guard.as_ref() {
            Some(sender) => sender
                .send(task)
                .map_err(|_| SchedulerError::Stopped(self.name.clone())),
            None => Err(SchedulerError::Stopped(self.name.clone())),
        }
    }

    /// Stop the pool, draining outstanding work for up to `timeout`.
    ///
    /// Workers finish the queued backlog and exit. If the drain exceeds the
    /// timeout, remaining queued tasks are discarded and still-busy workers
    /// are abandoned (they exit after their current task); a warning is
    /// logged. Calling `stop` again is a no-op.
    pub fn stop(&self, timeout: Duration) {
        let sender = self.sender.write().take();
        if sender.is_none() {
            debug!(scheduler = %self.name, "stop called on already-stopped scheduler");
            return;
        }
        // Dropping the only sender disconnects the queue; workers drain the
        // backlog and exit.
        drop(sender);

        let deadline = Instant::now() + timeout;
        let mut live = self.count.live.lock();
        while *live > 0 {
            if self
                .count
                .all_exited
                .wait_until(&mut live, deadline)
                .timed_out()
            {
                break;
            }
        }
        let remaining = *live;
        drop(live);

        if remaining == 0 {
            for handle in self.handles.lock().drain(..) {
                // Workers have already signalled exit; joins are immediate.
                let _ = handle.join();
            }
            info!(scheduler = %self.name, "scheduler stopped");
        } else {
            // Tell stragglers to discard the rest of the backlog and leave
            // them detached so shutdown always makes progress.
            self.cancelled.store(true, Ordering::Release);
            self.handles.lock().clear();
            warn!(
                scheduler = %self.name,
                busy_workers = remaining,
                timeout = ?timeout,
                "scheduler stop timed out; abandoning busy workers and discarding queued tasks"
            );
        }
    }
}

fn worker_loop(thread_name: &str, receiver: &Receiver<Task>, cancelled: &AtomicBool) {
    while let Ok(task) = receiver.recv() {
        if cancelled.load(Ordering::Acquire) {
            // Drain-discard: shutdown already timed out.
            continue;
        }
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            warn!(worker = %thread_name, "task panicked; worker continues");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    #[test]
    fn test_executes_submitted_tasks() {
        let scheduler = Scheduler::start("test-pool", 2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..16 {
            let counter = counter.clone();
            scheduler
                .execute(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        scheduler.stop(Duration::from_secs(5));
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_worker_threads_carry_pool_name() {
        let scheduler = Scheduler::start("named-pool", 1).unwrap();
        let (tx, rx) = mpsc::channel();
        scheduler
            .execute(Box::new(move || {
                tx.send(thread::current().name().unwrap_or("").to_string())
                    .unwrap();
            }))
            .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(name.starts_with("named-pool."), "got thread name {name}");
        scheduler.stop(Duration::from_secs(1));
    }

    #[test]
    fn test_execute_after_stop_is_rejected() {
        let scheduler = Scheduler::start("stopped-pool", 1).unwrap();
        scheduler.stop(Duration::from_secs(1));

        let result = scheduler.execute(Box::new(|| {}));
        assert!(matches!(result, Err(SchedulerError::Stopped(_))));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let scheduler = Scheduler::start("twice-stopped", 2).unwrap();
        scheduler.stop(Duration::from_secs(1));
        // Second stop must be a silent no-op.
        scheduler.stop(Duration::from_secs(1));
        assert!(scheduler.is_stopped());
    }

    #[test]
    fn test_stop_drains_queued_backlog() {
        let scheduler = Scheduler::start("draining-pool", 1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let counter = counter.clone();
            scheduler
                .execute(Box::new(move || {
                    thread::sleep(Duration::from_millis(5));
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        scheduler.stop(Duration::from_secs(5));
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_stop_times_out_on_stuck_worker() {
        let scheduler = Scheduler::start("stuck-pool", 1).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        scheduler
            .execute(Box::new(move || {
                let _ = release_rx.recv_timeout(Duration::from_secs(10));
            }))
            .unwrap();

        let started = Instant::now();
        scheduler.stop(Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(scheduler.is_stopped());
        release_tx.send(()).unwrap();
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let scheduler = Scheduler::start("panic-pool", 1).unwrap();
        scheduler.execute(Box::new(|| panic!("boom"))).unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        scheduler
            .execute(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        scheduler.stop(Duration::from_secs(5));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
