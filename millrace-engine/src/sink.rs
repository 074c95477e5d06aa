//! Sinks: the single-event entry points produced by a processing strategy.
//!
//! A sink is bound to one pipeline. Producers call [`Sink::accept`]; the
//! sink either executes inline (synchronous strategies), hands the whole
//! execution to a scheduler (fire-and-forget), or publishes into the
//! demultiplexing ring for subscriber threads to pick up. Disposing a sink
//! closes it to producers, drains the ring, and joins its subscribers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, info};

use millrace_event::Event;
use millrace_scheduler::{RingBuffer, RingMonitor, Scheduler, WaitStrategy, RING};

use crate::dispatcher::{Completion, Dispatcher};
use crate::error::{ConfigError, EngineError, ProcessError};
use crate::limiter::{ConcurrencyLimiter, Permit};
use crate::pipeline::Pipeline;
use crate::transaction::TransactionContext;

/// Atomic sink counters.
#[derive(Debug, Default)]
pub(crate) struct SinkCounters {
    accepted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

impl SinkCounters {
    fn snapshot(&self) -> SinkMetrics {
        SinkMetrics {
            accepted: self.accepted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of a ring sink's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkMetrics {
    /// Events published into the ring
    pub accepted: u64,
    /// Events completed successfully
    pub completed: u64,
    /// Events completed exceptionally
    pub failed: u64,
    /// Events refused because the sink was disposed
    pub rejected: u64,
}

/// Build the per-event completion: counts the outcome, notifies the
/// pipeline's terminal handler, and releases the concurrency permit.
fn completion_for(
    pipeline: &Pipeline,
    counters: Option<Arc<SinkCounters>>,
    permit: Option<Permit>,
) -> Completion {
    let pipeline = pipeline.clone();
    Box::new(move |outcome| {
        if let Some(counters) = &counters {
            match &outcome {
                Ok(_) => counters.completed.fetch_add(1, Ordering::Relaxed),
                Err(_) => counters.failed.fetch_add(1, Ordering::Relaxed),
            };
        }
        pipeline.complete(&outcome);
        drop(permit);
    })
}

// ── Inline sink ──────────────────────────────────────────────────────

/// Runs the whole pipeline on the caller thread.
///
/// Stage failures surface both through the completion handler and as the
/// direct return value of `accept`, so the producer sees them immediately.
pub struct InlineSink {
    pipeline: Pipeline,
    dispatcher: Arc<Dispatcher>,
    closed: AtomicBool,
}

impl InlineSink {
    pub(crate) fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            dispatcher: Dispatcher::inline(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn accept(&self, event: Event) -> Result<(), ProcessError> {
        let event_id = event.id;
        if self.closed.load(Ordering::Acquire) {
            return Err(ProcessError::Rejected { event_id });
        }

        let outcome_slot: Arc<Mutex<Option<Result<Event, ProcessError>>>> =
            Arc::new(Mutex::new(None));
        let slot = outcome_slot.clone();
        let pipeline = self.pipeline.clone();
        let completion: Completion = Box::new(move |outcome| {
            pipeline.complete(&outcome);
            *slot.lock() = Some(outcome);
        });

        self.dispatcher.execute(&self.pipeline, event, completion);

        // Inline execution delivers the outcome before `execute` returns.
        let outcome = outcome_slot.lock().take();
        match outcome {
            Some(Ok(_)) | None => Ok(()),
            Some(Err(error)) => Err(error),
        }
    }

    pub fn dispose(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

// ── Dispatch sink (fire-and-forget) ──────────────────────────────────

/// Enqueues the whole execution onto one scheduler and returns immediately.
/// The caller never awaits completion; failures reach the completion
/// handler only.
pub struct DispatchSink {
    pipeline: Pipeline,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<Scheduler>,
    limiter: Option<ConcurrencyLimiter>,
    tx: Arc<dyn TransactionContext>,
    closed: AtomicBool,
}

impl DispatchSink {
    pub(crate) fn new(
        pipeline: Pipeline,
        scheduler: Arc<Scheduler>,
        limiter: Option<ConcurrencyLimiter>,
        tx: Arc<dyn TransactionContext>,
    ) -> Self {
        Self {
            pipeline,
            dispatcher: Dispatcher::inline(),
            scheduler,
            limiter,
            tx,
            closed: AtomicBool::new(false),
        }
    }

    pub fn accept(&self, event: Event) -> Result<(), ProcessError> {
        let event_id = event.id;
        if self.closed.load(Ordering::Acquire) {
            return Err(ProcessError::Rejected { event_id });
        }
        if self.tx.is_transaction_active() {
            return Err(ProcessError::TransactionActive { event_id });
        }

        let permit = self.limiter.as_ref().map(ConcurrencyLimiter::acquire);
        let completion = completion_for(&self.pipeline, None, permit);
        let dispatcher = self.dispatcher.clone();
        let pipeline = self.pipeline.clone();

        self.scheduler
            .execute(Box::new(move || {
                dispatcher.execute(&pipeline, event, completion)
            }))
            .map_err(|_| ProcessError::Rejected { event_id })
    }

    pub fn dispose(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

// ── Ring sink ────────────────────────────────────────────────────────

struct Work {
    event: Event,
    permit: Option<Permit>,
}

struct RingShared {
    name: String,
    ring: RingBuffer<Work>,
    /// Consumers park here while the ring is empty.
    items: RingMonitor,
    /// Producers park here while the ring is full.
    space: RingMonitor,
    wait: WaitStrategy,
    closed: AtomicBool,
    dispatcher: Arc<Dispatcher>,
    /// Work-queue strategy: each event's whole body goes to this pool.
    flat_map: Option<Arc<Scheduler>>,
    pipeline: Pipeline,
    counters: Arc<SinkCounters>,
}

impl RingShared {
    fn process(&self, work: Work) {
        let Work { event, permit } = work;
        let completion = completion_for(&self.pipeline, Some(self.counters.clone()), permit);
        match &self.flat_map {
            Some(pool) => {
                let dispatcher = self.dispatcher.clone();
                let pipeline = self.pipeline.clone();
                if let Err(error) = pool.execute(Box::new(move || {
                    dispatcher.execute(&pipeline, event, completion)
                })) {
                    debug!(%error, "event dropped by stopping work-queue pool");
                }
            }
            None => self.dispatcher.execute(&self.pipeline, event, completion),
        }
    }
}

/// Demultiplexing sink: producers publish into a bounded ring, subscriber
/// threads race to claim events and run the dispatcher.
///
/// FIFO order is preserved end-to-end with a single subscriber; with more,
/// no cross-subscriber ordering is guaranteed. That is the price paid for
/// throughput.
pub struct RingSink {
    shared: Arc<RingShared>,
    limiter: Option<ConcurrencyLimiter>,
    tx: Arc<dyn TransactionContext>,
    subscribers: Mutex<Vec<JoinHandle<()>>>,
}

impl RingSink {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        pipeline: Pipeline,
        capacity: usize,
        subscriber_count: usize,
        wait: WaitStrategy,
        dispatcher: Arc<Dispatcher>,
        flat_map: Option<Arc<Scheduler>>,
        limiter: Option<ConcurrencyLimiter>,
        tx: Arc<dyn TransactionContext>,
    ) -> Result<Self, EngineError> {
        let ring = RingBuffer::with_capacity(capacity)
            .map_err(|_| ConfigError::BufferSizeNotPowerOfTwo(capacity))?;

        let shared = Arc::new(RingShared {
            name: format!("{}.{}", pipeline.name(), RING),
            ring,
            items: RingMonitor::new(),
            space: RingMonitor::new(),
            wait,
            closed: AtomicBool::new(false),
            dispatcher,
            flat_map,
            pipeline,
            counters: Arc::new(SinkCounters::default()),
        });

        let mut subscribers = Vec::with_capacity(subscriber_count);
        for index in 0..subscriber_count {
            let worker = shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{}.{index}", shared.name))
                .spawn(move || subscriber_loop(&worker))
                .map_err(|source| millrace_scheduler::SchedulerError::Spawn {
                    name: shared.name.clone(),
                    source,
                })?;
            subscribers.push(handle);
        }

        Ok(Self {
            shared,
            limiter,
            tx,
            subscribers: Mutex::new(subscribers),
        })
    }

    pub fn accept(&self, event: Event) -> Result<(), ProcessError> {
        let event_id = event.id;
        if self.shared.closed.load(Ordering::Acquire) {
            self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(ProcessError::Rejected { event_id });
        }
        if self.tx.is_transaction_active() {
            return Err(ProcessError::TransactionActive { event_id });
        }

        // Backpressure point: blocks once max_concurrency events are in
        // flight, before the ring is even consulted.
        let permit = self.limiter.as_ref().map(ConcurrencyLimiter::acquire);
        let mut work = Work { event, permit };

        loop {
            match self.shared.ring.try_push(work) {
                Ok(()) => {
                    self.shared.counters.accepted.fetch_add(1, Ordering::Relaxed);
                    if self.shared.wait.needs_signal() {
                        self.shared.items.signal();
                    }
                    return Ok(());
                }
                Err(returned) => {
                    if self.shared.closed.load(Ordering::Acquire) {
                        self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                        return Err(ProcessError::Rejected { event_id });
                    }
                    work = returned;
                    let shared = &self.shared;
                    shared.wait.wait_for(&shared.space, || {
                        shared.ring.len() < shared.ring.capacity()
                            || shared.closed.load(Ordering::Acquire)
                    });
                }
            }
        }
    }

    /// Close the sink, drain the ring, and join the subscriber threads.
    /// Idempotent; later `accept` calls are rejected.
    pub fn dispose(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.items.signal();
        self.shared.space.signal();

        let handles = std::mem::take(&mut *self.subscribers.lock());
        for handle in handles {
            let _ = handle.join();
        }

        let metrics = self.shared.counters.snapshot();
        info!(
            sink = %self.shared.name,
            accepted = metrics.accepted,
            completed = metrics.completed,
            failed = metrics.failed,
            "sink disposed"
        );
    }

    /// Current counter snapshot.
    pub fn metrics(&self) -> SinkMetrics {
        self.shared.counters.snapshot()
    }
}

fn subscriber_loop(shared: &RingShared) {
    loop {
        match shared.ring.try_pop() {
            Some(work) => {
                if shared.wait.needs_signal() {
                    shared.space.signal();
                }
                shared.process(work);
            }
            None => {
                if shared.closed.load(Ordering::Acquire) {
                    // Siblings may still be mid-pop, but an empty ring plus
                    // the closed flag means nothing more will arrive for us.
                    break;
                }
                shared.wait.wait_for(&shared.items, || {
                    !shared.ring.is_empty() || shared.closed.load(Ordering::Acquire)
                });
            }
        }
    }
}

// ── Transaction-aware sink ───────────────────────────────────────────

/// Routes each accept to a synchronous fallback while a transaction is
/// active on the calling thread, because transactional work must not cross
/// thread boundaries; otherwise delegates to the asynchronous sink.
pub struct TransactionAwareSink {
    asynchronous: Box<Sink>,
    synchronous: InlineSink,
    tx: Arc<dyn TransactionContext>,
}

impl TransactionAwareSink {
    pub(crate) fn new(
        asynchronous: Sink,
        synchronous: InlineSink,
        tx: Arc<dyn TransactionContext>,
    ) -> Self {
        Self {
            asynchronous: Box::new(asynchronous),
            synchronous,
            tx,
        }
    }

    pub fn accept(&self, event: Event) -> Result<(), ProcessError> {
        if self.tx.is_transaction_active() {
            self.synchronous.accept(event)
        } else {
            self.asynchronous.accept(event)
        }
    }

    pub fn dispose(&self) {
        self.asynchronous.dispose();
        self.synchronous.dispose();
    }
}

// ── Sink facade ──────────────────────────────────────────────────────

/// Single-event entry point bound to one pipeline.
pub enum Sink {
    /// Caller-thread execution (synchronous, direct, blocking strategies)
    Inline(InlineSink),
    /// Fire-and-forget hand-off to one scheduler
    Dispatch(DispatchSink),
    /// Ring-buffer demultiplexing (reactor, proactor, work-queue)
    Ring(RingSink),
    /// Transaction-aware fallback facade
    TransactionAware(TransactionAwareSink),
}

impl Sink {
    /// Submit one event.
    pub fn accept(&self, event: Event) -> Result<(), ProcessError> {
        match self {
            Sink::Inline(sink) => sink.accept(event),
            Sink::Dispatch(sink) => sink.accept(event),
            Sink::Ring(sink) => sink.accept(event),
            Sink::TransactionAware(sink) => sink.accept(event),
        }
    }

    /// Release queue resources and unsubscribe workers. Idempotent.
    pub fn dispose(&self) {
        match self {
            Sink::Inline(sink) => sink.dispose(),
            Sink::Dispatch(sink) => sink.dispose(),
            Sink::Ring(sink) => sink.dispose(),
            Sink::TransactionAware(sink) => sink.dispose(),
        }
    }

    /// Counter snapshot, for sinks that keep counters.
    pub fn metrics(&self) -> Option<SinkMetrics> {
        match self {
            Sink::Ring(sink) => Some(sink.metrics()),
            Sink::TransactionAware(sink) => sink.asynchronous.metrics(),
            _ => None,
        }
    }
}
