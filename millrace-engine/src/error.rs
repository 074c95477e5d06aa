//! Engine error taxonomy.
//!
//! Configuration problems fail fast at construction or pipeline assembly;
//! execution failures stay scoped to the one event that hit them and travel
//! through the event's completion path. Shutdown never raises: schedulers
//! log and make progress.

use thiserror::Error;

use millrace_scheduler::{SchedulerError, UnknownWaitStrategy};

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Configuration and assembly errors. Always raised before any event flows.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Buffer capacity cannot be masked for index wraparound
    #[error(
        "bufferSize must be a non-zero power of two so ring indices can wrap \
         with a bit mask, got {0}"
    )]
    BufferSizeNotPowerOfTwo(usize),

    /// At least one ring subscriber is required
    #[error("subscriberCount must be at least 1, got 0")]
    ZeroSubscribers,

    /// At least one event must be allowed in flight
    #[error("maxConcurrency must be at least 1 (1 means fully sequential), got 0")]
    ZeroMaxConcurrency,

    /// Strategy name not in the catalogue
    #[error(
        "Unknown processing strategy '{0}' (expected one of: synchronous, direct, \
         fire_and_forget, reactor, proactor, work_queue, blocking)"
    )]
    UnknownStrategy(String),

    /// Wait strategy name not recognized
    #[error(transparent)]
    UnknownWaitStrategy(#[from] UnknownWaitStrategy),

    /// The strategy cannot honor transactional semantics for this pipeline
    #[error(
        "Strategy '{strategy}' cannot serve transactional pipeline '{pipeline}': \
         the caller never awaits completion, so no synchronous fallback exists"
    )]
    TransactionalIncompatible { strategy: String, pipeline: String },
}

/// Per-event execution failures. Isolated: one failing event never poisons
/// the ring, the pools, or other in-flight events.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// A stage body returned an error
    #[error("Stage '{stage}' failed for event {event_id}: {cause}")]
    Stage {
        stage: String,
        event_id: u64,
        cause: anyhow::Error,
    },

    /// A stage body panicked; the worker survives
    #[error("Stage '{stage}' panicked while processing event {event_id}")]
    Panic { stage: String, event_id: u64 },

    /// The sink was disposed or its scheduler stopped before the event
    /// could be enqueued
    #[error("Sink is disposed; event {event_id} was rejected")]
    Rejected { event_id: u64 },

    /// A transaction is active on the calling thread but the pipeline was
    /// not declared transactional, so asynchronous dispatch would silently
    /// break it
    #[error(
        "Event {event_id} was submitted inside a transaction, but pipeline is \
         not declared transactional; refusing asynchronous dispatch"
    )]
    TransactionActive { event_id: u64 },
}

impl ProcessError {
    /// Id of the event this failure belongs to.
    pub fn event_id(&self) -> u64 {
        match self {
            ProcessError::Stage { event_id, .. }
            | ProcessError::Panic { event_id, .. }
            | ProcessError::Rejected { event_id }
            | ProcessError::TransactionActive { event_id } => *event_id,
        }
    }

    /// Whether this failure came out of a stage body (error or panic).
    pub fn is_stage_failure(&self) -> bool {
        matches!(self, ProcessError::Stage { .. } | ProcessError::Panic { .. })
    }
}

/// Top-level engine error
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration or assembly problem
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Pool provisioning failed
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Operation on a stopped strategy
    #[error("Processing strategy '{0}' is stopped")]
    StrategyStopped(String),
}

impl EngineError {
    /// Check if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_size_error_display() {
        let err = ConfigError::BufferSizeNotPowerOfTwo(10);
        assert!(err.to_string().contains("power of two"));
        assert!(err.to_string().contains("10"));
    }

    #[test]
    fn test_process_error_event_id() {
        let err = ProcessError::Rejected { event_id: 7 };
        assert_eq!(err.event_id(), 7);
        assert!(!err.is_stage_failure());

        let err = ProcessError::Panic {
            stage: "enrich".into(),
            event_id: 9,
        };
        assert_eq!(err.event_id(), 9);
        assert!(err.is_stage_failure());
    }

    #[test]
    fn test_engine_error_from_config() {
        let err: EngineError = ConfigError::ZeroSubscribers.into();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("subscriberCount"));
    }
}
