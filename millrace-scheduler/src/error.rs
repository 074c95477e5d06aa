//! Scheduler and ring-buffer error types.

use thiserror::Error;

/// Errors from worker pool operations
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Task submitted after the pool was stopped
    #[error("Scheduler '{0}' is stopped and no longer accepts tasks")]
    Stopped(String),

    /// Worker thread could not be spawned
    #[error("Failed to spawn worker thread for scheduler '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from ring-buffer construction
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RingError {
    /// Capacity is not a non-zero power of two. Slot indices wrap with a
    /// `capacity - 1` bit mask, so any other capacity cannot address the
    /// buffer correctly.
    #[error(
        "ring capacity must be a non-zero power of two so indices can wrap \
         with a bit mask, got {0}"
    )]
    CapacityNotPowerOfTwo(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_error_display() {
        let err = RingError::CapacityNotPowerOfTwo(10);
        assert!(err.to_string().contains("power of two"));
        assert!(err.to_string().contains("10"));
    }

    #[test]
    fn test_scheduler_stopped_display() {
        let err = SchedulerError::Stopped("orders.io".to_string());
        assert!(err.to_string().contains("orders.io"));
        assert!(err.to_string().contains("stopped"));
    }
}
