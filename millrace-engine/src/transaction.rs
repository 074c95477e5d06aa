//! Transaction context query.
//!
//! Transactional work is bound to the thread it started on, so the engine
//! must know, per accept call, whether the producer sits inside a
//! transaction. The query is an explicit injected value rather than
//! thread-local state, which keeps strategies testable without faking
//! thread locals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Answers "is a transaction active for the calling producer?".
pub trait TransactionContext: Send + Sync {
    fn is_transaction_active(&self) -> bool;
}

/// Context for producers that never run transactions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransaction;

impl TransactionContext for NoTransaction {
    fn is_transaction_active(&self) -> bool {
        false
    }
}

/// Settable transaction flag, shared between the transaction manager and
/// the sinks consulting it.
#[derive(Debug, Default)]
pub struct TransactionFlag {
    active: AtomicBool,
}

impl TransactionFlag {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark a transaction as started or finished.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }
}

impl TransactionContext for TransactionFlag {
    fn is_transaction_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}
