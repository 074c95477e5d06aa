//! Millrace Event Model
//!
//! This module defines the unit of work flowing through a millrace pipeline.
//! The scheduler treats the payload as opaque: one event in, zero-or-one
//! outcome out. Identity exists only for correlation and logging.

use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

/// Process-wide event id counter. Ids are unique per process, not persisted.
static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// A single unit of work submitted to a pipeline.
#[derive(Debug, Clone)]
pub struct Event {
    /// Monotonically assigned id, unique within the process
    pub id: u64,

    /// Optional correlation id carried through completion callbacks
    pub correlation_id: Option<String>,

    /// Opaque payload; the scheduler never inspects it
    pub payload: serde_json::Value,

    /// Sparse string attributes attached by stages (audit trail, routing hints)
    pub attributes: SmallVec<[(String, String); 4]>,
}

impl Event {
    /// Create an event with the given payload and a fresh id.
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
            correlation_id: None,
            payload,
            attributes: SmallVec::new(),
        }
    }

    /// Set the correlation id.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Attach an attribute, replacing any existing value for the same key.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if let Some(entry) = self.attributes.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value.into();
        } else {
            self.attributes.push((key, value.into()));
        }
    }

    /// Get an attribute value by key.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Create an event builder.
    pub fn builder() -> EventBuilder {
        EventBuilder::default()
    }
}

/// Event builder for convenient event construction
#[derive(Debug, Default)]
pub struct EventBuilder {
    correlation_id: Option<String>,
    payload: Option<serde_json::Value>,
    attributes: SmallVec<[(String, String); 4]>,
}

impl EventBuilder {
    /// Set the payload
    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Set the correlation id
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Add an attribute
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Build the event
    pub fn build(self) -> Result<Event, BuildError> {
        Ok(Event {
            id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
            correlation_id: self.correlation_id,
            payload: self.payload.ok_or(BuildError::MissingField("payload"))?,
            attributes: self.attributes,
        })
    }
}

/// Error building an event
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}
