//! Pipeline and stage model.
//!
//! A pipeline is an ordered sequence of stages plus a terminal completion
//! handler, built once at configuration time and immutable thereafter. Each
//! stage carries exactly one [`ProcessingType`] tag describing its resource
//! characteristics; the dispatcher uses the tag to pick a target pool.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use millrace_event::Event;

use crate::error::ProcessError;

/// Resource characteristics of a stage, used to pick its target pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingType {
    /// Non-blocking and cheap; runs on whichever worker holds the event
    Light,

    /// Cheap, but must run off the calling thread (e.g. to bound recursion)
    #[serde(alias = "lightAsync")]
    LightAsync,

    /// Performs blocking I/O
    Blocking,

    /// CPU-bound and long-running
    Intensive,
}

impl fmt::Display for ProcessingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessingType::Light => "light",
            ProcessingType::LightAsync => "light_async",
            ProcessingType::Blocking => "blocking",
            ProcessingType::Intensive => "intensive",
        };
        f.write_str(name)
    }
}

/// Executable body of a stage. Opaque to the scheduler.
pub type StageBody = dyn Fn(Event) -> anyhow::Result<Event> + Send + Sync;

/// One step of a pipeline: a name, a processing-type tag, and a body.
#[derive(Clone)]
pub struct Stage {
    name: String,
    processing_type: ProcessingType,
    body: Arc<StageBody>,
}

impl Stage {
    /// Create a stage with an explicit processing type.
    pub fn new<F>(name: impl Into<String>, processing_type: ProcessingType, body: F) -> Self
    where
        F: Fn(Event) -> anyhow::Result<Event> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            processing_type,
            body: Arc::new(body),
        }
    }

    /// Shorthand for a [`ProcessingType::Light`] stage.
    pub fn light<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Event) -> anyhow::Result<Event> + Send + Sync + 'static,
    {
        Self::new(name, ProcessingType::Light, body)
    }

    /// Shorthand for a [`ProcessingType::LightAsync`] stage.
    pub fn light_async<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Event) -> anyhow::Result<Event> + Send + Sync + 'static,
    {
        Self::new(name, ProcessingType::LightAsync, body)
    }

    /// Shorthand for a [`ProcessingType::Blocking`] stage.
    pub fn blocking<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Event) -> anyhow::Result<Event> + Send + Sync + 'static,
    {
        Self::new(name, ProcessingType::Blocking, body)
    }

    /// Shorthand for a [`ProcessingType::Intensive`] stage.
    pub fn intensive<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Event) -> anyhow::Result<Event> + Send + Sync + 'static,
    {
        Self::new(name, ProcessingType::Intensive, body)
    }

    /// Stage name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Processing-type tag.
    pub fn processing_type(&self) -> ProcessingType {
        self.processing_type
    }

    /// Executable body.
    pub fn body(&self) -> &Arc<StageBody> {
        &self.body
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("processing_type", &self.processing_type)
            .finish_non_exhaustive()
    }
}

/// Terminal handler invoked with each event's outcome.
pub type CompletionHandler = Arc<dyn Fn(&Result<Event, ProcessError>) + Send + Sync>;

struct PipelineInner {
    name: String,
    stages: Vec<Stage>,
    on_complete: CompletionHandler,
    transactional: bool,
}

/// An immutable, ordered sequence of stages plus a terminal sink.
///
/// Cheap to clone; clones share the same stages and completion handler.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    /// Start building a pipeline.
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder {
            name: name.into(),
            stages: Vec::new(),
            on_complete: None,
            transactional: false,
        }
    }

    /// Pipeline name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The ordered stages.
    pub fn stages(&self) -> &[Stage] {
        &self.inner.stages
    }

    /// Number of stages.
    pub fn stage_count(&self) -> usize {
        self.inner.stages.len()
    }

    /// Whether events may be submitted from inside a transaction.
    pub fn transactional(&self) -> bool {
        self.inner.transactional
    }

    /// Deliver an outcome to the terminal handler.
    pub fn complete(&self, outcome: &Result<Event, ProcessError>) {
        (self.inner.on_complete)(outcome);
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.inner.name)
            .field("stages", &self.inner.stages)
            .field("transactional", &self.inner.transactional)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Stage>,
    on_complete: Option<CompletionHandler>,
    transactional: bool,
}

impl PipelineBuilder {
    /// Append a stage.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Declare that events may be submitted from inside a transaction.
    /// Strategies that cannot honor this fail at sink assembly, not at the
    /// first transactional event.
    pub fn transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    /// Set the terminal completion handler.
    pub fn on_complete<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Result<Event, ProcessError>) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(handler));
        self
    }

    /// Finish the pipeline.
    pub fn build(self) -> Pipeline {
        let on_complete = self.on_complete.unwrap_or_else(|| {
            Arc::new(|outcome: &Result<Event, ProcessError>| {
                if let Err(error) = outcome {
                    tracing::debug!(%error, "event completed exceptionally with no completion handler");
                }
            })
        });
        Pipeline {
            inner: Arc::new(PipelineInner {
                name: self.name,
                stages: self.stages,
                on_complete,
                transactional: self.transactional,
            }),
        }
    }
}
