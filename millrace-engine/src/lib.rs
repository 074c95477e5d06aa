//! Millrace Engine
//!
//! The pipeline processing-strategy engine: decides, for every event
//! flowing through a configured sequence of stages, which worker pool
//! executes which stage, how many events may be in flight concurrently,
//! and how producer threads are decoupled from pipeline execution.
//!
//! The entry point is [`ProcessingStrategy`]: pick a [`StrategyKind`], give
//! it a [`StrategyConfig`] and a [`SchedulerService`], and create a
//! [`Sink`] per [`Pipeline`]. Producers call [`Sink::accept`]; outcomes are
//! delivered to the pipeline's completion handler (and, for caller-thread
//! strategies, returned directly).
//!
//! ```no_run
//! use std::sync::Arc;
//! use millrace_engine::{
//!     NoTransaction, Pipeline, ProcessingStrategy, Stage, StrategyConfig, StrategyKind,
//! };
//! use millrace_event::Event;
//! use millrace_scheduler::SchedulerService;
//!
//! # fn main() -> anyhow::Result<()> {
//! let service = SchedulerService::default();
//! let strategy = ProcessingStrategy::start(
//!     StrategyKind::Proactor,
//!     StrategyConfig::default().with_max_concurrency(64),
//!     &service,
//!     "orders",
//! )?;
//!
//! let pipeline = Pipeline::builder("orders")
//!     .stage(Stage::light("validate", Ok))
//!     .stage(Stage::blocking("persist", Ok))
//!     .build();
//!
//! let sink = strategy.create_sink(pipeline, Arc::new(NoTransaction))?;
//! sink.accept(Event::new(serde_json::json!({"order": 1})))?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod limiter;
pub mod pipeline;
pub mod sink;
pub mod strategy;
pub mod transaction;

mod dispatcher;
mod error;

pub use config::StrategyConfig;
pub use error::{ConfigError, EngineError, EngineResult, ProcessError};
pub use limiter::{ConcurrencyLimiter, Permit};
pub use pipeline::{CompletionHandler, Pipeline, PipelineBuilder, ProcessingType, Stage};
pub use sink::{Sink, SinkMetrics};
pub use strategy::{ProcessingStrategy, StrategyKind};
pub use transaction::{NoTransaction, TransactionContext, TransactionFlag};

// Re-export the collaborating crates for convenience
pub use millrace_event;
pub use millrace_scheduler;
