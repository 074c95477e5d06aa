//! Processing-strategy catalogue and lifecycle.
//!
//! A strategy is a named scheduling policy: it owns the schedulers it
//! needs, produces a [`Sink`] bound to a pipeline, and tears everything
//! down with a bounded drain timeout. The catalogue is a closed set of
//! tagged variants composed from the shared primitives (ring, dispatcher,
//! limiter) rather than a hierarchy; the variants differ only in which
//! pools are engaged and where execution begins.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use millrace_scheduler::{Scheduler, SchedulerService};

use crate::config::StrategyConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{ConfigError, EngineError, EngineResult};
use crate::limiter::ConcurrencyLimiter;
use crate::pipeline::Pipeline;
use crate::sink::{DispatchSink, InlineSink, RingSink, Sink, TransactionAwareSink};
use crate::transaction::TransactionContext;

/// The named scheduling policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Run inline on the caller thread; full caller accountability
    Synchronous,

    /// One ephemeral execution per event, no shared scheduling state;
    /// favors isolation over efficiency
    Direct,

    /// Enqueue onto one scheduler and return immediately; the caller never
    /// awaits completion
    #[serde(alias = "fireAndForget")]
    FireAndForget,

    /// Ring buffer + subscribers; only `LightAsync` is dispatched off-thread
    Reactor,

    /// Reactor plus blocking/intensive hand-off; the default
    /// high-throughput strategy
    Proactor,

    /// Ring buffer, but each event's whole body runs on the io pool;
    /// fewer thread hops, simpler mental model
    #[serde(alias = "workQueue")]
    WorkQueue,

    /// Deliberately simplest execution: every stage inline, blocking the
    /// caller; used as the synchronous fallback under transactions
    Blocking,
}

impl StrategyKind {
    /// Whether this kind demultiplexes through a ring buffer.
    pub fn is_ring_based(&self) -> bool {
        matches!(
            self,
            StrategyKind::Reactor | StrategyKind::Proactor | StrategyKind::WorkQueue
        )
    }

    /// Whether events run entirely on the producer thread.
    pub fn is_caller_thread(&self) -> bool {
        matches!(
            self,
            StrategyKind::Synchronous | StrategyKind::Direct | StrategyKind::Blocking
        )
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::Synchronous => "synchronous",
            StrategyKind::Direct => "direct",
            StrategyKind::FireAndForget => "fire_and_forget",
            StrategyKind::Reactor => "reactor",
            StrategyKind::Proactor => "proactor",
            StrategyKind::WorkQueue => "work_queue",
            StrategyKind::Blocking => "blocking",
        };
        f.write_str(name)
    }
}

impl FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synchronous" => Ok(StrategyKind::Synchronous),
            "direct" => Ok(StrategyKind::Direct),
            "fire_and_forget" | "fireAndForget" => Ok(StrategyKind::FireAndForget),
            "reactor" => Ok(StrategyKind::Reactor),
            "proactor" => Ok(StrategyKind::Proactor),
            "work_queue" | "workQueue" => Ok(StrategyKind::WorkQueue),
            "blocking" => Ok(StrategyKind::Blocking),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

/// A started scheduling policy bound to one pipeline's scheduling graph.
///
/// Owns its schedulers exclusively; nothing is shared across pipelines and
/// no global scheduling state exists. Created at pipeline assembly,
/// stopped (idempotently) when the pipeline stops.
#[derive(Debug)]
pub struct ProcessingStrategy {
    kind: StrategyKind,
    config: StrategyConfig,
    name: String,
    cpu_light: Option<Arc<Scheduler>>,
    io: Option<Arc<Scheduler>>,
    cpu_intensive: Option<Arc<Scheduler>>,
    limiter: Option<ConcurrencyLimiter>,
    single_threaded: bool,
    stopped: AtomicBool,
}

impl ProcessingStrategy {
    /// Validate `config`, provision exactly the pools `kind` needs, and
    /// return the started strategy.
    ///
    /// Ring-based kinds with `max_concurrency == 1` collapse to the
    /// single-subscriber reactor shape: one subscriber, no limiter, no
    /// hand-off pools, because there is nothing to exploit with one event
    /// in flight. Likewise the proactor skips its io/intensive pools whenever
    /// `max_concurrency` does not exceed the subscriber count.
    pub fn start(
        kind: StrategyKind,
        config: StrategyConfig,
        service: &SchedulerService,
        name: impl Into<String>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let name = name.into();

        let single_threaded = kind.is_ring_based() && config.max_concurrency == 1;
        let headroom = config.max_concurrency > config.subscriber_count;

        let (cpu_light, io, cpu_intensive) = match kind {
            StrategyKind::Synchronous | StrategyKind::Direct | StrategyKind::Blocking => {
                (None, None, None)
            }
            StrategyKind::FireAndForget => (Some(service.cpu_light_pool(&name)?), None, None),
            StrategyKind::Reactor => {
                if single_threaded {
                    (None, None, None)
                } else {
                    (Some(service.cpu_light_pool(&name)?), None, None)
                }
            }
            StrategyKind::Proactor => {
                if single_threaded {
                    (None, None, None)
                } else if headroom {
                    (
                        Some(service.cpu_light_pool(&name)?),
                        Some(service.io_pool(&name)?),
                        Some(service.cpu_intensive_pool(&name)?),
                    )
                } else {
                    (Some(service.cpu_light_pool(&name)?), None, None)
                }
            }
            StrategyKind::WorkQueue => {
                if single_threaded {
                    (None, None, None)
                } else {
                    (None, Some(service.io_pool(&name)?), None)
                }
            }
        };

        let limiter = if single_threaded || !config.is_bounded() {
            None
        } else if kind.is_ring_based() || kind == StrategyKind::FireAndForget {
            Some(ConcurrencyLimiter::new(config.max_concurrency))
        } else {
            None
        };

        info!(
            strategy = %kind,
            name = %name,
            max_concurrency = config.max_concurrency,
            single_threaded,
            "processing strategy started"
        );

        Ok(Self {
            kind,
            config,
            name,
            cpu_light,
            io,
            cpu_intensive,
            limiter,
            single_threaded,
            stopped: AtomicBool::new(false),
        })
    }

    /// Strategy kind.
    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    /// Strategy name (scheduler name prefix).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this strategy collapsed to the single-threaded shape.
    pub fn is_single_threaded(&self) -> bool {
        self.single_threaded
    }

    /// Whether an io pool was provisioned.
    pub fn has_io_pool(&self) -> bool {
        self.io.is_some()
    }

    /// Whether a cpu-intensive pool was provisioned.
    pub fn has_intensive_pool(&self) -> bool {
        self.cpu_intensive.is_some()
    }

    /// Whether a concurrency limiter was instantiated.
    pub fn has_limiter(&self) -> bool {
        self.limiter.is_some()
    }

    /// Build the sink for `pipeline`.
    ///
    /// Transactional pipelines get the transaction-aware facade on top of
    /// ring-based kinds, and are rejected outright for fire-and-forget, so
    /// the problem surfaces at assembly rather than at the first
    /// transactional event in production.
    pub fn create_sink(
        &self,
        pipeline: Pipeline,
        tx: Arc<dyn TransactionContext>,
    ) -> EngineResult<Sink> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(EngineError::StrategyStopped(self.name.clone()));
        }

        match self.kind {
            StrategyKind::Synchronous | StrategyKind::Direct | StrategyKind::Blocking => {
                Ok(Sink::Inline(InlineSink::new(pipeline)))
            }
            StrategyKind::FireAndForget => {
                if pipeline.transactional() {
                    return Err(ConfigError::TransactionalIncompatible {
                        strategy: self.kind.to_string(),
                        pipeline: pipeline.name().to_string(),
                    }
                    .into());
                }
                let Some(scheduler) = self.cpu_light.clone() else {
                    return Err(EngineError::StrategyStopped(self.name.clone()));
                };
                Ok(Sink::Dispatch(DispatchSink::new(
                    pipeline,
                    scheduler,
                    self.limiter.clone(),
                    tx,
                )))
            }
            StrategyKind::Reactor | StrategyKind::Proactor | StrategyKind::WorkQueue => {
                let subscriber_count = if self.single_threaded {
                    1
                } else {
                    self.config.subscriber_count
                };
                let flat_map = if self.kind == StrategyKind::WorkQueue {
                    self.io.clone()
                } else {
                    None
                };
                let ring = RingSink::new(
                    pipeline.clone(),
                    self.config.buffer_size,
                    subscriber_count,
                    self.config.wait_strategy,
                    self.dispatcher(),
                    flat_map,
                    self.limiter.clone(),
                    tx.clone(),
                )?;

                if pipeline.transactional() {
                    Ok(Sink::TransactionAware(TransactionAwareSink::new(
                        Sink::Ring(ring),
                        InlineSink::new(pipeline),
                        tx,
                    )))
                } else {
                    Ok(Sink::Ring(ring))
                }
            }
        }
    }

    /// Stop every scheduler this strategy owns, draining each for up to
    /// `timeout`. Idempotent: a second stop is a no-op.
    pub fn stop(&self, timeout: Duration) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for pool in [&self.cpu_light, &self.io, &self.cpu_intensive]
            .into_iter()
            .flatten()
        {
            pool.stop(timeout);
        }
        info!(strategy = %self.kind, name = %self.name, "processing strategy stopped");
    }

    fn dispatcher(&self) -> Arc<Dispatcher> {
        match self.kind {
            StrategyKind::Proactor => match (&self.cpu_light, &self.io, &self.cpu_intensive) {
                (Some(light), Some(io), Some(intensive)) => {
                    Dispatcher::proactor(light.clone(), io.clone(), intensive.clone())
                }
                // No headroom for hand-offs: behave like a reactor.
                (Some(light), _, _) => Dispatcher::reactor(light.clone()),
                _ => Dispatcher::inline(),
            },
            StrategyKind::Reactor => match &self.cpu_light {
                Some(light) => Dispatcher::reactor(light.clone()),
                None => Dispatcher::inline(),
            },
            StrategyKind::WorkQueue => match &self.io {
                Some(io) => Dispatcher::work_queue(io.clone()),
                None => Dispatcher::inline(),
            },
            _ => Dispatcher::inline(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in [
            StrategyKind::Synchronous,
            StrategyKind::Direct,
            StrategyKind::FireAndForget,
            StrategyKind::Reactor,
            StrategyKind::Proactor,
            StrategyKind::WorkQueue,
            StrategyKind::Blocking,
        ] {
            let parsed: StrategyKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = "turbo".parse::<StrategyKind>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStrategy(ref s) if s == "turbo"));
    }

    #[test]
    fn test_classification() {
        assert!(StrategyKind::Proactor.is_ring_based());
        assert!(StrategyKind::WorkQueue.is_ring_based());
        assert!(!StrategyKind::Synchronous.is_ring_based());
        assert!(StrategyKind::Blocking.is_caller_thread());
        assert!(!StrategyKind::FireAndForget.is_caller_thread());
    }
}
