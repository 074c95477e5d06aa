//! Processing-type dispatcher (proactor pattern).
//!
//! Routes each stage onto the pool its tag demands. `Light` stages continue
//! on whichever worker currently holds the event. `Blocking` and
//! `Intensive` stages are submitted to their dedicated pool, and the
//! continuation is re-submitted to the cpu-light pool so later `Light`
//! stages never run on a possibly exhausted io or intensive thread.
//! `LightAsync` stages are pushed to a pool even though cheap, because the
//! caller requires guaranteed off-thread execution.
//!
//! A dispatcher built without pools runs everything inline; strategies use
//! that shape when there is no concurrency headroom to exploit.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::debug;

use millrace_event::Event;
use millrace_scheduler::Scheduler;

use crate::error::ProcessError;
use crate::pipeline::{Pipeline, ProcessingType, Stage};

/// Delivered exactly once with the event's outcome.
pub(crate) type Completion = Box<dyn FnOnce(Result<Event, ProcessError>) + Send>;

/// Stage router for one strategy instance.
pub(crate) struct Dispatcher {
    /// Pool for `LightAsync` stages; continuation stays on that pool.
    light_async: Option<Arc<Scheduler>>,
    /// Pool for `Blocking` stages.
    io: Option<Arc<Scheduler>>,
    /// Pool for `Intensive` stages.
    cpu_intensive: Option<Arc<Scheduler>>,
    /// Where continuations resume after an io/intensive hand-off.
    resume: Option<Arc<Scheduler>>,
}

impl Dispatcher {
    /// No hand-offs: every stage runs on the current thread.
    pub(crate) fn inline() -> Arc<Self> {
        Arc::new(Self {
            light_async: None,
            io: None,
            cpu_intensive: None,
            resume: None,
        })
    }

    /// Reactor shape: only `LightAsync` is dispatched off-thread.
    pub(crate) fn reactor(cpu_light: Arc<Scheduler>) -> Arc<Self> {
        Arc::new(Self {
            light_async: Some(cpu_light),
            io: None,
            cpu_intensive: None,
            resume: None,
        })
    }

    /// Full proactor shape: io/intensive hand-off with cpu-light resume.
    pub(crate) fn proactor(
        cpu_light: Arc<Scheduler>,
        io: Arc<Scheduler>,
        cpu_intensive: Arc<Scheduler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            light_async: Some(cpu_light.clone()),
            io: Some(io),
            cpu_intensive: Some(cpu_intensive),
            resume: Some(cpu_light),
        })
    }

    /// Work-queue shape: the whole body already runs on the io pool, so
    /// only the `LightAsync` off-thread guarantee needs a hand-off.
    pub(crate) fn work_queue(io: Arc<Scheduler>) -> Arc<Self> {
        Arc::new(Self {
            light_async: Some(io),
            io: None,
            cpu_intensive: None,
            resume: None,
        })
    }

    /// Run `pipeline` for `event`, starting at the first stage, delivering
    /// the outcome to `completion` exactly once.
    pub(crate) fn execute(self: &Arc<Self>, pipeline: &Pipeline, event: Event, completion: Completion) {
        self.clone().run_from(pipeline.clone(), 0, event, completion);
    }

    fn run_from(
        self: Arc<Self>,
        pipeline: Pipeline,
        start: usize,
        mut event: Event,
        completion: Completion,
    ) {
        let mut index = start;
        while index < pipeline.stage_count() {
            let stage = &pipeline.stages()[index];
            match self.target(stage.processing_type()) {
                None => match run_stage(stage, event) {
                    Ok(next) => {
                        event = next;
                        index += 1;
                    }
                    Err(error) => {
                        completion(Err(error));
                        return;
                    }
                },
                Some((pool, resume_on_light)) => {
                    let stage = stage.clone();
                    let next_index = index + 1;
                    let dispatcher = self.clone();
                    let pipeline = pipeline.clone();
                    let task = Box::new(move || match run_stage(&stage, event) {
                        Ok(next) => dispatcher.resume_from(
                            pipeline,
                            next_index,
                            next,
                            completion,
                            resume_on_light,
                        ),
                        Err(error) => completion(Err(error)),
                    });
                    if let Err(error) = pool.execute(task) {
                        // Only reachable in a shutdown race; the event's
                        // completion is torn down with the strategy.
                        debug!(%error, "stage hand-off rejected by stopping scheduler");
                    }
                    return;
                }
            }
        }
        completion(Ok(event));
    }

    fn resume_from(
        self: Arc<Self>,
        pipeline: Pipeline,
        index: usize,
        event: Event,
        completion: Completion,
        resume_on_light: bool,
    ) {
        if resume_on_light {
            if let Some(light) = self.resume.clone() {
                let dispatcher = self.clone();
                let task = Box::new(move || dispatcher.run_from(pipeline, index, event, completion));
                if let Err(error) = light.execute(task) {
                    debug!(%error, "continuation rejected by stopping scheduler");
                }
                return;
            }
        }
        self.run_from(pipeline, index, event, completion);
    }

    fn target(&self, processing_type: ProcessingType) -> Option<(Arc<Scheduler>, bool)> {
        match processing_type {
            ProcessingType::Light => None,
            ProcessingType::LightAsync => self.light_async.clone().map(|pool| (pool, false)),
            ProcessingType::Blocking => self
                .io
                .clone()
                .map(|pool| (pool, self.resume.is_some())),
            ProcessingType::Intensive => self
                .cpu_intensive
                .clone()
                .map(|pool| (pool, self.resume.is_some())),
        }
    }
}

/// Run one stage body, translating errors and panics into a per-event
/// failure. A panicking body must never take down a shared worker.
fn run_stage(stage: &Stage, event: Event) -> Result<Event, ProcessError> {
    let event_id = event.id;
    let body = stage.body().clone();
    match catch_unwind(AssertUnwindSafe(move || body(event))) {
        Ok(Ok(next)) => Ok(next),
        Ok(Err(cause)) => Err(ProcessError::Stage {
            stage: stage.name().to_string(),
            event_id,
            cause,
        }),
        Err(_) => Err(ProcessError::Panic {
            stage: stage.name().to_string(),
            event_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Stage;
    use serde_json::json;
    use std::sync::mpsc;
    use std::time::Duration;

    fn current_thread_name() -> String {
        std::thread::current().name().unwrap_or("").to_string()
    }

    fn completion_channel() -> (Completion, mpsc::Receiver<Result<Event, ProcessError>>) {
        let (tx, rx) = mpsc::channel();
        (Box::new(move |outcome| tx.send(outcome).unwrap()), rx)
    }

    #[test]
    fn test_inline_runs_all_stages_in_order() {
        let pipeline = Pipeline::builder("p")
            .stage(Stage::light("a", |mut e: Event| {
                e.set_attribute("a", current_thread_name());
                Ok(e)
            }))
            .stage(Stage::light("b", |mut e: Event| {
                e.set_attribute("b", current_thread_name());
                Ok(e)
            }))
            .build();

        let (completion, rx) = completion_channel();
        Dispatcher::inline().execute(&pipeline, Event::new(json!(null)), completion);

        let event = rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();
        let here = current_thread_name();
        assert_eq!(event.attribute("a"), Some(here.as_str()));
        assert_eq!(event.attribute("b"), Some(here.as_str()));
    }

    #[test]
    fn test_stage_error_short_circuits() {
        let pipeline = Pipeline::builder("p")
            .stage(Stage::light("fails", |_| anyhow::bail!("nope")))
            .stage(Stage::light("unreached", |mut e: Event| {
                e.set_attribute("reached", "yes");
                Ok(e)
            }))
            .build();

        let (completion, rx) = completion_channel();
        Dispatcher::inline().execute(&pipeline, Event::new(json!(null)), completion);

        let outcome = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        let error = outcome.unwrap_err();
        assert!(matches!(error, ProcessError::Stage { ref stage, .. } if stage == "fails"));
    }

    #[test]
    fn test_stage_panic_is_contained() {
        let pipeline = Pipeline::builder("p")
            .stage(Stage::light("explodes", |_| panic!("boom")))
            .build();

        let (completion, rx) = completion_channel();
        Dispatcher::inline().execute(&pipeline, Event::new(json!(null)), completion);

        let outcome = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(
            outcome.unwrap_err(),
            ProcessError::Panic { ref stage, .. } if stage == "explodes"
        ));
    }

    #[test]
    fn test_proactor_hands_off_and_resumes_on_light() {
        let cpu_light = Scheduler::start("disp.cpu-light", 1).unwrap();
        let io = Scheduler::start("disp.io", 1).unwrap();
        let intensive = Scheduler::start("disp.cpu-intensive", 1).unwrap();
        let dispatcher =
            Dispatcher::proactor(cpu_light.clone(), io.clone(), intensive.clone());

        let pipeline = Pipeline::builder("p")
            .stage(Stage::blocking("fetch", |mut e: Event| {
                e.set_attribute("fetch", current_thread_name());
                Ok(e)
            }))
            .stage(Stage::light("after", |mut e: Event| {
                e.set_attribute("after", current_thread_name());
                Ok(e)
            }))
            .stage(Stage::intensive("crunch", |mut e: Event| {
                e.set_attribute("crunch", current_thread_name());
                Ok(e)
            }))
            .build();

        let (completion, rx) = completion_channel();
        dispatcher.execute(&pipeline, Event::new(json!(null)), completion);

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(event.attribute("fetch").unwrap().starts_with("disp.io."));
        assert!(event
            .attribute("after")
            .unwrap()
            .starts_with("disp.cpu-light."));
        assert!(event
            .attribute("crunch")
            .unwrap()
            .starts_with("disp.cpu-intensive."));

        cpu_light.stop(Duration::from_secs(1));
        io.stop(Duration::from_secs(1));
        intensive.stop(Duration::from_secs(1));
    }

    #[test]
    fn test_light_async_forced_off_thread() {
        let cpu_light = Scheduler::start("async.cpu-light", 1).unwrap();
        let dispatcher = Dispatcher::reactor(cpu_light.clone());

        let pipeline = Pipeline::builder("p")
            .stage(Stage::light_async("hop", |mut e: Event| {
                e.set_attribute("hop", current_thread_name());
                Ok(e)
            }))
            .build();

        let (completion, rx) = completion_channel();
        dispatcher.execute(&pipeline, Event::new(json!(null)), completion);

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        let hop = event.attribute("hop").unwrap();
        assert!(hop.starts_with("async.cpu-light."), "got {hop}");
        assert_ne!(hop, current_thread_name());

        cpu_light.stop(Duration::from_secs(1));
    }
}
