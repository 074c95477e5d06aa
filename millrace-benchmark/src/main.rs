//! Throughput comparison runner for the processing strategies.
//!
//! Pushes a fixed batch of events through each strategy and reports events
//! per second. Useful for eyeballing the latency/throughput tradeoffs of
//! the catalogue on real hardware; the criterion benches give the precise
//! numbers.

use std::env;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use millrace_engine::{
    NoTransaction, Pipeline, ProcessingStrategy, Stage, StrategyConfig, StrategyKind,
};
use millrace_event::Event;
use millrace_scheduler::SchedulerService;

const EVENTS: usize = 100_000;

fn print_usage() {
    println!("Usage: millrace-benchmark [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --all           Run every strategy (default)");
    println!("  --strategy <s>  Run one strategy (synchronous, reactor, proactor, work_queue)");
    println!("  --events <n>    Events per run (default {EVENTS})");
    println!("  --help          Show this help message");
}

fn run_strategy(kind: StrategyKind, events: usize) -> anyhow::Result<f64> {
    let service = SchedulerService::default();
    let strategy = ProcessingStrategy::start(
        kind,
        StrategyConfig::default()
            .with_buffer_size(1024)
            .with_max_concurrency(256),
        &service,
        "bench",
    )?;

    let (tx, rx) = mpsc::channel();
    let pipeline = Pipeline::builder("bench")
        .stage(Stage::light("checksum", |mut event: Event| {
            let n = event.payload.as_u64().unwrap_or(0);
            event.payload = json!(n.wrapping_mul(31).wrapping_add(7));
            Ok(event)
        }))
        .on_complete(move |_| {
            let _ = tx.send(());
        })
        .build();
    let sink = strategy.create_sink(pipeline, Arc::new(NoTransaction))?;

    let started = Instant::now();
    for i in 0..events {
        sink.accept(Event::new(json!(i as u64)))?;
    }
    for _ in 0..events {
        rx.recv_timeout(Duration::from_secs(60))?;
    }
    let elapsed = started.elapsed();

    sink.dispose();
    strategy.stop(Duration::from_secs(10));

    Ok(events as f64 / elapsed.as_secs_f64())
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut events = EVENTS;
    let mut only: Option<StrategyKind> = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" => {
                print_usage();
                return Ok(());
            }
            "--all" => {}
            "--strategy" => {
                let name = iter.next().map(String::as_str).unwrap_or("");
                only = Some(name.parse()?);
            }
            "--events" => {
                events = iter
                    .next()
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(EVENTS);
            }
            other => {
                eprintln!("Unknown option: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
    }

    let kinds = match only {
        Some(kind) => vec![kind],
        None => vec![
            StrategyKind::Synchronous,
            StrategyKind::Reactor,
            StrategyKind::Proactor,
            StrategyKind::WorkQueue,
        ],
    };

    println!("Millrace strategy throughput ({events} events, 1 light stage)");
    println!("{:<16} {:>14}", "strategy", "events/sec");
    for kind in kinds {
        let eps = run_strategy(kind, events)?;
        println!("{:<16} {:>14.0}", kind.to_string(), eps);
    }

    Ok(())
}
