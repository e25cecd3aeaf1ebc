//! Run dispatcher.
//!
//! Splits the request budget across clients, launches every worker at once,
//! waits for all of them and times the whole run. Worker failures are logged
//! by the workers themselves and never change the report.

use crate::config::{Config, RuntimeType};
use crate::worker::{self, WorkerError, WorkerOutcome};
use std::fmt;
use std::io;
use std::thread;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Split `total` requests across `clients` workers.
///
/// The first `total % clients` workers get one extra request, so the counts
/// sum to `total` and differ by at most one.
pub fn partition(total: usize, clients: usize) -> Vec<usize> {
    if clients == 0 {
        return Vec::new();
    }

    let per_client = total / clients;
    let extra = total % clients;

    (0..clients)
        .map(|i| if i < extra { per_client + 1 } else { per_client })
        .collect()
}

/// Result of one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub total_requests: usize,
    pub clients: usize,
    pub elapsed: Duration,
}

impl RunReport {
    /// Configured requests per elapsed second
    pub fn throughput(&self) -> f64 {
        self.total_requests as f64 / self.elapsed.as_secs_f64()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total requests : {}", self.total_requests)?;
        writeln!(f, "Total clients  : {}", self.clients)?;
        writeln!(f, "Elapsed time   : {:.3} s", self.elapsed.as_secs_f64())?;
        write!(f, "Throughput     : {:.0} ops/sec", self.throughput())
    }
}

/// A worker body handed to a thread spawner
type Job = Box<dyn FnOnce() -> WorkerOutcome + Send + 'static>;

/// Run the benchmark described by `config` and report on it.
///
/// Workers that fail to connect, fail mid-run, panic or never start are
/// logged and otherwise ignored; a report is always produced.
pub fn run(config: &Config) -> RunReport {
    let addr = config.target_addr();
    let assignments = partition(config.total_requests, config.clients);

    info!(
        addr = %addr,
        total_requests = config.total_requests,
        clients = config.clients,
        runtime = ?config.runtime,
        "Starting run"
    );

    let (outcomes, elapsed) = match config.runtime {
        RuntimeType::Threads => run_threads(&addr, &assignments, spawn_thread),
        RuntimeType::Tokio => run_tokio(&addr, &assignments),
    };

    let completed: usize = outcomes.iter().map(|o| o.completed).sum();
    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    for (worker_id, outcome) in outcomes.iter().enumerate() {
        debug!(
            worker = worker_id,
            assigned = outcome.assigned,
            completed = outcome.completed,
            failed = outcome.error.is_some(),
            "Worker finished"
        );
    }
    // The report keeps the configured total even when workers stopped early.
    info!(
        completed,
        failed_workers = failed,
        elapsed_ms = elapsed.as_millis() as u64,
        "Run finished"
    );

    RunReport {
        total_requests: config.total_requests,
        clients: config.clients,
        elapsed,
    }
}

fn spawn_thread(worker_id: usize, job: Job) -> io::Result<thread::JoinHandle<WorkerOutcome>> {
    thread::Builder::new()
        .name(format!("worker-{worker_id}"))
        .spawn(job)
}

/// One blocking OS thread per client.
///
/// A thread that cannot be spawned is recorded as a failed worker; the
/// remaining workers are still started and joined.
fn run_threads<S>(
    addr: &str,
    assignments: &[usize],
    mut spawn: S,
) -> (Vec<WorkerOutcome>, Duration)
where
    S: FnMut(usize, Job) -> io::Result<thread::JoinHandle<WorkerOutcome>>,
{
    let mut started = Vec::with_capacity(assignments.len());

    let start = Instant::now();

    for (worker_id, &count) in assignments.iter().enumerate() {
        let addr = addr.to_string();
        let job: Job = Box::new(move || worker::run_blocking(&addr, count));

        match spawn(worker_id, job) {
            Ok(handle) => started.push((count, Ok(handle))),
            Err(e) => {
                error!(worker = worker_id, error = %e, "Failed to start worker");
                started.push((count, Err(WorkerError::Spawn(e))));
            }
        }
    }

    let outcomes = join_threads(started);
    (outcomes, start.elapsed())
}

/// Wait for every started thread, in worker order.
fn join_threads(
    started: Vec<(usize, Result<thread::JoinHandle<WorkerOutcome>, WorkerError>)>,
) -> Vec<WorkerOutcome> {
    started
        .into_iter()
        .enumerate()
        .map(|(worker_id, (count, handle))| match handle {
            Ok(handle) => handle.join().unwrap_or_else(|_| {
                error!(worker = worker_id, "Worker panicked");
                WorkerOutcome::failed(count, WorkerError::Panicked)
            }),
            Err(e) => WorkerOutcome::failed(count, e),
        })
        .collect()
}

/// One task per client on a multi-threaded tokio runtime.
fn run_tokio(addr: &str, assignments: &[usize]) -> (Vec<WorkerOutcome>, Duration) {
    let start = Instant::now();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("worker")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to start tokio runtime");
            let outcomes = assignments
                .iter()
                .map(|&count| {
                    let e = io::Error::new(e.kind(), e.to_string());
                    WorkerOutcome::failed(count, WorkerError::Spawn(e))
                })
                .collect();
            return (outcomes, start.elapsed());
        }
    };

    runtime.block_on(async {
        let start = Instant::now();

        let handles: Vec<_> = assignments
            .iter()
            .map(|&count| (count, tokio::spawn(worker::run_async(addr.to_string(), count))))
            .collect();

        let outcomes = join_tasks(handles).await;
        (outcomes, start.elapsed())
    })
}

/// Wait for every spawned task, in worker order.
async fn join_tasks(handles: Vec<(usize, JoinHandle<WorkerOutcome>)>) -> Vec<WorkerOutcome> {
    let mut outcomes = Vec::with_capacity(handles.len());

    for (worker_id, (count, handle)) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                error!(worker = worker_id, error = %e, "Worker task failed");
                outcomes.push(WorkerOutcome::failed(count, WorkerError::Panicked));
            }
        }
    }

    outcomes
}
