//! Dispatcher (C5): walks the Graph in deterministic depth order,
//! admits ready jobs through global and per-pool concurrency caps, and
//! spawns each as a `litani exec` child process (spec.md §4.5).
//!
//! Threaded, not async — matching the teacher's synchronous process
//! model. Concurrency limits are enforced with `Condvar`-guarded
//! counters rather than a thread pool, since the unit of work here is
//! an OS process, not an in-process task.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};

use anyhow::Result;
use tracing::{info, warn};

use crate::graph::Graph;
use crate::rundir::RunDir;
use crate::schema::{JobSpec, JobStatus, RunState, Timeline};

/// A counting semaphore built on `Condvar`, used for both the global
/// cap and each named pool's cap.
struct Semaphore {
    state: Mutex<u32>,
    capacity: u32,
    cv: Condvar,
}

impl Semaphore {
    fn new(capacity: u32) -> Self {
        Semaphore {
            state: Mutex::new(0),
            capacity,
            cv: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut held = self.state.lock().unwrap();
        while *held >= self.capacity {
            held = self.cv.wait(held).unwrap();
        }
        *held += 1;
    }

    fn release(&self) {
        let mut held = self.state.lock().unwrap();
        *held -= 1;
        self.cv.notify_one();
    }
}

/// Resolve `--parallel N` (spec.md §4.5): `None` (flag omitted) defaults
/// to the host's CPU count, `Some(0)` means unbounded, and any other
/// `Some(n)` caps concurrency at `n`.
fn resolve_global_cap(parallelism: Option<u32>) -> u32 {
    match parallelism {
        None => std::thread::available_parallelism().map_or(1, |n| n.get() as u32),
        Some(0) => u32::MAX,
        Some(n) => n,
    }
}

pub struct DispatchOpts {
    pub run_dir: RunDir,
    pub output_prefix: PathBuf,
    pub jobs: Vec<JobSpec>,
    pub pools: BTreeMap<String, u32>,
    pub parallelism: Option<u32>,
    pub pipelines: Vec<String>,
    pub ci_stage: Option<String>,
    pub dry_run: bool,
    pub fail_on_pipeline_failure: bool,
}

pub struct DispatchReport {
    pub n_jobs: usize,
    pub n_succeeded: usize,
    pub n_failed: usize,
    pub n_failed_ignored: usize,
    pub n_skipped: usize,
    pub overall_success: bool,
    pub parallelism: Timeline,
}

/// Shared, lock-protected scheduling state threaded through every
/// worker thread.
struct Shared {
    graph: Graph,
    jobs_by_id: HashMap<String, JobSpec>,
    selected: HashSet<String>,
    states: Mutex<HashMap<String, RunState>>,
    parallelism: Mutex<Timeline>,
    running_count: Mutex<i64>,
    start: std::time::Instant,
}

pub fn run(opts: DispatchOpts) -> Result<DispatchReport> {
    if !opts.pipelines.is_empty() && opts.ci_stage.is_some() {
        return Err(crate::error::ConfigError(
            "--pipeline and --ci-stage are mutually exclusive".to_string(),
        )
        .into());
    }

    let graph = Graph::build(&opts.jobs).map_err(|e| anyhow::anyhow!("{e}"))?;

    let selected = select_jobs(&graph, &opts);
    let n_jobs = selected.len();

    let mut jobs_by_id = HashMap::new();
    for job in &opts.jobs {
        jobs_by_id.insert(job.job_id.clone(), job.clone());
    }

    let mut states = HashMap::new();
    for job in &opts.jobs {
        let state = if selected.contains(&job.job_id) {
            RunState::Pending
        } else {
            RunState::Skipped
        };
        states.insert(job.job_id.clone(), state);
    }

    if opts.dry_run {
        let mut order: Vec<&String> = selected.iter().collect();
        order.sort_by_key(|id| graph.schedule_key(id));
        for id in order {
            info!(job_id = %id, "dry-run: would execute");
        }
        return Ok(DispatchReport {
            n_jobs,
            n_succeeded: 0,
            n_failed: 0,
            n_failed_ignored: 0,
            n_skipped: n_jobs,
            overall_success: true,
            parallelism: Timeline::default(),
        });
    }

    let shared = Arc::new(Shared {
        graph,
        jobs_by_id,
        selected,
        states: Mutex::new(states),
        parallelism: Mutex::new(Timeline::default()),
        running_count: Mutex::new(0),
        start: std::time::Instant::now(),
    });

    let global_cap = resolve_global_cap(opts.parallelism);
    let global_sem = Arc::new(Semaphore::new(global_cap));

    let mut pool_sems: HashMap<String, Arc<Semaphore>> = HashMap::new();
    for (name, depth) in &opts.pools {
        pool_sems.insert(name.clone(), Arc::new(Semaphore::new(*depth)));
    }
    let pool_sems = Arc::new(pool_sems);

    let run_dir = Arc::new(opts.run_dir.clone());
    let output_prefix = Arc::new(opts.output_prefix.clone());

    let mut order: Vec<String> = shared.selected.iter().cloned().collect();
    order.sort_by_key(|id| shared.graph.schedule_key(id));

    // One worker thread per selected job. Each blocks on its
    // dependencies' terminal state before admitting itself through the
    // global and pool semaphores, so the thread count is bounded by
    // job count, not by any resource cap — the semaphores do the real
    // throttling.
    let mut handles = Vec::with_capacity(order.len());
    for job_id in order {
        let shared = Arc::clone(&shared);
        let global_sem = Arc::clone(&global_sem);
        let pool_sems = Arc::clone(&pool_sems);
        let run_dir = Arc::clone(&run_dir);
        let output_prefix = Arc::clone(&output_prefix);
        handles.push(std::thread::spawn(move || {
            run_one_job(&job_id, &shared, &global_sem, &pool_sems, &run_dir, &output_prefix)
        }));
    }
    for h in handles {
        let _ = h.join();
    }

    let states = shared.states.lock().unwrap();
    let mut n_succeeded = 0;
    let mut n_failed = 0;
    let mut n_failed_ignored = 0;
    let mut n_skipped = 0;
    for state in states.values() {
        match state {
            RunState::Succeeded => n_succeeded += 1,
            RunState::Failed => n_failed += 1,
            RunState::FailedIgnored => n_failed_ignored += 1,
            RunState::Skipped => n_skipped += 1,
            _ => {}
        }
    }

    // Run-level success/failure and the `--fail-on-pipeline-failure`
    // exit-code decision are the Pipeline Postprocessor's job (C8); this
    // is just the raw job tally.
    let overall_success = n_failed == 0;

    Ok(DispatchReport {
        n_jobs,
        n_succeeded,
        n_failed,
        n_failed_ignored,
        n_skipped,
        overall_success,
        parallelism: shared.parallelism.lock().unwrap().clone(),
    })
}

/// Resolve which jobs this invocation actually runs, honoring
/// `--pipelines` and `--ci-stage` filters (default: everything).
fn select_jobs(graph: &Graph, opts: &DispatchOpts) -> HashSet<String> {
    if !opts.pipelines.is_empty() {
        return graph.restrict_to_pipelines(&opts.pipelines);
    }
    if let Some(stage) = &opts.ci_stage {
        return graph.restrict_to_ci_stage(stage);
    }
    graph.order.iter().cloned().collect()
}

fn run_one_job(
    job_id: &str,
    shared: &Shared,
    global_sem: &Semaphore,
    pool_sems: &HashMap<String, Arc<Semaphore>>,
    run_dir: &RunDir,
    output_prefix: &Path,
) {
    let job = match shared.jobs_by_id.get(job_id) {
        Some(j) => j.clone(),
        None => return,
    };

    // Wait for dependencies to reach a terminal state.
    let deps: Vec<String> = shared
        .graph
        .depends_on
        .get(job_id)
        .map(|s| s.iter().cloned().collect())
        .unwrap_or_default();

    loop {
        let states = shared.states.lock().unwrap();
        let all_terminal = deps.iter().all(|d| {
            states
                .get(d)
                .map(|s| s.is_terminal())
                .unwrap_or(true)
        });
        if all_terminal {
            break;
        }
        drop(states);
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    let any_dep_failed = {
        let states = shared.states.lock().unwrap();
        deps.iter().any(|d| {
            matches!(
                states.get(d),
                Some(RunState::Failed) | Some(RunState::Skipped)
            )
        })
    };
    if any_dep_failed {
        shared
            .states
            .lock()
            .unwrap()
            .insert(job_id.to_string(), RunState::Skipped);
        warn!(job_id, "skipping: ancestor failed");
        return;
    }

    set_state(shared, job_id, RunState::Ready);

    let pool_sem = job.pool.as_ref().and_then(|p| pool_sems.get(p)).cloned();

    global_sem.acquire();
    if let Some(sem) = &pool_sem {
        sem.acquire();
    }

    admit(shared);
    set_state(shared, job_id, RunState::Running);

    let argv = job.to_executor_argv(&run_dir.root.display().to_string());
    let self_exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("litani"));
    let status = std::process::Command::new(self_exe)
        .args(&argv[..])
        .current_dir(output_prefix)
        .status();

    retire(shared);
    if let Some(sem) = &pool_sem {
        sem.release();
    }
    global_sem.release();

    let final_state = match status {
        // `wrapper_return_code` is 0 for both `success` and
        // `fail_ignored` (spec.md §4.6 step 6), so the exit code alone
        // never distinguishes them — the persisted `JobStatus.outcome`
        // is the only source of truth regardless of which code came
        // back.
        Ok(exit) if exit.code().is_some() => classify_from_status_file(run_dir, job_id),
        Ok(_) => RunState::Failed,
        Err(e) => {
            warn!(job_id, "failed to spawn exec subprocess: {e}");
            RunState::Failed
        }
    };
    set_state(shared, job_id, final_state);
}

/// Read back the persisted `JobStatus.outcome`, the only source of
/// truth for distinguishing `success` from `fail_ignored` (both report
/// `wrapper_return_code = 0`).
fn classify_from_status_file(run_dir: &RunDir, job_id: &str) -> RunState {
    let path = run_dir.status_dir().join(format!("{job_id}.json"));
    let raw = match std::fs::read(&path) {
        Ok(r) => r,
        Err(_) => return RunState::Failed,
    };
    let status: Result<JobStatus, _> = serde_json::from_slice(&raw);
    match status {
        Ok(s) => match s.outcome {
            Some(crate::schema::Outcome::Success) => RunState::Succeeded,
            Some(crate::schema::Outcome::FailIgnored) => RunState::FailedIgnored,
            Some(crate::schema::Outcome::Fail) | None => RunState::Failed,
        },
        Err(_) => RunState::Failed,
    }
}

fn set_state(shared: &Shared, job_id: &str, state: RunState) {
    shared
        .states
        .lock()
        .unwrap()
        .insert(job_id.to_string(), state);
}

fn admit(shared: &Shared) {
    let mut count = shared.running_count.lock().unwrap();
    *count += 1;
    let t = shared.start.elapsed().as_secs_f64();
    shared.parallelism.lock().unwrap().push(t, *count);
}

fn retire(shared: &Shared) {
    let mut count = shared.running_count.lock().unwrap();
    *count -= 1;
    let t = shared.start.elapsed().as_secs_f64();
    shared.parallelism.lock().unwrap().push(t, *count);
}
