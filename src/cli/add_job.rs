//! `litani add-job` — append one job spec to the current run's Job
//! Registry.

use std::path::PathBuf;

use anyhow::Result;

use crate::cli::init::current_run_dir;
use crate::jobstore;
use crate::schema::{AddJobData, JobSpec, Response};

pub struct AddJobOpts {
    pub output_prefix: PathBuf,
    pub pipeline_name: String,
    pub ci_stage: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub command: String,
    pub cwd: Option<String>,
    pub timeout: Option<u64>,
    pub stdout_file: Option<String>,
    pub stderr_file: Option<String>,
    pub interleave_stdout_stderr: bool,
    pub description: Option<String>,
    pub pool: Option<String>,
    pub ignore_returns: Vec<i32>,
    pub ok_returns: Vec<i32>,
    pub timeout_ok: bool,
    pub timeout_ignore: bool,
    pub outcome_table: Option<String>,
    pub profile_memory: bool,
    pub profile_memory_interval: u32,
    pub tags: Vec<String>,
}

/// Writes the new spec only to the Job Registry (`<run>/jobs/`), not
/// to the Cache Store — the Cache Store's `jobs` list is only
/// populated from the registry at `run-build` start (spec.md §4.2,
/// §4.3).
pub fn execute(opts: AddJobOpts) -> Result<()> {
    let run_dir = current_run_dir(&opts.output_prefix)?;
    // Read-only: used to validate the pool/ci_stage references.
    let run = crate::cache::load(&run_dir.cache_path())?;

    crate::jobstore::validate_ci_stage(&opts.ci_stage, &run.ci_stages)?;

    let spec = JobSpec {
        job_id: String::new(),
        pipeline_name: opts.pipeline_name,
        ci_stage: opts.ci_stage,
        inputs: opts.inputs,
        outputs: opts.outputs,
        command: opts.command,
        cwd: opts.cwd,
        timeout: opts.timeout,
        stdout_file: opts.stdout_file,
        stderr_file: opts.stderr_file,
        interleave_stdout_stderr: opts.interleave_stdout_stderr,
        description: opts.description,
        pool: opts.pool,
        ignore_returns: opts.ignore_returns,
        ok_returns: opts.ok_returns,
        timeout_ok: opts.timeout_ok,
        timeout_ignore: opts.timeout_ignore,
        outcome_table: opts.outcome_table,
        profile_memory: opts.profile_memory,
        profile_memory_interval: opts.profile_memory_interval,
        tags: opts.tags,
        status_file: String::new(),
    };

    if let Some(pool) = &spec.pool {
        if !run.pools.contains_key(pool) {
            return Err(crate::error::ConfigError(format!(
                "job references unknown pool {pool:?}; declare it with `litani init --pool {pool}:DEPTH`"
            ))
            .into());
        }
    }

    let spec = jobstore::add_job(&run_dir, spec)?;

    Response::new("add-job", AddJobData { job_id: spec.job_id }).print();
    Ok(())
}
