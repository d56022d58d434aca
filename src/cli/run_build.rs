//! `litani run-build` — dispatch every selected job, render the report
//! concurrently, and seal the run's final outcome.

use std::path::PathBuf;

use anyhow::Result;

use crate::cli::init::current_run_dir;
use crate::dispatcher::{self, DispatchOpts};
use crate::error::AlreadyExists;
use crate::jobstore;
use crate::renderer::Renderer;
use crate::schema::{Response, RunBuildData, RunStatus};

pub struct RunBuildOpts {
    pub output_prefix: PathBuf,
    pub parallelism: Option<u32>,
    pub pipelines: Vec<String>,
    pub ci_stage: Option<String>,
    pub dry_run: bool,
    pub no_render: bool,
    pub fail_on_pipeline_failure: bool,
}

pub fn execute(opts: RunBuildOpts) -> Result<i32> {
    let run_dir = current_run_dir(&opts.output_prefix)?;
    let mut run = crate::cache::load(&run_dir.cache_path())?;

    // `run-build` is not re-entrant: a run directory that already has
    // a terminal status was already built (spec.md §8 "Idempotence").
    if !matches!(run.status, RunStatus::InProgress) {
        return Err(AlreadyExists(format!(
            "run {} was already finalized with status {:?}",
            run.run_id, run.status
        ))
        .into());
    }

    let jobs = jobstore::load_all(&run_dir)?;
    jobstore::validate_pools(&jobs, &run.pools)?;
    run.jobs = jobs.clone();

    let renderer = if opts.dry_run || opts.no_render {
        None
    } else {
        Some(Renderer::spawn(
            run_dir.clone(),
            opts.output_prefix.clone(),
            run.clone(),
        ))
    };

    let report = dispatcher::run(DispatchOpts {
        run_dir: run_dir.clone(),
        output_prefix: opts.output_prefix.clone(),
        jobs,
        pools: run.pools.clone(),
        parallelism: opts.parallelism,
        pipelines: opts.pipelines,
        ci_stage: opts.ci_stage,
        dry_run: opts.dry_run,
        fail_on_pipeline_failure: opts.fail_on_pipeline_failure,
    })?;

    if let Some(r) = renderer {
        r.stop_and_join();
    }

    if opts.dry_run {
        Response::new(
            "run-build",
            RunBuildData {
                run_id: run.run_id.clone(),
                status: run.status,
                n_jobs: report.n_jobs,
                n_succeeded: 0,
                n_failed: 0,
                n_failed_ignored: 0,
                n_skipped: report.n_skipped,
            },
        )
        .print();
        return Ok(0);
    }

    run.parallelism = report.parallelism.clone();
    let post = crate::postprocess::run(&run_dir, &mut run, opts.fail_on_pipeline_failure)?;

    Response::new(
        "run-build",
        RunBuildData {
            run_id: run.run_id,
            status: post.run_status,
            n_jobs: report.n_jobs,
            n_succeeded: report.n_succeeded,
            n_failed: report.n_failed,
            n_failed_ignored: report.n_failed_ignored,
            n_skipped: report.n_skipped,
        },
    )
    .print();

    Ok(post.exit_code)
}
