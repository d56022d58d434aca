//! `litani init` — start a new run: allocate a run id, declare its
//! pools and CI stages, and lay down the run directory tree.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use uuid::Uuid;

use crate::error::AlreadyExists;
use crate::jobstore::parse_pool_spec;
use crate::rundir::RunDir;
use crate::schema::{InitData, Response, Run, RunStatus, Timeline};
use crate::time::now_rfc3339;

pub struct InitOpts<'a> {
    pub project: &'a str,
    pub version: &'a str,
    pub output_prefix: PathBuf,
    pub pools: &'a [String],
    pub ci_stages: &'a [String],
}

/// `LITANI_RUN_ID` overrides the generated UUID (spec.md §6
/// "Environment"), e.g. so a wrapping CI system can correlate its own
/// job id with litani's run directory.
fn resolve_run_id() -> String {
    std::env::var("LITANI_RUN_ID").unwrap_or_else(|_| Uuid::new_v4().to_string())
}

pub fn execute(opts: InitOpts) -> Result<()> {
    let run_id = resolve_run_id();
    let run_dir = RunDir::new(&opts.output_prefix, &run_id);
    if run_dir.root.exists() {
        return Err(AlreadyExists(format!(
            "run directory {} already exists",
            run_dir.root.display()
        ))
        .into());
    }
    run_dir.create_tree()?;

    let mut pools: BTreeMap<String, u32> = BTreeMap::new();
    for spec in opts.pools {
        let (name, depth) = parse_pool_spec(spec)?;
        pools.insert(name, depth);
    }

    let (major, minor, patch) = parse_version(opts.version);

    let run = Run {
        run_id: run_id.clone(),
        project: opts.project.to_string(),
        version_major: major,
        version_minor: minor,
        version_patch: patch,
        start_time: now_rfc3339(),
        end_time: None,
        status: RunStatus::InProgress,
        pools,
        ci_stages: opts.ci_stages.to_vec(),
        jobs: vec![],
        parallelism: Timeline::default(),
        aux: serde_json::Value::Null,
    };

    crate::cache::save(&run_dir.cache_path(), &run)?;
    run_dir.write_pointer(&opts.output_prefix)?;
    run_dir.update_latest_symlink(&opts.output_prefix)?;

    Response::new(
        "init",
        InitData {
            run_id,
            cache_dir: run_dir.root.display().to_string(),
            report_url: run_dir.html_symlink_path().display().to_string(),
        },
    )
    .print();
    Ok(())
}

fn parse_version(v: &str) -> (u32, u32, u32) {
    let mut parts = v.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

/// Resolve the run directory that a later command (`add-job`,
/// `run-build`, `graph`) should operate on, from the pointer file
/// `init` left behind in `output_prefix`.
pub fn current_run_dir(output_prefix: &Path) -> Result<RunDir> {
    let run_id = crate::rundir::read_pointer(output_prefix)?;
    Ok(RunDir::new(output_prefix, &run_id))
}
