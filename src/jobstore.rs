//! Job Registry (C3): accepts `add-job` submissions, assigns stable
//! IDs, and persists per-job specs under `<run>/jobs/<job_id>.json`.

use std::path::Path;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::error::ConfigError;
use crate::rundir::{atomic_write, RunDir};
use crate::schema::JobSpec;

/// Assign a fresh UUID and atomically persist `spec` (with `job_id` and
/// `status_file` filled in) under `<run>/jobs/<job_id>.json`.
/// Returns the finalized spec.
pub fn add_job(run_dir: &RunDir, mut spec: JobSpec) -> Result<JobSpec> {
    let job_id = Uuid::new_v4().to_string();
    spec.job_id = job_id.clone();
    spec.status_file = run_dir
        .status_dir()
        .join(format!("{job_id}.json"))
        .display()
        .to_string();

    let path = run_dir.jobs_dir().join(format!("{job_id}.json"));
    let contents = serde_json::to_vec_pretty(&spec).context("serialize job spec")?;
    atomic_write(&path, &contents)?;
    Ok(spec)
}

/// Load every job spec under `<run>/jobs/`, as at `run-build` start.
pub fn load_all(run_dir: &RunDir) -> Result<Vec<JobSpec>> {
    let dir = run_dir.jobs_dir();
    let mut specs = Vec::new();
    if !dir.exists() {
        return Ok(specs);
    }
    let mut entries: Vec<_> = std::fs::read_dir(&dir)
        .with_context(|| format!("read jobs dir {}", dir.display()))?
        .filter_map(|e| e.ok())
        .collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let raw = std::fs::read(&path)
            .with_context(|| format!("read job spec {}", path.display()))?;
        let spec: JobSpec = serde_json::from_slice(&raw)
            .with_context(|| format!("parse job spec {}", path.display()))?;
        specs.push(spec);
    }
    Ok(specs)
}

/// Validate that every job's `pool` (if set) is declared in `pools`.
/// A job referencing a non-existent pool fails `run-build` fatally
/// with a diagnostic naming the job description and offending pool.
pub fn validate_pools(jobs: &[JobSpec], pools: &std::collections::BTreeMap<String, u32>) -> Result<()> {
    for job in jobs {
        if let Some(pool) = &job.pool {
            if !pools.contains_key(pool) {
                let desc = job.description.clone().unwrap_or_else(|| job.job_id.clone());
                return Err(ConfigError(format!(
                    "job {desc:?} references unknown pool {pool:?}"
                ))
                .into());
            }
        }
    }
    Ok(())
}

/// Reject a job submitted against a CI stage that was never declared
/// at `init` time, rather than silently accepting an unscheduled stage.
pub fn validate_ci_stage(ci_stage: &str, declared: &[String]) -> Result<()> {
    if declared.iter().any(|s| s == ci_stage) {
        Ok(())
    } else {
        Err(ConfigError(format!(
            "ci_stage {ci_stage:?} was not declared at `litani init` time"
        ))
        .into())
    }
}

/// Parse `NAME:DEPTH` pool specifications from `init --pools`.
pub fn parse_pool_spec(spec: &str) -> Result<(String, u32)> {
    let (name, depth_str) = spec
        .split_once(':')
        .ok_or_else(|| ConfigError(format!("invalid pool spec {spec:?}, expected NAME:DEPTH")))?;
    let depth: u32 = depth_str.parse().map_err(|_| {
        ConfigError(format!(
            "invalid pool depth {depth_str:?} in {spec:?}: must be a positive integer"
        ))
    })?;
    if depth == 0 {
        return Err(ConfigError(format!(
            "invalid pool depth 0 in {spec:?}: depth must be >= 1"
        ))
        .into());
    }
    Ok((name.to_string(), depth))
}

/// Parse a CLI-provided integer that must be strictly positive,
/// resolving Open Question (b) in spec.md §9: raise a clean diagnostic
/// naming the offending value rather than panicking. Used directly as
/// a clap `value_parser` for `add-job --timeout`.
pub fn parse_positive_int(s: &str) -> Result<u64, String> {
    let v: i64 = s
        .parse()
        .map_err(|_| format!("invalid integer {s:?}"))?;
    if v <= 0 {
        return Err(format!("expected a positive integer, got {v}"));
    }
    Ok(v as u64)
}

/// As [`parse_positive_int`], narrowed to `u32` for flags like
/// `--profile-memory-interval` ("int >= 1", spec.md §3).
pub fn parse_positive_u32(s: &str) -> Result<u32, String> {
    let v = parse_positive_int(s)?;
    u32::try_from(v).map_err(|_| format!("value {v} out of range for a u32"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn blank_spec() -> JobSpec {
        JobSpec {
            job_id: String::new(),
            pipeline_name: "p".into(),
            ci_stage: "build".into(),
            inputs: vec![],
            outputs: vec!["out.txt".into()],
            command: "true".into(),
            cwd: None,
            timeout: None,
            stdout_file: None,
            stderr_file: None,
            interleave_stdout_stderr: false,
            description: None,
            pool: None,
            ignore_returns: vec![],
            ok_returns: vec![],
            timeout_ok: false,
            timeout_ignore: false,
            outcome_table: None,
            profile_memory: false,
            profile_memory_interval: 1,
            tags: vec![],
            status_file: String::new(),
        }
    }

    #[test]
    fn add_job_assigns_uuid_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = RunDir::new(Path::new(dir.path()), "r1");
        run_dir.create_tree().unwrap();

        let spec = add_job(&run_dir, blank_spec()).unwrap();
        assert!(!spec.job_id.is_empty());
        assert!(spec.status_file.contains(&spec.job_id));

        let loaded = load_all(&run_dir).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].job_id, spec.job_id);
    }

    #[test]
    fn validate_pools_rejects_unknown_pool() {
        let mut spec = blank_spec();
        spec.pool = Some("io".into());
        let pools = std::collections::BTreeMap::new();
        assert!(validate_pools(&[spec], &pools).is_err());
    }

    #[test]
    fn parse_pool_spec_parses_name_and_depth() {
        assert_eq!(parse_pool_spec("io:4").unwrap(), ("io".to_string(), 4));
        assert!(parse_pool_spec("io").is_err());
        assert!(parse_pool_spec("io:0").is_err());
        assert!(parse_pool_spec("io:-1").is_err());
    }

    #[test]
    fn parse_positive_int_rejects_non_positive() {
        assert!(parse_positive_int("0").is_err());
        assert!(parse_positive_int("-5").is_err());
        assert!(parse_positive_int("abc").is_err());
        assert_eq!(parse_positive_int("5").unwrap(), 5);
    }
}
