//! Builds the consolidated `run.json` view (spec.md §4.7, §6): the Run
//! document with each job's latest status merged in under
//! `jobs[*].status`. This is the sole stable external contract —
//! distinct from the Cache Store (`cache.json`), which is rewritten
//! only at `init` and at finalization.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;

use crate::rundir::{atomic_write, RunDir};
use crate::schema::{JobSpec, JobStatus, Run, RunStatus, Timeline};

#[derive(Debug, Clone, Serialize)]
pub struct JobWithStatus {
    #[serde(flatten)]
    pub spec: JobSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunJson {
    pub run_id: String,
    pub project: String,
    pub version_major: u32,
    pub version_minor: u32,
    pub version_patch: u32,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub status: RunStatus,
    pub pools: BTreeMap<String, u32>,
    pub ci_stages: Vec<String>,
    pub jobs: Vec<JobWithStatus>,
    pub parallelism: Timeline,
    pub aux: serde_json::Value,
}

/// Merge `run`'s job specs with each job's latest status. A status
/// file that is missing or unparsable (still being written, or the job
/// has not started) reads as `status: null` — the Renderer's
/// "tolerate partially present or currently-being-written status
/// files" rule (spec.md §4.7).
pub fn build(run: &Run, run_dir: &RunDir) -> RunJson {
    let jobs = run
        .jobs
        .iter()
        .map(|spec| JobWithStatus {
            status: read_status_tolerant(run_dir, &spec.job_id),
            spec: spec.clone(),
        })
        .collect();

    RunJson {
        run_id: run.run_id.clone(),
        project: run.project.clone(),
        version_major: run.version_major,
        version_minor: run.version_minor,
        version_patch: run.version_patch,
        start_time: run.start_time.clone(),
        end_time: run.end_time.clone(),
        status: run.status,
        pools: run.pools.clone(),
        ci_stages: run.ci_stages.clone(),
        jobs,
        parallelism: run.parallelism.clone(),
        aux: run.aux.clone(),
    }
}

/// Read a job's status file tolerantly: missing, truncated, or
/// mid-write content reads as "no status yet" rather than an error.
pub fn read_status_tolerant(run_dir: &RunDir, job_id: &str) -> Option<JobStatus> {
    let path = run_dir.status_dir().join(format!("{job_id}.json"));
    let raw = std::fs::read(&path).ok()?;
    serde_json::from_slice(&raw).ok()
}

/// Build and atomically write the consolidated `run.json` snapshot.
pub fn write(run: &Run, run_dir: &RunDir) -> Result<()> {
    let rendered = build(run, run_dir);
    let contents = serde_json::to_vec_pretty(&rendered)?;
    atomic_write(&run_dir.run_json_path(), &contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{JobSpec, Outcome};
    use std::path::Path;

    fn blank_spec(id: &str) -> JobSpec {
        JobSpec {
            job_id: id.into(),
            pipeline_name: "p".into(),
            ci_stage: "build".into(),
            inputs: vec![],
            outputs: vec![],
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

    fn blank_run(jobs: Vec<JobSpec>) -> Run {
        Run {
            run_id: "r1".into(),
            project: "p".into(),
            version_major: 1,
            version_minor: 0,
            version_patch: 0,
            start_time: "2020-01-01T00:00:00Z".into(),
            end_time: None,
            status: RunStatus::InProgress,
            pools: BTreeMap::new(),
            ci_stages: vec!["build".into()],
            jobs,
            parallelism: Timeline::default(),
            aux: serde_json::Value::Null,
        }
    }

    #[test]
    fn missing_status_file_renders_as_null() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = RunDir::new(Path::new(dir.path()), "r1");
        run_dir.create_tree().unwrap();
        let run = blank_run(vec![blank_spec("a")]);

        let rendered = build(&run, &run_dir);
        assert_eq!(rendered.jobs.len(), 1);
        assert!(rendered.jobs[0].status.is_none());
    }

    #[test]
    fn present_status_file_merges_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = RunDir::new(Path::new(dir.path()), "r1");
        run_dir.create_tree().unwrap();
        let run = blank_run(vec![blank_spec("a")]);

        let status = JobStatus {
            wrapper_arguments: blank_spec("a"),
            start_time: "2020-01-01T00:00:00Z".into(),
            end_time: Some("2020-01-01T00:00:01Z".into()),
            complete: true,
            outcome: Some(Outcome::Success),
            wrapper_return_code: Some(0),
            command_return_code: Some(0),
            stdout: vec![],
            stderr: vec![],
            memory_trace: None,
            timed_out: false,
        };
        let path = run_dir.status_dir().join("a.json");
        atomic_write(&path, &serde_json::to_vec(&status).unwrap()).unwrap();

        let rendered = build(&run, &run_dir);
        assert_eq!(rendered.jobs[0].status.as_ref().unwrap().outcome, Some(Outcome::Success));
    }

    #[test]
    fn write_produces_parsable_run_json() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = RunDir::new(Path::new(dir.path()), "r1");
        run_dir.create_tree().unwrap();
        let run = blank_run(vec![blank_spec("a")]);

        write(&run, &run_dir).unwrap();
        let raw = std::fs::read(run_dir.run_json_path()).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(parsed["run_id"], "r1");
        assert!(parsed["jobs"][0]["status"].is_null());
    }
}
