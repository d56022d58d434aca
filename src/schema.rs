//! Shared JSON types: the wire envelope used by every CLI subcommand,
//! and the persisted document types (`Run`, `JobSpec`, `JobStatus`)
//! that make up the data model in spec.md §3.
//!
//! All stdout output is JSON only; tracing logs go to stderr.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION_MAJOR: u32 = 1;
pub const SCHEMA_VERSION_MINOR: u32 = 0;
pub const SCHEMA_VERSION_PATCH: u32 = 0;

fn print_json_to_stdout(value: &impl Serialize) {
    println!(
        "{}",
        serde_json::to_string(value).expect("JSON serialization failed")
    );
}

/// Top-level envelope used for every successful CLI response.
#[derive(Debug, Serialize, Deserialize)]
pub struct Response<T: Serialize> {
    pub schema_version: &'static str,
    pub ok: bool,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> Response<T> {
    pub fn new(kind: &'static str, data: T) -> Self {
        Response {
            schema_version: "1.0",
            ok: true,
            kind,
            data,
        }
    }

    pub fn print(&self) {
        print_json_to_stdout(self);
    }
}

/// Top-level envelope for error responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub schema_version: &'static str,
    pub ok: bool,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorResponse {
            schema_version: "1.0",
            ok: false,
            kind: "error",
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn print(&self) {
        print_json_to_stdout(self);
    }
}

// ---------------------------------------------------------------------
// Run / Pool
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Success,
    Failure,
}

/// A named, bounded-concurrency bucket. `depth` must be >= 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,
    pub depth: u32,
}

/// One `(t_seconds, running_count)` sample of the dispatcher's
/// parallelism over the run's wall-clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineSample {
    pub t_seconds: f64,
    pub running_count: i64,
}

/// Time-series of the running-job count during a build. Created empty
/// by the Dispatcher, appended on every start/finish, sealed at run
/// end and copied into the Cache Store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timeline {
    pub samples: Vec<TimelineSample>,
}

impl Timeline {
    pub fn push(&mut self, t_seconds: f64, running_count: i64) {
        // Coalesce same-timestamp samples (allowed by spec.md §4.5).
        if let Some(last) = self.samples.last_mut() {
            if last.t_seconds == t_seconds {
                last.running_count = running_count;
                return;
            }
        }
        self.samples.push(TimelineSample {
            t_seconds,
            running_count,
        });
    }
}

/// The persisted Cache Store document (spec.md §3 "Run").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
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
    /// Closed set of CI stage names declared at `init` time.
    pub ci_stages: Vec<String>,
    pub jobs: Vec<JobSpec>,
    pub parallelism: Timeline,
    #[serde(default)]
    pub aux: serde_json::Value,
}

// ---------------------------------------------------------------------
// JobSpec
// ---------------------------------------------------------------------

/// An immutable record produced by `add-job` (spec.md §3 "JobSpec").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    // identity
    pub job_id: String,
    pub pipeline_name: String,
    pub ci_stage: String,

    // graph
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,

    // execution
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_file: Option<String>,
    #[serde(default)]
    pub interleave_stdout_stderr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,

    // outcome policy
    #[serde(default)]
    pub ignore_returns: Vec<i32>,
    #[serde(default)]
    pub ok_returns: Vec<i32>,
    #[serde(default)]
    pub timeout_ok: bool,
    #[serde(default)]
    pub timeout_ignore: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_table: Option<String>,

    // observability
    #[serde(default)]
    pub profile_memory: bool,
    #[serde(default = "default_profile_memory_interval")]
    pub profile_memory_interval: u32,
    #[serde(default)]
    pub tags: Vec<String>,

    // bookkeeping
    pub status_file: String,
}

fn default_profile_memory_interval() -> u32 {
    1
}

impl JobSpec {
    /// Build the argv for invoking this job through the `exec`
    /// subcommand. An explicit method rather than reflection over the
    /// `add-job` argument table (spec.md §9 "Dynamic argument
    /// reflection").
    pub fn to_executor_argv(&self, root: &str) -> Vec<String> {
        vec![
            "exec".to_string(),
            "--root".to_string(),
            root.to_string(),
            "--job-id".to_string(),
            self.job_id.clone(),
        ]
    }
}

// ---------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Fail,
    FailIgnored,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Fail => "fail",
            Outcome::FailIgnored => "fail_ignored",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySample {
    pub t_seconds: f64,
    pub rss_bytes: u64,
}

/// Produced by the Job Executor, written atomically to `status_file`
/// twice: a start placeholder (`complete=false`) and the final record
/// (`complete=true`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub wrapper_arguments: JobSpec,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrapper_return_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_return_code: Option<i32>,
    #[serde(default)]
    pub stdout: Vec<String>,
    #[serde(default)]
    pub stderr: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_trace: Option<Vec<MemorySample>>,
    #[serde(default)]
    pub timed_out: bool,
}

/// Per-job scheduling state tracked in-memory by the Dispatcher.
/// Distinct from `JobStatus`, which is what actually gets persisted —
/// this is the state machine of spec.md §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    FailedIgnored,
    Skipped,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Pending | RunState::Ready | RunState::Running)
    }
}

// ---------------------------------------------------------------------
// CLI response payloads
// ---------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct InitData {
    pub run_id: String,
    pub cache_dir: String,
    pub report_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddJobData {
    pub job_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunBuildData {
    pub run_id: String,
    pub status: RunStatus,
    pub n_jobs: usize,
    pub n_succeeded: usize,
    pub n_failed: usize,
    pub n_failed_ignored: usize,
    pub n_skipped: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CapabilitiesData {
    pub capabilities: Vec<&'static str>,
}
