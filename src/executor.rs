//! Job Executor (C6): runs a single job — redirection, timeout, memory
//! sampling, outcome classification, artifact copy, status-file
//! emission (spec.md §4.6). Invoked by the Dispatcher as the `exec`
//! subcommand, one child process per job, generalizing the teacher's
//! `supervise()` into a composed "supervised process" (Design Notes §9).

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::outcome::{classify, load_outcome_table};
use crate::rundir::atomic_write;
use crate::schema::{JobSpec, JobStatus, MemorySample};
use crate::time::now_rfc3339;

pub struct ExecOpts<'a> {
    pub job_id: &'a str,
    /// The run directory itself (`<output-prefix>/litani/runs/<run_id>`),
    /// as handed to this subprocess by the Dispatcher.
    pub root: &'a Path,
}

/// Run the job named by `opts.job_id` to completion and exit the
/// process with `wrapper_return_code` (spec.md §4.6 step 9 — the
/// Dispatcher reads this exit code to decide subtree success).
pub fn execute(opts: ExecOpts) -> Result<()> {
    let run_root = opts.root.to_path_buf();
    let status_dir = run_root.join("status");
    let artifacts_dir = run_root.join("artifacts");

    let spec_path = run_root.join("jobs").join(format!("{}.json", opts.job_id));
    let raw = std::fs::read(&spec_path)
        .with_context(|| format!("read job spec {}", spec_path.display()))?;
    let spec: JobSpec =
        serde_json::from_slice(&raw).with_context(|| format!("parse job spec {}", spec_path.display()))?;

    let status_path = status_dir.join(format!("{}.json", opts.job_id));

    let start_time = now_rfc3339();
    let preliminary = JobStatus {
        wrapper_arguments: spec.clone(),
        start_time: start_time.clone(),
        end_time: None,
        complete: false,
        outcome: None,
        wrapper_return_code: None,
        command_return_code: None,
        stdout: vec![],
        stderr: vec![],
        memory_trace: None,
        timed_out: false,
    };
    write_status(&status_path, &preliminary)?;

    let outcome_table = match &spec.outcome_table {
        Some(p) => Some(load_outcome_table(Path::new(p))?),
        None => None,
    };

    let mut child_cmd = Command::new("sh");
    child_cmd.arg("-c").arg(&spec.command);
    if let Some(cwd) = &spec.cwd {
        child_cmd.current_dir(cwd);
    }
    child_cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // New process group so timeout/cancellation can signal the
        // whole subtree, not just the shell.
        child_cmd.process_group(0);
    }

    let mut child = child_cmd.spawn().context("spawn job command")?;
    let pid = child.id();
    info!(job_id = opts.job_id, pid, "job started");

    // On Windows there is no process-group equivalent to `setpgid`, so
    // the child is assigned to a Job Object instead; terminating the
    // job object terminates the whole subtree it spawns.
    #[cfg(windows)]
    let group_handle = GroupHandle {
        job: assign_to_job_object(&child),
    };
    #[cfg(unix)]
    let group_handle = GroupHandle { pid };
    #[cfg(not(any(unix, windows)))]
    let group_handle = GroupHandle { pid };

    let child_stdout = child.stdout.take().expect("stdout piped");
    let child_stderr = child.stderr.take().expect("stderr piped");

    let stdout_lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let stderr_lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let stdout_file = spec.stdout_file.clone().map(PathBuf::from);
    let stderr_file = if spec.interleave_stdout_stderr {
        stdout_file.clone()
    } else {
        spec.stderr_file.clone().map(PathBuf::from)
    };

    let t_stdout = {
        let lines = Arc::clone(&stdout_lines);
        let mirror = stdout_file.clone();
        std::thread::spawn(move || capture_stream(child_stdout, lines, mirror))
    };
    let t_stderr = {
        let lines = Arc::clone(&stderr_lines);
        let mirror = stderr_file.clone();
        std::thread::spawn(move || capture_stream(child_stderr, lines, mirror))
    };

    let child_done = Arc::new(AtomicBool::new(false));
    let timed_out = Arc::new(AtomicBool::new(false));

    let timeout_handle = spec.timeout.map(|timeout_secs| {
        let child_done = Arc::clone(&child_done);
        let timed_out = Arc::clone(&timed_out);
        let job_id = opts.job_id.to_string();
        std::thread::spawn(move || {
            let deadline =
                std::time::Instant::now() + std::time::Duration::from_secs(timeout_secs);
            while std::time::Instant::now() < deadline {
                if child_done.load(Ordering::Relaxed) {
                    return;
                }
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
            if child_done.load(Ordering::Relaxed) {
                return;
            }
            info!(job_id = %job_id, "timeout reached, terminating process group");
            timed_out.store(true, Ordering::Relaxed);
            terminate_process_group(&group_handle, std::time::Duration::from_secs(2));
        })
    });

    let memory_trace: Arc<Mutex<Vec<MemorySample>>> = Arc::new(Mutex::new(Vec::new()));
    let memory_handle = if spec.profile_memory {
        let child_done = Arc::clone(&child_done);
        let trace = Arc::clone(&memory_trace);
        let interval = spec.profile_memory_interval.max(1) as u64;
        Some(std::thread::spawn(move || {
            let start = std::time::Instant::now();
            while !child_done.load(Ordering::Relaxed) {
                if let Some(rss) = crate::memory::sample_rss_tree_bytes(pid) {
                    trace.lock().unwrap().push(MemorySample {
                        t_seconds: start.elapsed().as_secs_f64(),
                        rss_bytes: rss,
                    });
                }
                std::thread::sleep(std::time::Duration::from_secs(interval));
            }
        }))
    } else {
        None
    };

    let exit_status = child.wait().context("wait for job command")?;
    child_done.store(true, Ordering::Relaxed);

    let _ = t_stdout.join();
    let _ = t_stderr.join();
    if let Some(h) = timeout_handle {
        let _ = h.join();
    }
    if let Some(h) = memory_handle {
        let _ = h.join();
    }

    let command_return_code = exit_status.code();
    let did_time_out = timed_out.load(Ordering::Relaxed);

    let (outcome, wrapper_return_code) =
        classify(command_return_code, did_time_out, &spec, outcome_table.as_ref());

    let copy_warnings = copy_artifacts(&spec, &artifacts_dir);
    for w in &copy_warnings {
        warn!(job_id = opts.job_id, "{w}");
    }

    let memory_trace_final = if spec.profile_memory {
        Some(memory_trace.lock().unwrap().clone())
    } else {
        None
    };

    let final_status = JobStatus {
        wrapper_arguments: spec,
        start_time,
        end_time: Some(now_rfc3339()),
        complete: true,
        outcome: Some(outcome),
        wrapper_return_code: Some(wrapper_return_code),
        command_return_code,
        stdout: stdout_lines.lock().unwrap().clone(),
        stderr: stderr_lines.lock().unwrap().clone(),
        memory_trace: memory_trace_final,
        timed_out: did_time_out,
    };
    write_status(&status_path, &final_status)?;

    debug!(job_id = opts.job_id, ?outcome, wrapper_return_code, "job finished");
    std::process::exit(wrapper_return_code);
}

fn write_status(path: &Path, status: &JobStatus) -> Result<()> {
    let contents = serde_json::to_vec_pretty(status).context("serialize job status")?;
    atomic_write(path, &contents)
}

/// Read a child's output pipe line-by-line, accumulating into memory
/// and optionally mirroring raw bytes to an on-disk log file.
fn capture_stream<R: Read>(
    stream: R,
    lines: Arc<Mutex<Vec<String>>>,
    mirror_path: Option<PathBuf>,
) {
    use std::io::Write;
    let mut mirror = mirror_path.as_ref().map(|p| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(p)
            .ok()
    });

    let mut reader = std::io::BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match std::io::BufRead::read_until(&mut reader, b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if let Some(Some(f)) = mirror.as_mut() {
                    let _ = f.write_all(&buf);
                }
                let line = String::from_utf8_lossy(&buf);
                lines.lock().unwrap().push(line.trim_end_matches('\n').to_string());
            }
            Err(_) => break,
        }
    }
}

/// What a platform needs to terminate a job's whole process subtree,
/// not just its direct child.
#[cfg(unix)]
struct GroupHandle {
    pid: u32,
}
#[cfg(windows)]
struct GroupHandle {
    job: Option<windows::Win32::Foundation::HANDLE>,
}
#[cfg(not(any(unix, windows)))]
struct GroupHandle {
    pid: u32,
}

// Safety: HANDLE is a plain integer-sized handle value; it is only
// ever read (TerminateJobObject) from the timeout thread after being
// handed off, never concurrently mutated.
#[cfg(windows)]
unsafe impl Send for GroupHandle {}

#[cfg(windows)]
fn assign_to_job_object(child: &std::process::Child) -> Option<windows::Win32::Foundation::HANDLE> {
    use std::os::windows::io::AsRawHandle;
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::System::JobObjects::{AssignProcessToJobObject, CreateJobObjectW};

    unsafe {
        let job = CreateJobObjectW(None, None).ok()?;
        let proc_handle = HANDLE(child.as_raw_handle() as isize);
        if AssignProcessToJobObject(job, proc_handle).is_err() {
            let _ = CloseHandle(job);
            return None;
        }
        // Intentionally not closed: this process exits as soon as the
        // job finishes, which tears the Job Object down with it.
        Some(job)
    }
}

#[cfg(unix)]
fn terminate_process_group(handle: &GroupHandle, grace: std::time::Duration) {
    unsafe {
        libc::kill(-(handle.pid as libc::pid_t), libc::SIGTERM);
    }
    std::thread::sleep(grace);
    unsafe {
        libc::kill(-(handle.pid as libc::pid_t), libc::SIGKILL);
    }
}

#[cfg(windows)]
fn terminate_process_group(handle: &GroupHandle, _grace: std::time::Duration) {
    use windows::Win32::System::JobObjects::TerminateJobObject;
    if let Some(job) = handle.job {
        unsafe {
            let _ = TerminateJobObject(job, 1);
        }
    }
}

#[cfg(not(any(unix, windows)))]
fn terminate_process_group(handle: &GroupHandle, _grace: std::time::Duration) {
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &handle.pid.to_string(), "/T", "/F"])
        .status();
}

/// Copy each declared output into `<artifacts>/<pipeline>/<ci_stage>/`.
/// Missing outputs are warned, not fatal (spec.md §4.6 step 7).
/// Returns the warning messages so the caller can log them.
fn copy_artifacts(spec: &JobSpec, artifacts_root: &Path) -> Vec<String> {
    let mut warnings = Vec::new();
    let bucket = artifacts_root.join(&spec.pipeline_name).join(&spec.ci_stage);
    if spec.outputs.is_empty() {
        return warnings;
    }
    if let Err(e) = std::fs::create_dir_all(&bucket) {
        warnings.push(format!("could not create artifact bucket {}: {e}", bucket.display()));
        return warnings;
    }

    let mut seen_names: std::collections::HashSet<String> = std::collections::HashSet::new();
    for output in &spec.outputs {
        let src = Path::new(output);
        if !src.exists() {
            warnings.push(format!("missing output {output}, not copied to artifacts"));
            continue;
        }
        let name = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| output.clone());
        if !seen_names.insert(name.clone()) {
            warnings.push(format!(
                "duplicate artifact name {name:?} in {}/{}",
                spec.pipeline_name, spec.ci_stage
            ));
        }
        let dst = bucket.join(&name);
        let result = if src.is_dir() {
            copy_dir_recursive(src, &dst)
        } else {
            std::fs::copy(src, &dst).map(|_| ())
        };
        if let Err(e) = result {
            warnings.push(format!("failed to copy artifact {output} to {}: {e}", dst.display()));
        }
    }
    warnings
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dst_path = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &dst_path)?;
        } else {
            std::fs::copy(entry.path(), &dst_path)?;
        }
    }
    Ok(())
}
