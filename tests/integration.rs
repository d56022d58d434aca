//! Integration tests for `litani`.
//!
//! Each test runs the compiled binary through a full
//! init/add-job/run-build sequence under an isolated temp directory and
//! validates both the JSON envelope on stdout and the on-disk state
//! (`run.json`, status files, artifacts) it leaves behind.

use std::path::PathBuf;
use std::process::Command;

/// Path to the compiled binary.
fn binary() -> PathBuf {
    let mut p = std::env::current_exe().expect("current exe");
    p.pop(); // remove test binary name
    if p.ends_with("deps") {
        p.pop();
    }
    p.push("litani");
    if cfg!(windows) {
        p.set_extension("exe");
    }
    p
}

/// Test harness that owns an isolated temporary output-prefix
/// directory. Each test should create one harness; the directory is
/// cleaned up automatically when the harness is dropped.
struct TestHarness {
    _tmp: tempfile::TempDir,
    prefix: PathBuf,
}

impl TestHarness {
    fn new() -> Self {
        let tmp = tempfile::tempdir().expect("create tempdir");
        let prefix = tmp.path().to_path_buf();
        Self { _tmp: tmp, prefix }
    }

    /// Run the binary with the given args under this harness's
    /// `--output-prefix`, returning parsed stdout JSON. Panics with a
    /// descriptive message on any unexpected failure.
    fn run(&self, args: &[&str]) -> serde_json::Value {
        let bin = binary();
        let output = Command::new(&bin)
            .args(args)
            .current_dir(&self.prefix)
            .output()
            .expect("run binary");
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(
            !stdout.trim().is_empty(),
            "stdout is empty (stderr: {stderr})\nargs: {args:?}"
        );
        serde_json::from_str(stdout.trim()).unwrap_or_else(|e| {
            panic!("stdout is not valid JSON: {e}\nstdout: {stdout}\nstderr: {stderr}\nargs: {args:?}")
        })
    }

    fn init(&self, project: &str, extra: &[&str]) -> serde_json::Value {
        let mut args = vec!["init", "--project", project, "--ci-stage", "build", "--ci-stage", "test"];
        args.extend_from_slice(extra);
        self.run(&args)
    }

    fn cache_dir(&self, run_id: &str) -> PathBuf {
        self.prefix.join("litani").join("runs").join(run_id)
    }
}

fn assert_envelope(v: &serde_json::Value, expected_type: &str, expected_ok: bool) {
    assert_eq!(v["ok"].as_bool().unwrap_or(!expected_ok), expected_ok, "ok mismatch: {v}");
    assert_eq!(v["type"].as_str().unwrap_or(""), expected_type, "type mismatch: {v}");
}

fn run_json(prefix: &std::path::Path, run_id: &str) -> serde_json::Value {
    let path = prefix.join("litani").join("runs").join(run_id).join("run.json");
    let raw = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("read {}: {e}", path.display()));
    serde_json::from_str(&raw).unwrap_or_else(|e| panic!("parse run.json: {e}"))
}

// ── init ─────────────────────────────────────────────────────────────────────

#[test]
fn init_returns_run_id_and_report_url() {
    let h = TestHarness::new();
    let v = h.init("demo", &[]);
    assert_envelope(&v, "init", true);
    let run_id = v["run_id"].as_str().expect("run_id missing");
    assert!(!run_id.is_empty());
    assert!(v["report_url"].as_str().unwrap_or("").contains("html"));
    assert!(h.cache_dir(run_id).join("cache.json").exists());
}

#[test]
fn init_twice_with_same_run_id_errors() {
    let h = TestHarness::new();
    let bin = binary();
    let run_id = "11111111-1111-1111-1111-111111111111";

    let first = Command::new(&bin)
        .args(["init", "--project", "demo"])
        .current_dir(&h.prefix)
        .env("LITANI_RUN_ID", run_id)
        .output()
        .expect("run first init");
    assert!(first.status.success());

    let second = Command::new(&bin)
        .args(["init", "--project", "demo"])
        .current_dir(&h.prefix)
        .env("LITANI_RUN_ID", run_id)
        .output()
        .expect("run second init");
    let v: serde_json::Value =
        serde_json::from_str(String::from_utf8_lossy(&second.stdout).trim()).unwrap();
    assert_envelope(&v, "error", false);
    assert_eq!(v["error"]["code"].as_str().unwrap_or(""), "already_exists");
}

// ── add-job ──────────────────────────────────────────────────────────────────

#[test]
fn add_job_rejects_unknown_pool() {
    let h = TestHarness::new();
    h.init("demo", &[]);
    let v = h.run(&[
        "add-job",
        "--pipeline-name",
        "p",
        "--ci-stage",
        "build",
        "--command",
        "true",
        "--pool",
        "io",
    ]);
    assert_envelope(&v, "error", false);
    assert_eq!(v["error"]["code"].as_str().unwrap_or(""), "config_error");
}

#[test]
fn add_job_rejects_unknown_ci_stage() {
    let h = TestHarness::new();
    h.init("demo", &[]);
    let v = h.run(&[
        "add-job",
        "--pipeline-name",
        "p",
        "--ci-stage",
        "deploy",
        "--command",
        "true",
    ]);
    assert_envelope(&v, "error", false);
    assert_eq!(v["error"]["code"].as_str().unwrap_or(""), "config_error");
}

// ── scenario 1: linear chain ─────────────────────────────────────────────────

#[test]
fn linear_chain_succeeds_in_order() {
    let h = TestHarness::new();
    let init_v = h.init("demo", &[]);
    let run_id = init_v["run_id"].as_str().unwrap().to_string();
    let cache_dir = h.cache_dir(&run_id);

    let a_out = cache_dir.join("a.out").display().to_string();
    let b_out = cache_dir.join("b.out").display().to_string();

    h.run(&[
        "add-job", "--pipeline-name", "p", "--ci-stage", "build",
        "--command", &format!("touch {a_out}"), "--output", &a_out,
    ]);
    h.run(&[
        "add-job", "--pipeline-name", "p", "--ci-stage", "test",
        "--command", &format!("cat {a_out} > {b_out}"),
        "--input", &a_out, "--output", &b_out,
    ]);

    let v = h.run(&["run-build"]);
    assert_envelope(&v, "run-build", true);
    assert_eq!(v["status"].as_str().unwrap_or(""), "success");
    assert_eq!(v["n_succeeded"].as_i64().unwrap_or(-1), 2);
    assert!(cache_dir.join("b.out").exists());

    let rj = run_json(&h.prefix, &run_id);
    assert_eq!(rj["status"].as_str().unwrap_or(""), "success");
    for job in rj["jobs"].as_array().unwrap() {
        assert_eq!(job["status"]["outcome"].as_str().unwrap_or(""), "success");
        assert!(job["status"]["complete"].as_bool().unwrap_or(false));
    }
}

// ── scenario 2: diamond with pool ───────────────────────────────────────────

#[test]
fn diamond_with_pool_never_overlaps_and_d_runs_last() {
    let h = TestHarness::new();
    let init_v = h.init("demo", &["--pool", "io:1"]);
    let run_id = init_v["run_id"].as_str().unwrap().to_string();
    let cache_dir = h.cache_dir(&run_id);

    let a = cache_dir.join("a.out").display().to_string();
    let b = cache_dir.join("b.out").display().to_string();
    let c = cache_dir.join("c.out").display().to_string();
    let d = cache_dir.join("d.out").display().to_string();

    h.run(&["add-job", "--pipeline-name", "p", "--ci-stage", "build", "--command", &format!("touch {a}"), "--output", &a]);
    h.run(&["add-job", "--pipeline-name", "p", "--ci-stage", "build", "--command", &format!("sleep 0.1 && touch {b}"), "--input", &a, "--output", &b, "--pool", "io"]);
    h.run(&["add-job", "--pipeline-name", "p", "--ci-stage", "build", "--command", &format!("sleep 0.1 && touch {c}"), "--input", &a, "--output", &c, "--pool", "io"]);
    h.run(&["add-job", "--pipeline-name", "p", "--ci-stage", "test", "--command", &format!("touch {d}"), "--input", &b, "--input", &c, "--output", &d]);

    let v = h.run(&["run-build", "--parallelism", "4"]);
    assert_envelope(&v, "run-build", true);
    assert_eq!(v["status"].as_str().unwrap_or(""), "success");
    assert!(cache_dir.join("d.out").exists());

    let rj = run_json(&h.prefix, &run_id);
    for sample in rj["parallelism"]["samples"].as_array().unwrap() {
        // Every job in this build is either A (no deps), in pool `io`
        // depth 1 (B, C), or D (depends on both B and C). Since B and C
        // are the only jobs that could otherwise run concurrently and
        // the pool caps them at one at a time, the global running
        // count never exceeds 1 across the whole build.
        assert!(sample["running_count"].as_i64().unwrap() <= 1);
    }
}

// ── scenario 3: timeout-ok ──────────────────────────────────────────────────

#[test]
fn timeout_ok_job_reports_success() {
    let h = TestHarness::new();
    let init_v = h.init("demo", &[]);
    let run_id = init_v["run_id"].as_str().unwrap().to_string();

    h.run(&[
        "add-job", "--pipeline-name", "p", "--ci-stage", "build",
        "--command", "sleep 10", "--timeout", "1", "--timeout-ok",
    ]);

    let v = h.run(&["run-build"]);
    assert_envelope(&v, "run-build", true);
    assert_eq!(v["status"].as_str().unwrap_or(""), "success");

    let rj = run_json(&h.prefix, &run_id);
    let job = &rj["jobs"][0];
    assert_eq!(job["status"]["outcome"].as_str().unwrap_or(""), "success");
    assert_eq!(job["status"]["wrapper_return_code"].as_i64().unwrap_or(-1), 0);
    assert!(job["status"]["timed_out"].as_bool().unwrap_or(false));
}

// ── scenario 4: ignored return ───────────────────────────────────────────────

#[test]
fn ignored_return_code_reports_success() {
    let h = TestHarness::new();
    let init_v = h.init("demo", &[]);
    let run_id = init_v["run_id"].as_str().unwrap().to_string();

    h.run(&[
        "add-job", "--pipeline-name", "p", "--ci-stage", "build",
        "--command", "sh -c 'exit 77'", "--ignore-return", "77",
    ]);

    let v = h.run(&["run-build"]);
    assert_eq!(v["status"].as_str().unwrap_or(""), "success");

    let rj = run_json(&h.prefix, &run_id);
    assert_eq!(rj["jobs"][0]["status"]["outcome"].as_str().unwrap_or(""), "success");
}

#[test]
fn ok_return_code_reports_fail_ignored_without_poisoning_run() {
    let h = TestHarness::new();
    h.init("demo", &[]);

    h.run(&[
        "add-job", "--pipeline-name", "p", "--ci-stage", "build",
        "--command", "sh -c 'exit 42'", "--ok-return", "42",
    ]);

    let v = h.run(&["run-build"]);
    assert_eq!(v["status"].as_str().unwrap_or(""), "success");
    assert_eq!(v["n_failed_ignored"].as_i64().unwrap_or(0), 1);
    assert_eq!(v["n_failed"].as_i64().unwrap_or(-1), 0);
}

// ── scenario 5: failing subtree ─────────────────────────────────────────────

#[test]
fn failing_job_skips_dependents_and_fails_run() {
    let h = TestHarness::new();
    let init_v = h.init("demo", &[]);
    let run_id = init_v["run_id"].as_str().unwrap().to_string();
    let cache_dir = h.cache_dir(&run_id);
    let a_out = cache_dir.join("a.out").display().to_string();

    h.run(&["add-job", "--pipeline-name", "p", "--ci-stage", "build", "--command", "false", "--output", &a_out]);
    h.run(&["add-job", "--pipeline-name", "p", "--ci-stage", "test", "--command", "true", "--input", &a_out, "--output", "b.out"]);

    let v = h.run(&["run-build"]);
    assert_eq!(v["status"].as_str().unwrap_or(""), "failure");
    assert_eq!(v["n_failed"].as_i64().unwrap_or(0), 1);
    assert_eq!(v["n_skipped"].as_i64().unwrap_or(0), 1);

    // `--fail-on-pipeline-failure` flips the exit code, not re-runnable
    // since the run directory is now finalized.
    let bin = binary();
    let h2 = TestHarness::new();
    let init2 = h2.init("demo", &[]);
    let run_id2 = init2["run_id"].as_str().unwrap().to_string();
    h2.run(&["add-job", "--pipeline-name", "p", "--ci-stage", "build", "--command", "false"]);
    let out = Command::new(&bin)
        .args(["run-build", "--fail-on-pipeline-failure"])
        .current_dir(&h2.prefix)
        .output()
        .expect("run-build");
    assert_eq!(out.status.code(), Some(1));

    let rerun = Command::new(&bin)
        .args(["run-build"])
        .current_dir(&h2.prefix)
        .output()
        .expect("rerun");
    let rerun_v: serde_json::Value =
        serde_json::from_str(String::from_utf8_lossy(&rerun.stdout).trim()).unwrap();
    assert_envelope(&rerun_v, "error", false);
    assert_eq!(rerun_v["error"]["code"].as_str().unwrap_or(""), "already_exists");
    let _ = run_id2;
}

// ── scenario 6: live render ──────────────────────────────────────────────────

#[test]
fn run_json_is_always_parseable_during_a_long_job() {
    let h = TestHarness::new();
    let init_v = h.init("demo", &[]);
    let run_id = init_v["run_id"].as_str().unwrap().to_string();

    h.run(&["add-job", "--pipeline-name", "p", "--ci-stage", "build", "--command", "sleep 2"]);

    let bin = binary();
    let mut child = Command::new(&bin)
        .args(["run-build"])
        .current_dir(&h.prefix)
        .spawn()
        .expect("spawn run-build");

    let path = h.cache_dir(&run_id).join("run.json");
    let mut saw_any = false;
    for _ in 0..20 {
        std::thread::sleep(std::time::Duration::from_millis(200));
        if let Ok(raw) = std::fs::read_to_string(&path) {
            if !raw.trim().is_empty() {
                serde_json::from_str::<serde_json::Value>(&raw)
                    .unwrap_or_else(|e| panic!("run.json not parseable mid-run: {e}\n{raw}"));
                saw_any = true;
            }
        }
    }
    assert!(saw_any, "never observed a run.json while the build was in progress");
    child.wait().expect("run-build exit");
}

// ── graph / print-capabilities ───────────────────────────────────────────────

#[test]
fn graph_emits_dot_with_job_nodes() {
    let h = TestHarness::new();
    h.init("demo", &[]);
    h.run(&["add-job", "--pipeline-name", "p", "--ci-stage", "build", "--command", "true"]);

    let bin = binary();
    let out = Command::new(&bin)
        .args(["graph"])
        .current_dir(&h.prefix)
        .output()
        .expect("graph");
    let dot = String::from_utf8_lossy(&out.stdout);
    assert!(dot.trim_start().starts_with("digraph"));
    assert!(dot.contains("->") || dot.contains("label"));
}

#[test]
fn print_capabilities_lists_pools() {
    let h = TestHarness::new();
    let v = h.run(&["print-capabilities"]);
    assert_envelope(&v, "print-capabilities", true);
    let caps: Vec<&str> = v["capabilities"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c.as_str().unwrap())
        .collect();
    assert!(caps.contains(&"pools"));
}

// ── dry run ──────────────────────────────────────────────────────────────────

#[test]
fn pipelines_and_ci_stage_filters_are_mutually_exclusive() {
    let h = TestHarness::new();
    h.init("demo", &[]);
    h.run(&["add-job", "--pipeline-name", "p", "--ci-stage", "build", "--command", "true"]);

    let v = h.run(&["run-build", "--pipeline", "p", "--ci-stage", "build"]);
    assert_envelope(&v, "error", false);
    assert_eq!(v["error"]["code"].as_str().unwrap_or(""), "config_error");
}

#[test]
fn dry_run_does_not_execute_jobs() {
    let h = TestHarness::new();
    let init_v = h.init("demo", &[]);
    let run_id = init_v["run_id"].as_str().unwrap().to_string();
    let marker = h.cache_dir(&run_id).join("marker").display().to_string();

    h.run(&["add-job", "--pipeline-name", "p", "--ci-stage", "build", "--command", &format!("touch {marker}"), "--output", &marker]);

    let v = h.run(&["run-build", "--dry-run"]);
    assert_envelope(&v, "run-build", true);
    assert_eq!(v["n_skipped"].as_i64().unwrap_or(-1), 1);
    assert!(!std::path::Path::new(&marker).exists());
}
