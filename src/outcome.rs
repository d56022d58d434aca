//! Outcome classification (spec.md §4.6 step 6): a pure function of
//! `(exit_status, JobSpec)` so it can be unit tested without spawning
//! any process (Design Notes §9).

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

use crate::schema::{JobSpec, Outcome};

/// Load an `outcome_table` JSON file: a map from stringified return
/// code to outcome name.
pub fn load_outcome_table(path: &Path) -> Result<HashMap<String, Outcome>> {
    let raw = std::fs::read(path)
        .with_context(|| format!("read outcome table {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("parse outcome table {}", path.display()))
}

/// Classify a finished job into `(outcome, wrapper_return_code)`.
/// First matching rule wins, per spec.md §4.6.
pub fn classify(
    command_return_code: Option<i32>,
    timed_out: bool,
    spec: &JobSpec,
    outcome_table: Option<&HashMap<String, Outcome>>,
) -> (Outcome, i32) {
    if let (Some(rc), Some(table)) = (command_return_code, outcome_table) {
        if let Some(&outcome) = table.get(&rc.to_string()) {
            let wrapper = match outcome {
                Outcome::Success | Outcome::FailIgnored => 0,
                Outcome::Fail => rc.max(1),
            };
            return (outcome, wrapper);
        }
    }

    if timed_out && spec.timeout_ok {
        return (Outcome::Success, 0);
    }
    if timed_out && spec.timeout_ignore {
        return (Outcome::FailIgnored, 0);
    }
    if timed_out {
        return (Outcome::Fail, 1);
    }

    let rc = command_return_code.unwrap_or(1);
    if spec.ignore_returns.contains(&rc) {
        return (Outcome::Success, 0);
    }
    if spec.ok_returns.contains(&rc) {
        return (Outcome::FailIgnored, 0);
    }
    if rc == 0 {
        return (Outcome::Success, 0);
    }
    (Outcome::Fail, rc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with(
        ignore_returns: Vec<i32>,
        ok_returns: Vec<i32>,
        timeout_ok: bool,
        timeout_ignore: bool,
    ) -> JobSpec {
        JobSpec {
            job_id: "j".into(),
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
            ignore_returns,
            ok_returns,
            timeout_ok,
            timeout_ignore,
            outcome_table: None,
            profile_memory: false,
            profile_memory_interval: 1,
            tags: vec![],
            status_file: String::new(),
        }
    }

    #[test]
    fn zero_exit_is_success() {
        let spec = spec_with(vec![], vec![], false, false);
        assert_eq!(classify(Some(0), false, &spec, None), (Outcome::Success, 0));
    }

    #[test]
    fn nonzero_exit_is_fail() {
        let spec = spec_with(vec![], vec![], false, false);
        assert_eq!(classify(Some(3), false, &spec, None), (Outcome::Fail, 3));
    }

    #[test]
    fn ignore_returns_is_success() {
        let spec = spec_with(vec![77], vec![], false, false);
        assert_eq!(classify(Some(77), false, &spec, None), (Outcome::Success, 0));
    }

    #[test]
    fn ok_returns_is_fail_ignored() {
        let spec = spec_with(vec![], vec![42], false, false);
        assert_eq!(
            classify(Some(42), false, &spec, None),
            (Outcome::FailIgnored, 0)
        );
    }

    #[test]
    fn timeout_ok_is_success() {
        let spec = spec_with(vec![], vec![], true, false);
        assert_eq!(classify(None, true, &spec, None), (Outcome::Success, 0));
    }

    #[test]
    fn timeout_ignore_is_fail_ignored() {
        let spec = spec_with(vec![], vec![], false, true);
        assert_eq!(
            classify(None, true, &spec, None),
            (Outcome::FailIgnored, 0)
        );
    }

    #[test]
    fn plain_timeout_is_fail() {
        let spec = spec_with(vec![], vec![], false, false);
        let (outcome, wrapper) = classify(None, true, &spec, None);
        assert_eq!(outcome, Outcome::Fail);
        assert_ne!(wrapper, 0);
    }

    #[test]
    fn outcome_table_takes_priority() {
        let mut table = HashMap::new();
        table.insert("5".to_string(), Outcome::Success);
        let spec = spec_with(vec![], vec![], false, false);
        assert_eq!(
            classify(Some(5), false, &spec, Some(&table)),
            (Outcome::Success, 0)
        );
    }

    #[test]
    fn outcome_table_miss_falls_through() {
        let mut table = HashMap::new();
        table.insert("99".to_string(), Outcome::Success);
        let spec = spec_with(vec![], vec![], false, false);
        assert_eq!(classify(Some(5), false, &spec, Some(&table)), (Outcome::Fail, 5));
    }
}
