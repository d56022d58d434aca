//! Cache Store (C2): the single JSON document holding the `Run`
//! record. Mutated only via whole-file replacement through
//! [`crate::rundir::atomic_write`].

use std::path::Path;

use anyhow::{Context, Result};

use crate::rundir::atomic_write;
use crate::schema::Run;

pub fn load(cache_path: &Path) -> Result<Run> {
    let raw = std::fs::read(cache_path)
        .with_context(|| format!("read cache store {}", cache_path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("parse cache store {}", cache_path.display()))
}

pub fn save(cache_path: &Path, run: &Run) -> Result<()> {
    let contents = serde_json::to_vec_pretty(run).context("serialize run")?;
    atomic_write(cache_path, &contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RunStatus, Timeline};
    use std::collections::BTreeMap;

    fn sample_run() -> Run {
        Run {
            run_id: "r1".into(),
            project: "demo".into(),
            version_major: 1,
            version_minor: 0,
            version_patch: 0,
            start_time: "2024-01-01T00:00:00Z".into(),
            end_time: None,
            status: RunStatus::InProgress,
            pools: BTreeMap::new(),
            ci_stages: vec!["build".into(), "test".into(), "report".into()],
            jobs: vec![],
            parallelism: Timeline::default(),
            aux: serde_json::Value::Null,
        }
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let run = sample_run();
        save(&path, &run).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.run_id, "r1");
        assert_eq!(loaded.status, RunStatus::InProgress);
    }
}
