//! Run Directory (C1): on-disk home for a run, and the atomic-write /
//! atomic-symlink-swap primitives every other component builds on.
//!
//! Guarantee: a reader of any path written through [`atomic_write`] or
//! [`swap_symlink`] observes either the old complete content/target or
//! the new one — never a partial write or a missing target.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Write `contents` to `path` via a sibling temp file, fsync, then
/// rename. The rename is atomic on the same filesystem, so concurrent
/// readers never observe a half-written file.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path has no parent: {}", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("create parent dir {}", parent.display()))?;

    let tmp_name = format!(
        ".{}.tmp.{}",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "litani".to_string()),
        std::process::id()
    );
    let tmp_path = parent.join(tmp_name);

    {
        let mut f = std::fs::File::create(&tmp_path)
            .with_context(|| format!("create temp file {}", tmp_path.display()))?;
        f.write_all(contents)
            .with_context(|| format!("write temp file {}", tmp_path.display()))?;
        f.sync_all()
            .with_context(|| format!("fsync temp file {}", tmp_path.display()))?;
    }

    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("rename {} -> {}", tmp_path.display(), path.display()))?;
    Ok(())
}

/// Point `link_path` at `target`, atomically. Creates a uniquely named
/// sibling symlink first, then renames it over `link_path`, so external
/// readers following `link_path` never see a missing or half-swapped
/// target.
pub fn swap_symlink(target: &Path, link_path: &Path) -> Result<()> {
    let parent = link_path
        .parent()
        .with_context(|| format!("link has no parent: {}", link_path.display()))?;
    std::fs::create_dir_all(parent)?;

    let tmp_name = format!(
        ".{}.symlink.tmp.{}",
        link_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "litani".to_string()),
        std::process::id()
    );
    let tmp_path = parent.join(tmp_name);
    let _ = std::fs::remove_file(&tmp_path);

    symlink(target, &tmp_path)
        .with_context(|| format!("create symlink {} -> {}", tmp_path.display(), target.display()))?;
    std::fs::rename(&tmp_path, link_path)
        .with_context(|| format!("rename {} -> {}", tmp_path.display(), link_path.display()))?;
    Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

/// Handle onto a single run's directory tree.
#[derive(Debug, Clone)]
pub struct RunDir {
    pub root: PathBuf,
    pub run_id: String,
}

impl RunDir {
    /// `<output-prefix>/litani/runs/<run_id>/`
    pub fn new(output_prefix: &Path, run_id: &str) -> Self {
        RunDir {
            root: output_prefix.join("litani").join("runs").join(run_id),
            run_id: run_id.to_string(),
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.root.join("cache.json")
    }
    pub fn jobs_dir(&self) -> PathBuf {
        self.root.join("jobs")
    }
    pub fn status_dir(&self) -> PathBuf {
        self.root.join("status")
    }
    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }
    pub fn run_json_path(&self) -> PathBuf {
        self.root.join("run.json")
    }
    pub fn html_symlink_path(&self) -> PathBuf {
        self.root.join("html")
    }
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".lock")
    }

    /// Create every subdirectory a run needs up front so later
    /// components never have to create-or-check them.
    pub fn create_tree(&self) -> Result<()> {
        for dir in [
            self.jobs_dir(),
            self.status_dir(),
            self.artifacts_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Swap the `latest` symlink (in `output_prefix/litani/runs/`) to
    /// point at this run.
    pub fn update_latest_symlink(&self, output_prefix: &Path) -> Result<()> {
        let latest = output_prefix.join("litani").join("runs").join("latest");
        swap_symlink(&self.root, &latest)
    }

    /// Record this run's id in `output_prefix/.litani_cache_dir` so
    /// later invocations (`add-job`, `run-build`) can find it without
    /// the caller having to pass `--run-id` every time.
    pub fn write_pointer(&self, output_prefix: &Path) -> Result<()> {
        let pointer = output_prefix.join(".litani_cache_dir");
        atomic_write(&pointer, self.run_id.as_bytes())
    }
}

/// Read back the run id recorded by [`RunDir::write_pointer`].
pub fn read_pointer(output_prefix: &Path) -> Result<String> {
    let pointer = output_prefix.join(".litani_cache_dir");
    let raw = std::fs::read_to_string(&pointer)
        .with_context(|| format!("read run pointer {}", pointer.display()))?;
    Ok(raw.trim().to_string())
}

/// Scoped acquisition for external readers/copiers (spec.md §5
/// "Locking"). Acquiring creates a lock file that is released either
/// explicitly or on process exit (best-effort: the file is simply left
/// behind if the process is killed; stale locks are reclaimed by the
/// retry/backoff loop below once the holder is confirmed gone is out
/// of scope for this core — see DESIGN.md).
pub struct LockableDirectory {
    lock_path: PathBuf,
    held: bool,
}

impl LockableDirectory {
    pub fn new(run_dir: &RunDir) -> Self {
        LockableDirectory {
            lock_path: run_dir.lock_path(),
            held: false,
        }
    }

    /// Try to acquire the lock, retrying with exponential backoff up to
    /// `max_attempts` times.
    pub fn acquire(&mut self, max_attempts: u32) -> Result<()> {
        let mut delay = std::time::Duration::from_millis(10);
        for attempt in 0..max_attempts {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
            {
                Ok(_) => {
                    self.held = true;
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if attempt + 1 == max_attempts {
                        anyhow::bail!(
                            "could not acquire lock at {} after {} attempts",
                            self.lock_path.display(),
                            max_attempts
                        );
                    }
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(std::time::Duration::from_secs(1));
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("acquire lock at {}", self.lock_path.display())
                    });
                }
            }
        }
        anyhow::bail!("could not acquire lock at {}", self.lock_path.display())
    }

    pub fn release(&mut self) -> Result<()> {
        if self.held {
            let _ = std::fs::remove_file(&self.lock_path);
            self.held = false;
        }
        Ok(())
    }
}

impl Drop for LockableDirectory {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("file.json");
        atomic_write(&path, b"{\"a\":1}").unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "{\"a\":1}");
    }

    #[test]
    fn atomic_write_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.json");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn swap_symlink_points_at_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target_dir");
        std::fs::create_dir_all(&target).unwrap();
        let link = dir.path().join("latest");
        swap_symlink(&target, &link).unwrap();
        let resolved = std::fs::read_link(&link).unwrap();
        assert_eq!(resolved, target);
    }

    #[test]
    fn lockable_directory_second_acquire_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = RunDir::new(dir.path(), "r1");
        run_dir.create_tree().unwrap();
        let mut lock1 = LockableDirectory::new(&run_dir);
        lock1.acquire(3).unwrap();

        let mut lock2 = LockableDirectory::new(&run_dir);
        assert!(lock2.acquire(2).is_err());

        lock1.release().unwrap();
        let mut lock3 = LockableDirectory::new(&run_dir);
        assert!(lock3.acquire(3).is_ok());
    }
}
