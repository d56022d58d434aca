//! Report Renderer (C7): a background thread that periodically
//! re-reads the Job Registry and every status file, synthesizes a
//! consolidated `run.json`, and atomically swaps the `html` symlink so
//! a browser following it always lands on a complete report.
//!
//! Communicates with the Dispatcher only through the filesystem —
//! no shared mutable state, so a `--no-render` build and a bare
//! `litani run-build` differ only in whether this thread is spawned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::report::read_status_tolerant;
use crate::rundir::RunDir;
use crate::schema::Run;

const TICK: Duration = Duration::from_secs(2);

pub struct Renderer {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Renderer {
    /// Spawn the background render loop against `run_dir`, re-swapping
    /// the `latest`/`html` symlinks under `output_prefix` every tick.
    pub fn spawn(run_dir: RunDir, output_prefix: std::path::PathBuf, base_run: Run) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            let mut run = base_run;
            loop {
                if let Err(e) = render_once(&run_dir, &output_prefix, &mut run) {
                    warn!("render tick failed: {e}");
                }
                if stop_flag.load(Ordering::Relaxed) {
                    // One final render after the stop signal, so the
                    // last snapshot reflects the true terminal state.
                    if let Err(e) = render_once(&run_dir, &output_prefix, &mut run) {
                        warn!("final render failed: {e}");
                    }
                    return;
                }
                std::thread::sleep(TICK);
            }
        });
        Renderer {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop_and_join(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn render_once(run_dir: &RunDir, output_prefix: &std::path::Path, run: &mut Run) -> Result<()> {
    for job in &mut run.jobs {
        job.status_file = run_dir
            .status_dir()
            .join(format!("{}.json", job.job_id))
            .display()
            .to_string();
    }

    let mut n_complete = 0;
    for job in &run.jobs {
        if read_status_tolerant(run_dir, &job.job_id)
            .map(|s| s.complete)
            .unwrap_or(false)
        {
            n_complete += 1;
        }
    }
    debug!(n_complete, n_total = run.jobs.len(), "render tick");

    // The Cache Store itself is only rewritten at `init` and at
    // finalization (spec.md §4.2); this tick only ever produces the
    // consolidated `run.json` snapshot.
    crate::report::write(run, run_dir).context("write run.json snapshot")?;
    crate::rundir::swap_symlink(&run_dir.root, &run_dir.html_symlink_path())
        .context("swap html symlink")?;
    run_dir
        .update_latest_symlink(output_prefix)
        .context("swap latest symlink")?;
    Ok(())
}
