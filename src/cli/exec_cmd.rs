//! `litani exec` — hidden subcommand the Dispatcher spawns per job; not
//! meant for interactive use.

use std::path::PathBuf;

use anyhow::Result;

use crate::executor::{execute as run_job, ExecOpts};

pub struct ExecCmdOpts {
    pub root: PathBuf,
    pub job_id: String,
}

/// Never returns: [`crate::executor::execute`] exits the process with
/// the job's `wrapper_return_code`.
pub fn execute(opts: ExecCmdOpts) -> Result<()> {
    run_job(ExecOpts {
        job_id: &opts.job_id,
        root: &opts.root,
    })
}
