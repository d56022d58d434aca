//! `litani graph` — emit the current run's dependency graph as DOT.
//!
//! Small and mechanical enough to stay in-core rather than shelling
//! out to a separate renderer (see DESIGN.md).

use std::path::PathBuf;

use anyhow::Result;

use crate::cli::init::current_run_dir;
use crate::graph::Graph;
use crate::jobstore;

pub struct GraphOpts {
    pub output_prefix: PathBuf,
    /// Restrict the emitted graph to these pipelines (and their
    /// ancestors); empty means the whole DAG (spec.md §6 `graph [-p P…]`).
    pub pipelines: Vec<String>,
}

pub fn execute(opts: GraphOpts) -> Result<()> {
    let run_dir = current_run_dir(&opts.output_prefix)?;
    let jobs = jobstore::load_all(&run_dir)?;
    let graph = Graph::build(&jobs).map_err(|e| anyhow::anyhow!("{e}"))?;

    let selected = if opts.pipelines.is_empty() {
        None
    } else {
        Some(graph.restrict_to_pipelines(&opts.pipelines))
    };
    let included = |job_id: &str| selected.as_ref().is_none_or(|s| s.contains(job_id));

    println!("digraph litani {{");
    for job in &jobs {
        if !included(&job.job_id) {
            continue;
        }
        let label = job
            .description
            .clone()
            .unwrap_or_else(|| job.command.clone());
        println!(
            "  \"{}\" [label=\"{}\"];",
            job.job_id,
            label.replace('"', "\\\"")
        );
    }
    for (job_id, deps) in &graph.depends_on {
        if !included(job_id) {
            continue;
        }
        for dep in deps {
            println!("  \"{dep}\" -> \"{job_id}\";");
        }
    }
    println!("}}");
    Ok(())
}
