//! litani v0.1 — entry point
//!
//! All stdout is JSON only (except `graph`, which emits DOT — a
//! machine format in its own right). Tracing logs go to stderr.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use litani::error::{AlreadyExists, ConfigError, CycleDetected, NotFound};
use litani::schema::ErrorResponse;

#[derive(Debug, Parser)]
#[command(name = "litani")]
#[command(about = "Incremental build orchestrator for heterogeneous CI pipelines", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv); logs go to stderr.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a new run: allocate a run id and lay down its directory tree.
    Init {
        #[arg(long)]
        project: String,

        #[arg(long, default_value = "0.0.0")]
        version: String,

        /// Directory everything is written under (default: cwd).
        #[arg(long)]
        output_prefix: Option<PathBuf>,

        /// Repeatable `NAME:DEPTH` pool declaration.
        #[arg(long = "pool", value_name = "NAME:DEPTH")]
        pools: Vec<String>,

        /// Repeatable CI stage name, in pipeline order.
        #[arg(long = "ci-stage", value_name = "NAME")]
        ci_stages: Vec<String>,
    },

    /// Append one job spec to the current run's Job Registry.
    AddJob {
        #[arg(long)]
        output_prefix: Option<PathBuf>,

        #[arg(long)]
        pipeline_name: String,

        #[arg(long)]
        ci_stage: String,

        #[arg(long = "input", value_name = "PATH")]
        inputs: Vec<String>,

        #[arg(long = "output", value_name = "PATH")]
        outputs: Vec<String>,

        #[arg(long)]
        command: String,

        #[arg(long)]
        cwd: Option<String>,

        /// Positive integer seconds; Open Question (b) in spec.md §9
        /// calls for a clean diagnostic on a non-positive value rather
        /// than a panic.
        #[arg(long, value_parser = litani::jobstore::parse_positive_int)]
        timeout: Option<u64>,

        #[arg(long)]
        stdout_file: Option<String>,

        #[arg(long)]
        stderr_file: Option<String>,

        #[arg(long)]
        interleave_stdout_stderr: bool,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        pool: Option<String>,

        #[arg(long = "ignore-return", value_name = "CODE")]
        ignore_returns: Vec<i32>,

        #[arg(long = "ok-return", value_name = "CODE")]
        ok_returns: Vec<i32>,

        #[arg(long)]
        timeout_ok: bool,

        #[arg(long)]
        timeout_ignore: bool,

        #[arg(long)]
        outcome_table: Option<String>,

        #[arg(long)]
        profile_memory: bool,

        #[arg(long, default_value = "1", value_parser = litani::jobstore::parse_positive_u32)]
        profile_memory_interval: u32,

        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,
    },

    /// Dispatch every selected job and render the report concurrently.
    RunBuild {
        #[arg(long)]
        output_prefix: Option<PathBuf>,

        /// Global concurrency cap; 0 means unbounded. Defaults to the
        /// host's CPU count when omitted.
        #[arg(short = 'j', long)]
        parallelism: Option<u32>,

        /// Restrict the build to these pipelines (and their ancestors).
        #[arg(short = 'p', long = "pipeline", value_name = "NAME")]
        pipelines: Vec<String>,

        /// Restrict the build to one CI stage (and its ancestors).
        #[arg(short = 's', long)]
        ci_stage: Option<String>,

        /// Print the jobs that would run, in schedule order, without
        /// running anything.
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Skip the background report renderer.
        #[arg(long)]
        no_render: bool,

        /// Exit nonzero if any pipeline failed.
        #[arg(long)]
        fail_on_pipeline_failure: bool,
    },

    /// [Internal] run a single job — spawned by `run-build`, not for
    /// direct use.
    #[command(name = "exec", hide = true)]
    Exec {
        #[arg(long)]
        root: PathBuf,

        #[arg(long)]
        job_id: String,
    },

    /// Emit the current run's dependency graph as DOT.
    Graph {
        #[arg(long)]
        output_prefix: Option<PathBuf>,

        /// Restrict the emitted graph to these pipelines (and their
        /// ancestors).
        #[arg(short = 'p', long = "pipeline", value_name = "NAME")]
        pipelines: Vec<String>,
    },

    /// List optional features this build supports.
    PrintCapabilities,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // Logs always go to stderr so stdout remains JSON/DOT-only.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    match run(cli.command) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            let code = if e.downcast_ref::<NotFound>().is_some() {
                ErrorResponse::new("not_found", format!("{e:#}")).print();
                2
            } else if e.downcast_ref::<ConfigError>().is_some() {
                ErrorResponse::new("config_error", format!("{e:#}")).print();
                1
            } else if e.downcast_ref::<CycleDetected>().is_some() {
                ErrorResponse::new("cycle_detected", format!("{e:#}")).print();
                1
            } else if e.downcast_ref::<AlreadyExists>().is_some() {
                ErrorResponse::new("already_exists", format!("{e:#}")).print();
                2
            } else {
                ErrorResponse::new("internal_error", format!("{e:#}")).print();
                1
            };
            std::process::exit(code);
        }
    }
}

fn output_prefix_of(given: Option<PathBuf>) -> Result<PathBuf> {
    match given {
        Some(p) => Ok(p),
        None => Ok(std::env::current_dir()?),
    }
}

fn run(command: Command) -> Result<i32> {
    match command {
        Command::Init {
            project,
            version,
            output_prefix,
            pools,
            ci_stages,
        } => {
            litani::cli::init::execute(litani::cli::init::InitOpts {
                project: &project,
                version: &version,
                output_prefix: output_prefix_of(output_prefix)?,
                pools: &pools,
                ci_stages: &ci_stages,
            })?;
            Ok(0)
        }

        Command::AddJob {
            output_prefix,
            pipeline_name,
            ci_stage,
            inputs,
            outputs,
            command,
            cwd,
            timeout,
            stdout_file,
            stderr_file,
            interleave_stdout_stderr,
            description,
            pool,
            ignore_returns,
            ok_returns,
            timeout_ok,
            timeout_ignore,
            outcome_table,
            profile_memory,
            profile_memory_interval,
            tags,
        } => {
            litani::cli::add_job::execute(litani::cli::add_job::AddJobOpts {
                output_prefix: output_prefix_of(output_prefix)?,
                pipeline_name,
                ci_stage,
                inputs,
                outputs,
                command,
                cwd,
                timeout,
                stdout_file,
                stderr_file,
                interleave_stdout_stderr,
                description,
                pool,
                ignore_returns,
                ok_returns,
                timeout_ok,
                timeout_ignore,
                outcome_table,
                profile_memory,
                profile_memory_interval,
                tags,
            })?;
            Ok(0)
        }

        Command::RunBuild {
            output_prefix,
            parallelism,
            pipelines,
            ci_stage,
            dry_run,
            no_render,
            fail_on_pipeline_failure,
        } => litani::cli::run_build::execute(litani::cli::run_build::RunBuildOpts {
            output_prefix: output_prefix_of(output_prefix)?,
            parallelism,
            pipelines,
            ci_stage,
            dry_run,
            no_render,
            fail_on_pipeline_failure,
        }),

        Command::Exec { root, job_id } => {
            litani::cli::exec_cmd::execute(litani::cli::exec_cmd::ExecCmdOpts { root, job_id })?;
            Ok(0)
        }

        Command::Graph {
            output_prefix,
            pipelines,
        } => {
            litani::cli::graph_cmd::execute(litani::cli::graph_cmd::GraphOpts {
                output_prefix: output_prefix_of(output_prefix)?,
                pipelines,
            })?;
            Ok(0)
        }

        Command::PrintCapabilities => {
            litani::cli::capabilities::execute();
            Ok(0)
        }
    }
}
