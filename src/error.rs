//! Marker error types.
//!
//! These carry no data beyond a message and exist so that `main` can
//! distinguish error *classes* via `anyhow::Error::downcast_ref` without
//! parsing message strings, the same pattern the teacher uses for
//! `JobNotFound`.

use std::fmt;

/// A job, run, or pool referenced by ID/name does not exist.
#[derive(Debug)]
pub struct NotFound(pub String);

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for NotFound {}

/// Bad input at `init`/`add-job`/`run-build` start: unknown pool
/// reference, duplicate pool name, invalid timeout, malformed outcome
/// table path, etc. Always fatal, exit 1, per spec.md §7.
#[derive(Debug)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for ConfigError {}

/// A job's declared inputs/outputs would introduce a cycle in the DAG.
#[derive(Debug)]
pub struct CycleDetected(pub Vec<String>);

impl fmt::Display for CycleDetected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dependency cycle detected among jobs: {:?}", self.0)
    }
}
impl std::error::Error for CycleDetected {}

/// `init` on an existing run directory, or `run-build` on an already
/// finalized one.
#[derive(Debug)]
pub struct AlreadyExists(pub String);

impl fmt::Display for AlreadyExists {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for AlreadyExists {}
