//! `litani print-capabilities` — static list of optional features this
//! build supports, so driver scripts can feature-detect rather than
//! parsing a version string.

use crate::schema::{CapabilitiesData, Response};

const CAPABILITIES: &[&str] = &[
    "pools",
    "ci_stages",
    "outcome_table",
    "profile_memory",
    "timeout_ok",
    "timeout_ignore",
    "fail_on_pipeline_failure",
    "graph",
    "dry_run",
];

pub fn execute() {
    Response::new(
        "print-capabilities",
        CapabilitiesData {
            capabilities: CAPABILITIES.to_vec(),
        },
    )
    .print();
}
