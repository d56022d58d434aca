//! Graph Assembler (C4): joins the Job Registry's specs into an
//! in-process DAG keyed on literal input/output path strings, plus
//! phony aggregators per `pipeline_name` and `ci_stage` (spec.md §4.4).
//!
//! No external build-tool file is written (see DESIGN.md for the
//! rationale) — the Dispatcher schedules directly off this structure.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::CycleDetected;
use crate::schema::JobSpec;

#[derive(Debug)]
pub struct Graph {
    /// Job IDs in `add-job` submission order; used as the tie-break
    /// index for Open Question (a) in spec.md §9.
    pub order: Vec<String>,
    /// job_id -> set of job_ids whose outputs it consumes as inputs.
    pub depends_on: HashMap<String, BTreeSet<String>>,
    /// job_id -> longest-path depth from a root (no deps) job; used for
    /// deterministic (depth, insertion-index) scheduling order.
    pub depth: HashMap<String, u32>,
    /// `__litani_pipeline_<name>` -> member job IDs.
    pub phony_pipeline: HashMap<String, Vec<String>>,
    /// `__litani_ci_stage_<name>` -> member job IDs.
    pub phony_stage: HashMap<String, Vec<String>>,
}

impl Graph {
    /// Assemble the DAG. Per spec.md §3 invariants, a job's
    /// `(inputs, outputs)` must not create a cycle; overlapping
    /// `outputs` across jobs are allowed (last producer listed wins as
    /// the edge source, matching "the final artifact on disk is
    /// whichever job ran last").
    pub fn build(jobs: &[JobSpec]) -> Result<Graph, CycleDetected> {
        let mut producer: HashMap<&str, &str> = HashMap::new();
        for job in jobs {
            for output in &job.outputs {
                producer.insert(output.as_str(), job.job_id.as_str());
            }
        }

        let mut depends_on: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut phony_pipeline: HashMap<String, Vec<String>> = HashMap::new();
        let mut phony_stage: HashMap<String, Vec<String>> = HashMap::new();
        let mut order = Vec::with_capacity(jobs.len());

        for job in jobs {
            order.push(job.job_id.clone());
            let mut deps = BTreeSet::new();
            for input in &job.inputs {
                if let Some(&producer_id) = producer.get(input.as_str()) {
                    if producer_id != job.job_id {
                        deps.insert(producer_id.to_string());
                    }
                }
            }
            depends_on.insert(job.job_id.clone(), deps);

            phony_pipeline
                .entry(job.pipeline_name.clone())
                .or_default()
                .push(job.job_id.clone());
            phony_stage
                .entry(job.ci_stage.clone())
                .or_default()
                .push(job.job_id.clone());
        }

        let depth = compute_depths(&order, &depends_on)?;

        Ok(Graph {
            order,
            depends_on,
            depth,
            phony_pipeline,
            phony_stage,
        })
    }

    /// Ancestors (transitive dependencies) of `seeds`, including the
    /// seeds themselves.
    pub fn ancestors_of(&self, seeds: &HashSet<String>) -> HashSet<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut stack: Vec<String> = seeds.iter().cloned().collect();
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(deps) = self.depends_on.get(&id) {
                for dep in deps {
                    stack.push(dep.clone());
                }
            }
        }
        seen
    }

    /// Job IDs that must run to build the named pipelines: the
    /// pipelines' member jobs plus all of their transitive
    /// dependencies. Phony aggregator edges themselves never run and
    /// never acquire a pool slot (Open Question (c) in spec.md §9).
    pub fn restrict_to_pipelines(&self, names: &[String]) -> HashSet<String> {
        let mut seeds = HashSet::new();
        for name in names {
            if let Some(members) = self.phony_pipeline.get(name) {
                seeds.extend(members.iter().cloned());
            }
        }
        self.ancestors_of(&seeds)
    }

    pub fn restrict_to_ci_stage(&self, name: &str) -> HashSet<String> {
        let mut seeds = HashSet::new();
        if let Some(members) = self.phony_stage.get(name) {
            seeds.extend(members.iter().cloned());
        }
        self.ancestors_of(&seeds)
    }

    /// Deterministic scheduling key for a job: shallower depth first,
    /// then earlier submission order (Open Question (a)).
    pub fn schedule_key(&self, job_id: &str) -> (u32, usize) {
        let depth = *self.depth.get(job_id).unwrap_or(&0);
        let index = self.order.iter().position(|j| j == job_id).unwrap_or(usize::MAX);
        (depth, index)
    }
}

/// Longest-path depth from a root via Kahn's algorithm; also detects
/// cycles (a node that never reaches in-degree zero).
fn compute_depths(
    order: &[String],
    depends_on: &HashMap<String, BTreeSet<String>>,
) -> Result<HashMap<String, u32>, CycleDetected> {
    // dependents: job -> jobs that depend on it (reverse edges)
    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    for id in order {
        in_degree.entry(id.clone()).or_insert(0);
    }
    for (id, deps) in depends_on {
        *in_degree.entry(id.clone()).or_insert(0) += deps.len();
        for dep in deps {
            dependents.entry(dep.clone()).or_default().push(id.clone());
        }
    }

    let mut depth: HashMap<String, u32> = HashMap::new();
    let mut queue: Vec<String> = order
        .iter()
        .filter(|id| in_degree.get(*id).copied().unwrap_or(0) == 0)
        .cloned()
        .collect();
    for id in &queue {
        depth.insert(id.clone(), 0);
    }

    let mut processed = 0usize;
    let mut head = 0usize;
    while head < queue.len() {
        let id = queue[head].clone();
        head += 1;
        processed += 1;
        let d = *depth.get(&id).unwrap_or(&0);
        if let Some(deps) = dependents.get(&id) {
            for dependent in deps {
                let entry = in_degree.get_mut(dependent).unwrap();
                *entry -= 1;
                let next_depth = depth.get(dependent).copied().unwrap_or(0).max(d + 1);
                depth.insert(dependent.clone(), next_depth);
                if *entry == 0 {
                    queue.push(dependent.clone());
                }
            }
        }
    }

    if processed != order.len() {
        let unresolved: Vec<String> = order
            .iter()
            .filter(|id| in_degree.get(*id).copied().unwrap_or(0) > 0)
            .cloned()
            .collect();
        return Err(CycleDetected(unresolved));
    }

    Ok(depth)
}
