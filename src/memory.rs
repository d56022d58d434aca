//! RSS sampling for `profile_memory` (spec.md §4.6 step 4).
//!
//! Linux-only: reads `VmRSS` out of `/proc/<pid>/status`. On other
//! platforms this returns `None`, which the executor treats as "no
//! sample available" rather than an error — see DESIGN.md.
//!
//! Jobs are launched via `sh -c <command>` (executor.rs), so the pid
//! the executor tracks is the shell, not whatever it execs. Real work
//! usually happens in a grandchild, so sampling is done over the whole
//! descendant tree rather than a single pid.

#[cfg(target_os = "linux")]
pub fn sample_rss_bytes(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
pub fn sample_rss_bytes(_pid: u32) -> Option<u64> {
    None
}

/// Sum of RSS over `root_pid` and every descendant currently alive.
/// Returns `None` only when `root_pid` itself has already exited (the
/// job is done); a descendant that exits mid-walk is just skipped.
#[cfg(target_os = "linux")]
pub fn sample_rss_tree_bytes(root_pid: u32) -> Option<u64> {
    sample_rss_bytes(root_pid)?;
    let mut total = 0u64;
    for pid in descendants(root_pid) {
        total += sample_rss_bytes(pid).unwrap_or(0);
    }
    total += sample_rss_bytes(root_pid).unwrap_or(0);
    Some(total)
}

#[cfg(not(target_os = "linux"))]
pub fn sample_rss_tree_bytes(_root_pid: u32) -> Option<u64> {
    None
}

/// All living descendants of `root_pid`, found by scanning `/proc/*/stat`
/// for each process's parent pid and walking the resulting tree
/// breadth-first. `/proc` offers no direct "children of" index.
#[cfg(target_os = "linux")]
fn descendants(root_pid: u32) -> Vec<u32> {
    let mut children_of: std::collections::HashMap<u32, Vec<u32>> = std::collections::HashMap::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        if let Some(ppid) = parent_pid(pid) {
            children_of.entry(ppid).or_default().push(pid);
        }
    }

    let mut found = Vec::new();
    let mut frontier = vec![root_pid];
    while let Some(pid) = frontier.pop() {
        if let Some(kids) = children_of.get(&pid) {
            for &kid in kids {
                found.push(kid);
                frontier.push(kid);
            }
        }
    }
    found
}

/// Parent pid of `pid` from `/proc/<pid>/stat`'s field 4. The process
/// name (field 2) is parenthesized and may itself contain spaces or
/// parens, so split after the last `)` rather than on whitespace.
#[cfg(target_os = "linux")]
fn parent_pid(pid: u32) -> Option<u32> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let after_comm = stat.rsplit_once(')')?.1;
    let ppid_field = after_comm.split_whitespace().nth(1)?;
    ppid_field.parse().ok()
}
