// Copyright (c) The Diem Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Terminates whole process trees from a single snapshot of the process table.
//!
//! Launched nodes may fork helpers of their own, and nothing guarantees a node
//! forwards termination to them. Teardown therefore walks the OS process table
//! rather than relying on the processes to clean up after themselves:
//!
//! 1. [`ProcessTable::snapshot`] records every `(pid, parent pid)` pair once.
//! 2. [`ProcessTable::teardown_order`] lists a root's descendants depth first,
//!    children before their parent, with the root last.
//! 3. [`terminate_trees`] signals each pid in that order and keeps going past
//!    failures, reporting all of them at the end.
//!
//! Processes forked after the snapshot are not seen.

use crate::error::{Error, Result, SignalFailure};
use log::{debug, warn};
use nix::{
    errno::Errno,
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use std::{
    collections::{HashMap, HashSet},
    convert::TryFrom,
    io,
};

/// Parent to children index built from one read of the process table.
#[derive(Clone, Debug, Default)]
pub struct ProcessTable {
    children: HashMap<u32, Vec<u32>>,
}

impl ProcessTable {
    /// Builds the index from `(pid, parent pid)` pairs.
    pub fn from_entries<I: IntoIterator<Item = (u32, u32)>>(entries: I) -> Self {
        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        for (pid, ppid) in entries {
            if pid != ppid {
                children.entry(ppid).or_default().push(pid);
            }
        }
        for pids in children.values_mut() {
            pids.sort_unstable();
        }
        Self { children }
    }

    #[cfg(target_os = "linux")]
    pub fn snapshot() -> Result<Self> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir("/proc").map_err(Error::ProcessTable)? {
            let entry = entry.map_err(Error::ProcessTable)?;
            let pid = match entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) {
                Some(pid) => pid,
                None => continue,
            };
            let stat = match std::fs::read_to_string(entry.path().join("stat")) {
                Ok(stat) => stat,
                // Exited while we were scanning
                Err(e) if vanished(&e) => continue,
                Err(e) => return Err(Error::ProcessTable(e)),
            };
            match parse_parent_pid(&stat) {
                Some(ppid) => entries.push((pid, ppid)),
                None => {
                    return Err(Error::ProcessTable(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("malformed /proc/{}/stat", pid),
                    )))
                }
            }
        }
        Ok(Self::from_entries(entries))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn snapshot() -> Result<Self> {
        Err(Error::ProcessTable(io::Error::new(
            io::ErrorKind::Other,
            "process table snapshots require /proc",
        )))
    }

    pub fn children(&self, pid: u32) -> &[u32] {
        self.children.get(&pid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every process in the tree rooted at `root`, descendants before
    /// ancestors and `root` last.
    pub fn teardown_order(&self, root: u32) -> Vec<u32> {
        let mut order = Vec::new();
        self.visit(root, &mut HashSet::new(), &mut order);
        order
    }

    fn visit(&self, root: u32, visited: &mut HashSet<u32>, order: &mut Vec<u32>) {
        // (pid, children already pushed)
        let mut stack = vec![(root, false)];
        while let Some((pid, expanded)) = stack.pop() {
            if expanded {
                order.push(pid);
                continue;
            }
            if !visited.insert(pid) {
                continue;
            }
            stack.push((pid, true));
            for &child in self.children(pid).iter().rev() {
                stack.push((child, false));
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn vanished(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(Errno::ESRCH as i32)
}

/// Parent pid from the contents of `/proc/<pid>/stat`. The command name is
/// parenthesised and may itself contain spaces and parentheses.
fn parse_parent_pid(stat: &str) -> Option<u32> {
    let (_, rest) = stat.rsplit_once(')')?;
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

/// Sends SIGTERM to `pid`.
pub fn sigterm(pid: u32) -> nix::Result<()> {
    let pid = i32::try_from(pid).map_err(|_| Errno::EINVAL)?;
    kill(Pid::from_raw(pid), Signal::SIGTERM)
}

/// Signals every process in the trees under `roots`, children before parents.
/// A process that no longer exists is not a failure. Every other failure is
/// collected and returned once all processes have been visited.
pub fn terminate_trees<I, F>(table: &ProcessTable, roots: I, mut signal: F) -> Result<()>
where
    I: IntoIterator<Item = u32>,
    F: FnMut(u32) -> nix::Result<()>,
{
    let mut visited = HashSet::new();
    let mut failures = Vec::new();
    for root in roots {
        let mut order = Vec::new();
        table.visit(root, &mut visited, &mut order);
        for pid in order {
            match signal(pid) {
                Ok(()) => debug!("sent SIGTERM to process {}", pid),
                Err(Errno::ESRCH) => debug!("process {} already exited", pid),
                Err(errno) => {
                    warn!("unable to terminate process {}: {}", pid, errno);
                    failures.push(SignalFailure { pid, errno });
                }
            }
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::Teardown(failures))
    }
}
