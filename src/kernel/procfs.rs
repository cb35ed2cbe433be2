//! Process inspection through a proc filesystem.
//!
//! Every lookup takes the proc mount point explicitly; production code
//! passes `/proc`.

use super::capabilities::{parse_status_mask, CapabilityMask};
use crate::config::paths::StagingLayout;
use crate::config::types::{JailError, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const PROC_ROOT: &str = "/proc";

/// Fields of `/proc/<pid>/status` used when joining a sandbox
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessStatus {
    pub ppid: Option<u32>,
    /// Real uid
    pub uid: Option<u32>,
    pub cap_bnd: Option<CapabilityMask>,
    /// 0 disabled, 1 strict, 2 filter
    pub seccomp: Option<u32>,
}

impl ProcessStatus {
    pub fn parse(text: &str) -> Self {
        let field = |key: &str| -> Option<&str> {
            text.lines()
                .find_map(|l| l.strip_prefix(key)?.strip_prefix(':'))
                .map(str::trim)
        };
        let first_number = |key: &str| -> Option<u32> {
            field(key)?.split_whitespace().next()?.parse().ok()
        };
        Self {
            ppid: first_number("PPid"),
            uid: first_number("Uid"),
            cap_bnd: parse_status_mask(text, "CapBnd"),
            seccomp: first_number("Seccomp"),
        }
    }

    /// Seccomp filter mode is active
    pub fn has_seccomp_filter(&self) -> bool {
        self.seccomp == Some(2)
    }
}

/// First line of a uid_map/gid_map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMapping {
    pub inside: u32,
    pub outside: u32,
    pub count: u32,
}

impl IdMapping {
    pub fn parse(text: &str) -> Option<Self> {
        let mut it = text.split_whitespace().map(str::parse::<u32>);
        let inside = it.next()?.ok()?;
        let outside = it.next()?.ok()?;
        let count = it.next().and_then(|c| c.ok()).unwrap_or(0);
        Some(Self {
            inside,
            outside,
            count,
        })
    }

    /// Anything but the initial identity mapping means the process runs
    /// inside a user namespace
    pub fn is_user_namespace(&self) -> bool {
        self.inside != 0 || self.outside != 0
    }
}

fn pid_dir(proc_root: &Path, pid: u32) -> PathBuf {
    proc_root.join(pid.to_string())
}

/// `/proc/<pid>/root`
pub fn root_of(proc_root: &Path, pid: u32) -> PathBuf {
    pid_dir(proc_root, pid).join("root")
}

pub fn status(proc_root: &Path, pid: u32) -> Result<ProcessStatus> {
    let path = pid_dir(proc_root, pid).join("status");
    let text = fs::read_to_string(&path).map_err(|e| {
        JailError::Process(format!("cannot open stat file for process {}: {}", pid, e))
    })?;
    Ok(ProcessStatus::parse(&text))
}

/// Command name, None if the process is gone
pub fn comm(proc_root: &Path, pid: u32) -> Option<String> {
    fs::read_to_string(pid_dir(proc_root, pid).join("comm"))
        .ok()
        .map(|s| s.trim_end().to_string())
}

pub fn uid_of(proc_root: &Path, pid: u32) -> Result<u32> {
    status(proc_root, pid)?
        .uid
        .ok_or_else(|| JailError::Process(format!("cannot read uid of process {}", pid)))
}

/// User-namespace mapping of `pid`; None when the kernel exposes none
pub fn uid_map(proc_root: &Path, pid: u32) -> Option<IdMapping> {
    let text = fs::read_to_string(pid_dir(proc_root, pid).join("uid_map")).ok()?;
    IdMapping::parse(&text)
}

/// Lowest-numbered process whose parent is `pid`
pub fn find_child(proc_root: &Path, pid: u32) -> Option<u32> {
    let entries = fs::read_dir(proc_root).ok()?;
    let mut candidates: Vec<u32> = entries
        .filter_map(|e| e.ok()?.file_name().to_str()?.parse::<u32>().ok())
        .collect();
    candidates.sort_unstable();
    candidates
        .into_iter()
        .find(|child| matches!(status(proc_root, *child), Ok(s) if s.ppid == Some(pid)))
}

/// Resolve a sandbox name through `<staging>/name/<pid>` files
pub fn pid_by_name(layout: &StagingLayout, name: &str) -> Result<u32> {
    if name.is_empty() {
        return Err(JailError::Config("invalid sandbox name".to_string()));
    }
    let dir = layout.name_dir();
    let entries = fs::read_dir(&dir)
        .map_err(|_| JailError::Config(format!("cannot find sandbox {}", name)))?;
    for entry in entries.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        let matches = fs::read_to_string(entry.path())
            .map(|content| content.lines().next().map(str::trim) == Some(name))
            .unwrap_or(false);
        if matches {
            return Ok(pid);
        }
    }
    Err(JailError::Config(format!("cannot find sandbox {}", name)))
}
