//! Resource-control group membership for joined processes.
//!
//! A sandbox started inside a cgroup stages the tasks file it was attached
//! to. A joiner appends its own pid to the same file before entering the
//! sandbox namespaces, so it is accounted with the sandbox.

use crate::config::types::{JailError, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// A validated cgroup tasks file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TasksFile {
    path: PathBuf,
}

impl TasksFile {
    /// Accept `path` only if it names a `tasks` or `cgroup.procs` file
    /// under the cgroup mount, without parent components
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let valid = path.starts_with(CGROUP_ROOT)
            && !path.components().any(|c| c == Component::ParentDir)
            && matches!(
                path.file_name().and_then(|n| n.to_str()),
                Some("tasks") | Some("cgroup.procs")
            );
        if !valid {
            return Err(JailError::Config(format!(
                "invalid cgroup tasks file {}",
                path.display()
            )));
        }
        Ok(Self { path })
    }

    /// Parse the staged configuration file: one tasks path on the first line
    pub fn load(staged: &Path) -> Result<Self> {
        let content = fs::read_to_string(staged)?;
        let line = content.lines().next().map(str::trim).unwrap_or_default();
        Self::new(line)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn validate_pid(pid: u32) -> Result<()> {
        if pid == 0 {
            return Err(JailError::Process("Invalid PID: 0".to_string()));
        }
        Ok(())
    }

    /// Append `pid` to the tasks file
    pub fn add_process(&self, pid: u32) -> Result<()> {
        Self::validate_pid(pid)?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                JailError::Process(format!("cannot open {}: {}", self.path.display(), e))
            })?;
        writeln!(file, "{}", pid).map_err(|e| {
            JailError::Process(format!("cannot add {} to {}: {}", pid, self.path.display(), e))
        })?;
        log::debug!("Added process {} to {}", pid, self.path.display());
        Ok(())
    }

    pub fn add_current_process(&self) -> Result<()> {
        self.add_process(std::process::id())
    }
}
