//! Filesystem event log.
//!
//! Every mount transform that changes what the sandbox sees is recorded as
//! an `(action, path)` pair. The sink is the only logging surface the mount
//! layer depends on; `FsLogger` keeps the events in order and can persist
//! them into the staging area.

use crate::config::types::Result;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub trait MountEventSink {
    fn record(&mut self, action: &str, path: &Path);
}

/// Free-form log line with no path attached
pub fn record_note(sink: &mut dyn MountEventSink, note: &str) {
    sink.record(note, Path::new(""));
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub action: String,
    pub path: PathBuf,
}

impl std::fmt::Display for FsEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.as_os_str().is_empty() {
            write!(f, "{}", self.action)
        } else {
            write!(f, "{} {}", self.action, self.path.display())
        }
    }
}

#[derive(Debug, Default)]
pub struct FsLogger {
    events: Vec<FsEvent>,
}

impl FsLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[FsEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Paths recorded under `action`, in order
    pub fn paths_for(&self, action: &str) -> Vec<&Path> {
        self.events
            .iter()
            .filter(|e| e.action == action)
            .map(|e| e.path.as_path())
            .collect()
    }

    /// Append all events to `dest`, one per line
    pub fn flush_to(&mut self, dest: &Path) -> Result<()> {
        if self.events.is_empty() {
            return Ok(());
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dest)?;
        for event in &self.events {
            writeln!(file, "{}", event)?;
        }
        log::debug!("flushed {} fs events to {}", self.events.len(), dest.display());
        self.events.clear();
        Ok(())
    }
}

impl MountEventSink for FsLogger {
    fn record(&mut self, action: &str, path: &Path) {
        log::debug!("{} {}", action, path.display());
        self.events.push(FsEvent {
            action: action.to_string(),
            path: path.to_path_buf(),
        });
    }
}
