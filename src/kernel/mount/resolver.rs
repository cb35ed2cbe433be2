//! Path resolution ahead of a mount decision.
//!
//! A target is canonicalized and its metadata snapshotted right before the
//! mount that acts on it. The window between the snapshot and the mount is
//! not closed; only root can race it.

use super::backend::MountBackend;
use super::primitives::DenialOutcome;
use crate::config::paths::StagingLayout;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Directory,
    File,
    /// Sockets, fifos and device nodes
    Other,
}

impl TargetKind {
    fn from_meta(meta: &fs::Metadata) -> Self {
        let ft = meta.file_type();
        if ft.is_dir() {
            TargetKind::Directory
        } else if ft.is_file() {
            TargetKind::File
        } else {
            TargetKind::Other
        }
    }

    /// Donor bound over a target of this kind when it is denied
    pub fn donor(self, layout: &StagingLayout) -> PathBuf {
        match self {
            TargetKind::Directory => layout.donor_dir(),
            TargetKind::File | TargetKind::Other => layout.donor_file(),
        }
    }
}

/// Canonical path plus a point-in-time metadata snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub path: PathBuf,
    pub kind: TargetKind,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

impl ResolvedTarget {
    pub fn is_dir(&self) -> bool {
        self.kind == TargetKind::Directory
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(ResolvedTarget),
    /// Present but not canonicalizable (EACCES), typically FUSE mounts
    /// that refuse uid 0
    Restricted(PathBuf),
    Absent,
}

/// Canonicalize `raw` and snapshot the result
pub fn resolve(raw: &Path) -> Resolution {
    let path = match fs::canonicalize(raw) {
        Ok(p) => p,
        Err(e) if e.raw_os_error() == Some(libc::EACCES) => {
            log::debug!("no access to {}, forcing mount", raw.display());
            return Resolution::Restricted(raw.to_path_buf());
        }
        Err(_) => return Resolution::Absent,
    };

    match fs::metadata(&path) {
        Ok(meta) => Resolution::Resolved(ResolvedTarget {
            kind: TargetKind::from_meta(&meta),
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode(),
            path,
        }),
        Err(_) => {
            log::debug!("{} does not exist, skipping", path.display());
            Resolution::Absent
        }
    }
}

/// Deny a path that could not be resolved: try the directory donor, then
/// the file donor, and keep whichever bind the kernel accepts.
pub fn forced_denial(
    backend: &dyn MountBackend,
    layout: &StagingLayout,
    raw: &Path,
) -> DenialOutcome {
    let mut last_err = String::new();
    for donor in [layout.donor_dir(), layout.donor_file()] {
        match backend.bind(&donor, raw, false) {
            Ok(()) => return DenialOutcome::Success,
            Err(e) => last_err = e.to_string(),
        }
    }
    log::warn!("{} is an invalid file, skipping", raw.display());
    DenialOutcome::Failed(last_err)
}
