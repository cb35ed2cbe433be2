//! Testing infrastructure
//!
//! A mount backend that records calls instead of issuing them, so policy
//! code can be exercised without privileges or a private mount namespace.

use crate::config::types::{JailError, Result};
use crate::kernel::mount::MountBackend;
use nix::errno::Errno;
use nix::mount::MsFlags;
use std::cell::RefCell;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountCall {
    Bind {
        source: PathBuf,
        target: PathBuf,
        recursive: bool,
    },
    Remount {
        target: PathBuf,
        flags: MsFlags,
    },
    Mount {
        source: String,
        target: PathBuf,
        fstype: String,
        flags: MsFlags,
        data: Option<String>,
    },
    Unmount {
        target: PathBuf,
    },
    Chown {
        path: PathBuf,
        uid: u32,
        gid: u32,
    },
    Chmod {
        path: PathBuf,
        mode: u32,
    },
    Chroot {
        root: PathBuf,
    },
}

impl MountCall {
    fn op(&self) -> &'static str {
        match self {
            MountCall::Bind { .. } => "bind",
            MountCall::Remount { .. } => "remount",
            MountCall::Mount { .. } => "mount",
            MountCall::Unmount { .. } => "umount",
            MountCall::Chown { .. } => "chown",
            MountCall::Chmod { .. } => "chmod",
            MountCall::Chroot { .. } => "chroot",
        }
    }

    fn target(&self) -> &Path {
        match self {
            MountCall::Bind { target, .. }
            | MountCall::Remount { target, .. }
            | MountCall::Mount { target, .. }
            | MountCall::Unmount { target } => target,
            MountCall::Chown { path, .. } | MountCall::Chmod { path, .. } => path,
            MountCall::Chroot { root } => root,
        }
    }
}

/// Records every call; calls matching an injected failure return `EPERM`
/// and are not recorded.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: RefCell<Vec<MountCall>>,
    failures: RefCell<Vec<(&'static str, PathBuf)>>,
    source_failures: RefCell<Vec<PathBuf>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `op` against `path` fail
    pub fn fail_on(&self, op: &'static str, path: impl Into<PathBuf>) {
        self.failures.borrow_mut().push((op, path.into()));
    }

    /// Make every bind whose source is `source` fail
    pub fn fail_bind_from(&self, source: impl Into<PathBuf>) {
        self.source_failures.borrow_mut().push(source.into());
    }

    pub fn calls(&self) -> Vec<MountCall> {
        self.calls.borrow().clone()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }

    /// Sources bind-mounted onto `target`, in call order
    pub fn binds_onto(&self, target: &Path) -> Vec<PathBuf> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                MountCall::Bind {
                    source, target: t, ..
                } if t == target => Some(source.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every bind target, in call order
    pub fn bind_targets(&self) -> Vec<PathBuf> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                MountCall::Bind { target, .. } => Some(target.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn remounts_of(&self, target: &Path) -> Vec<MsFlags> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                MountCall::Remount { target: t, flags } if t == target => Some(*flags),
                _ => None,
            })
            .collect()
    }

    pub fn count_fs_mounts(&self, fstype: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, MountCall::Mount { fstype: f, .. } if f == fstype))
            .count()
    }

    pub fn fs_mount_at(&self, target: &Path) -> Option<MountCall> {
        self.calls
            .borrow()
            .iter()
            .find(|c| matches!(c, MountCall::Mount { target: t, .. } if t == target))
            .cloned()
    }

    fn push(&self, call: MountCall) -> Result<()> {
        let failing = self
            .failures
            .borrow()
            .iter()
            .any(|(op, path)| *op == call.op() && path == call.target());
        let source_failing = match &call {
            MountCall::Bind { source, .. } => self.source_failures.borrow().contains(source),
            _ => false,
        };
        if failing || source_failing {
            return Err(JailError::mount(call.op(), call.target(), Errno::EPERM));
        }
        self.calls.borrow_mut().push(call);
        Ok(())
    }
}

impl MountBackend for RecordingBackend {
    fn bind(&self, source: &Path, target: &Path, recursive: bool) -> Result<()> {
        self.push(MountCall::Bind {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            recursive,
        })
    }

    fn remount(&self, target: &Path, flags: MsFlags) -> Result<()> {
        self.push(MountCall::Remount {
            target: target.to_path_buf(),
            flags,
        })
    }

    fn mount_fs(
        &self,
        source: &str,
        target: &Path,
        fstype: &str,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        self.push(MountCall::Mount {
            source: source.to_string(),
            target: target.to_path_buf(),
            fstype: fstype.to_string(),
            flags,
            data: data.map(str::to_string),
        })
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        self.push(MountCall::Unmount {
            target: target.to_path_buf(),
        })
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        self.push(MountCall::Chown {
            path: path.to_path_buf(),
            uid,
            gid,
        })
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        self.push(MountCall::Chmod {
            path: path.to_path_buf(),
            mode,
        })
    }

    fn chroot(&self, root: &Path) -> Result<()> {
        self.push(MountCall::Chroot {
            root: root.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injected_failure_is_not_recorded() {
        let backend = RecordingBackend::new();
        backend.fail_on("bind", "/x");
        assert!(backend.bind(Path::new("/a"), Path::new("/x"), false).is_err());
        assert!(backend.bind(Path::new("/a"), Path::new("/y"), false).is_ok());
        assert_eq!(backend.bind_targets(), vec![PathBuf::from("/y")]);
    }
}
