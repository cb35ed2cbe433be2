//! Mount transforms over an existing path.
//!
//! Each transform is the "bind self onto self, then remount with flags"
//! idiom and is idempotent: applying it twice leaves the same end state and
//! raises no new error.

use super::backend::MountBackend;
use super::fslog::MountEventSink;
use crate::config::types::Result;
use nix::mount::MsFlags;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Why a transform or denial did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Target does not exist
    Absent,
    /// Matched a `noblacklist` exception
    Excepted,
    /// Covered by an explicit policy exemption
    Exempt,
    /// Caller may not apply the transform to this target
    Refused,
}

/// Result of one denial or transform attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialOutcome {
    Success,
    Skipped(SkipReason),
    /// Non-fatal failure, logged by the caller
    Failed(String),
}

impl DenialOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DenialOutcome::Success)
    }
}

fn self_bind(backend: &dyn MountBackend, path: &Path, flags: MsFlags) -> Result<()> {
    backend.bind(path, path, true)?;
    backend.remount(path, MsFlags::MS_BIND | MsFlags::MS_REC | flags)
}

/// Remount `path` read-only. Absent paths are silently skipped.
pub fn read_only(
    backend: &dyn MountBackend,
    sink: &mut dyn MountEventSink,
    path: &Path,
) -> Result<DenialOutcome> {
    if fs::metadata(path).is_err() {
        return Ok(DenialOutcome::Skipped(SkipReason::Absent));
    }
    self_bind(backend, path, MsFlags::MS_RDONLY)?;
    sink.record("read-only", path);
    Ok(DenialOutcome::Success)
}

/// Read-only remount where failure is only a warning
pub fn read_only_best_effort(
    backend: &dyn MountBackend,
    sink: &mut dyn MountEventSink,
    path: &Path,
) -> DenialOutcome {
    match read_only(backend, sink, path) {
        Ok(outcome) => outcome,
        Err(e) => {
            log::warn!("cannot mount {} read-only: {}", path.display(), e);
            DenialOutcome::Failed(e.to_string())
        }
    }
}

/// Remount `path` read-write.
///
/// Only root or the owner of `path` may do this; anyone else is refused with
/// a warning and nothing is mounted.
pub fn read_write(
    backend: &dyn MountBackend,
    sink: &mut dyn MountEventSink,
    path: &Path,
    caller_uid: u32,
) -> Result<DenialOutcome> {
    let meta = match fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return Ok(DenialOutcome::Skipped(SkipReason::Absent)),
    };
    if caller_uid != 0 && meta.uid() != caller_uid {
        log::warn!(
            "you are not allowed to change {} to read-write",
            path.display()
        );
        return Ok(DenialOutcome::Skipped(SkipReason::Refused));
    }
    self_bind(backend, path, MsFlags::empty())?;
    sink.record("read-write", path);
    Ok(DenialOutcome::Success)
}

/// Remount `path` noexec, nodev, nosuid
pub fn noexec(
    backend: &dyn MountBackend,
    sink: &mut dyn MountEventSink,
    path: &Path,
) -> Result<DenialOutcome> {
    if fs::metadata(path).is_err() {
        return Ok(DenialOutcome::Skipped(SkipReason::Absent));
    }
    self_bind(
        backend,
        path,
        MsFlags::MS_NOEXEC | MsFlags::MS_NODEV | MsFlags::MS_NOSUID,
    )?;
    sink.record("noexec", path);
    Ok(DenialOutcome::Success)
}

/// Replace a directory with an empty tmpfs owned like the original.
///
/// A fresh tmpfs is root-owned; the previous owner is put back so existing
/// access expectations hold. Non-directories are refused with a warning.
pub fn tmpfs_replace(
    backend: &dyn MountBackend,
    sink: &mut dyn MountEventSink,
    path: &Path,
) -> Result<DenialOutcome> {
    let meta = match fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return Ok(DenialOutcome::Skipped(SkipReason::Absent)),
    };
    if !meta.is_dir() {
        log::warn!(
            "{} is not a directory; cannot mount a tmpfs on top of it",
            path.display()
        );
        return Ok(DenialOutcome::Skipped(SkipReason::Refused));
    }

    log::debug!("Mounting tmpfs on {}", path.display());
    backend.mount_fs(
        "tmpfs",
        path,
        "tmpfs",
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_STRICTATIME | MsFlags::MS_REC,
        None,
    )?;
    backend.chown(path, meta.uid(), meta.gid())?;
    sink.record("tmpfs", path);
    Ok(DenialOutcome::Success)
}

/// Shared tmpfs with an explicit mode (e.g. 1777 for /tmp-like directories)
pub fn tmpfs_with_mode(
    backend: &dyn MountBackend,
    sink: &mut dyn MountEventSink,
    path: &Path,
    mode: u32,
) -> Result<()> {
    let data = format!("mode={:o},gid=0", mode);
    backend.mount_fs(
        "tmpfs",
        path,
        "tmpfs",
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME | MsFlags::MS_REC,
        Some(&data),
    )?;
    sink.record("tmpfs", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::mount::fslog::FsLogger;
    use crate::testing::{MountCall, RecordingBackend};
    use nix::unistd::{getgid, getuid};

    #[test]
    fn read_only_binds_then_remounts() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RecordingBackend::new();
        let mut log = FsLogger::new();

        let out = read_only(&backend, &mut log, dir.path()).unwrap();
        assert_eq!(out, DenialOutcome::Success);
        assert_eq!(
            backend.calls()[0],
            MountCall::Bind {
                source: dir.path().to_path_buf(),
                target: dir.path().to_path_buf(),
                recursive: true
            }
        );
        let flags = backend.remounts_of(dir.path());
        assert!(flags[0].contains(MsFlags::MS_RDONLY | MsFlags::MS_BIND | MsFlags::MS_REC));
    }

    #[test]
    fn reapplying_read_only_and_noexec_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RecordingBackend::new();
        let mut log = FsLogger::new();

        for _ in 0..2 {
            assert!(read_only(&backend, &mut log, dir.path()).unwrap().is_success());
            assert!(noexec(&backend, &mut log, dir.path()).unwrap().is_success());
        }
        let flags = backend.remounts_of(dir.path());
        assert_eq!(flags.len(), 4);
        assert_eq!(flags[0], flags[2]);
        assert_eq!(flags[1], flags[3]);
        assert!(flags[1].contains(MsFlags::MS_NOEXEC | MsFlags::MS_NODEV | MsFlags::MS_NOSUID));
    }

    #[test]
    fn absent_path_issues_nothing() {
        let backend = RecordingBackend::new();
        let mut log = FsLogger::new();
        let missing = Path::new("/nonexistent/rustjail/path");
        assert_eq!(
            read_only(&backend, &mut log, missing).unwrap(),
            DenialOutcome::Skipped(SkipReason::Absent)
        );
        assert!(backend.calls().is_empty());
        assert!(log.is_empty());
    }

    #[test]
    fn read_write_refused_for_non_owner() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RecordingBackend::new();
        let mut log = FsLogger::new();
        let stranger = getuid().as_raw().wrapping_add(4242).max(1);

        let out = read_write(&backend, &mut log, dir.path(), stranger).unwrap();
        assert_eq!(out, DenialOutcome::Skipped(SkipReason::Refused));
        assert!(backend.calls().is_empty());

        let owner = getuid().as_raw();
        assert!(read_write(&backend, &mut log, dir.path(), owner).unwrap().is_success());
    }

    #[test]
    fn tmpfs_restores_owner() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RecordingBackend::new();
        let mut log = FsLogger::new();

        tmpfs_replace(&backend, &mut log, dir.path()).unwrap();
        let calls = backend.calls();
        assert!(matches!(&calls[0], MountCall::Mount { fstype, .. } if fstype == "tmpfs"));
        assert_eq!(
            calls[1],
            MountCall::Chown {
                path: dir.path().to_path_buf(),
                uid: getuid().as_raw(),
                gid: getgid().as_raw()
            }
        );
    }

    #[test]
    fn tmpfs_refuses_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();
        let backend = RecordingBackend::new();
        let mut log = FsLogger::new();
        assert_eq!(
            tmpfs_replace(&backend, &mut log, &file).unwrap(),
            DenialOutcome::Skipped(SkipReason::Refused)
        );
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn best_effort_downgrades_failure() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RecordingBackend::new();
        backend.fail_on("bind", dir.path());
        let mut log = FsLogger::new();
        let out = read_only_best_effort(&backend, &mut log, dir.path());
        assert!(matches!(out, DenialOutcome::Failed(_)));
        assert!(log.is_empty());
    }
}
