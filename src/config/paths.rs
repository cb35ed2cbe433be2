//! Staging tree layout.
//!
//! Every path the sandbox stages for itself hangs off one base directory so
//! tests can relocate the whole tree.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_STAGING_BASE: &str = "/run/rustjail";

/// Executable search directories used by `${PATH}` expansion, in order
pub const SEARCH_PATH_DIRS: [&str; 6] = [
    "/usr/local/bin",
    "/usr/local/sbin",
    "/bin",
    "/usr/bin",
    "/sbin",
    "/usr/sbin",
];

/// Staging tree layout
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StagingLayout {
    pub base: PathBuf,
    /// Owner every staging directory must carry
    #[serde(default)]
    pub owner_uid: u32,
    #[serde(default)]
    pub owner_gid: u32,
}

impl Default for StagingLayout {
    fn default() -> Self {
        Self::new(DEFAULT_STAGING_BASE)
    }
}

impl StagingLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            owner_uid: 0,
            owner_gid: 0,
        }
    }

    /// Same layout owned by someone other than root (test fixtures)
    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.owner_uid = uid;
        self.owner_gid = gid;
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn network_dir(&self) -> PathBuf {
        self.base.join("network")
    }

    pub fn bandwidth_dir(&self) -> PathBuf {
        self.base.join("bandwidth")
    }

    pub fn name_dir(&self) -> PathBuf {
        self.base.join("name")
    }

    pub fn x11_dir(&self) -> PathBuf {
        self.base.join("x11")
    }

    pub fn appimage_dir(&self) -> PathBuf {
        self.base.join("appimage")
    }

    /// Read-only donor directory, mode 0500
    pub fn donor_dir(&self) -> PathBuf {
        self.base.join("ro-dir")
    }

    /// Read-only donor file, mode 0400
    pub fn donor_file(&self) -> PathBuf {
        self.base.join("ro-file")
    }

    /// tmpfs-backed working area
    pub fn mnt_dir(&self) -> PathBuf {
        self.base.join("mnt")
    }

    pub fn cpu_cfg(&self) -> PathBuf {
        self.mnt_dir().join("cpu")
    }

    pub fn cgroup_cfg(&self) -> PathBuf {
        self.mnt_dir().join("cgroup")
    }

    pub fn groups_cfg(&self) -> PathBuf {
        self.mnt_dir().join("groups")
    }

    pub fn seccomp_cfg(&self) -> PathBuf {
        self.mnt_dir().join("seccomp")
    }

    pub fn protocol_cfg(&self) -> PathBuf {
        self.mnt_dir().join("seccomp.protocol")
    }

    pub fn fslogger(&self) -> PathBuf {
        self.mnt_dir().join("fslogger")
    }

    /// Staging subdirectories created by the bootstrap, mode 0755
    pub fn state_dirs(&self) -> [PathBuf; 5] {
        [
            self.network_dir(),
            self.bandwidth_dir(),
            self.name_dir(),
            self.x11_dir(),
            self.appimage_dir(),
        ]
    }

    /// Path of a staged file as seen through another process's root
    pub fn under_root(root: &Path, staged: &Path) -> PathBuf {
        root.join(staged.strip_prefix("/").unwrap_or(staged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_files_live_under_mnt() {
        let layout = StagingLayout::default();
        assert_eq!(layout.cpu_cfg(), PathBuf::from("/run/rustjail/mnt/cpu"));
        assert_eq!(
            layout.protocol_cfg(),
            PathBuf::from("/run/rustjail/mnt/seccomp.protocol")
        );
    }

    #[test]
    fn under_root_rebases_absolute_paths() {
        let layout = StagingLayout::default();
        let p = StagingLayout::under_root(Path::new("/proc/42/root"), &layout.groups_cfg());
        assert_eq!(p, PathBuf::from("/proc/42/root/run/rustjail/mnt/groups"));
    }
}
