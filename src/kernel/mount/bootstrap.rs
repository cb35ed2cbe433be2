//! Staging tree bootstrap.
//!
//! Builds the root-owned staging directories and the two denial donors,
//! and mounts a private tmpfs over the working area exactly once per root.
//! A chroot makes the previous tmpfs unreachable, so crossing one re-arms
//! the mount.

use super::backend::MountBackend;
use super::fslog::MountEventSink;
use crate::config::paths::StagingLayout;
use crate::config::types::{JailError, Result};
use nix::mount::MsFlags;
use std::fs;
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::Path;

const STATE_DIR_MODE: u32 = 0o755;
const DONOR_DIR_MODE: u32 = 0o500;
const DONOR_FILE_MODE: u32 = 0o400;

/// Bootstrap state owned by the sandbox-construction call chain
#[derive(Debug, Clone)]
pub struct StagingBootstrap {
    layout: StagingLayout,
    tmpfs_mounted: bool,
}

impl StagingBootstrap {
    pub fn new(layout: StagingLayout) -> Self {
        Self {
            layout,
            tmpfs_mounted: false,
        }
    }

    pub fn layout(&self) -> &StagingLayout {
        &self.layout
    }

    pub fn is_tmpfs_mounted(&self) -> bool {
        self.tmpfs_mounted
    }

    /// Create the staging tree and both donors. Idempotent.
    pub fn build_staging_dir(&self, backend: &dyn MountBackend) -> Result<()> {
        let base = self.layout.base();
        if let Some(parent) = base.parent() {
            if !parent.exists() {
                self.create_dir_as_owner(backend, parent, STATE_DIR_MODE)?;
            }
        }

        match fs::metadata(base) {
            Ok(meta) => {
                if meta.uid() != self.layout.owner_uid || meta.gid() != self.layout.owner_gid {
                    return Err(JailError::Permission(format!(
                        "{} is not owned by {}:{}, refusing to use it",
                        base.display(),
                        self.layout.owner_uid,
                        self.layout.owner_gid
                    )));
                }
            }
            Err(_) => self.create_dir_as_owner(backend, base, STATE_DIR_MODE)?,
        }

        for dir in self.layout.state_dirs() {
            if !dir.exists() {
                self.create_dir_as_owner(backend, &dir, STATE_DIR_MODE)?;
            }
        }

        self.create_donor_dir(backend)?;
        self.create_donor_file(backend)?;
        Ok(())
    }

    /// Make sure both donors are in place before a denial binds one.
    ///
    /// A tmpfs mounted over the staging parent (a profile `tmpfs /run`)
    /// hides the tree built at startup, so a missing donor triggers a full
    /// rebuild.
    pub fn ensure_donors(&self, backend: &dyn MountBackend) -> Result<()> {
        let present = |p: &Path| fs::symlink_metadata(p).is_ok();
        if present(&self.layout.donor_dir()) && present(&self.layout.donor_file()) {
            return Ok(());
        }
        log::debug!("staging donors missing, rebuilding {}", self.layout.base().display());
        self.build_staging_dir(backend)
    }

    /// Build the staging tree and mount the tmpfs working area once
    pub fn build_mnt_dir(
        &mut self,
        backend: &dyn MountBackend,
        sink: &mut dyn MountEventSink,
    ) -> Result<()> {
        self.build_staging_dir(backend)?;

        let mnt = self.layout.mnt_dir();
        if !mnt.exists() {
            self.create_dir_as_owner(backend, &mnt, STATE_DIR_MODE)?;
        }

        if !self.tmpfs_mounted {
            log::debug!("Mounting tmpfs on {}", mnt.display());
            backend.mount_fs(
                "tmpfs",
                &mnt,
                "tmpfs",
                MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME | MsFlags::MS_REC,
                Some("mode=755,gid=0"),
            )?;
            self.tmpfs_mounted = true;
            sink.record("tmpfs", &mnt);
        }
        Ok(())
    }

    /// Forget the working-area tmpfs; the next build mounts a fresh one
    pub fn invalidate_after_chroot(&mut self) {
        self.tmpfs_mounted = false;
    }

    /// Re-run the bootstrap inside a new root
    pub fn rebuild_after_chroot(
        &mut self,
        backend: &dyn MountBackend,
        sink: &mut dyn MountEventSink,
    ) -> Result<()> {
        self.invalidate_after_chroot();
        self.build_mnt_dir(backend, sink)
    }

    fn create_dir_as_owner(&self, backend: &dyn MountBackend, dir: &Path, mode: u32) -> Result<()> {
        log::debug!("Creating {} directory", dir.display());
        fs::DirBuilder::new().mode(mode).create(dir).map_err(|e| {
            JailError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create {}: {}", dir.display(), e),
            ))
        })?;
        backend.chmod(dir, mode)?;
        backend.chown(dir, self.layout.owner_uid, self.layout.owner_gid)?;
        Ok(())
    }

    fn create_donor_dir(&self, backend: &dyn MountBackend) -> Result<()> {
        let donor = self.layout.donor_dir();
        if fs::symlink_metadata(&donor).is_err() {
            self.create_dir_as_owner(backend, &donor, DONOR_DIR_MODE)?;
        }
        Ok(())
    }

    fn create_donor_file(&self, backend: &dyn MountBackend) -> Result<()> {
        let donor = self.layout.donor_file();
        if fs::symlink_metadata(&donor).is_err() {
            fs::File::create(&donor).map_err(|e| {
                JailError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create {}: {}", donor.display(), e),
                ))
            })?;
            backend.chmod(&donor, DONOR_FILE_MODE)?;
            backend.chown(&donor, self.layout.owner_uid, self.layout.owner_gid)?;
        }
        Ok(())
    }
}
