//! Mount syscall backend.
//!
//! Every mount-family syscall the sandbox issues goes through
//! [`MountBackend`], so the policy layers above can be driven against a
//! recording implementation without privileges.

use crate::config::types::{JailError, Result};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::unistd::{chown, chroot, Gid, Uid};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

pub trait MountBackend {
    /// `mount --bind source target`, recursive when asked
    fn bind(&self, source: &Path, target: &Path, recursive: bool) -> Result<()>;
    /// Remount an existing mount with new flags
    fn remount(&self, target: &Path, flags: MsFlags) -> Result<()>;
    /// Mount a fresh filesystem instance (tmpfs, proc, sysfs, overlay)
    fn mount_fs(
        &self,
        source: &str,
        target: &Path,
        fstype: &str,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()>;
    /// Lazy unmount
    fn unmount(&self, target: &Path) -> Result<()>;
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()>;
    fn chmod(&self, path: &Path, mode: u32) -> Result<()>;
    fn chroot(&self, root: &Path) -> Result<()>;
}

/// The real kernel
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelMounts;

impl MountBackend for KernelMounts {
    fn bind(&self, source: &Path, target: &Path, recursive: bool) -> Result<()> {
        let mut flags = MsFlags::MS_BIND;
        if recursive {
            flags |= MsFlags::MS_REC;
        }
        mount(Some(source), target, None::<&str>, flags, None::<&str>)
            .map_err(|e| JailError::mount("bind", target, e))
    }

    fn remount(&self, target: &Path, flags: MsFlags) -> Result<()> {
        mount(
            None::<&str>,
            target,
            None::<&str>,
            flags | MsFlags::MS_REMOUNT,
            None::<&str>,
        )
        .map_err(|e| JailError::mount("remount", target, e))
    }

    fn mount_fs(
        &self,
        source: &str,
        target: &Path,
        fstype: &str,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        mount(Some(source), target, Some(fstype), flags, data)
            .map_err(|e| JailError::mount("mount", target, e))
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        umount2(target, MntFlags::MNT_DETACH).map_err(|e| JailError::mount("umount", target, e))
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
            .map_err(|e| JailError::mount("chown", path, e))
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn chroot(&self, root: &Path) -> Result<()> {
        chroot(root).map_err(|e| JailError::mount("chroot", root, e))?;
        std::env::set_current_dir("/")?;
        Ok(())
    }
}
