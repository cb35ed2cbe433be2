//! Chroot into an existing root directory.
//!
//! The root is validated first; a broken root is refused rather than
//! entered. Desktop mode shares /dev, /run and the X11 sockets with the new
//! root and refreshes its DNS configuration.

use super::backend::MountBackend;
use super::blacklist::BlacklistReport;
use super::bootstrap::StagingBootstrap;
use super::fslog::MountEventSink;
use super::hardening;
use crate::config::types::{JailError, Result, SandboxConfig};
use std::fs;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

const REQUIRED_DIRS: [&str; 4] = ["dev", "var/tmp", "proc", "tmp"];
const X11_DIR: &str = "tmp/.X11-unix";
const HOST_RESOLV_CONF: &str = "/etc/resolv.conf";

pub struct ChrootEntry<'a> {
    backend: &'a dyn MountBackend,
    config: &'a SandboxConfig,
    root: PathBuf,
}

impl<'a> ChrootEntry<'a> {
    pub fn new(
        backend: &'a dyn MountBackend,
        config: &'a SandboxConfig,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            config,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root-owned, with /dev, /var/tmp, /proc, /tmp and, when X11 is
    /// forwarded, /tmp/.X11-unix
    pub fn validate(&self) -> Result<()> {
        self.validate_owned_by(0)
    }

    fn validate_owned_by(&self, owner: u32) -> Result<()> {
        let meta = fs::metadata(&self.root).map_err(|_| {
            JailError::Config(format!(
                "cannot find chroot directory {}",
                self.root.display()
            ))
        })?;
        if meta.uid() != owner {
            return Err(JailError::Permission(format!(
                "chroot directory {} should be owned by root",
                self.root.display()
            )));
        }

        let mut required: Vec<&str> = REQUIRED_DIRS.to_vec();
        if self.config.x11 {
            required.push(X11_DIR);
        }
        for dir in required {
            if fs::metadata(self.root.join(dir)).is_err() {
                return Err(JailError::Config(format!(
                    "cannot find /{} in chroot directory",
                    dir
                )));
            }
        }
        Ok(())
    }

    /// Validate, prepare and chroot, then rebuild the staging area and run
    /// the post-chroot bootstrap
    pub fn enter(
        &self,
        bootstrap: &mut StagingBootstrap,
        sink: &mut dyn MountEventSink,
    ) -> Result<Option<BlacklistReport>> {
        self.validate()?;
        self.enter_validated(bootstrap, sink)
    }

    fn enter_validated(
        &self,
        bootstrap: &mut StagingBootstrap,
        sink: &mut dyn MountEventSink,
    ) -> Result<Option<BlacklistReport>> {
        if self.config.chroot_desktop {
            self.prepare_desktop(sink)?;
        }

        log::debug!("Chrooting into {}", self.root.display());
        self.backend.chroot(&self.root)?;
        // the previous staging tmpfs is out of reach now
        bootstrap.rebuild_after_chroot(self.backend, sink)?;

        if !self.config.chroot_desktop {
            return Ok(None);
        }
        hardening::post_chroot_bootstrap(self.backend, sink, self.config).map(Some)
    }

    fn prepare_desktop(&self, sink: &mut dyn MountEventSink) -> Result<()> {
        let dev = self.root.join("dev");
        log::debug!("Mounting /dev on {}", dev.display());
        self.backend.bind(Path::new("/dev"), &dev, true)?;
        sink.record("whitelist", Path::new("/dev"));

        if self.config.x11 {
            let x11 = self.root.join(X11_DIR);
            log::debug!("Mounting /tmp/.X11-unix on {}", x11.display());
            self.backend.bind(Path::new("/tmp/.X11-unix"), &x11, true)?;
            sink.record("whitelist", Path::new("/tmp/.X11-unix"));
        }

        // older distributions have no /run; failures are left to the user
        let run = self.root.join("run");
        if !run.is_dir() {
            if let Err(e) = fs::DirBuilder::new().mode(0o755).create(&run) {
                log::warn!("cannot create {}: {}", run.display(), e);
            } else if let Err(e) = self.backend.chown(&run, 0, 0) {
                log::warn!("cannot chown {}: {}", run.display(), e);
            }
        }

        self.copy_resolv_conf(Path::new(HOST_RESOLV_CONF), sink)
    }

    /// Copy the host resolver configuration into the new root. A symlinked
    /// destination is refused; a failed copy is only a warning.
    fn copy_resolv_conf(&self, source: &Path, sink: &mut dyn MountEventSink) -> Result<()> {
        let dest = self.root.join("etc/resolv.conf");
        log::debug!("Updating /etc/resolv.conf in {}", dest.display());
        if fs::symlink_metadata(&dest)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
        {
            return Err(JailError::Config(format!("invalid {} file", dest.display())));
        }

        let copied = fs::copy(source, &dest)
            .and_then(|_| fs::set_permissions(&dest, fs::Permissions::from_mode(0o644)));
        match copied {
            Ok(()) => {
                if let Err(e) = self.backend.chown(&dest, 0, 0) {
                    log::warn!("cannot chown {}: {}", dest.display(), e);
                }
                sink.record("clone", Path::new(HOST_RESOLV_CONF));
            }
            Err(e) => log::warn!("/etc/resolv.conf not initialized: {}", e),
        }
        Ok(())
    }
}
