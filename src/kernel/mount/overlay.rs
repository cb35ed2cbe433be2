//! Overlay root filesystem.
//!
//! The real root is the read-only lower layer; writes land in a diff
//! directory under the staging area, or under a persistent directory in
//! `~/.rustjail` when the overlay is kept. A home directory on its own mount
//! point is not visible through the outer overlay and gets a second one.

use super::backend::MountBackend;
use super::blacklist::BlacklistReport;
use super::bootstrap::StagingBootstrap;
use super::fslog::MountEventSink;
use super::hardening;
use super::mountinfo::{self, MountEntry};
use crate::config::types::{JailError, OverlayRequest, Result, SandboxConfig};
use nix::mount::MsFlags;
use std::fs;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

const OVERLAY_DIR_MODE: u32 = 0o755;
const USER_OVERLAY_BASE_MODE: u32 = 0o700;

/// Kernel release, major and minor only
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KernelRelease {
    pub major: u32,
    pub minor: u32,
}

impl KernelRelease {
    /// Parse a release string such as `"5.15.0-91-generic"`
    pub fn parse(release: &str) -> Result<Self> {
        let mut parts = release.split(|c: char| !c.is_ascii_digit());
        let mut next = || parts.next().and_then(|p| p.parse::<u32>().ok());
        match (next(), next()) {
            (Some(major), Some(minor)) => Ok(Self { major, minor }),
            _ => Err(JailError::Kernel(format!(
                "cannot extract Linux kernel version from {:?}",
                release
            ))),
        }
    }

    pub fn current() -> Result<Self> {
        let uts = nix::sys::utsname::uname()
            .map_err(|e| JailError::Kernel(format!("uname failed: {}", e)))?;
        Self::parse(&uts.release().to_string_lossy())
    }

    /// Pick the overlay driver this kernel ships
    pub fn overlay_driver(&self) -> Result<OverlayDriver> {
        if self.major < 3 {
            return Err(JailError::Kernel(format!(
                "overlay needs Linux 3.x or newer, running {}.{}",
                self.major, self.minor
            )));
        }
        if (self.major, self.minor) < (3, 18) {
            Ok(OverlayDriver::Legacy)
        } else {
            Ok(OverlayDriver::Modern)
        }
    }
}

/// Overlay implementation available in the running kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayDriver {
    /// Out-of-tree `overlayfs` (pre 3.18), no workdir
    Legacy,
    /// Mainline `overlay` with a workdir
    Modern,
}

impl OverlayDriver {
    pub fn fstype(self) -> &'static str {
        match self {
            OverlayDriver::Legacy => "overlayfs",
            OverlayDriver::Modern => "overlay",
        }
    }

    pub fn has_workdir(self) -> bool {
        self == OverlayDriver::Modern
    }

    pub fn mount_options(self, lower: &Path, upper: &Path, work: &Path) -> String {
        match self {
            OverlayDriver::Legacy => {
                format!("lowerdir={},upperdir={}", lower.display(), upper.display())
            }
            OverlayDriver::Modern => format!(
                "lowerdir={},upperdir={},workdir={}",
                lower.display(),
                upper.display(),
                work.display()
            ),
        }
    }

    /// A persistent overlay needs a workdir to survive remounts
    pub fn check_request(self, request: &OverlayRequest) -> Result<()> {
        if request.is_keep() && !self.has_workdir() {
            return Err(JailError::Kernel(
                "a named overlay is not available for kernels older than 3.18; \
                 use a temporary overlay or upgrade the kernel"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Second overlay for a home directory on a separate mount point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeOverlay {
    /// Host mount point used as the lower layer
    pub lower: PathBuf,
    /// Where it is mounted inside the outer overlay root
    pub target: PathBuf,
    pub diff: PathBuf,
    pub work: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayLayout {
    pub root: PathBuf,
    pub diff: PathBuf,
    pub work: PathBuf,
    pub home: Option<HomeOverlay>,
}

impl OverlayLayout {
    fn new(root: PathBuf, base: &Path) -> Self {
        Self {
            root,
            diff: base.join("odiff"),
            work: base.join("owork"),
            home: None,
        }
    }
}

/// Create `~/.rustjail` and return `~/.rustjail/<name>`.
///
/// The base directory must not be a symlink; the named directory must not be
/// a symlink and, unless `allow_reuse`, must not exist yet.
pub fn check_overlay_dir(config: &SandboxConfig, name: &str, allow_reuse: bool) -> Result<PathBuf> {
    let base = config.homedir.join(".rustjail");
    match fs::symlink_metadata(&base) {
        Ok(meta) if meta.file_type().is_symlink() => {
            return Err(JailError::Config(format!(
                "invalid {} directory",
                base.display()
            )));
        }
        Ok(_) => {}
        Err(_) => {
            fs::DirBuilder::new()
                .mode(USER_OVERLAY_BASE_MODE)
                .create(&base)?;
            fs::set_permissions(&base, fs::Permissions::from_mode(USER_OVERLAY_BASE_MODE))?;
            let meta = fs::metadata(&base)?;
            if meta.uid() != config.uid || meta.gid() != config.gid {
                return Err(JailError::Permission(format!(
                    "{} is not owned by {}:{}",
                    base.display(),
                    config.uid,
                    config.gid
                )));
            }
        }
    }

    let dir = base.join(name);
    match fs::symlink_metadata(&dir) {
        Ok(meta) if meta.file_type().is_symlink() => Err(JailError::Config(format!(
            "overlay directory {} is a symbolic link",
            dir.display()
        ))),
        Ok(_) if !allow_reuse => Err(JailError::Config(format!(
            "overlay directory already exists: {}",
            dir.display()
        ))),
        _ => Ok(dir),
    }
}

pub struct OverlayComposer<'a> {
    backend: &'a dyn MountBackend,
    config: &'a SandboxConfig,
    request: &'a OverlayRequest,
    driver: OverlayDriver,
}

impl<'a> OverlayComposer<'a> {
    /// Validate the request against the kernel before anything is mounted
    pub fn new(
        backend: &'a dyn MountBackend,
        config: &'a SandboxConfig,
        request: &'a OverlayRequest,
        release: KernelRelease,
    ) -> Result<Self> {
        let driver = release.overlay_driver()?;
        driver.check_request(request)?;
        log::debug!("Linux kernel version {}.{}, {:?} overlay", release.major, release.minor, driver);
        Ok(Self {
            backend,
            config,
            request,
            driver,
        })
    }

    pub fn driver(&self) -> OverlayDriver {
        self.driver
    }

    /// Build and mount the overlay root without entering it
    pub fn compose(
        &self,
        bootstrap: &mut StagingBootstrap,
        sink: &mut dyn MountEventSink,
        mounts: &[MountEntry],
    ) -> Result<OverlayLayout> {
        bootstrap.build_mnt_dir(self.backend, sink)?;

        let root = bootstrap.layout().mnt_dir().join("oroot");
        self.ensure_dir(&root)?;

        let base = self.base_dir(bootstrap)?;
        let mut layout = OverlayLayout::new(root, &base);
        self.ensure_dir(&layout.diff)?;
        if self.driver.has_workdir() {
            self.ensure_dir(&layout.work)?;
        }

        log::debug!("Mounting OverlayFS");
        let options = self
            .driver
            .mount_options(Path::new("/"), &layout.diff, &layout.work);
        self.mount_overlay(&layout.root, &options)?;

        if self.driver.has_workdir() {
            layout.home = self.home_overlay(&layout, &base, mounts)?;
        }
        log::info!("OverlayFS configured in {} directory", base.display());

        self.populate(&layout.root, sink)?;
        Ok(layout)
    }

    /// Compose, chroot into the overlay and run the post-chroot bootstrap
    pub fn enter(
        &self,
        bootstrap: &mut StagingBootstrap,
        sink: &mut dyn MountEventSink,
        mounts: &[MountEntry],
    ) -> Result<(OverlayLayout, BlacklistReport)> {
        let layout = self.compose(bootstrap, sink, mounts)?;
        self.backend.chroot(&layout.root)?;
        bootstrap.rebuild_after_chroot(self.backend, sink)?;
        let report = hardening::post_chroot_bootstrap(self.backend, sink, self.config)?;
        Ok((layout, report))
    }

    fn base_dir(&self, bootstrap: &StagingBootstrap) -> Result<PathBuf> {
        let keep = match &self.request.keep_dir {
            None => return Ok(bootstrap.layout().mnt_dir()),
            Some(dir) => dir,
        };
        if keep.exists() {
            if !self.request.reuse {
                return Err(JailError::Config(format!(
                    "overlay directory {} exists, but reuse is not allowed",
                    keep.display()
                )));
            }
        } else {
            fs::DirBuilder::new()
                .mode(OVERLAY_DIR_MODE)
                .create(keep)
                .map_err(|e| {
                    JailError::Config(format!(
                        "cannot create overlay directory {}: {}",
                        keep.display(),
                        e
                    ))
                })?;
        }
        Ok(keep.clone())
    }

    fn home_overlay(
        &self,
        layout: &OverlayLayout,
        base: &Path,
        mounts: &[MountEntry],
    ) -> Result<Option<HomeOverlay>> {
        let homedir = &self.config.homedir;
        let inside = rebase(&layout.root, homedir);
        if inside.exists() {
            return Ok(None);
        }
        let lower = match mountinfo::mount_point_of(mounts, homedir) {
            Some(mp) if mp != Path::new("/") => mp.to_path_buf(),
            _ => return Ok(None),
        };

        let home = HomeOverlay {
            target: rebase(&layout.root, &lower),
            lower,
            diff: base.join("hdiff"),
            work: base.join("hwork"),
        };
        self.ensure_dir(&home.diff)?;
        self.ensure_dir(&home.work)?;
        let options = self.driver.mount_options(&home.lower, &home.diff, &home.work);
        self.mount_overlay(&home.target, &options)?;
        log::info!(
            "OverlayFS for {} configured in {} directory",
            home.lower.display(),
            base.display()
        );
        Ok(Some(home))
    }

    /// Bind /dev, /run and the X11 socket directory into the new root
    fn populate(&self, root: &Path, sink: &mut dyn MountEventSink) -> Result<()> {
        for dir in ["/dev", "/run"] {
            let target = rebase(root, Path::new(dir));
            log::debug!("Mounting {}", dir);
            self.backend.bind(Path::new(dir), &target, true)?;
            sink.record("whitelist", Path::new(dir));
        }

        let x11 = Path::new("/tmp/.X11-unix");
        if x11.exists() {
            let target = rebase(root, x11);
            match self.backend.bind(x11, &target, true) {
                Ok(()) => sink.record("whitelist", x11),
                Err(e) => log::warn!("cannot mount /tmp/.X11-unix in overlay: {}", e),
            }
        }
        Ok(())
    }

    fn mount_overlay(&self, target: &Path, options: &str) -> Result<()> {
        let fstype = self.driver.fstype();
        self.backend
            .mount_fs(fstype, target, fstype, MsFlags::empty(), Some(options))
    }

    /// Root-owned 0755 directory, created if missing
    fn ensure_dir(&self, dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::DirBuilder::new().mode(OVERLAY_DIR_MODE).create(dir)?;
        }
        self.backend.chown(dir, 0, 0)?;
        self.backend.chmod(dir, OVERLAY_DIR_MODE)
    }
}

/// `path` as seen under `root`
fn rebase(root: &Path, path: &Path) -> PathBuf {
    root.join(path.strip_prefix("/").unwrap_or(path))
}
