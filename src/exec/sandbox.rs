//! Sandbox construction as a type-state chain.
//!
//! The build sequence is fixed:
//! 1. private mount namespace, propagation hardened
//! 2. staging tree and tmpfs working area
//! 3. new root: overlay, chroot or read-only base system
//! 4. fresh /proc and /sys, kernel-sensitive paths denied
//! 5. profile directives, in order
//! 6. credentials dropped to the invoking user
//! 7. exec
//!
//! Each step consumes the previous state, so steps cannot be skipped or
//! reordered. Only `Sandbox<CredsDropped>` can exec.

use super::launch;
use crate::config::directive::ProfileDirective;
use crate::config::types::{JailError, Result, SandboxConfig};
use crate::kernel::credentials::{drop_privileges, GroupPolicy};
use crate::kernel::mount::chroot::ChrootEntry;
use crate::kernel::mount::mountinfo::read_mountinfo;
use crate::kernel::mount::overlay::{KernelRelease, OverlayComposer};
use crate::kernel::mount::{
    hardening, BlacklistEngine, BlacklistReport, FsLogger, KernelMounts, MountBackend,
    StagingBootstrap,
};
use crate::kernel::namespace::{harden_mount_propagation, unshare_mount_namespace};
use crate::kernel::privilege::Elevated;
use std::convert::Infallible;
use std::fs;
use std::marker::PhantomData;

/// What to build and what to run in it
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub directives: Vec<ProfileDirective>,
    pub command: Vec<String>,
    pub private_tmp: bool,
    /// Name other users of `join` can refer to the sandbox by
    pub name: Option<String>,
}

/// Type-state marker: nothing done yet
pub struct Fresh;

/// Type-state marker: private mount namespace with private propagation
pub struct MountsPrivate;

/// Type-state marker: staging tree and working tmpfs in place
pub struct Staged;

/// Type-state marker: final root entered
pub struct RootReady;

/// Type-state marker: /proc and /sys rebuilt and masked
pub struct Hardened;

/// Type-state marker: profile directives applied
pub struct ProfileApplied;

/// Type-state marker: running with the invoking user's credentials
pub struct CredsDropped;

pub struct Sandbox<'a, S> {
    backend: &'a dyn MountBackend,
    config: &'a SandboxConfig,
    bootstrap: StagingBootstrap,
    logger: FsLogger,
    profile: Vec<ProfileDirective>,
    reports: Vec<BlacklistReport>,
    _state: PhantomData<S>,
}

impl<'a, S> Sandbox<'a, S> {
    fn advance<T>(self) -> Sandbox<'a, T> {
        Sandbox {
            backend: self.backend,
            config: self.config,
            bootstrap: self.bootstrap,
            logger: self.logger,
            profile: self.profile,
            reports: self.reports,
            _state: PhantomData,
        }
    }

    /// Denial reports collected so far, in stage order
    pub fn reports(&self) -> &[BlacklistReport] {
        &self.reports
    }

    pub fn logger(&self) -> &FsLogger {
        &self.logger
    }
}

impl<'a> Sandbox<'a, Fresh> {
    pub fn new(
        backend: &'a dyn MountBackend,
        config: &'a SandboxConfig,
        profile: Vec<ProfileDirective>,
    ) -> Self {
        Self {
            backend,
            config,
            bootstrap: StagingBootstrap::new(config.staging.clone()),
            logger: FsLogger::new(),
            profile,
            reports: Vec::new(),
            _state: PhantomData,
        }
    }

    pub fn isolate_mounts(self) -> Result<Sandbox<'a, MountsPrivate>> {
        unshare_mount_namespace()?;
        harden_mount_propagation()?;
        Ok(self.advance())
    }
}

impl<'a> Sandbox<'a, MountsPrivate> {
    /// Build the staging tree and record the sandbox name, if any
    pub fn stage(mut self, name: Option<&str>) -> Result<Sandbox<'a, Staged>> {
        self.bootstrap.build_mnt_dir(self.backend, &mut self.logger)?;
        if let Some(name) = name {
            self.register_name(name)?;
        }
        Ok(self.advance())
    }

    fn register_name(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.contains('/') || name.contains('\n') {
            return Err(JailError::Config(format!("invalid sandbox name {:?}", name)));
        }
        let file = self
            .config
            .staging
            .name_dir()
            .join(std::process::id().to_string());
        fs::write(&file, format!("{}\n", name))?;
        self.backend
            .chown(&file, self.config.staging.owner_uid, self.config.staging.owner_gid)?;
        log::debug!("Registered sandbox name {} in {}", name, file.display());
        Ok(())
    }
}

impl<'a> Sandbox<'a, Staged> {
    /// Enter the overlay or chroot root when configured, otherwise lock down
    /// the host root in place
    pub fn enter_root(mut self, private_tmp: bool) -> Result<Sandbox<'a, RootReady>> {
        let config = self.config;
        if let Some(request) = &config.overlay {
            let composer =
                OverlayComposer::new(self.backend, config, request, KernelRelease::current()?)?;
            let mounts = read_mountinfo()?;
            let (layout, report) = composer.enter(&mut self.bootstrap, &mut self.logger, &mounts)?;
            log::info!("Overlay root {} entered", layout.root.display());
            self.reports.push(report);
        } else if let Some(root) = &config.chroot {
            let entry = ChrootEntry::new(self.backend, config, root);
            if let Some(report) = entry.enter(&mut self.bootstrap, &mut self.logger)? {
                self.reports.push(report);
            }
        } else {
            let report = hardening::basic_fs(self.backend, &mut self.logger, config)?;
            self.reports.push(report);
        }

        if private_tmp {
            hardening::private_tmp(self.backend, &mut self.logger)?;
        }
        Ok(self.advance())
    }
}

impl<'a> Sandbox<'a, RootReady> {
    pub fn harden(mut self) -> Result<Sandbox<'a, Hardened>> {
        let report = hardening::remount_proc_sys(
            self.backend,
            &mut self.logger,
            self.config,
            &mut self.profile,
        )?;
        self.reports.push(report);
        Ok(self.advance())
    }
}

impl<'a> Sandbox<'a, Hardened> {
    /// Apply the profile in order, then persist the event log
    pub fn apply_profile(mut self) -> Result<Sandbox<'a, ProfileApplied>> {
        let config = self.config;
        let report = {
            let mut engine = BlacklistEngine::new(
                self.backend,
                &mut self.logger,
                &config.staging,
                &config.homedir,
                config.uid,
            );
            engine.apply(&self.profile)?;
            engine.finish()
        };
        self.reports.push(report);

        let dest = config.staging.fslogger();
        if let Err(e) = self.logger.flush_to(&dest) {
            log::warn!("cannot write {}: {}", dest.display(), e);
        }
        Ok(self.advance())
    }
}

impl<'a> Sandbox<'a, ProfileApplied> {
    pub fn drop_credentials(self) -> Result<Sandbox<'a, CredsDropped>> {
        drop_privileges(self.config.uid, self.config.gid, GroupPolicy::Keep)?;
        Ok(self.advance())
    }
}

impl<'a> Sandbox<'a, CredsDropped> {
    /// Replace the current process with `command` run through the shell
    pub fn exec(self, command: &[String]) -> Result<Infallible> {
        std::env::set_var("container", &self.config.sandbox_label);
        if let Some(nice) = self.config.nice {
            launch::apply_nice(nice);
        }
        let argv = launch::command_argv(self.config.shell.as_deref(), command)?;
        launch::enter_working_dir(self.config.cwd.as_deref(), &self.config.homedir)?;
        launch::exec_argv(&argv)
    }
}

/// Build a sandbox in the calling process and exec `request.command` in it
pub fn run_sandbox(config: &SandboxConfig, request: &RunRequest) -> Result<Infallible> {
    let backend = KernelMounts;
    let guard = Elevated::acquire()?;
    let sandbox = Sandbox::new(&backend, config, request.directives.clone())
        .isolate_mounts()?
        .stage(request.name.as_deref())?
        .enter_root(request.private_tmp)?
        .harden()?
        .apply_profile()?;
    for report in sandbox.reports() {
        for error in report.errors() {
            log::warn!("{}", error);
        }
    }
    let sandbox = sandbox.drop_credentials()?;
    drop(guard);
    sandbox.exec(&request.command)
}

#[cfg(test)]
impl<'a> Sandbox<'a, MountsPrivate> {
    /// Skip namespace setup; the recording backend never touches the host
    fn isolated_for_test(
        backend: &'a dyn MountBackend,
        config: &'a SandboxConfig,
        profile: Vec<ProfileDirective>,
    ) -> Self {
        Sandbox::new(backend, config, profile).advance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::paths::StagingLayout;
    use crate::testing::{MountCall, RecordingBackend};
    use nix::unistd::{getgid, getuid};
    use std::path::Path;

    fn fixture() -> (tempfile::TempDir, SandboxConfig) {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home/alice");
        fs::create_dir_all(home.join(".ssh")).unwrap();
        fs::create_dir_all(dir.path().join("home/bob")).unwrap();
        let (uid, gid) = (getuid().as_raw(), getgid().as_raw());
        let mut cfg = SandboxConfig::for_user(uid, gid, &home);
        cfg.staging = StagingLayout::new(dir.path().join("run/rustjail")).with_owner(uid, gid);
        (dir, cfg)
    }

    #[test]
    fn stages_run_in_order() {
        let (_dir, cfg) = fixture();
        let backend = RecordingBackend::new();
        let profile = vec![ProfileDirective::Blacklist(format!(
            "{}/.ssh",
            cfg.homedir.display()
        ))];

        let sandbox = Sandbox::isolated_for_test(&backend, &cfg, profile)
            .stage(Some("work"))
            .unwrap()
            .enter_root(true)
            .unwrap()
            .harden()
            .unwrap()
            .apply_profile()
            .unwrap();

        let calls = backend.calls();
        let staging_tmpfs = calls
            .iter()
            .position(|c| matches!(c, MountCall::Mount { target, .. } if *target == cfg.staging.mnt_dir()))
            .unwrap();
        let proc_mount = calls
            .iter()
            .position(|c| matches!(c, MountCall::Mount { fstype, .. } if fstype == "proc"))
            .unwrap();
        let ssh = fs::canonicalize(cfg.homedir.join(".ssh")).unwrap();
        let ssh_denial = calls
            .iter()
            .position(|c| matches!(c, MountCall::Bind { target, .. } if *target == ssh))
            .unwrap();
        assert!(staging_tmpfs < proc_mount);
        assert!(proc_mount < ssh_denial);
        assert!(backend.fs_mount_at(Path::new("/tmp")).is_some());

        // basic fs, proc/sys, profile
        assert_eq!(sandbox.reports().len(), 3);
        let log = fs::read_to_string(cfg.staging.fslogger()).unwrap();
        assert!(log.contains(&format!("blacklist {}", ssh.display())));

        let name_file = cfg.staging.name_dir().join(std::process::id().to_string());
        assert_eq!(fs::read_to_string(name_file).unwrap(), "work\n");
    }

    #[test]
    fn invalid_name_stops_the_build() {
        let (_dir, cfg) = fixture();
        let backend = RecordingBackend::new();
        let result = Sandbox::isolated_for_test(&backend, &cfg, Vec::new()).stage(Some("a/b"));
        assert!(matches!(result, Err(JailError::Config(_))));
    }

    #[test]
    fn sys_fs_denial_can_be_lifted_by_profile() {
        let (_dir, cfg) = fixture();
        let backend = RecordingBackend::new();
        let profile = vec![ProfileDirective::NoBlacklist("/sys/fs".to_string())];
        let sandbox = Sandbox::isolated_for_test(&backend, &cfg, profile)
            .stage(None)
            .unwrap()
            .enter_root(false)
            .unwrap()
            .harden()
            .unwrap()
            .apply_profile()
            .unwrap();
        assert!(backend.binds_onto(Path::new("/sys/fs")).is_empty());
        let profile_report = sandbox.reports().last().unwrap();
        assert!(profile_report.outcome_of(Path::new("/sys/fs")).is_some());
    }
}
