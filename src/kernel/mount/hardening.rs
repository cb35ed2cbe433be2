//! System-wide filesystem hardening.
//!
//! Fresh /proc and /sys, denial of kernel-sensitive paths, the read-only
//! base system, and the bootstrap that runs after every root switch.

use super::backend::MountBackend;
use super::blacklist::{BlacklistEngine, BlacklistReport};
use super::fslog::{record_note, MountEventSink};
use super::primitives;
use crate::config::directive::ProfileDirective;
use crate::config::types::{Result, SandboxConfig};
use nix::mount::MsFlags;
use std::fs;
use std::path::{Path, PathBuf};

/// Kernel interfaces no sandbox needs
const KERNEL_DENY: &[&str] = &[
    "/sys/firmware",
    "/sys/hypervisor",
    "/sys/module",
    "/sys/power",
    "/sys/kernel/debug",
    "/sys/kernel/vmcoreinfo",
    "/sys/kernel/uevent_helper",
    "/proc/sys/security",
    "/proc/sys/efi/vars",
    "/proc/sys/fs/binfmt_misc",
    "/proc/sys/kernel/core_pattern",
    "/proc/sys/kernel/modprobe",
    "/proc/sysrq-trigger",
    "/proc/sys/kernel/hotplug",
    "/proc/sys/vm/panic_on_oom",
    "/proc/irq",
    "/proc/bus",
    "/proc/config.gz",
    "/proc/sched_debug",
    "/proc/timer_list",
    "/proc/timer_stats",
    "/proc/kcore",
    "/proc/kallsyms",
    "/proc/mem",
    "/proc/kmem",
];

/// Kernel symbol information, kept when debuggers are allowed
const DEBUG_DENY: &[&str] = &["/usr/src/linux", "/lib/modules", "/usr/lib/debug", "/boot"];

const MISC_DENY: &[&str] = &["/selinux", "/dev/port"];

/// Kernel log, hidden from non-root invokers
const KMSG_DENY: &[&str] = &["/dev/kmsg", "/proc/kmsg"];

const SYSTEM_READ_ONLY: &[&str] = &["/bin", "/sbin", "/lib", "/lib64", "/lib32", "/libx32", "/usr"];

const SHARED_TMP_MODE: u32 = 0o1777;

fn blacklist(paths: &'static [&'static str]) -> impl Iterator<Item = ProfileDirective> {
    paths.iter().map(|p| ProfileDirective::Blacklist(p.to_string()))
}

/// Remount /proc and /sys and deny kernel-sensitive paths.
///
/// `blacklist /sys/fs` is appended to `profile` rather than applied here so
/// a `noblacklist /sys/fs` in the profile can still lift it.
pub fn remount_proc_sys(
    backend: &dyn MountBackend,
    sink: &mut dyn MountEventSink,
    config: &SandboxConfig,
    profile: &mut Vec<ProfileDirective>,
) -> Result<BlacklistReport> {
    log::debug!("Remounting /proc and /proc/sys filesystems");
    let proc = Path::new("/proc");
    backend.mount_fs(
        "proc",
        proc,
        "proc",
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV | MsFlags::MS_REC,
        None,
    )?;
    record_note(sink, "remount /proc");
    primitives::read_only_best_effort(backend, sink, Path::new("/proc/sys"));

    let sys = Path::new("/sys");
    match backend.unmount(sys) {
        Err(e) => log::warn!("failed to unmount /sys: {}", e),
        Ok(()) => {
            let flags = MsFlags::MS_RDONLY
                | MsFlags::MS_NOSUID
                | MsFlags::MS_NOEXEC
                | MsFlags::MS_NODEV
                | MsFlags::MS_REC;
            match backend.mount_fs("sysfs", sys, "sysfs", flags, None) {
                Ok(()) => record_note(sink, "remount /sys"),
                Err(e) => log::warn!("failed to mount /sys: {}", e),
            }
        }
    }

    profile.push(ProfileDirective::Blacklist("/sys/fs".to_string()));

    let mut directives: Vec<ProfileDirective> = blacklist(KERNEL_DENY).collect();
    if !config.allow_debuggers {
        directives.extend(blacklist(DEBUG_DENY));
    }
    directives.extend(blacklist(MISC_DENY));
    if !config.is_root() {
        directives.extend(blacklist(KMSG_DENY));
    }

    let mut engine =
        BlacklistEngine::new(backend, sink, &config.staging, &config.homedir, config.uid);
    for directive in &directives {
        if let Err(e) = engine.apply_one(directive) {
            log::warn!("cannot apply {}: {}", directive, e);
        }
    }
    Ok(engine.finish())
}

/// Read-only base system followed by the standard bootstrap
pub fn basic_fs(
    backend: &dyn MountBackend,
    sink: &mut dyn MountEventSink,
    config: &SandboxConfig,
) -> Result<BlacklistReport> {
    log::debug!("Mounting read-only /bin, /sbin, /lib, /lib32, /lib64, /usr");
    let protected = [
        (Path::new("/etc"), config.writable_etc),
        (Path::new("/var"), config.writable_var),
    ];
    for (dir, writable) in protected {
        if writable {
            continue;
        }
        primitives::read_only(backend, sink, dir)?;
        if !config.is_root() {
            primitives::noexec(backend, sink, dir)?;
        }
    }
    for dir in SYSTEM_READ_ONLY {
        primitives::read_only(backend, sink, Path::new(dir))?;
    }

    post_chroot_bootstrap(backend, sink, config)
}

/// Fresh world-writable /tmp
pub fn private_tmp(backend: &dyn MountBackend, sink: &mut dyn MountEventSink) -> Result<()> {
    log::debug!("Mounting tmpfs on /tmp directory");
    primitives::tmpfs_with_mode(backend, sink, Path::new("/tmp"), SHARED_TMP_MODE)
}

/// Mount a private mode-1777 tmpfs over `dir` when it is a real directory.
/// Symlinks and missing paths are left alone.
pub fn shared_tmpfs(
    backend: &dyn MountBackend,
    sink: &mut dyn MountEventSink,
    dir: &Path,
) -> Result<bool> {
    let is_real_dir = fs::symlink_metadata(dir)
        .map(|m| m.file_type().is_dir())
        .unwrap_or(false);
    if !is_real_dir {
        return Ok(false);
    }
    primitives::tmpfs_with_mode(backend, sink, dir, SHARED_TMP_MODE)?;
    Ok(true)
}

/// Run after entering a new root (overlay, chroot) and at the end of the
/// basic filesystem setup.
pub fn post_chroot_bootstrap(
    backend: &dyn MountBackend,
    sink: &mut dyn MountEventSink,
    config: &SandboxConfig,
) -> Result<BlacklistReport> {
    if !config.private_dev {
        shared_tmpfs(backend, sink, Path::new("/dev/shm"))?;
    }
    shared_tmpfs(backend, sink, Path::new("/var/lock"))?;
    shared_tmpfs(backend, sink, Path::new("/var/tmp"))?;

    let mut directives = restrict_users(&config.homedir);
    // root keeps its configuration so sandboxes can be chained
    if !config.is_root() {
        directives.extend(disable_config(config));
    }

    let mut engine =
        BlacklistEngine::new(backend, sink, &config.staging, &config.homedir, config.uid);
    engine.apply(&directives)?;
    Ok(engine.finish())
}

/// Deny every other user's directory next to `homedir`
pub fn restrict_users(homedir: &Path) -> Vec<ProfileDirective> {
    let parent = match homedir.parent() {
        Some(p) if p != Path::new("/") => p,
        _ => return Vec::new(),
    };
    let entries = match fs::read_dir(parent) {
        Ok(e) => e,
        Err(e) => {
            log::debug!("cannot list {}: {}", parent.display(), e);
            return Vec::new();
        }
    };

    let mut others: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p != homedir && p.is_dir())
        .collect();
    others.sort();
    others
        .into_iter()
        .map(|p| ProfileDirective::Blacklist(p.display().to_string()))
        .collect()
}

/// Sandbox configuration and runtime state invisible to the sandboxed user
pub fn disable_config(config: &SandboxConfig) -> Vec<ProfileDirective> {
    let staging = &config.staging;
    [
        config.homedir.join(".config/rustjail"),
        staging.network_dir(),
        staging.bandwidth_dir(),
        staging.name_dir(),
        staging.x11_dir(),
    ]
    .into_iter()
    .filter(|p| p.exists())
    .map(|p| ProfileDirective::Blacklist(p.display().to_string()))
    .collect()
}
