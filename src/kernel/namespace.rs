/// Namespace creation and entry
/// Builds a private mount namespace for a new sandbox and enters the
/// namespaces of a running one
use crate::config::types::{JailError, Result};

use nix::mount::{mount, MsFlags};
use nix::sched::{setns, unshare, CloneFlags};
use std::fmt;
use std::fs::File;
use std::path::Path;

/// A namespace that can be entered through `/proc/<pid>/ns/<name>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceKind {
    Ipc,
    Net,
    Pid,
    Uts,
    Mnt,
    User,
}

impl NamespaceKind {
    /// Entry name under `/proc/<pid>/ns`
    pub fn proc_name(self) -> &'static str {
        match self {
            NamespaceKind::Ipc => "ipc",
            NamespaceKind::Net => "net",
            NamespaceKind::Pid => "pid",
            NamespaceKind::Uts => "uts",
            NamespaceKind::Mnt => "mnt",
            NamespaceKind::User => "user",
        }
    }

    pub fn clone_flag(self) -> CloneFlags {
        match self {
            NamespaceKind::Ipc => CloneFlags::CLONE_NEWIPC,
            NamespaceKind::Net => CloneFlags::CLONE_NEWNET,
            NamespaceKind::Pid => CloneFlags::CLONE_NEWPID,
            NamespaceKind::Uts => CloneFlags::CLONE_NEWUTS,
            NamespaceKind::Mnt => CloneFlags::CLONE_NEWNS,
            NamespaceKind::User => CloneFlags::CLONE_NEWUSER,
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proc_name())
    }
}

/// Which namespaces a join enters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinScope {
    /// Network namespace only, host filesystem view kept
    Network,
    /// Mount namespace only
    Filesystem,
    #[default]
    Full,
}

impl JoinScope {
    /// Namespaces to enter, in entry order
    pub fn namespaces(self) -> &'static [NamespaceKind] {
        match self {
            JoinScope::Network => &[NamespaceKind::Net],
            JoinScope::Filesystem => &[NamespaceKind::Mnt],
            JoinScope::Full => &[
                NamespaceKind::Ipc,
                NamespaceKind::Net,
                NamespaceKind::Pid,
                NamespaceKind::Uts,
                NamespaceKind::Mnt,
            ],
        }
    }

    /// The joined process sees the target's root filesystem
    pub fn enters_root(self) -> bool {
        !matches!(self, JoinScope::Network)
    }
}

/// Enter one namespace of `pid`
pub fn join_namespace(proc_root: &Path, pid: u32, kind: NamespaceKind) -> Result<()> {
    let path = proc_root
        .join(pid.to_string())
        .join("ns")
        .join(kind.proc_name());
    let file = File::open(&path).map_err(|e| {
        JailError::Namespace(format!("cannot open {}: {}", path.display(), e))
    })?;
    setns(&file, kind.clone_flag()).map_err(|e| {
        JailError::Namespace(format!("cannot join {} namespace of {}: {}", kind, pid, e))
    })?;
    log::debug!("Joined {} namespace of {}", kind, pid);
    Ok(())
}

/// Enter every namespace in `scope`; the first failure aborts
pub fn join_scope(proc_root: &Path, pid: u32, scope: JoinScope) -> Result<()> {
    for kind in scope.namespaces() {
        join_namespace(proc_root, pid, *kind)?;
    }
    log::info!("Joined {:?} namespaces of process {}", scope, pid);
    Ok(())
}

/// Give the calling process its own mount namespace
pub fn unshare_mount_namespace() -> Result<()> {
    unshare(CloneFlags::CLONE_NEWNS).map_err(|e| {
        JailError::Namespace(format!("Failed to unshare mount namespace: {}", e))
    })?;
    log::debug!("Created private mount namespace");
    Ok(())
}

/// mount(NULL, "/", NULL, MS_REC | MS_PRIVATE, NULL)
/// Must succeed before any sandbox mount, or changes leak to the host
pub fn harden_mount_propagation() -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| {
        JailError::Namespace(format!(
            "Failed to make / private (MS_PRIVATE|MS_REC): {}",
            e
        ))
    })?;

    log::info!("Mount propagation hardened: / set to MS_PRIVATE|MS_REC");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_scope_enters_in_fixed_order() {
        let names: Vec<&str> = JoinScope::Full
            .namespaces()
            .iter()
            .map(|k| k.proc_name())
            .collect();
        assert_eq!(names, ["ipc", "net", "pid", "uts", "mnt"]);
        assert_eq!(JoinScope::default(), JoinScope::Full);
    }

    #[test]
    fn network_scope_keeps_host_root() {
        assert_eq!(JoinScope::Network.namespaces(), &[NamespaceKind::Net]);
        assert!(!JoinScope::Network.enters_root());
        assert!(JoinScope::Filesystem.enters_root());
    }

    #[test]
    fn missing_target_is_a_namespace_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = join_namespace(dir.path(), 4242, NamespaceKind::Net).unwrap_err();
        assert!(matches!(err, JailError::Namespace(_)));
        assert!(err.to_string().contains("4242"));
    }
}
