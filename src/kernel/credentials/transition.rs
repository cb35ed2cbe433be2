//! Drop to the invoking user's real credentials.
//!
//! CRITICAL: setresgid MUST be called BEFORE setresuid; once the uid is gone
//! the gid can no longer be changed.

use super::validation::ensure_not_widening;
use crate::config::types::{JailError, Result};
use nix::unistd::{getegid, geteuid, getgid, getuid, setgroups};

/// What happens to supplementary groups on the way down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupPolicy {
    /// Keep the groups inherited from the invoking user
    Keep,
    /// Run with no supplementary groups
    Clear,
}

impl GroupPolicy {
    pub fn from_nogroups(nogroups: bool) -> Self {
        if nogroups {
            GroupPolicy::Clear
        } else {
            GroupPolicy::Keep
        }
    }
}

/// validate -> groups -> setresgid -> setresuid -> verify.
///
/// A root group always loses its supplementary groups.
pub fn drop_privileges(uid: u32, gid: u32, groups: GroupPolicy) -> Result<()> {
    ensure_not_widening(getuid().as_raw(), getgid().as_raw(), uid, gid)?;

    if gid == 0 || groups == GroupPolicy::Clear {
        setgroups(&[]).map_err(|e| {
            JailError::Privilege(format!("Failed to clear supplementary groups: {}", e))
        })?;
        log::debug!("Cleared supplementary groups");
    }

    // SAFETY: setresgid atomically sets all three GIDs; called before setresuid.
    if unsafe { libc::setresgid(gid, gid, gid) } != 0 {
        let err = std::io::Error::last_os_error();
        return Err(JailError::Privilege(format!(
            "Failed to setresgid({}): {}",
            gid, err
        )));
    }
    // SAFETY: setresuid atomically sets all three UIDs.
    if unsafe { libc::setresuid(uid, uid, uid) } != 0 {
        let err = std::io::Error::last_os_error();
        return Err(JailError::Privilege(format!(
            "Failed to setresuid({}): {}",
            uid, err
        )));
    }

    verify_transition(uid, gid)?;
    log::debug!("Running as UID={}, GID={}", uid, gid);
    Ok(())
}

fn verify_transition(expected_uid: u32, expected_gid: u32) -> Result<()> {
    let (real_uid, effective_uid) = (getuid().as_raw(), geteuid().as_raw());
    if real_uid != expected_uid || effective_uid != expected_uid {
        return Err(JailError::Privilege(format!(
            "UID verification failed: expected {}, got real={}, effective={}",
            expected_uid, real_uid, effective_uid
        )));
    }

    let (real_gid, effective_gid) = (getgid().as_raw(), getegid().as_raw());
    if real_gid != expected_gid || effective_gid != expected_gid {
        return Err(JailError::Privilege(format!(
            "GID verification failed: expected {}, got real={}, effective={}",
            expected_gid, real_gid, effective_gid
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nogroups_flag_maps_to_policy() {
        assert_eq!(GroupPolicy::from_nogroups(true), GroupPolicy::Clear);
        assert_eq!(GroupPolicy::from_nogroups(false), GroupPolicy::Keep);
    }

    #[test]
    fn switching_to_someone_else_is_rejected_before_any_syscall() {
        let uid = getuid().as_raw();
        if uid == 0 {
            return;
        }
        let err = drop_privileges(uid + 1, getgid().as_raw(), GroupPolicy::Keep).unwrap_err();
        assert!(matches!(err, JailError::Privilege(_)));
        assert_eq!(getuid().as_raw(), uid);
    }

    #[test]
    fn verify_matches_current_ids() {
        if geteuid() != getuid() || getegid() != getgid() {
            return;
        }
        assert!(verify_transition(getuid().as_raw(), getgid().as_raw()).is_ok());
        assert!(verify_transition(getuid().as_raw().wrapping_add(1), getgid().as_raw()).is_err());
    }
}
