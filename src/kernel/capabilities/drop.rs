//! All operations are idempotent and only ever narrow privileges.
use super::{CapabilityMask, PR_CAPBSET_DROP, PR_SET_NO_NEW_PRIVS};
use crate::config::types::{JailError, Result};

/// Drop every bounding capability not in `keep`. Returns how many drops the
/// kernel accepted; capabilities it does not know about are ignored.
pub fn drop_bounding_except(keep: CapabilityMask) -> Result<usize> {
    let mut dropped = 0;
    for cap in keep.missing() {
        // SAFETY: prctl(PR_CAPBSET_DROP) with any cap number is safe; unknown caps yield EINVAL.
        let rc = unsafe { libc::prctl(PR_CAPBSET_DROP, cap.value() as libc::c_ulong, 0, 0, 0) };
        if rc == 0 {
            dropped += 1;
            continue;
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINVAL) => {}
            _ => {
                return Err(JailError::Privilege(format!(
                    "cannot drop capability {}: {}",
                    cap.value(),
                    err
                )))
            }
        }
    }
    log::debug!("capability filter {:#018x}, {} dropped", keep.0, dropped);
    Ok(dropped)
}

/// Prevent privilege escalation via execve (setuid, file capabilities).
/// Idempotent and irreversible once set.
pub fn set_no_new_privs() -> Result<()> {
    // SAFETY: prctl(PR_SET_NO_NEW_PRIVS, 1) is safe and idempotent.
    let result = unsafe { libc::prctl(PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if result != 0 {
        return Err(JailError::Privilege(
            "Failed to set PR_SET_NO_NEW_PRIVS".to_string(),
        ));
    }
    log::debug!("Set PR_SET_NO_NEW_PRIVS");
    Ok(())
}
