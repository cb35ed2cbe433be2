//! Credential validation logic.

use crate::config::types::{JailError, Result};

/// A transition may only land on the caller's own real ids; root may pick any.
pub fn ensure_not_widening(real_uid: u32, real_gid: u32, uid: u32, gid: u32) -> Result<()> {
    if real_uid == 0 {
        return Ok(());
    }
    if uid != real_uid || gid != real_gid {
        return Err(JailError::Privilege(format!(
            "uid {} cannot switch to uid={}, gid={}",
            real_uid, uid, gid
        )));
    }
    Ok(())
}
