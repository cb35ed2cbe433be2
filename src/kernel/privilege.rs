//! Effective-uid bracket for privileged syscalls.
//!
//! The binary runs with a root effective uid only while an [`Elevated`]
//! guard is alive. Dropping the guard restores the previous effective uid on
//! every exit path, including `?` propagation and panics.

use crate::config::types::{JailError, Result};
use nix::unistd::{geteuid, getuid, seteuid, Uid};
use std::marker::PhantomData;

/// Scoped elevation to effective uid 0.
///
/// Not `Send`: the bracket belongs to the thread that opened it and must
/// never cross a fork or exec boundary.
#[must_use = "privileges are restored as soon as the guard is dropped"]
pub struct Elevated {
    restore_to: Uid,
    _not_send: PhantomData<*const ()>,
}

impl Elevated {
    /// Raise the effective uid to 0.
    pub fn acquire() -> Result<Self> {
        let restore_to = geteuid();
        if !restore_to.is_root() {
            seteuid(Uid::from_raw(0)).map_err(|e| {
                JailError::Privilege(format!("cannot raise effective uid to root: {}", e))
            })?;
            log::trace!("effective uid raised from {} to 0", restore_to);
        }
        Ok(Self {
            restore_to,
            _not_send: PhantomData,
        })
    }

    /// Effective uid that will be restored on drop
    pub fn restores_to(&self) -> Uid {
        self.restore_to
    }
}

impl Drop for Elevated {
    fn drop(&mut self) {
        if geteuid() == self.restore_to {
            return;
        }
        if let Err(e) = seteuid(self.restore_to) {
            // Continuing with root euid would leave the bracket open.
            log::error!("cannot restore effective uid {}: {}", self.restore_to, e);
            std::process::abort();
        }
        log::trace!("effective uid restored to {}", self.restore_to);
    }
}

/// Run `f` with an effective uid of 0
pub fn with_elevated<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    let _guard = Elevated::acquire()?;
    f()
}

/// Drop the effective uid to the real uid, the state user-facing code runs in
pub fn assume_user() -> Result<()> {
    let real = getuid();
    if geteuid() != real {
        seteuid(real).map_err(|e| {
            JailError::Privilege(format!("cannot lower effective uid to {}: {}", real, e))
        })?;
    }
    Ok(())
}
