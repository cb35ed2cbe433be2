//! Capability bounding set management.
//!
//! A joined sandbox's bounding set is reproduced by dropping every
//! capability the target no longer has. Drops are idempotent and can only
//! narrow the set.

mod drop;
mod query;

pub use drop::{drop_bounding_except, set_no_new_privs};
pub use query::{bounding_set, parse_status_mask};

/// Capability number newtype for type safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CapabilityNumber(u32);

impl CapabilityNumber {
    pub const MAX_CAP: u32 = 63;

    pub fn new(cap: u32) -> Option<Self> {
        if cap <= Self::MAX_CAP {
            Some(Self(cap))
        } else {
            None
        }
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

/// 64-bit capability mask as printed in `/proc/<pid>/status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilityMask(pub u64);

impl CapabilityMask {
    pub const FULL: CapabilityMask = CapabilityMask(u64::MAX);

    pub fn contains(self, cap: CapabilityNumber) -> bool {
        self.0 & (1u64 << cap.value()) != 0
    }

    /// Capabilities outside the mask, ascending
    pub fn missing(self) -> impl Iterator<Item = CapabilityNumber> {
        (0..=CapabilityNumber::MAX_CAP)
            .filter_map(CapabilityNumber::new)
            .filter(move |c| !self.contains(*c))
    }
}

pub(crate) const PR_CAPBSET_DROP: libc::c_int = 24;
pub(crate) const PR_SET_NO_NEW_PRIVS: libc::c_int = 38;
