//! Filesystem isolation and mount management
//!
//! Layered bottom-up: the syscall backend, the staging bootstrap, the mount
//! transforms, path resolution and globbing, and the policy engine that
//! drives them. Overlay and chroot composition sit on top.

pub mod backend;
pub mod blacklist;
pub mod bootstrap;
pub mod chroot;
pub mod fslog;
pub mod globbing;
pub mod hardening;
pub mod mountinfo;
pub mod overlay;
pub mod primitives;
pub mod resolver;

// Re-export commonly used items
pub use backend::{KernelMounts, MountBackend};
pub use blacklist::{BlacklistEngine, BlacklistPolicy, BlacklistReport};
pub use bootstrap::StagingBootstrap;
pub use fslog::{FsLogger, MountEventSink};
pub use primitives::{DenialOutcome, SkipReason};
pub use resolver::{Resolution, ResolvedTarget, TargetKind};
