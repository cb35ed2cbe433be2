//! rustjail: filesystem sandboxing for Linux processes
//!
//! A sandbox is built in a private mount namespace from profile directives:
//! paths are denied, made read-only, read-write or non-executable, replaced
//! with a tmpfs or bind-mounted elsewhere. The root can be the host itself,
//! an overlay on top of it, or an existing chroot tree. Running sandboxes can
//! be joined later with the same restrictions.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::mount`]: mount backend, staging bootstrap, mount transforms,
//!   path resolution, the blacklist engine, overlay and chroot entry
//! - [`kernel::namespace`]: mount namespace creation and namespace entry
//! - [`kernel::capabilities`]: bounding-set filtering
//! - [`kernel::seccomp`]: pre-built seccomp filter loading
//! - [`kernel::credentials`]: dropping to the invoking user
//! - [`kernel::privilege`]: scoped effective-uid elevation
//! - [`kernel::procfs`]: process inspection
//! - [`kernel::signal`]: join parent signal handling
//!
//! ## Execution Control ([`exec`])
//! - [`exec::sandbox`]: type-state sandbox construction
//! - [`exec::join`]: joining a running sandbox
//! - [`exec::context`]: restrictions inherited by joiners
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: configuration and error types
//! - [`config::directive`]: profile directives and macros
//! - [`config::paths`]: staging tree layout

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Configuration
pub mod config;

// Testing Infrastructure
pub mod testing;

// CLI entrypoint wiring
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
