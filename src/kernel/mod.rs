//! Thin wrappers around Linux kernel primitives.
//!
//! All `unsafe` code is concentrated here with explicit SAFETY comments.
//! Dependency direction: privilege -> mount -> namespace -> capabilities -> seccomp -> credentials

pub mod affinity;
pub mod capabilities;
pub mod cgroup;
pub mod credentials;
pub mod mount;
pub mod namespace;
pub mod privilege;
pub mod procfs;
pub mod seccomp;
pub mod signal;
