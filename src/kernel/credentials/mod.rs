//! UID/GID transitions for privilege dropping.
//!
//! CRITICAL: setresgid MUST be called BEFORE setresuid.

mod transition;
mod validation;

pub use transition::{drop_privileges, GroupPolicy};
pub use validation::ensure_not_widening;
