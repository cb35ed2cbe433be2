//! Configuration and policy
//!
//! Sandbox configuration, profile directives and the staging layout.

pub mod directive;
pub mod paths;
pub mod types;

pub use directive::{expand_macros, ProfileDirective};
pub use paths::StagingLayout;
