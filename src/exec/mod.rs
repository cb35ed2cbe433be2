//! Execution control
//!
//! Builds sandboxes, joins running ones and hands over to the command.

pub mod context;
pub mod join;
pub mod launch;
pub mod sandbox;

pub use context::{JoinedProcessContext, RestrictionPlan, RestrictionStep};
pub use join::{JoinProtocol, JoinRequest, JoinTarget};
pub use sandbox::{run_sandbox, RunRequest, Sandbox};
