//! Entering a running sandbox.
//!
//! The parent resolves and authorizes the target, reads its restrictions,
//! attaches to its cgroup and enters its namespaces, then forks. The child
//! takes over the sandbox root and restrictions and execs the command; the
//! parent waits and passes the child's status on.

use super::context::{Caller, FilterSources, JoinedProcessContext};
use super::launch;
use crate::config::types::{JailError, Result, SandboxConfig};
use crate::kernel::namespace::{join_scope, JoinScope};
use crate::kernel::privilege::{assume_user, with_elevated, Elevated};
use crate::kernel::procfs;
use crate::kernel::signal::{flush_output, set_parent_death_signal, TerminationHandler};
use nix::unistd::{chroot, fork, ForkResult};
use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;

/// Name under which the sandbox supervisor shows up in `/proc/<pid>/comm`
pub const SUPERVISOR_COMM: &str = "rustjail";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinTarget {
    Pid(u32),
    Name(String),
}

impl JoinTarget {
    /// Numeric arguments are pids, anything else a sandbox name
    pub fn parse(arg: &str) -> Self {
        match arg.parse::<u32>() {
            Ok(pid) => JoinTarget::Pid(pid),
            Err(_) => JoinTarget::Name(arg.to_string()),
        }
    }
}

impl fmt::Display for JoinTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinTarget::Pid(pid) => write!(f, "{}", pid),
            JoinTarget::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub target: JoinTarget,
    pub scope: JoinScope,
    pub command: Vec<String>,
}

pub struct JoinProtocol<'a> {
    config: &'a SandboxConfig,
    proc_root: PathBuf,
}

impl<'a> JoinProtocol<'a> {
    pub fn new(config: &'a SandboxConfig) -> Self {
        Self::with_proc_root(config, procfs::PROC_ROOT)
    }

    pub fn with_proc_root(config: &'a SandboxConfig, proc_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            proc_root: proc_root.into(),
        }
    }

    fn caller(&self) -> Caller {
        Caller {
            uid: self.config.uid,
            gid: self.config.gid,
        }
    }

    /// Pid to join: names are looked up, and a supervisor is replaced by
    /// its first child
    pub fn resolve_target(&self, target: &JoinTarget) -> Result<u32> {
        let pid = match target {
            JoinTarget::Pid(pid) => *pid,
            JoinTarget::Name(name) => procfs::pid_by_name(&self.config.staging, name)?,
        };
        if procfs::comm(&self.proc_root, pid).as_deref() != Some(SUPERVISOR_COMM) {
            return Ok(pid);
        }
        match procfs::find_child(&self.proc_root, pid) {
            Some(child) => {
                log::info!(
                    "Switching to pid {}, the first child process inside the sandbox",
                    child
                );
                Ok(child)
            }
            None => Ok(pid),
        }
    }

    /// Non-root callers may only join their own sandboxes
    pub fn authorize(&self, pid: u32) -> Result<()> {
        if self.caller().is_root() {
            return Ok(());
        }
        let owner = procfs::uid_of(&self.proc_root, pid)?;
        if owner != self.config.uid {
            return Err(JailError::Permission(
                "cannot join a sandbox created by a different user".to_string(),
            ));
        }
        Ok(())
    }

    /// Restrictions to reproduce. Root joiners inherit none.
    pub fn extract_context(&self, pid: u32) -> Result<JoinedProcessContext> {
        if self.caller().is_root() {
            return Ok(JoinedProcessContext::default());
        }
        JoinedProcessContext::extract(&self.proc_root, pid, &self.config.staging)
    }

    /// Run the whole protocol. Returns the exit status for the parent.
    pub fn run(&self, request: &JoinRequest) -> Result<i32> {
        let pid = self.resolve_target(&request.target)?;
        self.authorize(pid)?;

        let context = with_elevated(|| {
            let context = self.extract_context(pid)?;
            if let Some(cgroup) = &context.cgroup {
                cgroup.add_current_process()?;
            }
            join_scope(&self.proc_root, pid, request.scope)?;
            Ok(context)
        })?;

        // SAFETY: single-threaded at this point; the child only runs the
        // restriction sequence and execs.
        match unsafe { fork() }? {
            ForkResult::Child => {
                let err = match self.child(pid, request, context) {
                    Ok(never) => match never {},
                    Err(e) => e,
                };
                log::error!("cannot join sandbox {}: {}", pid, err);
                flush_output();
                std::process::exit(1);
            }
            ForkResult::Parent { child } => {
                let handler = TerminationHandler::install()?;
                let outcome = handler.wait(child)?;
                flush_output();
                log::debug!("joined process {} finished: {:?}", child, outcome);
                Ok(outcome.exit_code())
            }
        }
    }

    fn child(
        &self,
        pid: u32,
        request: &JoinRequest,
        context: JoinedProcessContext,
    ) -> Result<Infallible> {
        let guard = Elevated::acquire()?;

        if request.scope.enters_root() {
            let root = procfs::root_of(&self.proc_root, pid);
            if let Err(e) = chroot(&root) {
                log::debug!("cannot chroot into {}: {}", root.display(), e);
            }
        }
        set_parent_death_signal()?;
        launch::enter_working_dir(None, &self.config.homedir)?;

        let filters = FilterSources::staged(
            &self.config.staging,
            self.config.protocol_filter.clone(),
        );
        context
            .restriction_plan(self.caller(), &filters)
            .apply(&self.config.sandbox_label)?;
        drop(guard);
        assume_user()?;

        if let Some(nice) = self.config.nice {
            launch::apply_nice(nice);
        }
        let argv = launch::command_argv(self.config.shell.as_deref(), &request.command)?;
        launch::enter_working_dir(self.config.cwd.as_deref(), &self.config.homedir)?;
        launch::exec_argv(&argv)
    }
}

/// Target of a join given on the command line
pub fn target_from_arg(arg: &str) -> Result<JoinTarget> {
    if arg.is_empty() {
        return Err(JailError::Config("invalid sandbox name".to_string()));
    }
    Ok(JoinTarget::parse(arg))
}
