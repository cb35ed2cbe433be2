//! Async-safe signal handling for the join parent.
//!
//! The handler only records the signal; the wait loop observes it, flushes
//! output and exits.

use log::info;
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crate::config::types::{JailError, Result};

/// Termination requested (async-safe atomic)
static TERMINATE_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Signal received (async-safe atomic)
static SIGNAL_RECEIVED: AtomicI32 = AtomicI32::new(0);

/// How the supervised child ended, or why supervision stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildOutcome {
    Exited(i32),
    /// Child killed by this signal
    Signaled(i32),
    /// Parent received SIGTERM while waiting
    Terminated(i32),
}

impl ChildOutcome {
    /// Exit status the parent passes on
    pub fn exit_code(self) -> i32 {
        match self {
            ChildOutcome::Exited(code) => code,
            ChildOutcome::Signaled(sig) => 128 + sig,
            ChildOutcome::Terminated(sig) => sig,
        }
    }
}

/// SIGTERM handler installed by the join parent
pub struct TerminationHandler;

impl TerminationHandler {
    /// Install without SA_RESTART so a pending wait is interrupted
    pub fn install() -> Result<Self> {
        let action = SigAction::new(
            SigHandler::Handler(Self::signal_handler),
            SaFlags::empty(),
            SigSet::empty(),
        );

        // SAFETY: the handler only touches atomics.
        unsafe {
            signal::sigaction(Signal::SIGTERM, &action).map_err(|e| {
                JailError::Process(format!("Failed to install SIGTERM handler: {}", e))
            })?;
        }

        info!("SIGTERM handler installed");
        Ok(Self)
    }

    /// Only performs atomic operations: no allocations, no locks, no I/O
    extern "C" fn signal_handler(signal: libc::c_int) {
        SIGNAL_RECEIVED.store(signal, Ordering::SeqCst);
        TERMINATE_REQUESTED.store(true, Ordering::SeqCst);
    }

    pub fn terminate_requested(&self) -> bool {
        TERMINATE_REQUESTED.load(Ordering::SeqCst)
    }

    /// Signal that was received (0 if none)
    pub fn signal(&self) -> i32 {
        SIGNAL_RECEIVED.load(Ordering::SeqCst)
    }

    /// Wait for `child`, returning early when SIGTERM arrives
    pub fn wait(&self, child: Pid) -> Result<ChildOutcome> {
        loop {
            if self.terminate_requested() {
                return Ok(ChildOutcome::Terminated(self.signal()));
            }
            match waitpid(child, None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(ChildOutcome::Exited(code)),
                Ok(WaitStatus::Signaled(_, sig, _)) => {
                    return Ok(ChildOutcome::Signaled(sig as i32))
                }
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    return Err(JailError::Process(format!(
                        "waitpid({}) failed: {}",
                        child, e
                    )))
                }
            }
        }
    }
}

/// Flush buffered output before the parent exits
pub fn flush_output() {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    log::logger().flush();
}

/// Have the kernel send SIGKILL to the calling process when its parent dies
pub fn set_parent_death_signal() -> Result<()> {
    nix::sys::prctl::set_pdeathsig(Signal::SIGKILL).map_err(|e| {
        JailError::Process(format!("Failed to set parent death signal: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{fork, ForkResult};

    #[test]
    fn exit_codes_follow_child() {
        assert_eq!(ChildOutcome::Exited(3).exit_code(), 3);
        assert_eq!(ChildOutcome::Signaled(9).exit_code(), 137);
        assert_eq!(ChildOutcome::Terminated(15).exit_code(), 15);
    }

    // One test: the flags are process-wide.
    #[test]
    fn wait_reports_child_status_then_termination() {
        let handler = TerminationHandler::install().unwrap();
        // SAFETY: the child only calls _exit.
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => unsafe { libc::_exit(7) },
            ForkResult::Parent { child } => {
                assert_eq!(handler.wait(child).unwrap(), ChildOutcome::Exited(7));
            }
        }

        assert!(!handler.terminate_requested());
        // Simulate signal
        TerminationHandler::signal_handler(libc::SIGTERM);
        let outcome = handler.wait(Pid::from_raw(i32::MAX)).unwrap();
        assert_eq!(outcome, ChildOutcome::Terminated(libc::SIGTERM));

        TERMINATE_REQUESTED.store(false, Ordering::SeqCst);
        SIGNAL_RECEIVED.store(0, Ordering::SeqCst);
    }
}
