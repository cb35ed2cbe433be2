//! Final steps before the sandboxed command replaces the current process.

use crate::config::types::{JailError, Result};
use nix::errno::Errno;
use nix::unistd::execv;
use std::convert::Infallible;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// POSIX shells tried in order when none is configured
pub const SHELL_CANDIDATES: [&str; 5] = ["/bin/bash", "/bin/csh", "/usr/bin/zsh", "/bin/sh", "/bin/ash"];

/// Interpreter for `-c` when no candidate is installed
const DEFAULT_SHELL: &str = "/bin/sh";

/// First candidate shell present under `root`
pub fn guess_shell_in(root: &Path) -> Option<PathBuf> {
    SHELL_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|shell| crate::config::paths::StagingLayout::under_root(root, shell).exists())
}

pub fn guess_shell() -> Option<PathBuf> {
    guess_shell_in(Path::new("/"))
}

/// Configured shell, or a guessed one; it must exist in the current root
pub fn resolve_shell(configured: Option<&Path>) -> Result<PathBuf> {
    let shell = match configured {
        Some(shell) => shell.to_path_buf(),
        None => guess_shell().ok_or_else(|| {
            JailError::Config(
                "no POSIX shell found, please use the --shell option".to_string(),
            )
        })?,
    };
    if !shell.exists() {
        return Err(JailError::Config(format!(
            "{} shell not found inside the sandbox",
            shell.display()
        )));
    }
    Ok(shell)
}

/// argv for running `command` through `shell -c`. An empty command starts
/// the shell itself.
pub fn shell_argv(shell: &Path, command: &[String]) -> Result<Vec<CString>> {
    let nul = |_| JailError::Config("command contains NUL byte".to_string());
    let mut argv = vec![CString::new(shell.as_os_str().as_bytes()).map_err(nul)?];
    if !command.is_empty() {
        argv.push(CString::new("-c").map_err(nul)?);
        argv.push(CString::new(command.join(" ")).map_err(nul)?);
    }
    Ok(argv)
}

/// argv for the sandboxed payload.
///
/// With no command the shell itself is started and must exist. A command
/// runs through the configured or guessed shell without that check; the
/// exec reports a missing interpreter.
pub fn command_argv(configured: Option<&Path>, command: &[String]) -> Result<Vec<CString>> {
    if command.is_empty() {
        let shell = resolve_shell(configured)?;
        return shell_argv(&shell, command);
    }
    let shell = configured
        .map(Path::to_path_buf)
        .or_else(guess_shell)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SHELL));
    shell_argv(&shell, command)
}

/// Move to `cwd` if given and reachable, else to the home directory if it
/// exists, else to `/`
pub fn enter_working_dir(cwd: Option<&Path>, homedir: &Path) -> Result<()> {
    if let Some(cwd) = cwd {
        match std::env::set_current_dir(cwd) {
            Ok(()) => return Ok(()),
            Err(e) => log::debug!("cannot change to {}: {}", cwd.display(), e),
        }
    }
    std::env::set_current_dir("/")?;
    if homedir.is_dir() {
        std::env::set_current_dir(homedir)?;
    }
    Ok(())
}

/// Adjust the scheduling priority; failure is only a warning
pub fn apply_nice(increment: i32) {
    Errno::clear();
    // SAFETY: nice(2) has no memory-safety preconditions.
    let rv = unsafe { libc::nice(increment) };
    if rv == -1 && Errno::last() != Errno::UnknownErrno {
        log::warn!("cannot set nice value {}: {}", increment, Errno::last());
    }
}

/// Replace the current process. Only returns on failure.
pub fn exec_argv(argv: &[CString]) -> Result<Infallible> {
    let program = argv
        .first()
        .ok_or_else(|| JailError::Config("Empty command for exec".to_string()))?;
    log::info!("Executing {:?}", argv);
    execv(program.as_c_str(), argv)
        .map_err(|e| JailError::Process(format!("execv {:?} failed: {}", program, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn guesses_first_available_shell() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(guess_shell_in(root.path()), None);

        fs::create_dir_all(root.path().join("bin")).unwrap();
        fs::write(root.path().join("bin/sh"), b"").unwrap();
        assert_eq!(guess_shell_in(root.path()), Some(PathBuf::from("/bin/sh")));

        fs::write(root.path().join("bin/bash"), b"").unwrap();
        assert_eq!(guess_shell_in(root.path()), Some(PathBuf::from("/bin/bash")));
    }

    #[test]
    fn command_runs_through_shell() {
        let argv = shell_argv(
            Path::new("/bin/sh"),
            &["ls".to_string(), "-la".to_string()],
        )
        .unwrap();
        let text: Vec<&str> = argv.iter().map(|c| c.to_str().unwrap()).collect();
        assert_eq!(text, ["/bin/sh", "-c", "ls -la"]);

        let interactive = shell_argv(Path::new("/bin/sh"), &[]).unwrap();
        assert_eq!(interactive.len(), 1);
    }

    #[test]
    fn nul_in_command_is_rejected() {
        assert!(shell_argv(Path::new("/bin/sh"), &["a\0b".to_string()]).is_err());
    }

    #[test]
    fn missing_configured_shell_is_an_error() {
        let err = resolve_shell(Some(Path::new("/nonexistent/shell"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/shell"));
    }

    #[test]
    fn command_does_not_require_an_existing_shell() {
        let shell = Path::new("/nonexistent/shell");
        let argv = command_argv(Some(shell), &["true".to_string()]).unwrap();
        let text: Vec<&str> = argv.iter().map(|c| c.to_str().unwrap()).collect();
        assert_eq!(text, ["/nonexistent/shell", "-c", "true"]);

        assert!(command_argv(Some(shell), &[]).is_err());
    }

    #[test]
    fn exec_requires_a_program() {
        assert!(exec_argv(&[]).is_err());
    }
}
