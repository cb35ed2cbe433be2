/// Core types and structures for the rustjail system
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::paths::StagingLayout;

/// Overlay root request
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverlayRequest {
    /// Persistent base for diff/work directories (`--overlay-named`)
    pub keep_dir: Option<PathBuf>,
    /// Allow an existing persistent base to be reused
    #[serde(default)]
    pub reuse: bool,
}

impl OverlayRequest {
    pub fn is_keep(&self) -> bool {
        self.keep_dir.is_some()
    }
}

/// Sandbox build and join configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Real uid of the invoking user
    pub uid: u32,
    /// Real gid of the invoking user
    pub gid: u32,
    /// Home directory of the invoking user
    pub homedir: PathBuf,
    /// Login name, informational only
    #[serde(default)]
    pub username: Option<String>,
    /// Staging tree layout
    #[serde(default)]
    pub staging: StagingLayout,
    /// Propagate the X11 socket directory
    #[serde(default)]
    pub x11: bool,
    /// Chroot desktop mode: populate /dev, /run, X11 and resolv.conf
    #[serde(default = "default_true")]
    pub chroot_desktop: bool,
    /// Private /dev requested, leave /dev/shm alone
    #[serde(default)]
    pub private_dev: bool,
    #[serde(default)]
    pub writable_etc: bool,
    #[serde(default)]
    pub writable_var: bool,
    /// Keep kernel symbol information visible
    #[serde(default)]
    pub allow_debuggers: bool,
    /// Overlay root, None disables the overlay
    #[serde(default)]
    pub overlay: Option<OverlayRequest>,
    /// Existing root directory to chroot into
    #[serde(default)]
    pub chroot: Option<PathBuf>,
    /// Shell used to run commands
    #[serde(default)]
    pub shell: Option<PathBuf>,
    /// Working directory for the command
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub nice: Option<i32>,
    /// Pre-built protocol filter loaded after the default one
    #[serde(default)]
    pub protocol_filter: Option<PathBuf>,
    /// Value exported as `container=` inside the sandbox
    #[serde(default = "default_label")]
    pub sandbox_label: String,
}

fn default_true() -> bool {
    true
}

fn default_label() -> String {
    "rustjail".to_string()
}

impl SandboxConfig {
    /// Configuration for the calling user, everything else default
    pub fn for_user(uid: u32, gid: u32, homedir: impl Into<PathBuf>) -> Self {
        Self {
            uid,
            gid,
            homedir: homedir.into(),
            username: None,
            staging: StagingLayout::default(),
            x11: false,
            chroot_desktop: true,
            private_dev: false,
            writable_etc: false,
            writable_var: false,
            allow_debuggers: false,
            overlay: None,
            chroot: None,
            shell: None,
            cwd: None,
            nice: None,
            protocol_filter: None,
            sandbox_label: default_label(),
        }
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            JailError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            JailError::Config(format!("Invalid config {}: {}", path.display(), e))
        })
    }

    pub fn is_root(&self) -> bool {
        self.uid == 0
    }
}

/// Custom error types for rustjail
#[derive(Error, Debug)]
pub enum JailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Mount error: {op} {}: {source}", .path.display())]
    Mount {
        op: &'static str,
        path: PathBuf,
        source: Errno,
    },

    #[error("Namespace error: {0}")]
    Namespace(String),

    #[error("Privilege error: {0}")]
    Privilege(String),

    #[error("Kernel error: {0}")]
    Kernel(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Filter error: {0}")]
    Filter(String),
}

impl JailError {
    pub(crate) fn mount(op: &'static str, path: &Path, source: Errno) -> Self {
        JailError::Mount {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<Errno> for JailError {
    fn from(err: Errno) -> Self {
        JailError::Process(err.to_string())
    }
}

/// Result type alias for rustjail operations
pub type Result<T> = std::result::Result<T, JailError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_error_names_operation_and_path() {
        let err = JailError::mount("read-only", Path::new("/etc"), Errno::EPERM);
        let text = err.to_string();
        assert!(text.contains("read-only"));
        assert!(text.contains("/etc"));
    }

    #[test]
    fn errno_converts_to_process_error() {
        let err = JailError::from(Errno::ENOENT);
        assert!(matches!(err, JailError::Process(_)));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let json = r#"{"uid": 1000, "gid": 1000, "homedir": "/home/user"}"#;
        let cfg: SandboxConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.uid, 1000);
        assert!(cfg.chroot_desktop);
        assert!(cfg.overlay.is_none());
        assert_eq!(cfg.sandbox_label, "rustjail");
        assert_eq!(cfg.staging, StagingLayout::default());
    }

    #[test]
    fn overlay_keep_request() {
        let req = OverlayRequest {
            keep_dir: Some(PathBuf::from("/home/user/.rustjail/dev")),
            reuse: true,
        };
        assert!(req.is_keep());
        assert!(!OverlayRequest::default().is_keep());
    }
}
