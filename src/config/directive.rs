//! Profile directives consumed by the blacklist engine.
//!
//! Lines are parsed once into a closed variant type; the engine matches on
//! it exhaustively.

use super::paths::SEARCH_PATH_DIRS;
use super::types::{JailError, Result};
use std::fmt;
use std::path::Path;

const HOME_MACRO: &str = "${HOME}";
const PATH_MACRO: &str = "${PATH}";

/// Line prefixes handled by other stages of the sandbox build
const FOREIGN_PREFIXES: [&str; 5] = [
    "whitelist ",
    "args-path ",
    "args-whitelist ",
    "args-read-only ",
    "args-noexec ",
];

/// One profile directive, in source order
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProfileDirective {
    Blacklist(String),
    BlacklistNoLog(String),
    ReadOnly(String),
    ReadWrite(String),
    NoExec(String),
    Tmpfs(String),
    Bind { source: String, destination: String },
    NoBlacklist(String),
}

impl ProfileDirective {
    /// Parse one already-split profile line.
    ///
    /// Returns `Ok(None)` for lines another stage owns (`whitelist`,
    /// `args-*`) and for empty lines.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || FOREIGN_PREFIXES.iter().any(|p| line.starts_with(p)) {
            return Ok(None);
        }

        let (keyword, arg) = match line.split_once(char::is_whitespace) {
            Some((k, a)) => (k, a.trim()),
            None => {
                return Err(JailError::Config(format!("invalid profile line {}", line)));
            }
        };
        if arg.is_empty() {
            return Err(JailError::Config(format!("invalid profile line {}", line)));
        }

        let directive = match keyword {
            "blacklist" => Self::Blacklist(arg.to_string()),
            "blacklist-nolog" => Self::BlacklistNoLog(arg.to_string()),
            "noblacklist" => Self::NoBlacklist(arg.to_string()),
            "read-only" => Self::ReadOnly(arg.to_string()),
            "read-write" => Self::ReadWrite(arg.to_string()),
            "noexec" => Self::NoExec(arg.to_string()),
            "tmpfs" => Self::Tmpfs(arg.to_string()),
            "bind" => {
                let (source, destination) = arg.split_once(',').ok_or_else(|| {
                    JailError::Config(format!("second directory missing in bind command: {}", line))
                })?;
                let (source, destination) = (source.trim(), destination.trim());
                if source.is_empty() || destination.is_empty() {
                    return Err(JailError::Config(format!(
                        "empty directory in bind command: {}",
                        line
                    )));
                }
                Self::Bind {
                    source: source.to_string(),
                    destination: destination.to_string(),
                }
            }
            _ => {
                return Err(JailError::Config(format!("invalid profile line {}", line)));
            }
        };
        Ok(Some(directive))
    }

    /// Parse a whole ordered sequence, skipping foreign lines
    pub fn parse_all<'a, I>(lines: I) -> Result<Vec<Self>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out = Vec::new();
        for line in lines {
            if let Some(d) = Self::parse(line)? {
                out.push(d);
            }
        }
        Ok(out)
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Blacklist(_) => "blacklist",
            Self::BlacklistNoLog(_) => "blacklist-nolog",
            Self::ReadOnly(_) => "read-only",
            Self::ReadWrite(_) => "read-write",
            Self::NoExec(_) => "noexec",
            Self::Tmpfs(_) => "tmpfs",
            Self::Bind { .. } => "bind",
            Self::NoBlacklist(_) => "noblacklist",
        }
    }
}

impl fmt::Display for ProfileDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind {
                source,
                destination,
            } => write!(f, "bind {},{}", source, destination),
            Self::Blacklist(p)
            | Self::BlacklistNoLog(p)
            | Self::ReadOnly(p)
            | Self::ReadWrite(p)
            | Self::NoExec(p)
            | Self::Tmpfs(p)
            | Self::NoBlacklist(p) => write!(f, "{} {}", self.keyword(), p),
        }
    }
}

/// Expand `${HOME}`, `~/` and `${PATH}` prefixes.
///
/// `${PATH}` yields one entry per search directory; anything else yields
/// exactly one entry.
pub fn expand_macros(pattern: &str, homedir: &Path) -> Vec<String> {
    if let Some(rest) = pattern.strip_prefix(PATH_MACRO) {
        return SEARCH_PATH_DIRS
            .iter()
            .map(|dir| format!("{}{}", dir, rest))
            .collect();
    }
    vec![expand_home(pattern, homedir)]
}

fn expand_home(pattern: &str, homedir: &Path) -> String {
    let home = homedir.to_string_lossy();
    if let Some(rest) = pattern.strip_prefix(HOME_MACRO) {
        format!("{}{}", home, rest)
    } else if let Some(rest) = pattern.strip_prefix("~/") {
        format!("{}/{}", home, rest)
    } else {
        pattern.to_string()
    }
}
