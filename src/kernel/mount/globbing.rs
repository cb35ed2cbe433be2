//! Glob expansion of directive targets and `noblacklist` exceptions.

use crate::config::types::{JailError, Result};
use glob::{MatchOptions, Pattern};
use std::borrow::Cow;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Wildcards match dotfiles but never cross a path separator
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Patterns accumulated from `noblacklist` directives, in order.
///
/// Once added a pattern stays for the rest of the run. It is consulted only
/// by denials decided after it was added.
#[derive(Debug, Default, Clone)]
pub struct ExceptionList {
    patterns: Vec<Pattern>,
}

impl ExceptionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an already macro-expanded pattern
    pub fn push(&mut self, pattern: &str) -> Result<()> {
        let compiled = Pattern::new(&collapse_stars(pattern)).map_err(|e| {
            JailError::Config(format!("invalid noblacklist pattern {}: {}", pattern, e))
        })?;
        self.patterns.push(compiled);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Pattern::as_str)
    }

    /// First exception that covers `path`
    pub fn matching(&self, path: &Path) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| p.matches_path_with(path, MATCH_OPTIONS))
            .map(Pattern::as_str)
    }

    pub fn covers(&self, path: &Path) -> bool {
        self.matching(path).is_some()
    }
}

/// Candidates produced by one pattern, split by the exception list
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GlobExpansion {
    /// Paths to hand to the mount dispatch, in expansion order
    pub allowed: Vec<PathBuf>,
    /// Paths suppressed by an exception
    pub excepted: Vec<PathBuf>,
}

/// Expand `pattern` against the filesystem.
///
/// No match is not an error: the pattern itself is returned so the caller
/// can resolve it (and find it absent). Expansions whose basename is `.` or
/// `..` are dropped so `/home/user/.*` never reaches `/home`.
pub fn expand(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob::glob_with(&collapse_stars(pattern), MATCH_OPTIONS)
        .map_err(|e| JailError::Config(format!("failed to glob pattern {}: {}", pattern, e)))?;

    let mut out = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) => {
                if !is_dot_entry(&path) {
                    out.push(path);
                }
            }
            Err(e) => log::debug!("skipping unreadable glob entry: {}", e),
        }
    }

    if out.is_empty() && !is_dot_entry(Path::new(pattern)) {
        out.push(PathBuf::from(pattern));
    }
    Ok(out)
}

/// Expand `pattern` and filter the result through `exceptions`
pub fn expand_filtered(pattern: &str, exceptions: &ExceptionList) -> Result<GlobExpansion> {
    let mut expansion = GlobExpansion::default();
    for path in expand(pattern)? {
        match exceptions.matching(&path) {
            Some(p) => {
                log::debug!("Not blacklist {} (noblacklist {})", path.display(), p);
                expansion.excepted.push(path);
            }
            None => expansion.allowed.push(path),
        }
    }
    Ok(expansion)
}

/// `*` never crosses a separator, and neither does a run of them: `**`
/// must not turn into a recursive match.
fn collapse_stars(pattern: &str) -> Cow<'_, str> {
    if !pattern.contains("**") {
        return Cow::Borrowed(pattern);
    }
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if c == '*' && out.ends_with('*') {
            continue;
        }
        out.push(c);
    }
    Cow::Owned(out)
}

fn is_dot_entry(path: &Path) -> bool {
    let raw = path.as_os_str().as_bytes();
    raw.ends_with(b"/.") || raw.ends_with(b"/..") || raw == b"." || raw == b".."
}
