//! Profile directive interpreter.
//!
//! One pass over the directives in source order, no backtracking. Every
//! denial attempt produces a [`DenialOutcome`] that is collected into a
//! [`BlacklistReport`] instead of being stashed in shared state.

use super::backend::MountBackend;
use super::bootstrap::StagingBootstrap;
use super::fslog::MountEventSink;
use super::globbing::{self, ExceptionList};
use super::primitives::{self, DenialOutcome, SkipReason};
use super::resolver::{self, Resolution, ResolvedTarget};
use crate::config::directive::{expand_macros, ProfileDirective};
use crate::config::paths::StagingLayout;
use crate::config::types::Result;
use nix::mount::MsFlags;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Denial exemptions
///
/// By default a directory named `/bin` or `/usr/bin` reached through a
/// symlink is not denied, because merged-usr distributions alias one into
/// the other and denying the link would take the real directory with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlacklistPolicy {
    pub exempt_links: Vec<PathBuf>,
    /// Deny everything, ignoring `exempt_links`
    pub strict: bool,
}

impl Default for BlacklistPolicy {
    fn default() -> Self {
        Self {
            exempt_links: vec![PathBuf::from("/bin"), PathBuf::from("/usr/bin")],
            strict: false,
        }
    }
}

impl BlacklistPolicy {
    pub fn strict() -> Self {
        Self {
            exempt_links: Vec::new(),
            strict: true,
        }
    }

    /// True when `raw` is a symlink and its target is an exempt directory
    pub fn is_exempt(&self, raw: &Path, target: &ResolvedTarget) -> bool {
        if self.strict || !target.is_dir() {
            return false;
        }
        if !self.exempt_links.iter().any(|p| p == &target.path) {
            return false;
        }
        fs::symlink_metadata(raw)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }
}

/// One denial or transform attempt and what came of it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenialRecord {
    pub directive: String,
    pub path: PathBuf,
    pub outcome: DenialOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct BlacklistReport {
    records: Vec<DenialRecord>,
    /// Directives skipped because they could not be applied at all
    errors: Vec<String>,
}

impl BlacklistReport {
    pub fn records(&self) -> &[DenialRecord] {
        &self.records
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &Path> {
        self.records
            .iter()
            .filter(|r| r.outcome.is_success())
            .map(|r| r.path.as_path())
    }

    pub fn skipped(&self, reason: SkipReason) -> impl Iterator<Item = &Path> {
        self.records
            .iter()
            .filter(move |r| r.outcome == DenialOutcome::Skipped(reason))
            .map(|r| r.path.as_path())
    }

    pub fn failed(&self) -> impl Iterator<Item = &DenialRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, DenialOutcome::Failed(_)))
    }

    pub fn outcome_of(&self, path: &Path) -> Option<&DenialOutcome> {
        self.records
            .iter()
            .rev()
            .find(|r| r.path == path)
            .map(|r| &r.outcome)
    }

    fn push(&mut self, directive: &ProfileDirective, path: &Path, outcome: DenialOutcome) {
        self.records.push(DenialRecord {
            directive: directive.keyword().to_string(),
            path: path.to_path_buf(),
            outcome,
        });
    }
}

/// Which transform a path-carrying directive asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Blacklist,
    BlacklistNoLog,
    ReadOnly,
    ReadWrite,
    NoExec,
    Tmpfs,
}

impl Operation {
    fn is_denial(self) -> bool {
        matches!(self, Operation::Blacklist | Operation::BlacklistNoLog)
    }

    /// fslogger action for a successful denial
    fn denial_action(self) -> &'static str {
        match self {
            Operation::BlacklistNoLog => "blacklist-nolog",
            _ => "blacklist",
        }
    }
}

pub struct BlacklistEngine<'a> {
    backend: &'a dyn MountBackend,
    sink: &'a mut dyn MountEventSink,
    layout: &'a StagingLayout,
    homedir: PathBuf,
    caller_uid: u32,
    policy: BlacklistPolicy,
    exceptions: ExceptionList,
    report: BlacklistReport,
}

impl<'a> BlacklistEngine<'a> {
    pub fn new(
        backend: &'a dyn MountBackend,
        sink: &'a mut dyn MountEventSink,
        layout: &'a StagingLayout,
        homedir: impl Into<PathBuf>,
        caller_uid: u32,
    ) -> Self {
        Self {
            backend,
            sink,
            layout,
            homedir: homedir.into(),
            caller_uid,
            policy: BlacklistPolicy::default(),
            exceptions: ExceptionList::new(),
            report: BlacklistReport::default(),
        }
    }

    pub fn with_policy(mut self, policy: BlacklistPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn exceptions(&self) -> &ExceptionList {
        &self.exceptions
    }

    pub fn report(&self) -> &BlacklistReport {
        &self.report
    }

    /// Apply every directive in order. Configuration and mount errors stop
    /// the run; everything else is recorded in the report.
    pub fn apply(&mut self, directives: &[ProfileDirective]) -> Result<()> {
        for directive in directives {
            self.apply_one(directive)?;
        }
        Ok(())
    }

    pub fn apply_one(&mut self, directive: &ProfileDirective) -> Result<()> {
        match directive {
            ProfileDirective::Bind {
                source,
                destination,
            } => self.bind(directive, Path::new(source), Path::new(destination)),
            ProfileDirective::NoBlacklist(pattern) => {
                for expanded in expand_macros(pattern, &self.homedir) {
                    self.exceptions.push(&expanded)?;
                }
                Ok(())
            }
            ProfileDirective::Blacklist(p) => self.dispatch(directive, Operation::Blacklist, p),
            ProfileDirective::BlacklistNoLog(p) => {
                self.dispatch(directive, Operation::BlacklistNoLog, p)
            }
            ProfileDirective::ReadOnly(p) => self.dispatch(directive, Operation::ReadOnly, p),
            ProfileDirective::ReadWrite(p) => self.dispatch(directive, Operation::ReadWrite, p),
            ProfileDirective::NoExec(p) => self.dispatch(directive, Operation::NoExec, p),
            ProfileDirective::Tmpfs(p) => self.dispatch(directive, Operation::Tmpfs, p),
        }
    }

    /// Log totals and hand back the report
    pub fn finish(self) -> BlacklistReport {
        log::info!(
            "applied {} filesystem rules ({} failed, {} directives skipped)",
            self.report.succeeded().count(),
            self.report.failed().count(),
            self.report.errors().len()
        );
        self.report
    }

    fn bind(&mut self, directive: &ProfileDirective, source: &Path, dest: &Path) -> Result<()> {
        if fs::metadata(source).is_err() {
            self.skip_directive(format!("cannot find {} for bind command", source.display()));
            return Ok(());
        }
        let dest_meta = match fs::metadata(dest) {
            Ok(m) => m,
            Err(_) => {
                self.skip_directive(format!("cannot find {} for bind command", dest.display()));
                return Ok(());
            }
        };

        // dest keeps its own owner and mode
        log::debug!("Mount-bind {} on top of {}", source.display(), dest.display());
        self.backend.bind(source, dest, true)?;
        self.backend.chown(dest, dest_meta.uid(), dest_meta.gid())?;
        self.backend.chmod(dest, dest_meta.mode() & 0o7777)?;
        self.sink.record("bind", dest);
        self.report.push(directive, dest, DenialOutcome::Success);
        Ok(())
    }

    fn skip_directive(&mut self, message: String) {
        log::error!("{}", message);
        self.report.errors.push(message);
    }

    fn dispatch(&mut self, directive: &ProfileDirective, op: Operation, raw: &str) -> Result<()> {
        for pattern in expand_macros(raw, &self.homedir) {
            let expansion = globbing::expand_filtered(&pattern, &self.exceptions)?;
            for path in &expansion.excepted {
                self.report
                    .push(directive, path, DenialOutcome::Skipped(SkipReason::Excepted));
            }
            for path in &expansion.allowed {
                let outcome = self.apply_path(op, path)?;
                self.report.push(directive, path, outcome);
            }
        }
        Ok(())
    }

    fn apply_path(&mut self, op: Operation, raw: &Path) -> Result<DenialOutcome> {
        let target = match resolver::resolve(raw) {
            Resolution::Resolved(t) => t,
            Resolution::Absent => return Ok(DenialOutcome::Skipped(SkipReason::Absent)),
            Resolution::Restricted(path) if op.is_denial() => {
                self.ensure_donors()?;
                let outcome = resolver::forced_denial(self.backend, self.layout, &path);
                if outcome.is_success() {
                    log::debug!("Disable {}", path.display());
                    self.sink.record(op.denial_action(), &path);
                }
                return Ok(outcome);
            }
            Resolution::Restricted(path) => {
                log::warn!("cannot resolve {}, skipping", path.display());
                return Ok(DenialOutcome::Failed(format!(
                    "no access to {}",
                    path.display()
                )));
            }
        };

        match op {
            Operation::Blacklist | Operation::BlacklistNoLog => self.deny(op, raw, &target),
            Operation::ReadOnly => primitives::read_only(self.backend, self.sink, &target.path),
            Operation::ReadWrite => {
                primitives::read_write(self.backend, self.sink, &target.path, self.caller_uid)
            }
            Operation::NoExec => primitives::noexec(self.backend, self.sink, &target.path),
            Operation::Tmpfs => primitives::tmpfs_replace(self.backend, self.sink, &target.path),
        }
    }

    fn deny(&mut self, op: Operation, raw: &Path, target: &ResolvedTarget) -> Result<DenialOutcome> {
        if self.policy.is_exempt(raw, target) {
            log::warn!("{} directory link was not blacklisted", raw.display());
            return Ok(DenialOutcome::Skipped(SkipReason::Exempt));
        }

        log::debug!("Disable {}", target.path.display());
        self.ensure_donors()?;
        let donor = target.kind.donor(self.layout);
        self.backend.bind(&donor, &target.path, false)?;
        self.backend.remount(&target.path, MsFlags::MS_BIND | MsFlags::MS_RDONLY)?;
        self.sink.record(op.denial_action(), &target.path);
        Ok(DenialOutcome::Success)
    }

    /// Earlier directives may have mounted over the staging tree
    fn ensure_donors(&self) -> Result<()> {
        StagingBootstrap::new(self.layout.clone()).ensure_donors(self.backend)
    }
}
