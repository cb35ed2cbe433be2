//! Restrictions inherited from a running sandbox.
//!
//! A joiner reads what the target process is subject to, then rebuilds the
//! same restrictions on itself in a fixed order. The order is computed up
//! front as a list of [`RestrictionStep`]s so it can be inspected before
//! anything irreversible happens.

use crate::config::paths::StagingLayout;
use crate::config::types::Result;
use crate::kernel::affinity::CpuMask;
use crate::kernel::capabilities::{drop_bounding_except, CapabilityMask};
use crate::kernel::cgroup::TasksFile;
use crate::kernel::credentials::{drop_privileges, GroupPolicy};
use crate::kernel::namespace::{join_namespace, NamespaceKind};
use crate::kernel::procfs;
use crate::kernel::seccomp::{load_filter, load_required_filter};
use std::path::{Path, PathBuf};

/// Prompt exported when `RUSTJAIL_PROMPT=yes`
const PROMPT_COMMAND: &str = r#"export PS1="\[\e[1;32m\][\u@\h \W]\$\[\e[0m\] ""#;

/// What a joined sandbox imposes on its processes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinedProcessContext {
    /// Bounding set to reproduce
    pub caps: Option<CapabilityMask>,
    /// Target runs under a seccomp filter
    pub seccomp: bool,
    pub cgroup: Option<TasksFile>,
    pub cpus: Option<CpuMask>,
    /// Supplementary groups were dropped in the sandbox
    pub nogroups: bool,
    /// Target runs unprivileged inside its own user namespace
    pub noroot: bool,
}

impl JoinedProcessContext {
    /// Read the context of `pid`. Staged files are looked up through the
    /// target's root; each one is optional.
    pub fn extract(proc_root: &Path, pid: u32, layout: &StagingLayout) -> Result<Self> {
        let status = procfs::status(proc_root, pid)?;
        let root = procfs::root_of(proc_root, pid);
        let staged = |p: PathBuf| -> Option<PathBuf> {
            let path = StagingLayout::under_root(&root, &p);
            path.exists().then_some(path)
        };

        let cpus = staged(layout.cpu_cfg())
            .map(|p| CpuMask::load(&p))
            .transpose()?;
        let cgroup = staged(layout.cgroup_cfg())
            .map(|p| TasksFile::load(&p))
            .transpose()?;
        let nogroups = staged(layout.groups_cfg()).is_some();
        let noroot = procfs::uid_map(proc_root, pid)
            .map(|m| {
                log::debug!("User namespace detected for {}: {:?}", pid, m);
                m.is_user_namespace()
            })
            .unwrap_or(false);

        Ok(Self {
            caps: status.cap_bnd,
            seccomp: status.has_seccomp_filter(),
            cgroup,
            cpus,
            nogroups,
            noroot,
        })
    }

    /// Ordered restriction sequence for the joining child
    pub fn restriction_plan(&self, caller: Caller, filters: &FilterSources) -> RestrictionPlan {
        let mut steps = Vec::new();
        if let Some(cpus) = self.cpus {
            steps.push(RestrictionStep::CpuAffinity(cpus));
        }
        if let Some(caps) = self.caps {
            steps.push(RestrictionStep::CapabilityFilter(caps));
        }
        if !caller.is_root() {
            steps.push(RestrictionStep::ProtocolFilter(filters.default_protocol.clone()));
        }
        if let Some(path) = &filters.configured_protocol {
            steps.push(RestrictionStep::ProtocolFilter(path.clone()));
        }
        if self.seccomp {
            steps.push(RestrictionStep::SeccompFilter(filters.seccomp.clone()));
        }
        steps.push(RestrictionStep::Environment);
        if self.noroot {
            steps.push(RestrictionStep::JoinUserNamespace);
            // entering a user namespace resets the capability sets
            if let Some(caps) = self.caps {
                steps.push(RestrictionStep::CapabilityFilter(caps));
            }
        } else {
            steps.push(RestrictionStep::DropPrivileges(GroupPolicy::from_nogroups(
                self.nogroups,
            )));
        }
        RestrictionPlan { steps, caller }
    }
}

/// Identity of the joining user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub uid: u32,
    pub gid: u32,
}

impl Caller {
    pub fn is_root(&self) -> bool {
        self.uid == 0
    }
}

/// Filter files consulted by a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSources {
    /// Protocol filter staged by the sandbox, loaded for non-root joiners
    pub default_protocol: PathBuf,
    /// Protocol filter requested on the command line
    pub configured_protocol: Option<PathBuf>,
    pub seccomp: PathBuf,
}

impl FilterSources {
    pub fn staged(layout: &StagingLayout, configured_protocol: Option<PathBuf>) -> Self {
        Self {
            default_protocol: layout.protocol_cfg(),
            configured_protocol,
            seccomp: layout.seccomp_cfg(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestrictionStep {
    CpuAffinity(CpuMask),
    CapabilityFilter(CapabilityMask),
    ProtocolFilter(PathBuf),
    SeccompFilter(PathBuf),
    /// `QT_X11_NO_MITSHM`, `container=` and the optional prompt
    Environment,
    JoinUserNamespace,
    DropPrivileges(GroupPolicy),
}

/// Restriction sequence bound to one joining process. Applying it consumes
/// the plan, so the sequence runs at most once.
#[derive(Debug)]
#[must_use = "a plan does nothing until applied"]
pub struct RestrictionPlan {
    steps: Vec<RestrictionStep>,
    caller: Caller,
}

impl RestrictionPlan {
    pub fn steps(&self) -> &[RestrictionStep] {
        &self.steps
    }

    /// Run every step in order; the first failure aborts the join
    pub fn apply(self, label: &str) -> Result<()> {
        for step in &self.steps {
            log::debug!("Applying {:?}", step);
            match step {
                RestrictionStep::CpuAffinity(mask) => mask.apply()?,
                RestrictionStep::CapabilityFilter(mask) => {
                    drop_bounding_except(*mask)?;
                }
                RestrictionStep::ProtocolFilter(path) => {
                    load_filter(path)?;
                }
                RestrictionStep::SeccompFilter(path) => load_required_filter(path)?,
                RestrictionStep::Environment => apply_environment(label),
                RestrictionStep::JoinUserNamespace => {
                    log::debug!("Joining user namespace");
                    join_namespace(Path::new(procfs::PROC_ROOT), 1, NamespaceKind::User)?;
                }
                RestrictionStep::DropPrivileges(groups) => {
                    drop_privileges(self.caller.uid, self.caller.gid, *groups)?;
                }
            }
        }
        Ok(())
    }
}

fn apply_environment(label: &str) {
    std::env::set_var("QT_X11_NO_MITSHM", "1");
    std::env::set_var("container", label);
    if std::env::var("RUSTJAIL_PROMPT").as_deref() == Ok("yes") {
        std::env::set_var("PROMPT_COMMAND", PROMPT_COMMAND);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::JailError;
    use std::fs;

    const USER: Caller = Caller {
        uid: 1000,
        gid: 1000,
    };

    fn filters() -> FilterSources {
        FilterSources::staged(&StagingLayout::default(), None)
    }

    #[test]
    fn empty_context_still_drops_privileges() {
        let plan = JoinedProcessContext::default().restriction_plan(USER, &filters());
        assert_eq!(
            plan.steps(),
            &[
                RestrictionStep::ProtocolFilter(PathBuf::from("/run/rustjail/mnt/seccomp.protocol")),
                RestrictionStep::Environment,
                RestrictionStep::DropPrivileges(GroupPolicy::Keep),
            ]
        );
    }

    #[test]
    fn root_caller_skips_default_protocol_filter() {
        let root = Caller { uid: 0, gid: 0 };
        let sources = FilterSources::staged(
            &StagingLayout::default(),
            Some(PathBuf::from("/etc/rustjail/unix.bpf")),
        );
        let plan = JoinedProcessContext::default().restriction_plan(root, &sources);
        assert_eq!(
            plan.steps()[0],
            RestrictionStep::ProtocolFilter(PathBuf::from("/etc/rustjail/unix.bpf"))
        );
        assert_eq!(plan.steps().len(), 3);
    }

    #[test]
    fn full_context_orders_every_step() {
        let ctx = JoinedProcessContext {
            caps: Some(CapabilityMask(0x3)),
            seccomp: true,
            cgroup: None,
            cpus: Some(CpuMask(1)),
            nogroups: true,
            noroot: false,
        };
        let plan = ctx.restriction_plan(USER, &filters());
        let steps = plan.steps();
        assert!(matches!(steps[0], RestrictionStep::CpuAffinity(_)));
        assert!(matches!(steps[1], RestrictionStep::CapabilityFilter(_)));
        assert!(matches!(steps[2], RestrictionStep::ProtocolFilter(_)));
        assert!(matches!(steps[3], RestrictionStep::SeccompFilter(_)));
        assert_eq!(steps[4], RestrictionStep::Environment);
        assert_eq!(steps[5], RestrictionStep::DropPrivileges(GroupPolicy::Clear));
    }

    #[test]
    fn user_namespace_reapplies_capabilities() {
        let ctx = JoinedProcessContext {
            caps: Some(CapabilityMask(0)),
            noroot: true,
            ..Default::default()
        };
        let plan = ctx.restriction_plan(USER, &filters());
        let tail = &plan.steps()[plan.steps().len() - 2..];
        assert_eq!(
            tail,
            &[
                RestrictionStep::JoinUserNamespace,
                RestrictionStep::CapabilityFilter(CapabilityMask(0)),
            ]
        );
        assert!(!plan
            .steps()
            .iter()
            .any(|s| matches!(s, RestrictionStep::DropPrivileges(_))));
    }

    #[test]
    fn missing_seccomp_filter_aborts_join() {
        let dir = tempfile::tempdir().unwrap();
        let plan = RestrictionPlan {
            steps: vec![RestrictionStep::SeccompFilter(dir.path().join("seccomp"))],
            caller: Caller { uid: 0, gid: 0 },
        };
        let err = plan.apply("rustjail").unwrap_err();
        assert!(matches!(err, JailError::Filter(_)), "{:?}", err);
    }

    #[test]
    fn missing_protocol_filter_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let plan = RestrictionPlan {
            steps: vec![RestrictionStep::ProtocolFilter(dir.path().join("seccomp.protocol"))],
            caller: Caller { uid: 0, gid: 0 },
        };
        plan.apply("rustjail").unwrap();
    }

    #[test]
    fn extracts_from_fake_proc_tree() {
        let proc = tempfile::tempdir().unwrap();
        let layout = StagingLayout::default();
        let pid_dir = proc.path().join("77");
        fs::create_dir(&pid_dir).unwrap();
        fs::write(
            pid_dir.join("status"),
            "Name:\tbash\nPPid:\t76\nUid:\t1000\t1000\t1000\t1000\n\
             CapBnd:\t0000000000000000\nSeccomp:\t2\n",
        )
        .unwrap();
        fs::write(pid_dir.join("uid_map"), "0 1000 1\n").unwrap();

        let root = pid_dir.join("root");
        let mnt = StagingLayout::under_root(&root, &layout.mnt_dir());
        fs::create_dir_all(&mnt).unwrap();
        fs::write(mnt.join("cpu"), "3\n").unwrap();
        fs::write(mnt.join("groups"), "").unwrap();

        let ctx = JoinedProcessContext::extract(proc.path(), 77, &layout).unwrap();
        assert_eq!(ctx.caps, Some(CapabilityMask(0)));
        assert!(ctx.seccomp);
        assert_eq!(ctx.cpus, Some(CpuMask(3)));
        assert!(ctx.cgroup.is_none());
        assert!(ctx.nogroups);
        assert!(ctx.noroot);
    }
}
