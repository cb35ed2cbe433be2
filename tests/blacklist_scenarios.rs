//! Profile scenarios run through the blacklist engine against a recording
//! backend. Nothing here needs privileges.

use nix::mount::MsFlags;
use rustjail::config::{ProfileDirective, StagingLayout};
use nix::unistd::{getgid, getuid};
use rustjail::kernel::mount::{
    BlacklistEngine, BlacklistReport, DenialOutcome, FsLogger, SkipReason, StagingBootstrap,
};
use rustjail::testing::{MountCall, RecordingBackend};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

struct Home {
    _dir: tempfile::TempDir,
    path: PathBuf,
    staging: StagingLayout,
}

/// Home directory plus a staging tree whose donors are already built
fn home() -> Home {
    let dir = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(dir.path()).unwrap();
    let path = root.join("alice");
    for d in [".ssh", ".cache", "docs"] {
        fs::create_dir_all(path.join(d)).unwrap();
    }
    fs::write(path.join(".netrc"), b"machine example").unwrap();

    let staging = StagingLayout::new(root.join("run/rustjail"))
        .with_owner(getuid().as_raw(), getgid().as_raw());
    StagingBootstrap::new(staging.clone())
        .build_staging_dir(&RecordingBackend::new())
        .unwrap();
    Home {
        _dir: dir,
        path,
        staging,
    }
}

fn run(
    backend: &RecordingBackend,
    log: &mut FsLogger,
    home: &Home,
    caller_uid: u32,
    lines: &[&str],
) -> BlacklistReport {
    let directives = ProfileDirective::parse_all(lines.iter().copied()).unwrap();
    let mut engine = BlacklistEngine::new(backend, log, &home.staging, &home.path, caller_uid);
    engine.apply(&directives).unwrap();
    engine.finish()
}

fn own_uid(path: &Path) -> u32 {
    fs::metadata(path).unwrap().uid()
}

#[test]
fn noblacklist_protects_later_wildcard_denial() {
    let home = home();
    let uid = own_uid(&home.path);
    let backend = RecordingBackend::new();
    let mut log = FsLogger::new();
    let report = run(
        &backend,
        &mut log,
        &home,
        uid,
        &["noblacklist ${HOME}/.ssh", "blacklist ${HOME}/.*"],
    );

    let ssh = home.path.join(".ssh");
    let cache = home.path.join(".cache");
    let netrc = home.path.join(".netrc");
    assert_eq!(
        report.outcome_of(&ssh),
        Some(&DenialOutcome::Skipped(SkipReason::Excepted))
    );
    assert!(backend.binds_onto(&ssh).is_empty());

    assert_eq!(backend.binds_onto(&cache), vec![home.staging.donor_dir()]);
    assert_eq!(backend.binds_onto(&netrc), vec![home.staging.donor_file()]);
    assert_eq!(
        backend.remounts_of(&cache),
        vec![MsFlags::MS_BIND | MsFlags::MS_RDONLY]
    );

    let mut logged = log.paths_for("blacklist");
    logged.sort();
    assert_eq!(logged, vec![cache.as_path(), netrc.as_path()]);
    assert!(backend.binds_onto(&home.path.join("docs")).is_empty());
}

#[test]
fn exception_added_after_denial_does_not_undo_it() {
    let home = home();
    let backend = RecordingBackend::new();
    let mut log = FsLogger::new();
    let report = run(
        &backend,
        &mut log,
        &home,
        own_uid(&home.path),
        &[
            "blacklist ${HOME}/.ssh",
            "noblacklist ${HOME}/.ssh",
            "blacklist ${HOME}/.ssh",
        ],
    );

    let ssh = home.path.join(".ssh");
    // the first denial stands; the repeated one is excepted
    assert_eq!(backend.binds_onto(&ssh).len(), 1);
    let outcomes: Vec<&DenialOutcome> = report
        .records()
        .iter()
        .filter(|r| r.path == ssh)
        .map(|r| &r.outcome)
        .collect();
    assert_eq!(
        outcomes,
        vec![
            &DenialOutcome::Success,
            &DenialOutcome::Skipped(SkipReason::Excepted)
        ]
    );
}

#[test]
fn absent_paths_leave_no_trace() {
    let home = home();
    let backend = RecordingBackend::new();
    let mut log = FsLogger::new();
    let report = run(
        &backend,
        &mut log,
        &home,
        own_uid(&home.path),
        &[
            "blacklist ${HOME}/.mozilla",
            "read-only ${HOME}/missing",
            "noexec ${HOME}/missing/*",
            "tmpfs ${HOME}/gone",
        ],
    );

    assert!(backend.calls().is_empty());
    assert!(log.is_empty());
    assert!(report.failed().next().is_none());
    assert!(report.errors().is_empty());
}

#[test]
fn bind_with_missing_source_is_skipped_and_run_continues() {
    let home = home();
    let backend = RecordingBackend::new();
    let mut log = FsLogger::new();
    let missing = home.path.join("nowhere");
    let bind = format!("bind {},{}", missing.display(), home.path.join("docs").display());
    let report = run(
        &backend,
        &mut log,
        &home,
        own_uid(&home.path),
        &[&bind, "blacklist ${HOME}/.ssh"],
    );

    assert_eq!(report.errors().len(), 1);
    assert!(report.errors()[0].contains("nowhere"));
    assert!(backend.binds_onto(&home.path.join("docs")).is_empty());
    assert_eq!(backend.binds_onto(&home.path.join(".ssh")).len(), 1);
}

#[test]
fn bind_keeps_destination_owner_and_mode() {
    let home = home();
    let backend = RecordingBackend::new();
    let mut log = FsLogger::new();
    let (src, dest) = (home.path.join(".cache"), home.path.join("docs"));
    let meta = fs::metadata(&dest).unwrap();
    let bind = format!("bind {},{}", src.display(), dest.display());
    run(&backend, &mut log, &home, meta.uid(), &[&bind]);

    assert_eq!(
        backend.calls(),
        vec![
            MountCall::Bind {
                source: src,
                target: dest.clone(),
                recursive: true,
            },
            MountCall::Chown {
                path: dest.clone(),
                uid: meta.uid(),
                gid: meta.gid(),
            },
            MountCall::Chmod {
                path: dest.clone(),
                mode: meta.mode() & 0o7777,
            },
        ]
    );
    assert_eq!(log.paths_for("bind"), vec![dest.as_path()]);
}

#[test]
fn tmpfs_restores_original_owner() {
    let home = home();
    let backend = RecordingBackend::new();
    let mut log = FsLogger::new();
    let cache = home.path.join(".cache");
    let meta = fs::metadata(&cache).unwrap();
    run(&backend, &mut log, &home, meta.uid(), &["tmpfs ${HOME}/.cache"]);

    assert!(matches!(
        backend.fs_mount_at(&cache),
        Some(MountCall::Mount { ref fstype, .. }) if fstype == "tmpfs"
    ));
    assert!(backend.calls().contains(&MountCall::Chown {
        path: cache.clone(),
        uid: meta.uid(),
        gid: meta.gid(),
    }));
    assert_eq!(log.paths_for("tmpfs"), vec![cache.as_path()]);
}

#[test]
fn tmpfs_on_a_file_is_refused() {
    let home = home();
    let backend = RecordingBackend::new();
    let mut log = FsLogger::new();
    let report = run(
        &backend,
        &mut log,
        &home,
        own_uid(&home.path),
        &["tmpfs ${HOME}/.netrc"],
    );
    assert_eq!(
        report.outcome_of(&home.path.join(".netrc")),
        Some(&DenialOutcome::Skipped(SkipReason::Refused))
    );
    assert_eq!(backend.count_fs_mounts("tmpfs"), 0);
}

#[test]
fn read_only_applied_twice_is_idempotent() {
    let home = home();
    let backend = RecordingBackend::new();
    let mut log = FsLogger::new();
    let report = run(
        &backend,
        &mut log,
        &home,
        own_uid(&home.path),
        &["read-only ${HOME}/docs", "read-only ${HOME}/docs"],
    );

    let docs = home.path.join("docs");
    let remounts = backend.remounts_of(&docs);
    assert_eq!(remounts.len(), 2);
    assert_eq!(remounts[0], remounts[1]);
    assert!(remounts[0].contains(MsFlags::MS_RDONLY));
    assert_eq!(report.succeeded().count(), 2);
    assert!(report.failed().next().is_none());
}

#[test]
fn read_write_by_non_owner_is_refused() {
    let home = home();
    let docs = home.path.join("docs");
    let stranger = own_uid(&docs) + 1;
    let backend = RecordingBackend::new();
    let mut log = FsLogger::new();
    let report = run(
        &backend,
        &mut log,
        &home,
        stranger,
        &["read-write ${HOME}/docs"],
    );

    assert_eq!(
        report.outcome_of(&docs),
        Some(&DenialOutcome::Skipped(SkipReason::Refused))
    );
    assert!(backend.calls().is_empty());
    assert!(log.is_empty());
}

#[test]
fn noexec_sets_all_three_flags() {
    let home = home();
    let backend = RecordingBackend::new();
    let mut log = FsLogger::new();
    run(
        &backend,
        &mut log,
        &home,
        own_uid(&home.path),
        &["noexec ${HOME}/docs"],
    );
    let flags = backend.remounts_of(&home.path.join("docs"));
    assert_eq!(flags.len(), 1);
    assert!(flags[0].contains(MsFlags::MS_NOEXEC | MsFlags::MS_NODEV | MsFlags::MS_NOSUID));
}

#[test]
fn denial_mount_failure_aborts_the_profile() {
    let home = home();
    let backend = RecordingBackend::new();
    backend.fail_on("bind", home.path.join(".ssh"));
    let mut log = FsLogger::new();
    let directives = ProfileDirective::parse_all([
        "blacklist ${HOME}/.ssh",
        "blacklist ${HOME}/.cache",
    ])
    .unwrap();
    let mut engine = BlacklistEngine::new(&backend, &mut log, &home.staging, &home.path, 1000);
    assert!(engine.apply(&directives).is_err());
    drop(engine);
    assert!(backend.binds_onto(&home.path.join(".cache")).is_empty());
}

#[test]
fn denial_after_tmpfs_over_staging_parent_rebuilds_donors() {
    let home = home();
    let backend = RecordingBackend::new();
    let mut log = FsLogger::new();
    let run_dir = home.staging.base().parent().unwrap().to_path_buf();
    let tmpfs = format!("tmpfs {}", run_dir.display());
    let directives =
        ProfileDirective::parse_all([tmpfs.as_str(), "blacklist ${HOME}/.ssh"]).unwrap();
    let mut engine = BlacklistEngine::new(&backend, &mut log, &home.staging, &home.path, 1000);

    engine.apply_one(&directives[0]).unwrap();
    // what the sandbox sees once the tmpfs is over the staging parent
    fs::remove_dir_all(home.staging.base()).unwrap();
    engine.apply_one(&directives[1]).unwrap();
    let report = engine.finish();

    let ssh = home.path.join(".ssh");
    assert_eq!(report.outcome_of(&ssh), Some(&DenialOutcome::Success));
    assert!(home.staging.donor_dir().is_dir());
    assert!(home.staging.donor_file().is_file());
    assert_eq!(backend.binds_onto(&ssh), vec![home.staging.donor_dir()]);
}

#[test]
fn malformed_profiles_are_rejected_up_front() {
    assert!(ProfileDirective::parse_all(["bind /a"]).is_err());
    assert!(ProfileDirective::parse_all(["frobnicate /etc"]).is_err());
    let parsed = ProfileDirective::parse_all(["whitelist ~/Downloads", "", "tmpfs /tmp"]).unwrap();
    assert_eq!(parsed, vec![ProfileDirective::Tmpfs("/tmp".to_string())]);
}
