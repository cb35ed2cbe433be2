use crate::config::directive::ProfileDirective;
use crate::config::paths::StagingLayout;
use crate::config::types::{OverlayRequest, SandboxConfig};
use crate::exec::join::{target_from_arg, JoinProtocol, JoinRequest};
use crate::exec::sandbox::{run_sandbox, RunRequest};
use crate::kernel::mount::overlay::check_overlay_dir;
use crate::kernel::namespace::JoinScope;
use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use nix::unistd::{getgid, getuid, User};
use std::path::PathBuf;

/// X11 socket propagation and abstract-socket masking
pub const X11_ENV: &str = "RUSTJAIL_X11";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// JSON sandbox configuration; defaults are derived from the caller
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Staging tree base directory
    #[arg(long, global = true)]
    staging: Option<PathBuf>,
    /// Shell used to run the command
    #[arg(long, global = true)]
    shell: Option<PathBuf>,
    /// Working directory for the command
    #[arg(long, global = true)]
    cwd: Option<PathBuf>,
    #[arg(long, global = true, allow_hyphen_values = true)]
    nice: Option<i32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a sandbox in a new mount namespace and run a command in it
    Run {
        /// Profile directive, e.g. "blacklist ${HOME}/.ssh" (repeatable)
        #[arg(long = "directive", value_name = "LINE")]
        directives: Vec<String>,
        /// Temporary overlay on top of the host root
        #[arg(long, conflicts_with = "chroot")]
        overlay: bool,
        /// Persistent overlay kept in ~/.rustjail/NAME
        #[arg(long, value_name = "NAME", conflicts_with_all = ["overlay", "chroot"])]
        overlay_named: Option<String>,
        /// Allow an existing persistent overlay to be reused
        #[arg(long, requires = "overlay_named")]
        overlay_reuse: bool,
        /// Chroot into an existing root filesystem
        #[arg(long, value_name = "DIR")]
        chroot: Option<PathBuf>,
        /// Fresh tmpfs on /tmp
        #[arg(long)]
        private_tmp: bool,
        /// Name the sandbox for `join`
        #[arg(long)]
        name: Option<String>,
        /// Command and arguments to execute
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Run a command inside an existing sandbox
    Join {
        /// Sandbox pid or name
        target: String,
        /// Enter the network namespace only
        #[arg(long, conflicts_with = "join_filesystem")]
        join_network: bool,
        /// Enter the mount namespace only
        #[arg(long)]
        join_filesystem: bool,
        /// Protocol filter loaded in addition to the sandbox's own
        #[arg(long, value_name = "FILE")]
        protocol_filter: Option<PathBuf>,
        /// Command and arguments to execute
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },
}

fn base_config(common: &CommonArgs) -> Result<SandboxConfig> {
    let mut config = match &common.config {
        Some(path) => SandboxConfig::load(path)?,
        None => {
            let uid = getuid();
            let user = User::from_uid(uid)
                .context("cannot read user database")?
                .ok_or_else(|| anyhow!("cannot find user {}", uid))?;
            let mut config = SandboxConfig::for_user(uid.as_raw(), getgid().as_raw(), user.dir);
            config.username = Some(user.name);
            config
        }
    };
    // the invoking identity is never taken from a file
    config.uid = getuid().as_raw();
    config.gid = getgid().as_raw();

    if let Some(base) = &common.staging {
        config.staging = StagingLayout::new(base);
    }
    if common.shell.is_some() {
        config.shell = common.shell.clone();
    }
    if common.cwd.is_some() {
        config.cwd = common.cwd.clone();
    }
    if common.nice.is_some() {
        config.nice = common.nice;
    }
    if std::env::var_os(X11_ENV).is_some() {
        config.x11 = true;
    }
    Ok(config)
}

fn join_scope(network: bool, filesystem: bool) -> JoinScope {
    match (network, filesystem) {
        (true, _) => JoinScope::Network,
        (false, true) => JoinScope::Filesystem,
        (false, false) => JoinScope::Full,
    }
}

pub fn run() -> Result<()> {
    // Initialize logging; RUST_LOG controls verbosity
    env_logger::init();

    if !cfg!(target_os = "linux") {
        return Err(anyhow!("rustjail requires Linux namespaces"));
    }

    let cli = Cli::parse();
    let mut config = base_config(&cli.common)?;

    match cli.command {
        Commands::Run {
            directives,
            overlay,
            overlay_named,
            overlay_reuse,
            chroot,
            private_tmp,
            name,
            command,
        } => {
            let directives = ProfileDirective::parse_all(directives.iter().map(String::as_str))?;
            if overlay {
                config.overlay = Some(OverlayRequest::default());
            }
            if let Some(named) = overlay_named {
                let keep_dir = check_overlay_dir(&config, &named, overlay_reuse)?;
                config.overlay = Some(OverlayRequest {
                    keep_dir: Some(keep_dir),
                    reuse: overlay_reuse,
                });
            }
            if chroot.is_some() {
                config.chroot = chroot;
            }

            let request = RunRequest {
                directives,
                command,
                private_tmp,
                name,
            };
            log::info!("Building sandbox for uid {}", config.uid);
            match run_sandbox(&config, &request)? {}
        }
        Commands::Join {
            target,
            join_network,
            join_filesystem,
            protocol_filter,
            command,
        } => {
            if protocol_filter.is_some() {
                config.protocol_filter = protocol_filter;
            }
            let request = JoinRequest {
                target: target_from_arg(&target)?,
                scope: join_scope(join_network, join_filesystem),
                command,
            };
            let code = JoinProtocol::new(&config).run(&request)?;
            std::process::exit(code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn join_flags_select_scope() {
        assert_eq!(join_scope(true, false), JoinScope::Network);
        assert_eq!(join_scope(false, true), JoinScope::Filesystem);
        assert_eq!(join_scope(false, false), JoinScope::Full);
    }

    #[test]
    fn run_collects_directives_and_command() {
        let cli = Cli::try_parse_from([
            "rustjail",
            "run",
            "--directive",
            "blacklist ${HOME}/.ssh",
            "--directive",
            "read-only /etc",
            "--private-tmp",
            "ls",
            "-la",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                directives,
                private_tmp,
                command,
                ..
            } => {
                assert_eq!(directives.len(), 2);
                assert!(private_tmp);
                assert_eq!(command, ["ls", "-la"]);
            }
            Commands::Join { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn join_network_and_filesystem_conflict() {
        let parsed = Cli::try_parse_from([
            "rustjail",
            "join",
            "--join-network",
            "--join-filesystem",
            "1234",
        ]);
        assert!(parsed.is_err());
    }
}
