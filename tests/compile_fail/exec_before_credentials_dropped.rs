// Only a sandbox running with the invoking user's credentials can exec.

use rustjail::exec::sandbox::Sandbox;
use rustjail::kernel::mount::KernelMounts;
use rustjail::SandboxConfig;

fn main() {
    let config = SandboxConfig::for_user(1000, 1000, "/home/alice");
    let sandbox = Sandbox::new(&KernelMounts, &config, Vec::new());
    let _ = sandbox.exec(&["true".to_string()]);
}
