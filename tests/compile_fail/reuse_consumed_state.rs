// Every transition consumes the previous state.

use rustjail::exec::sandbox::Sandbox;
use rustjail::kernel::mount::KernelMounts;
use rustjail::SandboxConfig;

fn main() {
    let config = SandboxConfig::for_user(1000, 1000, "/home/alice");
    let fresh = Sandbox::new(&KernelMounts, &config, Vec::new());
    let _private = fresh.isolate_mounts();
    let _again = fresh.isolate_mounts();
}
