// Profile directives are applied only after /proc and /sys are rebuilt.

use rustjail::exec::sandbox::Sandbox;
use rustjail::kernel::mount::KernelMounts;
use rustjail::SandboxConfig;

fn main() {
    let config = SandboxConfig::for_user(1000, 1000, "/home/alice");
    let root_ready = Sandbox::new(&KernelMounts, &config, Vec::new())
        .isolate_mounts()
        .unwrap()
        .stage(None)
        .unwrap()
        .enter_root(false)
        .unwrap();
    let _ = root_ready.apply_profile();
}
