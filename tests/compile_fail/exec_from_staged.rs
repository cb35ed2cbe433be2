// A staged sandbox has no root yet and cannot exec.

use rustjail::exec::sandbox::Sandbox;
use rustjail::kernel::mount::KernelMounts;
use rustjail::SandboxConfig;

fn main() {
    let config = SandboxConfig::for_user(1000, 1000, "/home/alice");
    let staged = Sandbox::new(&KernelMounts, &config, Vec::new())
        .isolate_mounts()
        .unwrap()
        .stage(None)
        .unwrap();
    let _ = staged.exec(&["true".to_string()]);
}
