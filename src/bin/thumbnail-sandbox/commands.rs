use console::style;
use log::info;
use std::path::Path;
use thumbnail_sandbox::isolation::seccomp::{BLOCKED_SYSCALLS, PROFILING_SYSCALLS};
use thumbnail_sandbox::isolation::Arch;
use thumbnail_sandbox::{SandboxCapability, SeccompFilter};

pub fn check_requirements(bwrap: &Path, devel: bool) {
    info!("Checking sandbox requirements");
    println!("Checking sandbox requirements...\n");

    let caps = SandboxCapability::detect(bwrap);
    println!("{}", caps.summary());

    println!("\nSyscall filter:");
    match Arch::native() {
        Some(arch) => {
            let arches = SeccompFilter::for_arch(arch)
                .arches()
                .iter()
                .map(|a| format!("{:?}", a))
                .collect::<Vec<_>>()
                .join(", ");
            println!("  Architectures: {}", arches);
        }
        None => println!(
            "  {} unsupported architecture {}",
            style("[--]").red(),
            std::env::consts::ARCH
        ),
    }
    println!("  Always denied: {}", BLOCKED_SYSCALLS.join(" "));
    if devel {
        println!("  Developer mode: {} allowed", PROFILING_SYSCALLS.join(" "));
    } else {
        println!("  Denied outside developer mode: {}", PROFILING_SYSCALLS.join(" "));
    }
}
