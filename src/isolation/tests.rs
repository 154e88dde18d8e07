use super::seccomp::{ALLOWED_SOCKET_FAMILIES, CLONE_NEWUSER, TIOCSTI};
use super::seccomp_bpf::{actions, ops, BpfInstr, MAX_INSTRUCTIONS, X32_SYSCALL_BIT};
use super::{Arch, ArgCondition, SeccompCompiler, SeccompFilter, SyscallRule};
use std::io::Read;

const AF_BLUETOOTH: u64 = 31;

/// `struct seccomp_data` as seen by the interpreter
struct SyscallData {
    nr: u32,
    arch: u32,
    args: [u64; 6],
}

impl SyscallData {
    fn new(arch: Arch, nr: u32, args: &[u64]) -> Self {
        let mut all = [0u64; 6];
        all[..args.len()].copy_from_slice(args);
        Self {
            nr,
            arch: arch.audit_arch(),
            args: all,
        }
    }

    fn named(arch: Arch, name: &str, args: &[u64]) -> Self {
        let nr = arch
            .syscall_number(name)
            .unwrap_or_else(|| panic!("{} missing on {:?}", name, arch));
        Self::new(arch, nr, args)
    }

    fn load(&self, offset: u32) -> u32 {
        match offset {
            0 => self.nr,
            4 => self.arch,
            o if o >= 16 && o < 64 && o % 4 == 0 => {
                let arg = self.args[((o - 16) / 8) as usize];
                let high = (o - 16) % 8 == 4;
                let low_word_first = cfg!(target_endian = "little");
                if high == low_word_first {
                    (arg >> 32) as u32
                } else {
                    arg as u32
                }
            }
            o => panic!("load from invalid offset {}", o),
        }
    }
}

/// Minimal classic BPF interpreter covering the opcodes the compiler emits
fn run(program: &[BpfInstr], data: &SyscallData) -> u32 {
    let mut acc = 0u32;
    let mut pc = 0usize;
    loop {
        let instr = program[pc];
        pc += 1;
        match instr.code {
            ops::LD_W_ABS => acc = data.load(instr.k),
            ops::ALU_AND_K => acc &= instr.k,
            ops::JMP_JA => pc += instr.k as usize,
            ops::JMP_JEQ_K => {
                let offset = if acc == instr.k { instr.jt } else { instr.jf };
                pc += offset as usize;
            }
            ops::JMP_JGE_K => {
                let offset = if acc >= instr.k { instr.jt } else { instr.jf };
                pc += offset as usize;
            }
            ops::RET_K => return instr.k,
            code => panic!("unexpected opcode {:#x}", code),
        }
    }
}

fn compile(native: Arch, devel: bool) -> Vec<BpfInstr> {
    SeccompCompiler::compile(&SeccompFilter::thumbnailer_for(native, devel)).unwrap()
}

fn eperm() -> u32 {
    actions::errno(libc::EPERM)
}

#[test]
fn plain_syscalls_are_allowed() {
    let program = compile(Arch::X86_64, false);
    // read, write, openat
    for nr in [0, 1, 257] {
        assert_eq!(
            run(&program, &SyscallData::new(Arch::X86_64, nr, &[])),
            actions::SECCOMP_RET_ALLOW
        );
    }
}

#[test]
fn blacklisted_syscalls_return_eperm_on_every_arch() {
    for arch in [Arch::X86_64, Arch::X86, Arch::Aarch64, Arch::Arm] {
        let program = compile(arch, false);
        for name in ["syslog", "keyctl", "unshare", "mount", "ptrace"] {
            assert_eq!(
                run(&program, &SyscallData::named(arch, name, &[])),
                eperm(),
                "{} on {:?}",
                name,
                arch
            );
        }
    }
}

#[test]
fn compat_arch_section_is_reached() {
    let program = compile(Arch::X86_64, false);
    let mount = SyscallData::named(Arch::X86, "mount", &[]);
    assert_eq!(mount.nr, 21);
    assert_eq!(run(&program, &mount), eperm());
    // nr 21 is access(2) on x86_64
    assert_eq!(
        run(&program, &SyscallData::new(Arch::X86_64, 21, &[])),
        actions::SECCOMP_RET_ALLOW
    );
}

#[test]
fn unknown_arch_is_killed() {
    let program = compile(Arch::X86_64, false);
    let data = SyscallData {
        nr: 0,
        arch: super::seccomp_bpf::arch::AUDIT_ARCH_AARCH64,
        args: [0; 6],
    };
    assert_eq!(run(&program, &data), actions::SECCOMP_RET_KILL_PROCESS);
}

#[test]
fn x32_syscalls_are_killed() {
    let program = compile(Arch::X86_64, false);
    let data = SyscallData::new(Arch::X86_64, X32_SYSCALL_BIT | 1, &[]);
    assert_eq!(run(&program, &data), actions::SECCOMP_RET_KILL_PROCESS);
}

#[test]
fn clone_new_user_namespace_is_denied() {
    let program = compile(Arch::X86_64, false);
    let sigchld = libc::SIGCHLD as u64;

    let plain = SyscallData::named(Arch::X86_64, "clone", &[sigchld]);
    assert_eq!(run(&program, &plain), actions::SECCOMP_RET_ALLOW);

    let newuser = SyscallData::named(
        Arch::X86_64,
        "clone",
        &[sigchld | u64::from(CLONE_NEWUSER)],
    );
    assert_eq!(run(&program, &newuser), eperm());
}

#[test]
fn clone3_returns_enosys() {
    let program = compile(Arch::Aarch64, false);
    assert_eq!(
        run(&program, &SyscallData::named(Arch::Aarch64, "clone3", &[])),
        actions::errno(libc::ENOSYS)
    );
}

#[test]
fn tiocsti_ioctl_is_denied() {
    let program = compile(Arch::X86_64, false);
    let tiocsti = SyscallData::named(Arch::X86_64, "ioctl", &[0, u64::from(TIOCSTI)]);
    assert_eq!(run(&program, &tiocsti), eperm());

    // Upper bits are not part of the request code
    let tiocsti_high =
        SyscallData::named(Arch::X86_64, "ioctl", &[0, (1 << 32) | u64::from(TIOCSTI)]);
    assert_eq!(run(&program, &tiocsti_high), eperm());

    // TCGETS
    let tcgets = SyscallData::named(Arch::X86_64, "ioctl", &[0, 0x5401]);
    assert_eq!(run(&program, &tcgets), actions::SECCOMP_RET_ALLOW);
}

#[test]
fn devel_mode_allows_tracing() {
    let program = compile(Arch::X86_64, true);
    for name in ["ptrace", "perf_event_open"] {
        assert_eq!(
            run(&program, &SyscallData::named(Arch::X86_64, name, &[])),
            actions::SECCOMP_RET_ALLOW
        );
    }
    assert_eq!(
        run(&program, &SyscallData::named(Arch::X86_64, "acct", &[])),
        eperm()
    );
}

#[test]
fn socket_families_outside_allowlist_are_rejected() {
    for arch in [Arch::X86_64, Arch::X86, Arch::Aarch64, Arch::Arm] {
        let program = compile(arch, false);
        for family in ALLOWED_SOCKET_FAMILIES {
            let data = SyscallData::named(arch, "socket", &[u64::from(*family), 1, 0]);
            assert_eq!(run(&program, &data), actions::SECCOMP_RET_ALLOW);
        }
        let bluetooth = SyscallData::named(arch, "socket", &[AF_BLUETOOTH, 1, 0]);
        assert_eq!(
            run(&program, &bluetooth),
            actions::errno(libc::EAFNOSUPPORT),
            "{:?}",
            arch
        );
    }
}

#[test]
fn rules_fall_through_to_later_rules() {
    // socket is the last rule; it must still see nr after the argument rules
    let program = compile(Arch::X86_64, false);
    let data = SyscallData::named(Arch::X86_64, "socket", &[AF_BLUETOOTH]);
    assert_eq!(run(&program, &data), actions::errno(libc::EAFNOSUPPORT));
}

#[test]
fn missing_syscalls_are_skipped() {
    let mut filter = SeccompFilter::new(Arch::Aarch64);
    filter.add_rule(SyscallRule::deny("modify_ldt", libc::EPERM));
    let program = SeccompCompiler::compile(&filter).unwrap();
    // ld arch, jeq, ja, kill, ld nr, ret allow
    assert_eq!(program.len(), 6);
}

#[test]
fn invalid_argument_index_is_an_error() {
    let mut filter = SeccompFilter::new(Arch::X86_64);
    filter.add_rule(SyscallRule::deny_if(
        "ioctl",
        libc::EPERM,
        ArgCondition::MaskedEq {
            arg: 9,
            mask: 1,
            value: 1,
        },
    ));
    assert!(SeccompCompiler::compile(&filter).is_err());
}

#[test]
fn oversized_program_is_rejected() {
    let mut filter = SeccompFilter::new(Arch::X86_64);
    for _ in 0..(MAX_INSTRUCTIONS / 2 + 1) {
        filter.add_rule(SyscallRule::deny("acct", libc::EPERM));
    }
    let err = SeccompCompiler::compile(&filter).unwrap_err();
    assert!(err.to_string().contains("too long"));
}

#[test]
fn export_writes_program_at_offset_zero() {
    let filter = SeccompFilter::thumbnailer_for(Arch::X86_64, false);
    let expected = SeccompCompiler::to_bytes(&SeccompCompiler::compile(&filter).unwrap());

    let fd = SeccompCompiler::export(&filter).unwrap();
    let mut file = std::fs::File::from(fd);
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).unwrap();

    assert_eq!(bytes, expected);
    assert_eq!(bytes.len() % 8, 0);
}

#[test]
fn exported_fd_has_no_path() {
    let filter = SeccompFilter::thumbnailer_for(Arch::X86_64, false);
    let fd = SeccompCompiler::export(&filter).unwrap();
    let file = std::fs::File::from(fd);
    // Anonymous files have no remaining links
    use std::os::unix::fs::MetadataExt;
    assert_eq!(file.metadata().unwrap().nlink(), 0);
}

#[test]
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
fn installed_filter_rejects_bluetooth_sockets() {
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{fork, ForkResult};

    let filter = SeccompFilter::thumbnailer(false).unwrap();
    let program = SeccompCompiler::compile(&filter).unwrap();

    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            let code = unsafe {
                if SeccompCompiler::install_program(&program).is_err() {
                    2
                } else {
                    let unix = libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0);
                    let bt = libc::socket(AF_BLUETOOTH as libc::c_int, libc::SOCK_STREAM, 0);
                    let errno = *libc::__errno_location();
                    if unix < 0 {
                        3
                    } else if bt == -1 && errno == libc::EAFNOSUPPORT {
                        0
                    } else {
                        1
                    }
                }
            };
            unsafe { libc::_exit(code) };
        }
        ForkResult::Parent { child } => {
            let status = waitpid(child, None).unwrap();
            assert_eq!(status, WaitStatus::Exited(child, 0));
        }
    }
}
