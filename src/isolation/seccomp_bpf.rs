//! Seccomp BPF filter compilation and export
//!
//! The program is assembled by hand from classic BPF instructions. Layout:
//!
//! ```text
//! ld  arch
//! jeq ARCH_0 ? next : +1 ; ja section_0
//! jeq ARCH_1 ? next : +1 ; ja section_1
//! ret KILL_PROCESS                      (architecture not covered)
//! section_N:
//!   ld nr
//!   <rule blocks>                       (each one falls through on mismatch)
//!   ret ALLOW
//! ```

use super::seccomp::{ArgCondition, SeccompFilter, SyscallRule};
use crate::errors::{Result, ThumbnailError};
use log::{debug, warn};
use std::io::{Seek, SeekFrom, Write};
use std::os::fd::OwnedFd;

/// Compiled BPF instruction
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BpfInstr {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

impl BpfInstr {
    const fn stmt(code: u16, k: u32) -> Self {
        Self { code, jt: 0, jf: 0, k }
    }

    const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> Self {
        Self { code, jt, jf, k }
    }
}

/// BPF opcodes used by the compiler
pub mod ops {
    /// BPF_LD | BPF_W | BPF_ABS
    pub const LD_W_ABS: u16 = 0x20;
    /// BPF_ALU | BPF_AND | BPF_K
    pub const ALU_AND_K: u16 = 0x54;
    /// BPF_JMP | BPF_JA
    pub const JMP_JA: u16 = 0x05;
    /// BPF_JMP | BPF_JEQ | BPF_K
    pub const JMP_JEQ_K: u16 = 0x15;
    /// BPF_JMP | BPF_JGE | BPF_K
    pub const JMP_JGE_K: u16 = 0x35;
    /// BPF_RET | BPF_K
    pub const RET_K: u16 = 0x06;
}

/// Seccomp action codes
pub mod actions {
    /// Kill the whole process
    pub const SECCOMP_RET_KILL_PROCESS: u32 = 0x8000_0000;
    /// Return errno value (low 16 bits)
    pub const SECCOMP_RET_ERRNO: u32 = 0x0005_0000;
    /// Allow syscall
    pub const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;
    /// Mask of the errno value in an ERRNO action
    pub const SECCOMP_RET_DATA: u32 = 0x0000_ffff;

    /// ERRNO action for the given errno
    pub const fn errno(errno: i32) -> u32 {
        SECCOMP_RET_ERRNO | (errno as u32 & SECCOMP_RET_DATA)
    }
}

/// BPF architecture codes
pub mod arch {
    pub const AUDIT_ARCH_X86_64: u32 = 0xc000003e;
    pub const AUDIT_ARCH_I386: u32 = 0x40000003;
    pub const AUDIT_ARCH_ARM: u32 = 0x40000028;
    pub const AUDIT_ARCH_AARCH64: u32 = 0xc00000b7;
}

/// Offsets into `struct seccomp_data`
pub mod data {
    pub const NR: u32 = 0;
    pub const ARCH: u32 = 4;
    pub const ARGS: u32 = 16;
}

/// Syscall numbers at or above this on x86_64 belong to the x32 ABI
pub const X32_SYSCALL_BIT: u32 = 0x4000_0000;

/// Kernel limit on filter length (BPF_MAXINSNS)
pub const MAX_INSTRUCTIONS: usize = 4096;

/// Architectures the filter can be compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86_64,
    X86,
    Aarch64,
    Arm,
}

impl Arch {
    /// Architecture of the running binary
    pub fn native() -> Option<Self> {
        if cfg!(target_arch = "x86_64") {
            Some(Arch::X86_64)
        } else if cfg!(target_arch = "x86") {
            Some(Arch::X86)
        } else if cfg!(target_arch = "aarch64") {
            Some(Arch::Aarch64)
        } else if cfg!(target_arch = "arm") {
            Some(Arch::Arm)
        } else {
            None
        }
    }

    /// 32-bit architecture the kernel may also execute
    pub fn compat(&self) -> Option<Self> {
        match self {
            Arch::X86_64 => Some(Arch::X86),
            Arch::Aarch64 => Some(Arch::Arm),
            Arch::X86 | Arch::Arm => None,
        }
    }

    /// `AUDIT_ARCH_*` value seen in `seccomp_data.arch`
    pub fn audit_arch(&self) -> u32 {
        match self {
            Arch::X86_64 => arch::AUDIT_ARCH_X86_64,
            Arch::X86 => arch::AUDIT_ARCH_I386,
            Arch::Aarch64 => arch::AUDIT_ARCH_AARCH64,
            Arch::Arm => arch::AUDIT_ARCH_ARM,
        }
    }

    /// Syscall number on this architecture, if the syscall exists there
    pub fn syscall_number(&self, name: &str) -> Option<u32> {
        match self {
            Arch::X86_64 => x86_64_syscall(name),
            Arch::X86 => i386_syscall(name),
            Arch::Aarch64 => aarch64_syscall(name),
            Arch::Arm => arm_syscall(name),
        }
    }
}

fn x86_64_syscall(name: &str) -> Option<u32> {
    Some(match name {
        "ioctl" => 16,
        "socket" => 41,
        "clone" => 56,
        "ptrace" => 101,
        "syslog" => 103,
        "uselib" => 134,
        "personality" => 135,
        "modify_ldt" => 154,
        "pivot_root" => 155,
        "acct" => 163,
        "mount" => 165,
        "quotactl" => 179,
        "mbind" => 237,
        "set_mempolicy" => 238,
        "get_mempolicy" => 239,
        "add_key" => 248,
        "request_key" => 249,
        "keyctl" => 250,
        "migrate_pages" => 256,
        "unshare" => 272,
        "move_pages" => 279,
        "perf_event_open" => 298,
        "clone3" => 435,
        _ => return None,
    })
}

fn i386_syscall(name: &str) -> Option<u32> {
    Some(match name {
        "mount" => 21,
        "ptrace" => 26,
        "acct" => 51,
        "ioctl" => 54,
        "uselib" => 86,
        "syslog" => 103,
        "clone" => 120,
        "modify_ldt" => 123,
        "quotactl" => 131,
        "personality" => 136,
        "pivot_root" => 217,
        "mbind" => 274,
        "get_mempolicy" => 275,
        "set_mempolicy" => 276,
        "add_key" => 286,
        "request_key" => 287,
        "keyctl" => 288,
        "migrate_pages" => 294,
        "unshare" => 310,
        "move_pages" => 317,
        "perf_event_open" => 336,
        "socket" => 359,
        "clone3" => 435,
        _ => return None,
    })
}

fn aarch64_syscall(name: &str) -> Option<u32> {
    Some(match name {
        "ioctl" => 29,
        "mount" => 40,
        "pivot_root" => 41,
        "quotactl" => 60,
        "acct" => 89,
        "personality" => 92,
        "unshare" => 97,
        "syslog" => 116,
        "ptrace" => 117,
        "socket" => 198,
        "add_key" => 217,
        "request_key" => 218,
        "keyctl" => 219,
        "clone" => 220,
        "mbind" => 235,
        "get_mempolicy" => 236,
        "set_mempolicy" => 237,
        "migrate_pages" => 238,
        "move_pages" => 239,
        "perf_event_open" => 241,
        "clone3" => 435,
        _ => return None,
    })
}

fn arm_syscall(name: &str) -> Option<u32> {
    Some(match name {
        "mount" => 21,
        "ptrace" => 26,
        "acct" => 51,
        "ioctl" => 54,
        "uselib" => 86,
        "syslog" => 103,
        "clone" => 120,
        "quotactl" => 131,
        "personality" => 136,
        "pivot_root" => 218,
        "socket" => 281,
        "add_key" => 309,
        "request_key" => 310,
        "keyctl" => 311,
        "mbind" => 319,
        "get_mempolicy" => 320,
        "set_mempolicy" => 321,
        "unshare" => 337,
        "move_pages" => 344,
        "perf_event_open" => 364,
        "clone3" => 435,
        _ => return None,
    })
}

/// Offset of the low 32 bits of `args[arg]`
fn arg_low_offset(arg: u8) -> Option<u32> {
    if arg > 5 {
        return None;
    }
    let base = data::ARGS + 8 * u32::from(arg);
    if cfg!(target_endian = "big") {
        Some(base + 4)
    } else {
        Some(base)
    }
}

/// BPF filter compiler
pub struct SeccompCompiler;

impl SeccompCompiler {
    /// Compile a filter to BPF instructions
    pub fn compile(filter: &SeccompFilter) -> Result<Vec<BpfInstr>> {
        let sections = filter
            .arches()
            .iter()
            .map(|a| Self::compile_arch(filter, *a))
            .collect::<Result<Vec<_>>>()?;

        let header_len = 1 + 2 * sections.len() + 1;
        let mut instrs = Vec::with_capacity(
            header_len + sections.iter().map(Vec::len).sum::<usize>(),
        );

        instrs.push(BpfInstr::stmt(ops::LD_W_ABS, data::ARCH));

        let mut section_start = header_len;
        for (arch, section) in filter.arches().iter().zip(&sections) {
            instrs.push(BpfInstr::jump(ops::JMP_JEQ_K, arch.audit_arch(), 0, 1));
            let ja_index = instrs.len();
            let offset = (section_start - (ja_index + 1)) as u32;
            instrs.push(BpfInstr::stmt(ops::JMP_JA, offset));
            section_start += section.len();
        }

        // Reject architectures the filter does not know about
        instrs.push(BpfInstr::stmt(
            ops::RET_K,
            actions::SECCOMP_RET_KILL_PROCESS,
        ));

        for section in sections {
            instrs.extend(section);
        }

        if instrs.len() > MAX_INSTRUCTIONS {
            return Err(ThumbnailError::SandboxSetup(format!(
                "seccomp program too long: {} instructions",
                instrs.len()
            )));
        }

        Ok(instrs)
    }

    fn compile_arch(filter: &SeccompFilter, arch: Arch) -> Result<Vec<BpfInstr>> {
        let mut instrs = vec![BpfInstr::stmt(ops::LD_W_ABS, data::NR)];

        if arch == Arch::X86_64 {
            instrs.push(BpfInstr::jump(ops::JMP_JGE_K, X32_SYSCALL_BIT, 0, 1));
            instrs.push(BpfInstr::stmt(
                ops::RET_K,
                actions::SECCOMP_RET_KILL_PROCESS,
            ));
        }

        for rule in filter.rules() {
            let Some(nr) = arch.syscall_number(rule.syscall) else {
                if rule.best_effort {
                    warn!(
                        "Skipping seccomp rule for {} on {:?}: no such syscall",
                        rule.syscall, arch
                    );
                } else {
                    debug!("{} does not exist on {:?}, nothing to block", rule.syscall, arch);
                }
                continue;
            };

            match Self::compile_rule(rule, nr) {
                Ok(block) => instrs.extend(block),
                Err(e) if rule.best_effort => {
                    warn!("Skipping seccomp rule for {} on {:?}: {}", rule.syscall, arch, e);
                }
                Err(e) => return Err(e),
            }
        }

        instrs.push(BpfInstr::stmt(ops::RET_K, actions::SECCOMP_RET_ALLOW));
        Ok(instrs)
    }

    /// Compile one rule. The accumulator holds the syscall number on entry
    /// and again on fall-through.
    fn compile_rule(rule: &SyscallRule, nr: u32) -> Result<Vec<BpfInstr>> {
        let deny = BpfInstr::stmt(ops::RET_K, actions::errno(rule.errno));

        let body = match &rule.condition {
            None => vec![deny],
            Some(condition) => {
                let arg = match condition {
                    ArgCondition::MaskedEq { arg, .. } | ArgCondition::NotIn { arg, .. } => *arg,
                };
                let offset = arg_low_offset(arg).ok_or_else(|| {
                    ThumbnailError::SandboxSetup(format!("invalid syscall argument index {}", arg))
                })?;

                let mut body = vec![BpfInstr::stmt(ops::LD_W_ABS, offset)];
                match condition {
                    ArgCondition::MaskedEq { mask, value, .. } => {
                        if *mask != u32::MAX {
                            body.push(BpfInstr::stmt(ops::ALU_AND_K, *mask));
                        }
                        body.push(BpfInstr::jump(ops::JMP_JEQ_K, *value, 0, 1));
                    }
                    ArgCondition::NotIn { values, .. } => {
                        // A match jumps over the remaining compares and the deny
                        let count = values.len();
                        for (i, value) in values.iter().enumerate() {
                            let jt = jump_offset(count - i)?;
                            body.push(BpfInstr::jump(ops::JMP_JEQ_K, *value, jt, 0));
                        }
                    }
                }
                body.push(deny);
                body.push(BpfInstr::stmt(ops::LD_W_ABS, data::NR));
                body
            }
        };

        let mut block = Vec::with_capacity(body.len() + 1);
        block.push(BpfInstr::jump(ops::JMP_JEQ_K, nr, 0, jump_offset(body.len())?));
        block.extend(body);
        Ok(block)
    }

    /// Serialize instructions as the kernel's `struct sock_filter` array
    pub fn to_bytes(instrs: &[BpfInstr]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(instrs.len() * 8);
        for instr in instrs {
            bytes.extend_from_slice(&instr.code.to_ne_bytes());
            bytes.push(instr.jt);
            bytes.push(instr.jf);
            bytes.extend_from_slice(&instr.k.to_ne_bytes());
        }
        bytes
    }

    /// Compile the filter into an anonymous, already unlinked file and
    /// return its descriptor rewound to offset zero.
    pub fn export(filter: &SeccompFilter) -> Result<OwnedFd> {
        let instrs = Self::compile(filter)?;
        let bytes = Self::to_bytes(&instrs);

        let mut file = tempfile::tempfile().map_err(|e| {
            ThumbnailError::SandboxSetup(format!("cannot create seccomp program file: {}", e))
        })?;
        file.write_all(&bytes)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .map_err(|e| {
                ThumbnailError::SandboxSetup(format!("cannot export seccomp program: {}", e))
            })?;

        debug!(
            "Exported seccomp program: {} instructions for {:?}",
            instrs.len(),
            filter.arches()
        );
        Ok(OwnedFd::from(file))
    }

    /// Install the filter on the calling thread.
    /// Only `PR_SET_NO_NEW_PRIVS` is needed, not root.
    pub fn install(filter: &SeccompFilter) -> Result<()> {
        let instrs = Self::compile(filter)?;
        Self::install_program(&instrs)
    }

    /// Install an already compiled program. Does not allocate, so it is
    /// usable in a freshly forked child.
    pub fn install_program(instrs: &[BpfInstr]) -> Result<()> {
        if instrs.is_empty() || instrs.len() > MAX_INSTRUCTIONS {
            return Err(ThumbnailError::SandboxSetup(
                "invalid seccomp program length".to_string(),
            ));
        }

        // BpfInstr has the layout of struct sock_filter
        let prog = libc::sock_fprog {
            len: instrs.len() as libc::c_ushort,
            filter: instrs.as_ptr() as *mut libc::sock_filter,
        };

        unsafe {
            if libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) != 0 {
                return Err(ThumbnailError::SandboxSetup(format!(
                    "Failed to set PR_SET_NO_NEW_PRIVS: {}",
                    std::io::Error::last_os_error()
                )));
            }

            if libc::prctl(
                libc::PR_SET_SECCOMP,
                libc::SECCOMP_MODE_FILTER,
                &prog as *const libc::sock_fprog,
            ) != 0
            {
                return Err(ThumbnailError::SandboxSetup(format!(
                    "Failed to load seccomp filter: {}",
                    std::io::Error::last_os_error()
                )));
            }
        }

        Ok(())
    }
}

fn jump_offset(n: usize) -> Result<u8> {
    u8::try_from(n)
        .map_err(|_| ThumbnailError::SandboxSetup(format!("BPF jump out of range: {}", n)))
}
