//! Seccomp filter policy for thumbnailers
//!
//! The filter is a blacklist on top of a default-allow policy: thumbnailers
//! are arbitrary third-party programs, so an allowlist would break them, but a
//! handful of syscalls are never needed to render a preview and have a long
//! history of privilege-escalation and information-disclosure bugs.

use super::seccomp_bpf::Arch;
use crate::errors::{Result, ThumbnailError};
use log::debug;

/// `CLONE_NEWUSER` flag of `clone(2)`
pub const CLONE_NEWUSER: u32 = libc::CLONE_NEWUSER as u32;

/// `TIOCSTI` ioctl request (push bytes into the terminal input queue)
pub const TIOCSTI: u32 = 0x5412;

/// Syscalls denied with `EPERM` in every mode
pub const BLOCKED_SYSCALLS: &[&str] = &[
    // Kernel log
    "syslog",
    // Obsolete, only useful for exploiting a.out loaders
    "uselib",
    // Execution domain switching
    "personality",
    // Process accounting
    "acct",
    // 16-bit segments; historic source of info leaks
    "modify_ldt",
    // Quota queries
    "quotactl",
    // Kernel keyring
    "add_key",
    "keyctl",
    "request_key",
    // NUMA / VM introspection
    "move_pages",
    "mbind",
    "get_mempolicy",
    "set_mempolicy",
    "migrate_pages",
    // No nested namespace or mount setups
    "unshare",
    "mount",
    "pivot_root",
];

/// Profiling and tracing syscalls, only allowed in developer mode
pub const PROFILING_SYSCALLS: &[&str] = &["perf_event_open", "ptrace"];

/// Socket address families the sandbox may create
pub const ALLOWED_SOCKET_FAMILIES: &[u32] = &[
    libc::AF_UNIX as u32,
    libc::AF_INET as u32,
    libc::AF_INET6 as u32,
    libc::AF_NETLINK as u32,
];

/// Condition on one syscall argument, compared on its low 32 bits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgCondition {
    /// `args[arg] & mask == value`
    MaskedEq { arg: u8, mask: u32, value: u32 },
    /// `args[arg]` is none of `values`
    NotIn { arg: u8, values: Vec<u32> },
}

/// One deny rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallRule {
    /// Syscall name, resolved per architecture at compile time
    pub syscall: &'static str,
    /// errno returned to the caller
    pub errno: i32,
    /// Optional argument condition
    pub condition: Option<ArgCondition>,
    /// Skip (instead of failing) when the rule cannot be expressed on an architecture
    pub best_effort: bool,
}

impl SyscallRule {
    /// Deny unconditionally
    pub fn deny(syscall: &'static str, errno: i32) -> Self {
        Self {
            syscall,
            errno,
            condition: None,
            best_effort: false,
        }
    }

    /// Deny when the argument condition holds
    pub fn deny_if(syscall: &'static str, errno: i32, condition: ArgCondition) -> Self {
        Self {
            syscall,
            errno,
            condition: Some(condition),
            best_effort: false,
        }
    }

    fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }
}

/// Default-allow seccomp filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeccompFilter {
    arches: Vec<Arch>,
    rules: Vec<SyscallRule>,
}

impl SeccompFilter {
    /// Empty filter for the given native architecture
    pub fn new(native: Arch) -> Self {
        Self {
            arches: vec![native],
            rules: Vec::new(),
        }
    }

    /// Empty filter for `native`, including its 32-bit compatibility
    /// architecture when the kernel may run both
    pub fn for_arch(native: Arch) -> Self {
        let mut filter = Self::new(native);
        if let Some(compat) = native.compat() {
            filter.add_arch(compat);
        }
        filter
    }

    /// Empty filter for the running architecture
    pub fn for_host() -> Result<Self> {
        let native = Arch::native().ok_or_else(|| {
            ThumbnailError::SandboxSetup(format!(
                "unsupported architecture: {}",
                std::env::consts::ARCH
            ))
        })?;
        Ok(Self::for_arch(native))
    }

    /// Filter installed around every thumbnailer on this host
    pub fn thumbnailer(devel: bool) -> Result<Self> {
        let native = Self::for_host()?.native_arch();
        Ok(Self::thumbnailer_for(native, devel))
    }

    /// Thumbnailer filter for a given native architecture
    pub fn thumbnailer_for(native: Arch, devel: bool) -> Self {
        let mut filter = Self::for_arch(native);

        for syscall in BLOCKED_SYSCALLS {
            filter.add_rule(SyscallRule::deny(syscall, libc::EPERM));
        }

        filter.add_rule(SyscallRule::deny_if(
            "clone",
            libc::EPERM,
            ArgCondition::MaskedEq {
                arg: 0,
                mask: CLONE_NEWUSER,
                value: CLONE_NEWUSER,
            },
        ));
        // clone3 passes its flags in memory; make libc fall back to clone
        filter.add_rule(SyscallRule::deny("clone3", libc::ENOSYS));

        // Terminal input injection (CVE-2017-5226)
        filter.add_rule(SyscallRule::deny_if(
            "ioctl",
            libc::EPERM,
            ArgCondition::MaskedEq {
                arg: 1,
                mask: 0xFFFF_FFFF,
                value: TIOCSTI,
            },
        ));

        if devel {
            debug!("Developer mode: profiling syscalls stay allowed in the sandbox");
        } else {
            for syscall in PROFILING_SYSCALLS {
                filter.add_rule(SyscallRule::deny(syscall, libc::EPERM));
            }
        }

        filter.add_rule(
            SyscallRule::deny_if(
                "socket",
                libc::EAFNOSUPPORT,
                ArgCondition::NotIn {
                    arg: 0,
                    values: ALLOWED_SOCKET_FAMILIES.to_vec(),
                },
            )
            .best_effort(),
        );

        filter
    }

    /// Apply the filter to an additional architecture
    pub fn add_arch(&mut self, arch: Arch) {
        if !self.arches.contains(&arch) {
            self.arches.push(arch);
        }
    }

    /// Add a deny rule
    pub fn add_rule(&mut self, rule: SyscallRule) {
        self.rules.push(rule);
    }

    /// Native architecture
    pub fn native_arch(&self) -> Arch {
        self.arches[0]
    }

    /// Architectures covered by the filter, native first
    pub fn arches(&self) -> &[Arch] {
        &self.arches
    }

    /// Deny rules in insertion order
    pub fn rules(&self) -> &[SyscallRule] {
        &self.rules
    }

    /// Check whether a syscall has any deny rule
    pub fn is_blocked(&self, name: &str) -> bool {
        self.rules.iter().any(|r| r.syscall == name)
    }
}
