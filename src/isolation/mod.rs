//! Isolation layer: bubblewrap namespaces + seccomp filtering
//!
//! - **seccomp**: default-allow syscall blacklist for thumbnailers
//! - **seccomp_bpf**: hand-assembled BPF program, exported to a descriptor
//! - **bwrap**: argument vector for the namespace launcher
//!
//! # Examples
//!
//! ```ignore
//! use thumbnail_sandbox::isolation::{SeccompCompiler, SeccompFilter};
//!
//! let filter = SeccompFilter::thumbnailer(false)?;
//! let fd = SeccompCompiler::export(&filter)?;
//! ```

pub mod bwrap;
pub mod seccomp;
pub mod seccomp_bpf;
pub use bwrap::NamespaceSandboxBuilder;
pub use seccomp::{ArgCondition, SeccompFilter, SyscallRule};
pub use seccomp_bpf::{Arch, SeccompCompiler};

#[cfg(test)]
mod tests;
