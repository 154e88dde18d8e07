//! Runtime detection of sandbox tooling
//!
//! Probes the host once to decide whether thumbnailers can be wrapped in
//! bubblewrap. Nothing here is cached globally: the result lives in the
//! [`Engine`](crate::Engine) that asked for it.

use crate::errors::{Result, ThumbnailError};
use std::path::{Path, PathBuf};

/// Marker file present inside every flatpak sandbox
const FLATPAK_INFO: &str = "/.flatpak-info";

/// Detected sandbox capability of the running system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxCapability {
    /// Resolved sandbox launcher, if one was found on `PATH`
    pub launcher: Option<PathBuf>,
    /// Unprivileged user namespaces are available
    pub user_namespaces: bool,
    /// This process already runs inside an equivalent confinement
    pub confined: bool,
}

impl SandboxCapability {
    /// Detect the capability for the given launcher program
    pub fn detect(launcher: &Path) -> Self {
        Self {
            launcher: detect_launcher(launcher),
            user_namespaces: detect_user_namespaces(),
            confined: detect_confinement(),
        }
    }

    /// A capability that never sandboxes
    pub fn unavailable() -> Self {
        Self {
            launcher: None,
            user_namespaces: false,
            confined: false,
        }
    }

    /// Whether thumbnailers can be sandboxed here.
    ///
    /// Namespaces cannot be nested reliably, so an already confined process
    /// never tries.
    pub fn is_usable(&self) -> bool {
        self.launcher.is_some() && !self.confined
    }

    /// Return the launcher to use, or explain why there is none
    pub fn probe(&self) -> Result<&Path> {
        if self.confined {
            return Err(ThumbnailError::SandboxSetup(
                "process is already confined, cannot nest namespaces".to_string(),
            ));
        }
        self.launcher.as_deref().ok_or_else(|| {
            ThumbnailError::SandboxSetup("sandbox launcher (bwrap) not found on PATH".to_string())
        })
    }

    /// Get a human-readable summary of capabilities
    pub fn summary(&self) -> String {
        let check = |available: bool| if available { "[ok]" } else { "[--]" };

        let launcher = match &self.launcher {
            Some(path) => format!("{} Sandbox launcher ({})", check(true), path.display()),
            None => format!("{} Sandbox launcher", check(false)),
        };

        [
            launcher,
            format!("{} User namespaces", check(self.user_namespaces)),
            format!("{} Not already confined", check(!self.confined)),
            format!("{} Sandboxing usable", check(self.is_usable())),
        ]
        .join("\n")
    }
}

fn detect_launcher(launcher: &Path) -> Option<PathBuf> {
    which::which(launcher).ok()
}

fn detect_user_namespaces() -> bool {
    if let Ok(content) = std::fs::read_to_string("/proc/sys/kernel/unprivileged_userns_clone") {
        if content.trim() == "0" {
            return false;
        }
    }

    if let Ok(content) = std::fs::read_to_string("/proc/sys/user/max_user_namespaces") {
        if let Ok(max) = content.trim().parse::<u64>() {
            return max > 0;
        }
    }

    // Unreadable on some kernels; assume available
    true
}

fn detect_confinement() -> bool {
    Path::new(FLATPAK_INFO).is_file()
}
