//! Namespace launcher (bubblewrap) argument builder

use crate::config::EngineConfig;
use log::debug;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::os::fd::RawFd;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Top-level directories that may be merged into `/usr` on the host
pub const LEGACY_DIRS: &[&str] = &["bin", "lib64", "lib", "sbin"];

/// Dynamic linker cache
pub const LD_SO_CACHE: &str = "/etc/ld.so.cache";

/// Where the host temp directory appears inside the sandbox
pub const SANDBOX_TMP: &str = "/tmp";

/// `PATH` inside the sandbox; the parent environment is not inherited
pub const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Builds the launcher prefix that wraps a thumbnailer command
#[derive(Debug, Clone)]
pub struct NamespaceSandboxBuilder {
    launcher: PathBuf,
    env_allowlist: Vec<String>,
    install_prefix: Option<PathBuf>,
    fontconfig_cache: PathBuf,
    host_root: PathBuf,
}

impl NamespaceSandboxBuilder {
    /// Builder with no forwarded environment and no extra binds
    pub fn new(launcher: impl AsRef<Path>) -> Self {
        Self {
            launcher: launcher.as_ref().to_path_buf(),
            env_allowlist: Vec::new(),
            install_prefix: None,
            fontconfig_cache: PathBuf::from("/var/cache/fontconfig"),
            host_root: PathBuf::from("/"),
        }
    }

    /// Builder for an engine configuration and a resolved launcher
    pub fn from_config(config: &EngineConfig, launcher: &Path) -> Self {
        let mut builder = Self::new(launcher)
            .env_allowlist(&config.env_allowlist)
            .fontconfig_cache(&config.fontconfig_cache);
        builder.install_prefix = config.install_prefix.clone();
        builder
    }

    /// Set the environment variables forwarded from the parent
    pub fn env_allowlist(mut self, names: &[String]) -> Self {
        self.env_allowlist = names.to_vec();
        self
    }

    /// Re-expose an install prefix read-only
    pub fn install_prefix(mut self, prefix: impl AsRef<Path>) -> Self {
        self.install_prefix = Some(prefix.as_ref().to_path_buf());
        self
    }

    /// Set fontconfig cache directory
    pub fn fontconfig_cache(mut self, path: impl AsRef<Path>) -> Self {
        self.fontconfig_cache = path.as_ref().to_path_buf();
        self
    }

    /// Inspect legacy directories below another root
    #[cfg(test)]
    pub(crate) fn host_root(mut self, root: impl AsRef<Path>) -> Self {
        self.host_root = root.as_ref().to_path_buf();
        self
    }

    /// Assemble `bwrap ... --seccomp <fd> --`.
    ///
    /// `temp_dir` is bound to `/tmp`; `host_input` is bound read-only at
    /// `sandbox_input`, which must live under `/tmp`. Paths and forwarded
    /// values are passed without re-encoding.
    pub fn build(
        &self,
        temp_dir: &Path,
        host_input: &Path,
        sandbox_input: &Path,
        seccomp_fd: RawFd,
    ) -> Vec<OsString> {
        let mut args = vec![self.launcher.clone().into_os_string()];

        push(&mut args, &["--ro-bind", "/usr", "/usr"]);
        push(&mut args, &["--ro-bind-try", LD_SO_CACHE, LD_SO_CACHE]);

        for dir in LEGACY_DIRS {
            self.push_legacy_dir(&mut args, dir);
        }

        if self.fontconfig_cache.starts_with("/usr") {
            debug!(
                "Fontconfig cache {} is already under /usr",
                self.fontconfig_cache.display()
            );
        } else {
            let cache = self.fontconfig_cache.as_os_str();
            push(&mut args, &[OsStr::new("--ro-bind-try"), cache, cache]);
        }

        push(
            &mut args,
            &[
                "--proc",
                "/proc",
                "--dev",
                "/dev",
                "--chdir",
                "/",
                "--clearenv",
                "--setenv",
                "PATH",
                SANDBOX_PATH,
                "--setenv",
                "GIO_USE_VFS",
                "local",
                "--unshare-all",
                "--die-with-parent",
            ],
        );

        for name in &self.env_allowlist {
            match std::env::var_os(name) {
                Some(value) => push(
                    &mut args,
                    &[OsStr::new("--setenv"), OsStr::new(name), value.as_os_str()],
                ),
                None => debug!("{} not set, not forwarded", name),
            }
        }

        if let Some(prefix) = &self.install_prefix {
            if !prefix.starts_with("/usr") {
                let prefix = prefix.as_os_str();
                push(&mut args, &[OsStr::new("--ro-bind-try"), prefix, prefix]);
            }
        }

        push(
            &mut args,
            &[OsStr::new("--bind"), temp_dir.as_os_str(), OsStr::new(SANDBOX_TMP)],
        );
        push(
            &mut args,
            &[
                OsStr::new("--ro-bind"),
                host_input.as_os_str(),
                sandbox_input.as_os_str(),
            ],
        );

        let fd = seccomp_fd.to_string();
        push(&mut args, &["--seccomp", fd.as_str(), "--"]);
        args
    }

    fn push_legacy_dir(&self, args: &mut Vec<OsString>, dir: &str) {
        let host_dir = self.host_root.join(dir);
        let usr_dir = self.host_root.join("usr").join(dir);

        if fs::metadata(&host_dir).is_err() {
            debug!("{} does not exist, skipping", host_dir.display());
            return;
        }

        let target = format!("/{}", dir);
        if same_file(&host_dir, &usr_dir) {
            let link = format!("usr/{}", dir);
            push(args, &["--symlink", link.as_str(), target.as_str()]);
        } else {
            push(args, &["--ro-bind", target.as_str(), target.as_str()]);
        }
    }
}

/// Both paths resolve to the same device and inode
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

fn push<S: AsRef<OsStr>>(args: &mut Vec<OsString>, items: &[S]) {
    args.extend(items.iter().map(|s| s.as_ref().to_os_string()));
}
