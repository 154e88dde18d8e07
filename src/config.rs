//! Engine configuration

use crate::capabilities::SandboxCapability;
use crate::errors::{Result, ThumbnailError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Whether thumbnailers run inside the sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxPolicy {
    /// Sandbox whenever the system supports it
    #[default]
    Auto,
    /// Always sandbox; refuse to run when the sandbox is unavailable
    Always,
    /// Never sandbox (development only)
    Never,
}

impl SandboxPolicy {
    /// Decide whether one execution is sandboxed.
    ///
    /// `Always` never degrades: a missing capability is an error.
    pub fn resolve(&self, caps: &SandboxCapability) -> Result<bool> {
        match self {
            SandboxPolicy::Never => Ok(false),
            SandboxPolicy::Auto => Ok(caps.is_usable()),
            SandboxPolicy::Always => caps.probe().map(|_| true),
        }
    }
}

/// Configuration shared by every execution of an [`Engine`](crate::Engine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sandbox policy
    pub sandbox: SandboxPolicy,
    /// Developer mode: allow profiling and tracing syscalls in the sandbox
    pub devel: bool,
    /// Sandbox launcher program
    pub bwrap: PathBuf,
    /// Environment variables forwarded into the sandbox
    pub env_allowlist: Vec<String>,
    /// Install location re-exposed read-only inside the sandbox
    pub install_prefix: Option<PathBuf>,
    /// Fontconfig cache directory
    pub fontconfig_cache: PathBuf,
    /// Kill the thumbnailer after this long
    #[serde(with = "timeout_secs")]
    pub timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxPolicy::Auto,
            devel: false,
            bwrap: PathBuf::from("bwrap"),
            env_allowlist: vec![
                "G_MESSAGES_DEBUG".to_string(),
                "G_MESSAGES_PREFIXED".to_string(),
            ],
            install_prefix: None,
            fontconfig_cache: PathBuf::from("/var/cache/fontconfig"),
            timeout: None,
        }
    }
}

impl EngineConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ThumbnailError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON document
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| ThumbnailError::InvalidConfig(e.to_string()))
    }

    /// Set sandbox policy
    pub fn sandbox(mut self, policy: SandboxPolicy) -> Self {
        self.sandbox = policy;
        self
    }

    /// Enable or disable developer mode
    pub fn devel(mut self, devel: bool) -> Self {
        self.devel = devel;
        self
    }

    /// Set sandbox launcher program
    pub fn bwrap(mut self, program: impl AsRef<Path>) -> Self {
        self.bwrap = program.as_ref().to_path_buf();
        self
    }

    /// Forward an additional environment variable into the sandbox
    pub fn allow_env(mut self, name: &str) -> Self {
        if !self.env_allowlist.iter().any(|n| n == name) {
            self.env_allowlist.push(name.to_string());
        }
        self
    }

    /// Set install prefix
    pub fn install_prefix(mut self, path: impl AsRef<Path>) -> Self {
        self.install_prefix = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set timeout
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

mod timeout_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(d)?;
        match secs {
            Some(s) if s.is_finite() && s > 0.0 => Ok(Some(Duration::from_secs_f64(s))),
            Some(s) => Err(serde::de::Error::custom(format!(
                "timeout must be a positive number of seconds, got {s}"
            ))),
            None => Ok(None),
        }
    }
}
